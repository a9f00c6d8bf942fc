//! Per-column substitution log-likelihoods by pruning.
//!
//! Works on an [`ExpandedAlignment`]: for each column, probability vectors
//! over the alphabet are seeded at the relevant nodes (one-hot for an
//! observed character, all-ones for a present node with unknown character)
//! and combined up the column's Match branches. Branches outside the
//! column's relevance sets contribute an exact factor of one and are never
//! visited. The root distribution is applied at the node where the column
//! was born.
//!
//! Vectors are rescaled by their maximum after every combine, with the log
//! of the factor accumulated separately, so long paths cannot underflow;
//! the rescaling is exact, not an approximation.

use std::thread;

use tracing::debug;

use crate::cigar::{is_gap, WILDCARD};
use crate::errors::{CanopyError, Result};
use crate::expand::ExpandedAlignment;
use crate::matrix::{transition_matrix, Matrix};
use crate::model::{Alphabet, MixtureComponent};

/// One cell of the expanded alignment, tokenized against the alphabet.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Cell {
    Absent,
    Unknown,
    Token(usize),
}

/// Precomputed per-evaluation state shared by all columns.
struct Engine<'a> {
    expanded: &'a ExpandedAlignment,
    component: &'a MixtureComponent,
    cells: Vec<Vec<Cell>>,
    trans: Vec<Matrix>,
    /// Parent index per node; the root maps to itself and is never looked up
    /// because validated relevance sets exclude it from branch lists.
    parent_of: Vec<usize>,
    n_states: usize,
}

impl<'a> Engine<'a> {
    fn new(
        expanded: &'a ExpandedAlignment,
        alphabet: &Alphabet,
        component: &'a MixtureComponent,
    ) -> Result<Self> {
        component.validate(alphabet.len())?;
        check_shape(expanded)?;

        let mut cells = Vec::with_capacity(expanded.n_rows());
        for (node, row) in expanded.rows.iter().enumerate() {
            let mut row_cells = Vec::with_capacity(expanded.n_cols());
            for c in row.chars() {
                let cell = if is_gap(c) {
                    Cell::Absent
                } else if c == WILDCARD {
                    Cell::Unknown
                } else {
                    Cell::Token(
                        alphabet
                            .token(c)
                            .ok_or(CanopyError::UnknownSymbol { symbol: c, node })?,
                    )
                };
                row_cells.push(cell);
            }
            cells.push(row_cells);
        }

        let trans: Vec<Matrix> = expanded
            .distances
            .iter()
            .map(|&t| transition_matrix(&component.sub_rate, t))
            .collect();

        debug!(
            columns = expanded.n_cols(),
            states = alphabet.len(),
            "prepared substitution engine"
        );

        Ok(Self {
            expanded,
            component,
            cells,
            trans,
            parent_of: expanded
                .parents
                .iter()
                .enumerate()
                .map(|(ix, p)| p.unwrap_or(ix))
                .collect(),
            n_states: alphabet.len(),
        })
    }

    fn state_vector(&self, cell: Cell) -> Vec<f64> {
        match cell {
            Cell::Token(token) => {
                let mut v = vec![0.0; self.n_states];
                v[token] = 1.0;
                v
            }
            // absent or unknown characters carry no information
            Cell::Absent | Cell::Unknown => vec![1.0; self.n_states],
        }
    }

    /// Log-likelihood of a single column. `like` is per-caller scratch with
    /// one slot per node; only slots in the column's relevance sets are used.
    fn column(&self, col: usize, like: &mut [Vec<f64>]) -> f64 {
        let column = &self.expanded.columns[col];

        for &ix in column.leaves.iter().chain(&column.internals) {
            like[ix] = self.state_vector(self.cells[ix][col]);
        }

        let mut log_norm = 0.0;
        for &child in &column.branches {
            let message = self.trans[child].mul_vec(&like[child]);
            let parent_vec = &mut like[self.parent_of[child]];
            for (p, m) in parent_vec.iter_mut().zip(&message) {
                *p *= m;
            }

            let max = parent_vec.iter().fold(0.0f64, |a, &b| a.max(b));
            if max > 0.0 && max.is_finite() {
                for p in parent_vec.iter_mut() {
                    *p /= max;
                }
                log_norm += max.ln();
            }
        }

        let birth = self.expanded.root_by_column[col];
        let dot: f64 = self
            .component
            .root_prob
            .iter()
            .zip(&like[birth])
            .map(|(r, l)| r * l)
            .sum();
        log_norm + dot.ln()
    }
}

fn check_shape(expanded: &ExpandedAlignment) -> Result<()> {
    let n_rows = expanded.n_rows();
    let n_cols = expanded.n_cols();

    if expanded.parents.len() != n_rows || expanded.distances.len() != n_rows {
        return Err(CanopyError::InconsistentHistory(format!(
            "{n_rows} rows but {} parent and {} distance entries",
            expanded.parents.len(),
            expanded.distances.len()
        )));
    }
    if expanded.root_by_column.len() != n_cols {
        return Err(CanopyError::InconsistentHistory(format!(
            "{n_cols} columns but {} birth-node entries",
            expanded.root_by_column.len()
        )));
    }
    for (ix, row) in expanded.rows.iter().enumerate() {
        if row.chars().count() != n_cols {
            return Err(CanopyError::InconsistentHistory(format!(
                "row {ix} has {} characters, expected {n_cols}",
                row.chars().count()
            )));
        }
    }
    for (col, column) in expanded.columns.iter().enumerate() {
        for &ix in column
            .leaves
            .iter()
            .chain(&column.internals)
            .chain(&column.branches)
        {
            if ix >= n_rows {
                return Err(CanopyError::InconsistentHistory(format!(
                    "column {col} references node {ix} of {n_rows}"
                )));
            }
        }
        for &child in &column.branches {
            if expanded.parents[child].is_none() {
                return Err(CanopyError::InconsistentHistory(format!(
                    "column {col} lists the root as a branch child"
                )));
            }
        }
        if expanded.root_by_column[col] >= n_rows {
            return Err(CanopyError::InconsistentHistory(format!(
                "column {col} born at node {} of {n_rows}",
                expanded.root_by_column[col]
            )));
        }
    }
    Ok(())
}

/// Substitution log-likelihood of every column, in column order.
pub fn sub_log_like(
    expanded: &ExpandedAlignment,
    alphabet: &Alphabet,
    component: &MixtureComponent,
) -> Result<Vec<f64>> {
    let engine = Engine::new(expanded, alphabet, component)?;
    let mut like = vec![Vec::new(); expanded.n_rows()];
    Ok((0..expanded.n_cols())
        .map(|col| engine.column(col, &mut like))
        .collect())
}

/// Like [`sub_log_like`], fanning independent columns out over `n_threads`
/// worker threads. Per-column values are reassembled in column order, so the
/// output is identical to the serial path for any thread count.
pub fn sub_log_like_threaded(
    expanded: &ExpandedAlignment,
    alphabet: &Alphabet,
    component: &MixtureComponent,
    n_threads: usize,
) -> Result<Vec<f64>> {
    if n_threads <= 1 {
        return sub_log_like(expanded, alphabet, component);
    }

    let engine = Engine::new(expanded, alphabet, component)?;
    let n_rows = expanded.n_rows();
    let n_cols = expanded.n_cols();

    let (work_tx, work_rx) = crossbeam_channel::unbounded();
    let (out_tx, out_rx) = crossbeam_channel::unbounded();
    for col in 0..n_cols {
        // cannot fail: the receiver outlives this loop
        let _ = work_tx.send(col);
    }
    drop(work_tx);

    let mut values = vec![0.0; n_cols];
    thread::scope(|scope| {
        for _ in 0..n_threads {
            let work_rx = work_rx.clone();
            let out_tx = out_tx.clone();
            let engine = &engine;
            scope.spawn(move || {
                let mut like = vec![Vec::new(); n_rows];
                while let Ok(col) = work_rx.recv() {
                    if out_tx.send((col, engine.column(col, &mut like))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx);

        while let Ok((col, value)) = out_rx.recv() {
            values[col] = value;
        }
    });

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cigar::{Cigar, CigarTree};
    use crate::expand::expand;
    use crate::model::normalize_rate_matrix;
    use crate::tree::{Tree, TreeNode};
    use smallvec::SmallVec;

    fn node(name: Option<&str>, parent: Option<usize>, children: &[u32], distance: f64) -> TreeNode {
        TreeNode {
            name: name.map(str::to_string),
            parent,
            children: SmallVec::from_slice(children),
            distance,
        }
    }

    fn cigar(s: &str) -> Cigar {
        s.parse().unwrap()
    }

    fn dna() -> Alphabet {
        Alphabet::new("acgt").unwrap()
    }

    fn jc69() -> MixtureComponent {
        let mut raw = Matrix::zeros(4);
        for i in 0..4 {
            for j in 0..4 {
                if i != j {
                    raw.set(i, j, 1.0 / 3.0);
                }
            }
        }
        MixtureComponent {
            sub_rate: normalize_rate_matrix(&raw),
            root_prob: vec![0.25; 4],
        }
    }

    fn two_leaf_history(dist_a: f64, dist_b: f64, seq_a: &str, seq_b: &str) -> CigarTree {
        let n = seq_a.len();
        let tree = Tree::from_nodes(vec![
            node(Some("root"), None, &[1, 2], 0.0),
            node(Some("A"), Some(0), &[], dist_a),
            node(Some("B"), Some(0), &[], dist_b),
        ])
        .unwrap();
        CigarTree::from_parts(
            tree,
            vec![
                Cigar::from_ops(std::iter::repeat(crate::cigar::EditOp::Insert).take(n)),
                cigar(&format!("{n}M")),
                cigar(&format!("{n}M")),
            ],
            vec![None, Some(seq_a.to_string()), Some(seq_b.to_string())],
        )
        .unwrap()
    }

    #[test]
    fn identical_leaves_at_zero_distance_give_log_quarter() {
        let history = two_leaf_history(0.0, 0.0, "A", "A");
        let expanded = expand(&history).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 0.25f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn conflicting_leaves_at_zero_distance_are_impossible() {
        let history = two_leaf_history(0.0, 0.0, "A", "C");
        let expanded = expand(&history).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        assert_eq!(values[0], f64::NEG_INFINITY);
    }

    #[test]
    fn matches_closed_form_for_two_leaves() {
        let (t_a, t_b) = (0.1, 0.2);
        let p_same = |t: f64| 0.25 + 0.75 * (-4.0 * t / 3.0).exp();
        let p_diff = |t: f64| 0.25 - 0.25 * (-4.0 * t / 3.0).exp();

        let same = two_leaf_history(t_a, t_b, "a", "a");
        let expanded = expand(&same).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        let expected =
            (0.25 * (p_same(t_a) * p_same(t_b) + 3.0 * p_diff(t_a) * p_diff(t_b))).ln();
        assert!((values[0] - expected).abs() < 1e-9);

        let diff = two_leaf_history(t_a, t_b, "a", "c");
        let expanded = expand(&diff).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        let expected = (0.25
            * (p_same(t_a) * p_diff(t_b)
                + p_diff(t_a) * p_same(t_b)
                + 2.0 * p_diff(t_a) * p_diff(t_b)))
        .ln();
        assert!((values[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn sequence_free_leaf_is_uninformative() {
        let tree = Tree::from_nodes(vec![
            node(Some("root"), None, &[1, 2], 0.0),
            node(Some("A"), Some(0), &[], 3.7),
            node(Some("B"), Some(0), &[], 0.0),
        ])
        .unwrap();
        let history = CigarTree::from_parts(
            tree,
            vec![cigar("1I"), cigar("1M"), cigar("1M")],
            vec![None, None, Some("g".to_string())],
        )
        .unwrap();
        let expanded = expand(&history).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        // P(t) rows sum to one, so the unknown leaf drops out entirely
        assert!((values[0] - 0.25f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn column_born_below_the_root_uses_birth_node_distribution() {
        let tree = Tree::from_nodes(vec![
            node(Some("root"), None, &[1], 0.0),
            node(Some("X"), Some(0), &[2], 0.3),
            node(Some("leaf"), Some(1), &[], 0.4),
        ])
        .unwrap();
        let history = CigarTree::from_parts(
            tree,
            vec![cigar("1I"), cigar("1M1I"), cigar("2M")],
            vec![None, None, Some("ag".to_string())],
        )
        .unwrap();
        let expanded = expand(&history).unwrap();
        let values = sub_log_like(&expanded, &dna(), &jc69()).unwrap();

        // Jukes-Cantor is symmetric, so a single observed character under a
        // uniform root integrates to 1/4 no matter how long the path.
        assert_eq!(values.len(), 2);
        assert!((values[0] - 0.25f64.ln()).abs() < 1e-9);
        assert!((values[1] - 0.25f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn unknown_symbol_is_reported_with_node() {
        let history = two_leaf_history(0.1, 0.2, "A", "z");
        let expanded = expand(&history).unwrap();
        let result = sub_log_like(&expanded, &dna(), &jc69());
        assert!(matches!(
            result,
            Err(CanopyError::UnknownSymbol { symbol: 'z', node: 2 })
        ));
    }

    #[test]
    fn threaded_output_is_bit_identical_to_serial() {
        let tree = Tree::from_nodes(vec![
            node(Some("root"), None, &[1, 2], 0.0),
            node(Some("X"), Some(0), &[3, 4], 0.3),
            node(Some("C"), Some(0), &[], 0.9),
            node(Some("A"), Some(1), &[], 0.2),
            node(Some("B"), Some(1), &[], 0.1),
        ])
        .unwrap();
        let history = CigarTree::from_alignment(
            &tree,
            &[
                ("A".to_string(), "acgtacg-t".to_string()),
                ("B".to_string(), "acg-acgat".to_string()),
                ("C".to_string(), "tcgta-gat".to_string()),
            ],
        )
        .unwrap();
        let expanded = expand(&history).unwrap();

        let serial = sub_log_like(&expanded, &dna(), &jc69()).unwrap();
        let threaded = sub_log_like_threaded(&expanded, &dna(), &jc69(), 3).unwrap();

        assert_eq!(serial.len(), expanded.n_cols());
        assert!(serial.iter().all(|v| v.is_finite() && *v < 0.0));
        let serial_bits: Vec<u64> = serial.iter().map(|v| v.to_bits()).collect();
        let threaded_bits: Vec<u64> = threaded.iter().map(|v| v.to_bits()).collect();
        assert_eq!(serial_bits, threaded_bits);
    }
}
