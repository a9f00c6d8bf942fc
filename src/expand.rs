//! Expansion of a cigar tree into an explicit per-column state table.
//!
//! Expansion replays every branch cigar simultaneously, emitting alignment
//! columns one at a time. Each column is born as an Insert at some node and
//! survives along Match branches below it; everything the column never
//! reaches is padded with the gap character. Alongside the rows, expansion
//! records which nodes and branches actually carry each column, which is
//! exactly what the likelihood engines need to skip absent subtrees.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cigar::{is_gap, CigarTree, EditOp, GAP, WILDCARD};
use crate::errors::{CanopyError, Result};

/// Relevance sets for one alignment column, all as node indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnIndex {
    /// Leaves holding the column.
    pub leaves: Vec<usize>,
    /// Internal nodes holding the column, children before parents.
    pub internals: Vec<usize>,
    /// Branches the column survived, as child node indices; every branch
    /// appears after all recorded branches within its child's subtree.
    pub branches: Vec<usize>,
}

/// A cigar tree unrolled into one row per node and one entry per column.
///
/// Rows are strings over the alphabet plus [`GAP`] (absent) and [`WILDCARD`]
/// (present, character unknown). Topology arrays are copied from the tree so
/// the engines can work from this value alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpandedAlignment {
    pub rows: Vec<String>,
    pub names: Vec<Option<String>>,
    pub parents: Vec<Option<usize>>,
    pub distances: Vec<f64>,
    /// Flat op characters per node; run-length-encoding these reproduces the
    /// input cigars.
    pub expanded_cigars: Vec<String>,
    /// The node at which each column was born.
    pub root_by_column: Vec<usize>,
    pub columns: Vec<ColumnIndex>,
}

impl ExpandedAlignment {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }
}

struct Expander<'a> {
    history: &'a CigarTree,
    ops: Vec<Vec<EditOp>>,
    cigar_pos: Vec<usize>,
    seq_pos: Vec<usize>,
    seq_chars: Vec<Option<Vec<char>>>,
    rows: Vec<String>,
    row_len: Vec<usize>,
    // scratch for the column currently being emitted
    leaves: Vec<usize>,
    internals: Vec<usize>,
    branches: Vec<usize>,
}

impl<'a> Expander<'a> {
    fn new(history: &'a CigarTree) -> Self {
        let n = history.len();
        Self {
            history,
            ops: history
                .cigars()
                .iter()
                .map(|c| c.expanded().collect())
                .collect(),
            cigar_pos: vec![0; n],
            seq_pos: vec![0; n],
            seq_chars: (0..n)
                .map(|ix| history.seq(ix).map(|s| s.chars().collect()))
                .collect(),
            rows: vec![String::new(); n],
            row_len: vec![0; n],
            leaves: Vec::new(),
            internals: Vec::new(),
            branches: Vec::new(),
        }
    }

    /// The birth node of the next column: the highest-index node whose
    /// pending op is an Insert. Preorder indexing makes this the deepest
    /// one, so no node below it can still owe an Insert.
    fn next_birth(&self) -> Option<usize> {
        (0..self.ops.len())
            .rev()
            .find(|&r| self.ops[r].get(self.cigar_pos[r]) == Some(&EditOp::Insert))
    }

    /// Consume one op at `node` and, unless the column is deleted here,
    /// emit the node's character and walk its children.
    fn descend(&mut self, node: usize, deleted: bool) -> Result<()> {
        self.cigar_pos[node] += 1;
        if deleted {
            return Ok(());
        }

        match &self.seq_chars[node] {
            Some(chars) => {
                let pos = self.seq_pos[node];
                let &c = chars.get(pos).ok_or_else(|| {
                    CanopyError::InconsistentHistory(format!(
                        "sequence ended prematurely at node {node}"
                    ))
                })?;
                if is_gap(c) {
                    return Err(CanopyError::InconsistentHistory(format!(
                        "gap character in stored sequence at node {node}"
                    )));
                }
                self.rows[node].push(c);
                self.seq_pos[node] += 1;
            }
            None => self.rows[node].push(WILDCARD),
        }
        self.row_len[node] += 1;

        let children: Vec<usize> = self.history.tree().children(node).collect();
        if children.is_empty() {
            self.leaves.push(node);
        } else {
            for child in children {
                let op = self.ops[child].get(self.cigar_pos[child]).copied().ok_or_else(
                    || {
                        CanopyError::InconsistentHistory(format!(
                            "cigar ended early at node {child}"
                        ))
                    },
                )?;
                match op {
                    EditOp::Insert => {
                        return Err(CanopyError::InconsistentHistory(format!(
                            "insertion at node {child} where Match or Delete was expected"
                        )));
                    }
                    EditOp::Delete => self.descend(child, true)?,
                    EditOp::Match => {
                        self.descend(child, false)?;
                        self.branches.push(child);
                    }
                }
            }
            self.internals.push(node);
        }

        Ok(())
    }

    fn run(mut self) -> Result<ExpandedAlignment> {
        let n_rows = self.ops.len();
        let mut root_by_column = Vec::new();
        let mut columns = Vec::new();

        while let Some(birth) = self.next_birth() {
            self.descend(birth, false)?;

            root_by_column.push(birth);
            columns.push(ColumnIndex {
                leaves: std::mem::take(&mut self.leaves),
                internals: std::mem::take(&mut self.internals),
                branches: std::mem::take(&mut self.branches),
            });

            let n_cols = columns.len();
            for r in 0..n_rows {
                if self.row_len[r] < n_cols {
                    self.rows[r].push(GAP);
                    self.row_len[r] += 1;
                }
            }
        }

        for r in 0..n_rows {
            if self.cigar_pos[r] != self.ops[r].len() {
                return Err(CanopyError::InconsistentHistory(format!(
                    "cigar not fully consumed at node {r} (position {} of {})",
                    self.cigar_pos[r],
                    self.ops[r].len()
                )));
            }
            if let Some(chars) = &self.seq_chars[r] {
                if self.seq_pos[r] != chars.len() {
                    return Err(CanopyError::InconsistentHistory(format!(
                        "sequence not fully consumed at node {r} (position {} of {})",
                        self.seq_pos[r],
                        chars.len()
                    )));
                }
            }
        }

        debug!(
            rows = n_rows,
            columns = columns.len(),
            "expanded cigar tree"
        );

        let tree = self.history.tree();
        Ok(ExpandedAlignment {
            rows: self.rows,
            names: tree.names(),
            parents: tree.parent_indices(),
            distances: tree.distances(),
            expanded_cigars: self
                .ops
                .iter()
                .map(|ops| ops.iter().map(|op| op.as_char()).collect())
                .collect(),
            root_by_column,
            columns,
        })
    }
}

/// Unroll a cigar tree into its explicit alignment.
pub fn expand(history: &CigarTree) -> Result<ExpandedAlignment> {
    Expander::new(history).run()
}
