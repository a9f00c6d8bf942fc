//! CIGAR-encoded alignment histories on a phylogenetic tree.
//!
//! Each branch carries a run-length-encoded list of edit operations
//! describing how the child sequence derives from its parent: Match (the
//! residue survives, possibly substituted), Insert (born in the child),
//! Delete (lost from the parent). The root's cigar consists of Insert runs
//! only, encoding the ancestral sequence itself. Together with the ungapped
//! leaf sequences this is a complete, compact alignment history.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{CanopyError, Result};
use crate::tree::Tree;

/// Gap character written in expanded alignment rows.
pub const GAP: char = '-';
/// Placeholder for a present residue whose identity is unknown.
pub const WILDCARD: char = '*';

/// True for characters that mark an absent residue in an alignment row.
pub(crate) fn is_gap(c: char) -> bool {
    c == GAP || c == '.'
}

/// One kind of edit along a branch, child relative to parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EditOp {
    Match,
    Insert,
    Delete,
}

impl EditOp {
    pub fn as_char(self) -> char {
        match self {
            EditOp::Match => 'M',
            EditOp::Insert => 'I',
            EditOp::Delete => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'M' => Some(EditOp::Match),
            'I' => Some(EditOp::Insert),
            'D' => Some(EditOp::Delete),
            _ => None,
        }
    }

    /// Whether this op consumes a position of the parent sequence.
    pub fn uses_parent(self) -> bool {
        matches!(self, EditOp::Match | EditOp::Delete)
    }

    /// Whether this op emits a position of the child sequence.
    pub fn uses_child(self) -> bool {
        matches!(self, EditOp::Match | EditOp::Insert)
    }
}

/// A maximal run of identical edit operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRun {
    pub op: EditOp,
    pub len: usize,
}

/// An ordered list of edit runs; adjacent runs always differ in op.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cigar(Vec<EditRun>);

impl Cigar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> &[EditRun] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a single op, extending the last run when it matches.
    pub fn push(&mut self, op: EditOp) {
        self.push_run(op, 1);
    }

    /// Append `len` copies of `op`; a zero-length run is a no-op.
    pub fn push_run(&mut self, op: EditOp, len: usize) {
        if len == 0 {
            return;
        }
        match self.0.last_mut() {
            Some(last) if last.op == op => last.len += len,
            _ => self.0.push(EditRun { op, len }),
        }
    }

    /// Run-length-encode a flat op sequence.
    pub fn from_ops(ops: impl IntoIterator<Item = EditOp>) -> Self {
        let mut cigar = Cigar::new();
        for op in ops {
            cigar.push(op);
        }
        cigar
    }

    /// Number of parent-sequence positions covered (Match + Delete).
    pub fn parent_len(&self) -> usize {
        self.0
            .iter()
            .filter(|r| r.op.uses_parent())
            .map(|r| r.len)
            .sum()
    }

    /// Number of child-sequence positions emitted (Match + Insert).
    pub fn child_len(&self) -> usize {
        self.0
            .iter()
            .filter(|r| r.op.uses_child())
            .map(|r| r.len)
            .sum()
    }

    /// Total op count across all runs.
    pub fn expanded_len(&self) -> usize {
        self.0.iter().map(|r| r.len).sum()
    }

    /// The flat op sequence, one item per position.
    pub fn expanded(&self) -> impl Iterator<Item = EditOp> + '_ {
        self.0
            .iter()
            .flat_map(|r| std::iter::repeat(r.op).take(r.len))
    }
}

impl Display for Cigar {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for run in &self.0 {
            write!(f, "{}{}", run.len, run.op.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for Cigar {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        let mut cigar = Cigar::new();
        let mut i = 0;
        while i < bytes.len() {
            if !bytes[i].is_ascii_digit() {
                return Err(CanopyError::MalformedCigar(format!(
                    "count expected at position {i} of {s:?}"
                )));
            }
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i >= bytes.len() {
                return Err(CanopyError::MalformedCigar(format!(
                    "operation missing after count in {s:?}"
                )));
            }
            let len: usize = s[start..i].parse().map_err(|_| {
                CanopyError::MalformedCigar(format!("count out of range in {s:?}"))
            })?;
            let op_char = bytes[i] as char;
            let op = EditOp::from_char(op_char).ok_or_else(|| {
                CanopyError::MalformedCigar(format!(
                    "operation must be M, I or D, found {op_char:?} in {s:?}"
                ))
            })?;
            cigar.push_run(op, len);
            i += 1;
        }
        Ok(cigar)
    }
}

/// A phylogenetic tree whose branches carry cigars, plus the known (ungapped)
/// sequences at its nodes. Leaves built from an alignment always carry a
/// sequence; internal sequences are optional and usually absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CigarTree {
    tree: Tree,
    cigars: Vec<Cigar>,
    seqs: Vec<Option<String>>,
}

impl CigarTree {
    /// Assemble a cigar tree from its parts, checking consistency: one cigar
    /// and optional sequence per node, Insert-only at the root, matching
    /// position counts along every branch, and sequence lengths matching the
    /// positions their cigars emit.
    pub fn from_parts(tree: Tree, cigars: Vec<Cigar>, seqs: Vec<Option<String>>) -> Result<Self> {
        let history = Self { tree, cigars, seqs };
        history.validate()?;
        Ok(history)
    }

    /// Skip validation; for exercising downstream consistency guards.
    #[cfg(test)]
    pub(crate) fn from_parts_unchecked(
        tree: Tree,
        cigars: Vec<Cigar>,
        seqs: Vec<Option<String>>,
    ) -> Self {
        Self { tree, cigars, seqs }
    }

    /// Consistency checks; also run after deserializing from untrusted input.
    pub fn validate(&self) -> Result<()> {
        if self.cigars.len() != self.tree.len() || self.seqs.len() != self.tree.len() {
            return Err(CanopyError::InconsistentHistory(format!(
                "{} nodes but {} cigars and {} sequence slots",
                self.tree.len(),
                self.cigars.len(),
                self.seqs.len()
            )));
        }

        if self.cigars[0].runs().iter().any(|r| r.op != EditOp::Insert) {
            return Err(CanopyError::InconsistentHistory(
                "root cigar may only contain Insert runs".to_string(),
            ));
        }

        for ix in 1..self.tree.len() {
            let parent = self.tree.parent(ix).unwrap_or(0);
            let covered = self.cigars[ix].parent_len();
            let available = self.cigars[parent].child_len();
            if covered != available {
                return Err(CanopyError::InconsistentHistory(format!(
                    "cigar at node {ix} covers {covered} parent positions but node {parent} has {available}"
                )));
            }
        }

        for (ix, seq) in self.seqs.iter().enumerate() {
            if let Some(seq) = seq {
                if let Some(bad) = seq.chars().find(|&c| is_gap(c) || c == WILDCARD) {
                    return Err(CanopyError::InconsistentHistory(format!(
                        "sequence at node {ix} contains the reserved character {bad:?}"
                    )));
                }
                let emitted = self.cigars[ix].child_len();
                if seq.chars().count() != emitted {
                    return Err(CanopyError::InconsistentHistory(format!(
                        "sequence at node {ix} has {} characters but its cigar emits {emitted}",
                        seq.chars().count()
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn cigar(&self, ix: usize) -> &Cigar {
        &self.cigars[ix]
    }

    pub fn cigars(&self) -> &[Cigar] {
        &self.cigars
    }

    pub fn seq(&self, ix: usize) -> Option<&str> {
        self.seqs[ix].as_deref()
    }

    /// Derive the history of a gapped alignment on a tree.
    ///
    /// `rows` are (name, gapped row) pairs covering exactly the named leaves
    /// of `tree`; all rows must have equal length. A residue is present at an
    /// internal node whenever it is present in at least one child, so every
    /// surviving column is born at the root: root cigars gain an Insert per
    /// column, branches gain Match where both ends hold the residue and
    /// Delete where only the parent does. Columns that are gaps in every row
    /// carry no information and are dropped.
    pub fn from_alignment(tree: &Tree, rows: &[(String, String)]) -> Result<CigarTree> {
        let n_nodes = tree.len();

        let mut leaf_by_name: FxHashMap<&str, usize> = FxHashMap::default();
        for leaf in tree.leaves() {
            let name = tree.name(leaf).ok_or_else(|| {
                CanopyError::InputMismatch(format!("leaf node {leaf} has no name"))
            })?;
            if leaf_by_name.insert(name, leaf).is_some() {
                return Err(CanopyError::InputMismatch(format!(
                    "duplicate leaf name {name:?} in tree"
                )));
            }
        }

        let mut row_chars: Vec<Option<Vec<char>>> = vec![None; n_nodes];
        let mut n_cols = None;
        for (name, row) in rows {
            let &leaf = leaf_by_name.get(name.as_str()).ok_or_else(|| {
                CanopyError::InputMismatch(format!("sequence {name:?} does not name a leaf"))
            })?;
            if row_chars[leaf].is_some() {
                return Err(CanopyError::InputMismatch(format!(
                    "duplicate sequence for leaf {name:?}"
                )));
            }
            let chars: Vec<char> = row.chars().collect();
            match n_cols {
                None => n_cols = Some(chars.len()),
                Some(expected) if expected != chars.len() => {
                    return Err(CanopyError::InputMismatch(format!(
                        "row {name:?} has {} columns, expected {expected}",
                        chars.len()
                    )));
                }
                Some(_) => {}
            }
            row_chars[leaf] = Some(chars);
        }

        for (&name, &leaf) in &leaf_by_name {
            if row_chars[leaf].is_none() {
                return Err(CanopyError::InputMismatch(format!(
                    "leaf {name:?} has no sequence in the alignment"
                )));
            }
        }

        let n_cols = n_cols.unwrap_or(0);
        let mut cigars = vec![Cigar::new(); n_nodes];
        let mut present = vec![false; n_nodes];
        let mut dropped = 0usize;

        for col in 0..n_cols {
            for ix in tree.bottom_up() {
                present[ix] = match &row_chars[ix] {
                    Some(chars) => !is_gap(chars[col]),
                    None => tree.children(ix).any(|c| present[c]),
                };
            }

            if !present[0] {
                dropped += 1;
                continue;
            }

            cigars[0].push(EditOp::Insert);
            for ix in 1..n_nodes {
                let parent = tree.parent(ix).unwrap_or(0);
                if present[parent] {
                    cigars[ix].push(if present[ix] {
                        EditOp::Match
                    } else {
                        EditOp::Delete
                    });
                }
            }
        }

        let seqs: Vec<Option<String>> = row_chars
            .into_iter()
            .map(|chars| {
                chars.map(|chars| chars.into_iter().filter(|&c| !is_gap(c)).collect())
            })
            .collect();

        debug!(
            nodes = n_nodes,
            columns = n_cols - dropped,
            dropped_all_gap = dropped,
            "built cigar tree from alignment"
        );

        CigarTree::from_parts(tree.clone(), cigars, seqs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeNode;
    use smallvec::SmallVec;

    fn parse(s: &str) -> Cigar {
        s.parse().unwrap()
    }

    fn two_leaf_tree() -> Tree {
        // (A:0.1,B:0.2)root
        Tree::from_nodes(vec![
            TreeNode {
                name: Some("root".to_string()),
                parent: None,
                children: SmallVec::from_slice(&[1, 2]),
                distance: 0.0,
            },
            TreeNode {
                name: Some("A".to_string()),
                parent: Some(0),
                children: SmallVec::new(),
                distance: 0.1,
            },
            TreeNode {
                name: Some("B".to_string()),
                parent: Some(0),
                children: SmallVec::new(),
                distance: 0.2,
            },
        ])
        .unwrap()
    }

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_string()))
            .collect()
    }

    #[test]
    fn cigar_text_round_trip() {
        for text in ["2M1D", "10I", "1M2I3D4M", ""] {
            assert_eq!(parse(text).to_string(), text);
        }
    }

    #[test]
    fn cigar_parse_canonicalizes() {
        assert_eq!(parse("1M1M2M").to_string(), "4M");
        assert_eq!(parse("0D2I").to_string(), "2I");
    }

    #[test]
    fn cigar_parse_rejects_garbage() {
        assert!("M".parse::<Cigar>().is_err());
        assert!("3".parse::<Cigar>().is_err());
        assert!("2M5".parse::<Cigar>().is_err());
        assert!("2X".parse::<Cigar>().is_err());
        assert!("2m".parse::<Cigar>().is_err());
    }

    #[test]
    fn push_merges_adjacent_ops() {
        let cigar = Cigar::from_ops([
            EditOp::Match,
            EditOp::Match,
            EditOp::Delete,
            EditOp::Match,
        ]);
        assert_eq!(cigar.to_string(), "2M1D1M");
        assert_eq!(cigar.runs().len(), 3);
        assert_eq!(cigar.parent_len(), 4);
        assert_eq!(cigar.child_len(), 3);
        assert_eq!(cigar.expanded_len(), 4);
    }

    #[test]
    fn builder_emits_match_and_delete_runs() {
        let tree = two_leaf_tree();
        let history =
            CigarTree::from_alignment(&tree, &rows(&[("A", "AC"), ("B", "A-")])).unwrap();

        assert_eq!(history.cigar(0).to_string(), "2I");
        assert_eq!(history.cigar(1).to_string(), "2M");
        assert_eq!(history.cigar(2).to_string(), "1M1D");
        assert_eq!(history.seq(1), Some("AC"));
        assert_eq!(history.seq(2), Some("A"));
        assert_eq!(history.seq(0), None);
    }

    #[test]
    fn builder_drops_all_gap_columns() {
        let tree = two_leaf_tree();
        let history =
            CigarTree::from_alignment(&tree, &rows(&[("A", "A-C"), ("B", "G-T")])).unwrap();
        assert_eq!(history.cigar(0).to_string(), "2I");
        assert_eq!(history.cigar(1).to_string(), "2M");
        assert_eq!(history.cigar(2).to_string(), "2M");
    }

    #[test]
    fn builder_accepts_dot_gaps() {
        let tree = two_leaf_tree();
        let history =
            CigarTree::from_alignment(&tree, &rows(&[("A", "A."), ("B", "AG")])).unwrap();
        assert_eq!(history.cigar(1).to_string(), "1M1D");
        assert_eq!(history.seq(1), Some("A"));
    }

    #[test]
    fn builder_checks_leaf_and_row_sets() {
        let tree = two_leaf_tree();

        let missing = CigarTree::from_alignment(&tree, &rows(&[("A", "AC")]));
        assert!(matches!(missing, Err(CanopyError::InputMismatch(_))));

        let unknown =
            CigarTree::from_alignment(&tree, &rows(&[("A", "AC"), ("B", "AG"), ("Z", "AA")]));
        assert!(matches!(unknown, Err(CanopyError::InputMismatch(_))));

        let duplicate =
            CigarTree::from_alignment(&tree, &rows(&[("A", "AC"), ("B", "AG"), ("A", "AA")]));
        assert!(matches!(duplicate, Err(CanopyError::InputMismatch(_))));

        let ragged = CigarTree::from_alignment(&tree, &rows(&[("A", "AC"), ("B", "AGG")]));
        assert!(matches!(ragged, Err(CanopyError::InputMismatch(_))));
    }

    #[test]
    fn builder_requires_named_leaves() {
        let tree = Tree::from_nodes(vec![
            TreeNode {
                name: None,
                parent: None,
                children: SmallVec::from_slice(&[1]),
                distance: 0.0,
            },
            TreeNode {
                name: None,
                parent: Some(0),
                children: SmallVec::new(),
                distance: 0.1,
            },
        ])
        .unwrap();
        let result = CigarTree::from_alignment(&tree, &rows(&[("A", "AC")]));
        assert!(matches!(result, Err(CanopyError::InputMismatch(_))));
    }

    #[test]
    fn single_node_tree_is_its_own_leaf() {
        let tree = Tree::from_nodes(vec![TreeNode {
            name: Some("only".to_string()),
            parent: None,
            children: SmallVec::new(),
            distance: 0.0,
        }])
        .unwrap();
        let history = CigarTree::from_alignment(&tree, &rows(&[("only", "AC-G")])).unwrap();
        assert_eq!(history.cigar(0).to_string(), "3I");
        assert_eq!(history.seq(0), Some("ACG"));
    }

    #[test]
    fn from_parts_checks_branch_arithmetic() {
        let tree = two_leaf_tree();
        let bad = CigarTree::from_parts(
            tree.clone(),
            vec![parse("2I"), parse("1M"), parse("2M")],
            vec![None, Some("A".to_string()), Some("AG".to_string())],
        );
        assert!(matches!(bad, Err(CanopyError::InconsistentHistory(_))));

        let root_match = CigarTree::from_parts(
            tree.clone(),
            vec![parse("1M1I"), parse("2M"), parse("2M")],
            vec![None, Some("AC".to_string()), Some("AG".to_string())],
        );
        assert!(matches!(root_match, Err(CanopyError::InconsistentHistory(_))));

        let bad_seq_len = CigarTree::from_parts(
            tree,
            vec![parse("2I"), parse("2M"), parse("2M")],
            vec![None, Some("ACT".to_string()), Some("AG".to_string())],
        );
        assert!(matches!(bad_seq_len, Err(CanopyError::InconsistentHistory(_))));
    }
}
