//! Per-branch gap-length statistics.
//!
//! The indel engine only needs, for every branch, how many insertion and
//! deletion runs of each length occurred. Those counts are read straight off
//! the cigar runs; no expansion is required.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cigar::{CigarTree, EditOp};

/// Counts of insertion and deletion runs on one branch, keyed by run length.
///
/// `BTreeMap` keeps reports and serialized output in deterministic order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GapHistogram {
    pub insertions: BTreeMap<usize, u64>,
    pub deletions: BTreeMap<usize, u64>,
}

impl GapHistogram {
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }

    /// Number of insertion events (runs, not residues).
    pub fn insertion_events(&self) -> u64 {
        self.insertions.values().sum()
    }

    /// Number of deletion events (runs, not residues).
    pub fn deletion_events(&self) -> u64 {
        self.deletions.values().sum()
    }

    /// Total residues inserted across all runs.
    pub fn inserted_residues(&self) -> u64 {
        self.insertions.iter().map(|(&len, &n)| len as u64 * n).sum()
    }

    /// Total residues deleted across all runs.
    pub fn deleted_residues(&self) -> u64 {
        self.deletions.iter().map(|(&len, &n)| len as u64 * n).sum()
    }
}

/// Gap histograms for every node, indexed like the tree.
///
/// Entry 0 (the root) is always empty: the root has no branch, and its
/// Insert runs encode the ancestral sequence rather than indel events.
pub fn gap_histograms(history: &CigarTree) -> Vec<GapHistogram> {
    let mut histograms = vec![GapHistogram::default(); history.len()];
    for ix in 1..history.len() {
        for run in history.cigar(ix).runs() {
            match run.op {
                EditOp::Insert => *histograms[ix].insertions.entry(run.len).or_insert(0) += 1,
                EditOp::Delete => *histograms[ix].deletions.entry(run.len).or_insert(0) += 1,
                EditOp::Match => {}
            }
        }
    }
    histograms
}
