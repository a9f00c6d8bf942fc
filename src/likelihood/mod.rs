//! Alignment-history log-likelihood under a substitution-and-indel model.
//!
//! [`evaluate`] ties the pieces together: expand the history into per-column
//! relevance sets, score substitutions column by column and indels branch by
//! branch, and return both breakdowns next to their totals.

pub mod indel;
pub mod substitution;

pub use indel::indel_log_like;
pub use substitution::{sub_log_like, sub_log_like_threaded};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cigar::CigarTree;
use crate::errors::{CanopyError, Result};
use crate::expand::expand;
use crate::gaps::gap_histograms;
use crate::model::Model;

/// Scored history: per-column substitution terms, per-branch indel terms,
/// and their sums.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub sub_per_column: Vec<f64>,
    pub sub_total: f64,
    pub indel_per_branch: Vec<f64>,
    pub indel_total: f64,
}

impl Evaluation {
    pub fn total(&self) -> f64 {
        self.sub_total + self.indel_total
    }
}

/// Score `history` under `model`, fanning columns over `n_threads` workers
/// (one means serial). Only single-component mixtures can be scored.
pub fn evaluate(history: &CigarTree, model: &Model, n_threads: usize) -> Result<Evaluation> {
    let component = match model.mixture.as_slice() {
        [single] => single,
        parts => {
            return Err(CanopyError::InvalidParameter(format!(
                "scoring requires exactly one mixture component, model has {}",
                parts.len()
            )))
        }
    };

    let expanded = expand(history)?;
    let sub_per_column =
        sub_log_like_threaded(&expanded, &model.alphabet, component, n_threads)?;
    let indel_per_branch = indel_log_like(
        &gap_histograms(history),
        &expanded.distances,
        &model.indel,
    )?;

    let evaluation = Evaluation {
        sub_total: sub_per_column.iter().sum(),
        sub_per_column,
        indel_total: indel_per_branch.iter().sum(),
        indel_per_branch,
    };
    debug!(
        subs = evaluation.sub_total,
        indels = evaluation.indel_total,
        total = evaluation.total(),
        "scored history"
    );
    Ok(evaluation)
}
