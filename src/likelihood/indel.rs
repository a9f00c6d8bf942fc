//! Per-branch indel log-likelihoods.
//!
//! Each branch is scored independently from its gap histogram: the number
//! of insertion events and the number of deletion events each follow a
//! Poisson law whose mean grows with branch length, and every run length
//! follows a geometric law driven by the matching extension probability.
//! The mean event count over a branch of length `t` is
//! `exp(rate * t / (1 - ext_prob)) - 1`, which is zero at `t = 0` and
//! compounds as overlapping events merge into longer runs.

use std::f64::consts::PI;

use crate::errors::{CanopyError, Result};
use crate::gaps::GapHistogram;
use crate::model::IndelParams;

/// Natural log of the gamma function, by the Lanczos approximation (g = 7).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 8] = [
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // reflection formula
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let x = x - 1.0;
        let mut ag = 0.99999999999980993_f64;
        for (i, &c) in COEFFS.iter().enumerate() {
            ag += c / (x + i as f64 + 1.0);
        }
        let t = x + 7.5;
        0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + ag.ln()
    }
}

/// Expected number of indel events on a branch of length `distance`.
fn expected_events(distance: f64, rate: f64, ext_prob: f64) -> f64 {
    (rate * distance / (1.0 - ext_prob)).exp() - 1.0
}

fn ln_poisson(count: u64, lambda: f64) -> f64 {
    if count == 0 {
        return -lambda;
    }
    if !(lambda > 0.0) || lambda.is_infinite() {
        return f64::NEG_INFINITY;
    }
    count as f64 * lambda.ln() - lambda - ln_gamma(count as f64 + 1.0)
}

fn ln_geometric(len: usize, ext_prob: f64) -> f64 {
    let mut ll = (1.0 - ext_prob).ln();
    if len > 1 {
        ll += (len - 1) as f64 * ext_prob.ln();
    }
    ll
}

/// Indel log-likelihood per branch, indexed by child node. The root has no
/// branch above it and always scores zero.
pub fn indel_log_like(
    histograms: &[GapHistogram],
    distances: &[f64],
    params: &IndelParams,
) -> Result<Vec<f64>> {
    params.validate()?;
    if histograms.len() != distances.len() {
        return Err(CanopyError::InputMismatch(format!(
            "{} gap histograms for {} branch lengths",
            histograms.len(),
            distances.len()
        )));
    }

    let mut values = vec![0.0; histograms.len()];
    for ix in 1..histograms.len() {
        let hist = &histograms[ix];
        let lam_ins = expected_events(distances[ix], params.ins_rate, params.ins_ext_prob);
        let lam_del = expected_events(distances[ix], params.del_rate, params.del_ext_prob);

        let mut ll = ln_poisson(hist.insertion_events(), lam_ins)
            + ln_poisson(hist.deletion_events(), lam_del);
        for (&len, &count) in &hist.insertions {
            ll += count as f64 * ln_geometric(len, params.ins_ext_prob);
        }
        for (&len, &count) in &hist.deletions {
            ll += count as f64 * ln_geometric(len, params.del_ext_prob);
        }
        values[ix] = ll;
    }

    Ok(values)
}
