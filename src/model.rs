//! Substitution and indel model parameters.
//!
//! A [`Model`] bundles an alphabet, one or more substitution mixture
//! components (rate matrix + root distribution), and the four indel
//! parameters. Values are plain data validated on construction; the
//! likelihood engines only ever read them.

use rustc_hash::FxHashMap;

use crate::cigar;
use crate::errors::{CanopyError, Result};
use crate::matrix::Matrix;

/// Tolerance for "sums to one" and "rows sum to zero" checks.
const SUM_TOLERANCE: f64 = 1e-6;

/// The ordered symbol set of a substitution model.
///
/// Token lookup is case-insensitive; the gap and wildcard characters used in
/// expanded alignments are reserved and may not appear as symbols.
#[derive(Clone, Debug)]
pub struct Alphabet {
    symbols: Vec<char>,
    index: FxHashMap<char, usize>,
}

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Self> {
        if symbols.is_empty() {
            return Err(CanopyError::InvalidParameter(
                "empty alphabet".to_string(),
            ));
        }

        let mut index = FxHashMap::default();
        for (token, symbol) in symbols.chars().enumerate() {
            if symbol == cigar::GAP || symbol == '.' || symbol == cigar::WILDCARD {
                return Err(CanopyError::InvalidParameter(format!(
                    "alphabet symbol {symbol:?} is reserved for alignment markup"
                )));
            }
            let folded = symbol.to_ascii_lowercase();
            if index.insert(folded, token).is_some() {
                return Err(CanopyError::InvalidParameter(format!(
                    "duplicate alphabet symbol {symbol:?}"
                )));
            }
        }

        Ok(Self {
            symbols: symbols.chars().collect(),
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> &[char] {
        &self.symbols
    }

    /// Token for a symbol, folding case. None if outside the alphabet.
    pub fn token(&self, symbol: char) -> Option<usize> {
        self.index.get(&symbol.to_ascii_lowercase()).copied()
    }

    pub fn symbol(&self, token: usize) -> char {
        self.symbols[token]
    }

    /// The alphabet as the string it was built from.
    pub fn to_symbol_string(&self) -> String {
        self.symbols.iter().collect()
    }
}

/// One substitution mixture component: a rate matrix over the alphabet and
/// the distribution residues are born with.
#[derive(Clone, Debug)]
pub struct MixtureComponent {
    pub sub_rate: Matrix,
    pub root_prob: Vec<f64>,
}

impl MixtureComponent {
    /// Check the component against an alphabet size: square matrix of the
    /// right dimension, non-negative off-diagonal rates, rows summing to
    /// zero, and a root distribution summing to one.
    pub fn validate(&self, alphabet_len: usize) -> Result<()> {
        if self.sub_rate.dim() != alphabet_len {
            return Err(CanopyError::InvalidParameter(format!(
                "rate matrix is {}x{} but the alphabet has {} symbols",
                self.sub_rate.dim(),
                self.sub_rate.dim(),
                alphabet_len
            )));
        }
        if self.root_prob.len() != alphabet_len {
            return Err(CanopyError::InvalidParameter(format!(
                "root distribution has {} entries but the alphabet has {} symbols",
                self.root_prob.len(),
                alphabet_len
            )));
        }

        for i in 0..alphabet_len {
            let mut row_sum = 0.0;
            for j in 0..alphabet_len {
                let q = self.sub_rate.get(i, j);
                if !q.is_finite() {
                    return Err(CanopyError::InvalidParameter(format!(
                        "non-finite rate at ({i}, {j})"
                    )));
                }
                if i != j && q < 0.0 {
                    return Err(CanopyError::InvalidParameter(format!(
                        "negative substitution rate {q} at ({i}, {j})"
                    )));
                }
                row_sum += q;
            }
            if row_sum.abs() > SUM_TOLERANCE {
                return Err(CanopyError::InvalidParameter(format!(
                    "rate matrix row {i} sums to {row_sum}, expected 0"
                )));
            }
        }

        let mut total = 0.0;
        for (i, &p) in self.root_prob.iter().enumerate() {
            if !p.is_finite() || p < 0.0 {
                return Err(CanopyError::InvalidParameter(format!(
                    "root probability {p} at entry {i}"
                )));
            }
            total += p;
        }
        if (total - 1.0).abs() > SUM_TOLERANCE {
            return Err(CanopyError::InvalidParameter(format!(
                "root distribution sums to {total}, expected 1"
            )));
        }

        Ok(())
    }
}

/// Insertion/deletion process parameters: opening rates per unit time and
/// geometric run-length extension probabilities.
///
/// All-zero parameters describe a model without indels; that is also the
/// default when a model file omits them.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IndelParams {
    pub ins_rate: f64,
    pub del_rate: f64,
    pub ins_ext_prob: f64,
    pub del_ext_prob: f64,
}

impl IndelParams {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [("insertion", self.ins_rate), ("deletion", self.del_rate)] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(CanopyError::InvalidParameter(format!(
                    "{name} rate {rate} (must be finite and >= 0)"
                )));
            }
        }
        for (name, prob) in [
            ("insertion", self.ins_ext_prob),
            ("deletion", self.del_ext_prob),
        ] {
            if !prob.is_finite() || !(0.0..1.0).contains(&prob) {
                return Err(CanopyError::InvalidParameter(format!(
                    "{name} extension probability {prob} (must lie in [0, 1))"
                )));
            }
        }
        Ok(())
    }
}

/// A full evolutionary model: alphabet, substitution mixture, indel process.
#[derive(Clone, Debug)]
pub struct Model {
    pub alphabet: Alphabet,
    pub mixture: Vec<MixtureComponent>,
    pub indel: IndelParams,
}

impl Model {
    pub fn new(
        alphabet: Alphabet,
        mixture: Vec<MixtureComponent>,
        indel: IndelParams,
    ) -> Result<Self> {
        if mixture.is_empty() {
            return Err(CanopyError::InvalidParameter(
                "model has no mixture components".to_string(),
            ));
        }
        for component in &mixture {
            component.validate(alphabet.len())?;
        }
        indel.validate()?;
        Ok(Self {
            alphabet,
            mixture,
            indel,
        })
    }
}

/// Force a raw matrix into rate-matrix form: off-diagonal entries become
/// their absolute values, the diagonal becomes minus the off-diagonal row
/// sum. Matches how historian-format model files are interpreted.
pub fn normalize_rate_matrix(raw: &Matrix) -> Matrix {
    let n = raw.dim();
    let mut q = Matrix::zeros(n);
    for i in 0..n {
        let mut off_diagonal_sum = 0.0;
        for j in 0..n {
            if i != j {
                let rate = raw.get(i, j).abs();
                q.set(i, j, rate);
                off_diagonal_sum += rate;
            }
        }
        q.set(i, i, -off_diagonal_sum);
    }
    q
}

/// Scale a non-negative weight vector to sum to one.
pub fn normalize_distribution(weights: &[f64]) -> Result<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(CanopyError::InvalidParameter(format!(
            "distribution weights sum to {total}, cannot normalize"
        )));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_tokens_fold_case() {
        let alphabet = Alphabet::new("acgt").unwrap();
        assert_eq!(alphabet.len(), 4);
        assert_eq!(alphabet.token('a'), Some(0));
        assert_eq!(alphabet.token('G'), Some(2));
        assert_eq!(alphabet.token('n'), None);
        assert_eq!(alphabet.symbol(3), 't');
    }

    #[test]
    fn alphabet_rejects_duplicates_and_reserved() {
        assert!(Alphabet::new("acga").is_err());
        assert!(Alphabet::new("acGg").is_err(), "case-folded duplicate");
        assert!(Alphabet::new("ac-t").is_err());
        assert!(Alphabet::new("ac*t").is_err());
        assert!(Alphabet::new("").is_err());
    }

    #[test]
    fn normalize_rate_matrix_rows_sum_to_zero() {
        let mut raw = Matrix::zeros(3);
        raw.set(0, 1, -2.0); // sign is discarded
        raw.set(0, 2, 1.0);
        raw.set(1, 0, 0.5);
        raw.set(2, 1, 4.0);
        raw.set(1, 1, 99.0); // diagonal input is ignored
        let q = normalize_rate_matrix(&raw);
        assert_eq!(q.get(0, 1), 2.0);
        for i in 0..3 {
            let row_sum: f64 = (0..3).map(|j| q.get(i, j)).sum();
            assert!(row_sum.abs() < 1e-12);
        }
    }

    #[test]
    fn component_validation_catches_bad_root() {
        let q = normalize_rate_matrix(&{
            let mut raw = Matrix::zeros(2);
            raw.set(0, 1, 1.0);
            raw.set(1, 0, 1.0);
            raw
        });
        let good = MixtureComponent {
            sub_rate: q.clone(),
            root_prob: vec![0.5, 0.5],
        };
        assert!(good.validate(2).is_ok());

        let bad_sum = MixtureComponent {
            sub_rate: q.clone(),
            root_prob: vec![0.5, 0.4],
        };
        assert!(bad_sum.validate(2).is_err());

        let wrong_dim = MixtureComponent {
            sub_rate: q,
            root_prob: vec![0.5, 0.5],
        };
        assert!(wrong_dim.validate(3).is_err());
    }

    #[test]
    fn indel_params_ranges() {
        let good = IndelParams {
            ins_rate: 0.01,
            del_rate: 0.02,
            ins_ext_prob: 0.3,
            del_ext_prob: 0.0,
        };
        assert!(good.validate().is_ok());

        let negative_rate = IndelParams {
            ins_rate: -0.01,
            ..good
        };
        assert!(negative_rate.validate().is_err());

        let ext_prob_one = IndelParams {
            del_ext_prob: 1.0,
            ..good
        };
        assert!(ext_prob_one.validate().is_err());
    }

    #[test]
    fn normalize_distribution_scales_and_rejects_zero() {
        assert_eq!(
            normalize_distribution(&[1.0, 3.0]).unwrap(),
            vec![0.25, 0.75]
        );
        assert!(normalize_distribution(&[0.0, 0.0]).is_err());
    }
}
