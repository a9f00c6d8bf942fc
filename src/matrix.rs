//! Small dense square matrices for substitution models.
//!
//! Alphabets are tiny (4 for nucleotides, 20 for amino acids), so matrices
//! are flat row-major `Vec<f64>` with inline indexing and no attempt at
//! anything clever.

/// A square row-major matrix of `f64`.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    n: usize,
    data: Vec<f64>,
}

/// Truncated Taylor terms used by [`Matrix::expm`]. After scaling the
/// argument below 1/2 in infinity norm, term 18 is ~1e-24 and far below
/// f64 resolution.
const EXPM_TAYLOR_TERMS: usize = 18;

impl Matrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0.0; n * n],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Dimension of the (square) matrix.
    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.n + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.n..(row + 1) * self.n]
    }

    pub fn scaled(&self, factor: f64) -> Matrix {
        Matrix {
            n: self.n,
            data: self.data.iter().map(|x| x * factor).collect(),
        }
    }

    pub fn matmul(&self, other: &Matrix) -> Matrix {
        debug_assert_eq!(self.n, other.n);
        let n = self.n;
        let mut out = Matrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self.data[i * n + k];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out.data[i * n + j] += a * other.data[k * n + j];
                }
            }
        }
        out
    }

    /// Matrix-vector product `self * v`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        debug_assert_eq!(self.n, v.len());
        (0..self.n)
            .map(|i| self.row(i).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    fn add_assign(&mut self, other: &Matrix) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += *b;
        }
    }

    fn inf_norm(&self) -> f64 {
        (0..self.n)
            .map(|i| self.row(i).iter().map(|x| x.abs()).sum())
            .fold(0.0, f64::max)
    }

    /// Matrix exponential by scaling and squaring with a truncated Taylor
    /// series. The zero matrix maps to the exact identity.
    pub fn expm(&self) -> Matrix {
        let norm = self.inf_norm();
        let mut squarings = 0u32;
        let mut scale = 1.0;
        while norm * scale > 0.5 {
            squarings += 1;
            scale *= 0.5;
        }

        let scaled = self.scaled(scale);
        let mut result = Matrix::identity(self.n);
        let mut term = Matrix::identity(self.n);
        for k in 1..=EXPM_TAYLOR_TERMS {
            term = term.matmul(&scaled).scaled(1.0 / k as f64);
            result.add_assign(&term);
        }

        for _ in 0..squarings {
            result = result.matmul(&result);
        }
        result
    }
}

/// Transition probabilities `exp(Q * t)` for a rate matrix `Q`.
///
/// Entries are clamped at zero: rounding in the exponential can leave tiny
/// negative values, which would poison the log-space likelihood.
pub fn transition_matrix(rate: &Matrix, t: f64) -> Matrix {
    let mut p = rate.scaled(t).expm();
    for value in p.data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
    p
}
