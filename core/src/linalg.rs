//! Symmetric positive definite solves for the Kalman measurement update.
//!
//! The gain needs $S^{-1}$ for the innovation covariance $S = H P H^T + R$. Round-off can leave
//! $S$ slightly asymmetric or, with near-singular geometry, not quite positive definite, so the
//! solve falls back in steps:
//!
//! ```text
//! symmetrize  ->  Cholesky  ->  Cholesky of S + εI, ε growing tenfold  ->  inverse
//! ```
use nalgebra::DMatrix;
use nalgebra::linalg::Cholesky;

use crate::Error;

/// $\frac{1}{2}(M + M^T)$
#[inline]
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

/// Diagonal loading schedule of [`chol_solve_spd`]
#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// First value added to the diagonal
    pub initial_jitter: f64,
    /// Largest value tried before giving up
    pub max_jitter: f64,
    pub max_tries: usize,
}
impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            initial_jitter: 1e-12,
            max_jitter: 1e-6,
            max_tries: 6,
        }
    }
}

/// Cholesky factor of the symmetric part of `a`, loading the diagonal when plain
/// factorization fails
fn loaded_cholesky(a: &DMatrix<f64>, opt: SolveOptions) -> Option<Cholesky<f64, nalgebra::Dyn>> {
    let sym = symmetrize(a);
    if let Some(factor) = Cholesky::new(sym.clone()) {
        return Some(factor);
    }
    let identity = DMatrix::<f64>::identity(sym.nrows(), sym.ncols());
    let mut jitter = opt.initial_jitter;
    for _ in 0..opt.max_tries {
        if jitter > opt.max_jitter {
            break;
        }
        if let Some(factor) = Cholesky::new(&sym + &identity * jitter) {
            return Some(factor);
        }
        jitter *= 10.0;
    }
    None
}

/// Solve $A X = B$ for a symmetric positive (semi)definite `a`
///
/// # Returns
/// `None` when the shapes do not agree or no loaded factorization succeeds.
pub fn chol_solve_spd(a: &DMatrix<f64>, b: &DMatrix<f64>, opt: SolveOptions) -> Option<DMatrix<f64>> {
    if !a.is_square() || a.nrows() != b.nrows() {
        return None;
    }
    loaded_cholesky(a, opt).map(|factor| factor.solve(b))
}

/// Solve $A X = B$, falling back to the explicit inverse when every Cholesky attempt fails
///
/// # Errors
/// [`Error::DimensionMismatch`] when `a` is not square or its rows differ from those of `b`,
/// and [`Error::SingularInnovation`] when `a` cannot be inverted.
pub fn robust_spd_solve(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, Error> {
    if !a.is_square() {
        return Err(Error::DimensionMismatch {
            what: "innovation covariance columns",
            expected: a.nrows(),
            actual: a.ncols(),
        });
    }
    if a.nrows() != b.nrows() {
        return Err(Error::DimensionMismatch {
            what: "right-hand side rows",
            expected: a.nrows(),
            actual: b.nrows(),
        });
    }
    if let Some(x) = chol_solve_spd(a, b, SolveOptions::default()) {
        return Ok(x);
    }
    symmetrize(a)
        .try_inverse()
        .map(|inverse| inverse * b)
        .ok_or(Error::SingularInnovation)
}
