//! Tagged covariance representation.
//!
//! A covariance is a `(matrix, tag)` pair. `weigh` whitens a matrix by the
//! covariance (used to turn `H x = F x_prev + c + w` into a weighted
//! least-squares row); `explicit` recovers the plain covariance matrix.
//! Ported from the `'W'`/`'U'`+`'F'`/`'w'` branches of `cov_weigh` in
//! `ultimatekalman.c` (disabled there behind `#ifdef MOVED` but the clearest
//! statement of the four-way semantics in the corpus) plus spec.md §4.B for
//! `explicit`.

use nalgebra::{DMatrix, DVector, RealField};

use crate::error::{Error, ErrorKind};
use crate::matrix;

/// How the matrix inside a [`Covariance`] should be interpreted.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CovarianceType {
    /// Upper-triangular weight: multiply to whiten (`WᵀW = cov⁻¹`).
    Weight,
    /// Upper-triangular Cholesky-like factor of the covariance
    /// (`FᵀF = cov`): triangular-solve to whiten.
    UpperFactor,
    /// Diagonal weight, stored as a column vector of per-row weights.
    DiagWeight,
    /// Explicit covariance matrix.
    Explicit,
}

/// A covariance matrix tagged with how it is represented.
#[derive(Debug, Clone)]
pub struct Covariance<R: RealField> {
    matrix: DMatrix<R>,
    kind: CovarianceType,
}

impl<R: RealField> Covariance<R> {
    pub fn new(matrix: DMatrix<R>, kind: CovarianceType) -> Self {
        Covariance { matrix, kind }
    }

    pub fn weight(matrix: DMatrix<R>) -> Self {
        Covariance::new(matrix, CovarianceType::Weight)
    }

    pub fn upper_factor(matrix: DMatrix<R>) -> Self {
        Covariance::new(matrix, CovarianceType::UpperFactor)
    }

    /// `diag` holds the per-row weights as a column vector, matching the C
    /// original's `matrix_get(cov,i,0)` access pattern for the `'w'` tag.
    pub fn diag_weight(diag: DVector<R>) -> Self {
        Covariance::new(diag.into(), CovarianceType::DiagWeight)
    }

    pub fn explicit(matrix: DMatrix<R>) -> Self {
        Covariance::new(matrix, CovarianceType::Explicit)
    }

    pub fn kind(&self) -> CovarianceType {
        self.kind
    }

    pub fn matrix(&self) -> &DMatrix<R> {
        &self.matrix
    }

    /// Produce `W·A` such that `(W·A)ᵀ(W·A) = Aᵀ cov⁻¹ A` in the sense
    /// required by least-squares whitening.
    pub fn weigh(&self, a: &DMatrix<R>) -> Result<DMatrix<R>, Error> {
        match self.kind {
            CovarianceType::Weight => Ok(matrix::multiply(&self.matrix, a)),
            CovarianceType::UpperFactor => Ok(matrix::trisolve(&self.matrix, a)),
            CovarianceType::DiagWeight => {
                assert_eq!(self.matrix.nrows(), a.nrows(), "diag_weight: row mismatch");
                let mut wa = a.clone();
                for i in 0..wa.nrows() {
                    let w = self.matrix[(i, 0)].clone();
                    for j in 0..wa.ncols() {
                        wa[(i, j)] = wa[(i, j)].clone() * w.clone();
                    }
                }
                Ok(wa)
            }
            CovarianceType::Explicit => {
                let factor = self.cholesky_upper_factor()?;
                Ok(matrix::trisolve(&factor, a))
            }
        }
    }

    /// Return the explicit covariance matrix this tagged value represents.
    pub fn to_explicit(&self) -> Result<DMatrix<R>, Error> {
        match self.kind {
            CovarianceType::Weight => {
                let wt = self.matrix.transpose();
                let wtw = matrix::multiply(&wt, &self.matrix);
                Ok(matrix::inverse(&wtw))
            }
            CovarianceType::UpperFactor => {
                let ft = self.matrix.transpose();
                let fft = matrix::multiply(&self.matrix, &ft);
                Ok(matrix::inverse(&fft))
            }
            CovarianceType::DiagWeight => {
                let n = self.matrix.nrows();
                let mut out = DMatrix::<R>::zeros(n, n);
                for i in 0..n {
                    let w = self.matrix[(i, 0)].clone();
                    out[(i, i)] = R::one() / (w.clone() * w);
                }
                Ok(out)
            }
            CovarianceType::Explicit => Ok(self.matrix.clone()),
        }
    }

    /// Cholesky factor of the covariance, viewed as an [`CovarianceType::UpperFactor`].
    fn cholesky_upper_factor(&self) -> Result<DMatrix<R>, Error> {
        let chol = nalgebra::linalg::Cholesky::new(self.matrix.clone())
            .ok_or(ErrorKind::CovarianceNotPositiveSemiDefinite)?;
        // Cholesky::l() is lower-triangular with LL^T = cov; the upper
        // factor F with F^T F = cov is L^T.
        Ok(chol.l().transpose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn explicit_weight_roundtrip() {
        let w: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.5, 1.0]);
        let cov = Covariance::weight(w);
        let identity = DMatrix::<f64>::identity(2, 2);
        let wa = cov.weigh(&identity).unwrap();
        let lhs = wa.transpose() * &wa;
        let explicit = cov.to_explicit().unwrap();
        let rhs = matrix::inverse(&explicit);
        assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
    }

    #[test]
    fn explicit_cov_factors_to_upper_factor() {
        let cov_matrix: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let explicit_cov = Covariance::explicit(cov_matrix.clone());
        let identity = DMatrix::<f64>::identity(2, 2);
        let factor = explicit_cov.weigh(&identity).unwrap();
        let reconstructed = factor.transpose() * &factor;
        assert_relative_eq!(reconstructed, cov_matrix, epsilon = 1e-9);
    }

    #[test]
    fn diag_weight_scales_rows() {
        let diag = DVector::from_vec(vec![2.0, 3.0]);
        let cov = Covariance::diag_weight(diag);
        let a: DMatrix<f64> = DMatrix::from_row_slice(2, 1, &[1.0, 1.0]);
        let wa = cov.weigh(&a).unwrap();
        assert_relative_eq!(wa[(0, 0)], 2.0);
        assert_relative_eq!(wa[(1, 0)], 3.0);
    }
}
