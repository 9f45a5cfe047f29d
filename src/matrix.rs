//! Dense matrix kernel.
//!
//! A thin, named-operation layer over [`nalgebra::DMatrix`]. `nalgebra`'s
//! column-major `DMatrix` already gives the storage layout required here;
//! this module's job is to expose the named operations the rest of the
//! crate is written against (create/copy/sub-block/concat, in-place
//! scale/triangularize/chop, QR with explicit Householder reflectors so that
//! `Qᵀ` can be applied to the residual rows of a wider right-hand side, and
//! the triangular/general solves), not to reimplement dense storage.
//!
//! Precondition violations here (dimension mismatches, singular triangular
//! systems) are programmer errors: callers guarantee shapes line up, so
//! every such failure is a `panic!`, matching the C original's `assert()`
//! calls.

use nalgebra::{DMatrix, DVector, RealField};
use num_traits::Zero;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Create a constant matrix.
pub fn constant<R: RealField>(rows: usize, cols: usize, value: R) -> DMatrix<R> {
    DMatrix::from_element(rows, cols, value)
}

/// Create an identity matrix (rectangular identity if `rows != cols`).
pub fn identity<R: RealField>(rows: usize, cols: usize) -> DMatrix<R> {
    DMatrix::identity(rows, cols)
}

/// Create a matrix from row-major data, matching the C original's
/// `matrix_create_from_rowwise`.
pub fn from_row_slice<R: RealField>(rows: usize, cols: usize, data: &[R]) -> DMatrix<R> {
    DMatrix::from_row_slice(rows, cols, data)
}

/// Create a sub-block copy `(row0, nrows, col0, ncols)`.
pub fn sub_block<R: RealField>(
    a: &DMatrix<R>,
    row0: usize,
    nrows: usize,
    col0: usize,
    ncols: usize,
) -> DMatrix<R> {
    a.slice((row0, col0), (nrows, ncols)).into_owned()
}

/// Vertical concatenation; either operand may be absent, in which case the
/// other is returned unchanged (ported from `matrix_create_vconcat`'s
/// NULL-tolerant behavior).
pub fn vconcat<R: RealField>(a: Option<&DMatrix<R>>, b: Option<&DMatrix<R>>) -> Option<DMatrix<R>> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (Some(a), Some(b)) => {
            assert_eq!(
                a.ncols(),
                b.ncols(),
                "vconcat: column count mismatch ({} vs {})",
                a.ncols(),
                b.ncols()
            );
            let mut out = DMatrix::<R>::zeros(a.nrows() + b.nrows(), a.ncols());
            out.slice_mut((0, 0), (a.nrows(), a.ncols())).copy_from(a);
            out.slice_mut((a.nrows(), 0), (b.nrows(), b.ncols()))
                .copy_from(b);
            Some(out)
        }
    }
}

/// Scale a matrix in place by a scalar.
pub fn scale_mut<R: RealField>(a: &mut DMatrix<R>, alpha: R) {
    a.scale_mut(alpha);
}

/// Zero the strict lower triangle in place.
pub fn triu_mut<R: RealField>(a: &mut DMatrix<R>) {
    let (rows, cols) = a.shape();
    for j in 0..cols {
        for i in (j + 1)..rows {
            a[(i, j)] = R::zero();
        }
    }
}

/// Shrink row/column count, keeping the top-left `nrows x ncols` sub-block.
///
/// `nalgebra` does not expose an in-place shrink that preserves the leading
/// dimension the way the C original's `matrix_mutate_chop` does, so this
/// returns a copy instead.
pub fn chop<R: RealField>(a: &DMatrix<R>, nrows: usize, ncols: usize) -> DMatrix<R> {
    assert!(nrows <= a.nrows() && ncols <= a.ncols(), "chop: target shape exceeds source");
    a.slice((0, 0), (nrows, ncols)).into_owned()
}

/// `A * B`.
pub fn multiply<R: RealField>(a: &DMatrix<R>, b: &DMatrix<R>) -> DMatrix<R> {
    a * b
}

/// `C ← α·A·B + β·C`.
pub fn gemm_mut<R: RealField>(c: &mut DMatrix<R>, alpha: R, a: &DMatrix<R>, b: &DMatrix<R>, beta: R) {
    c.gemm(alpha, a, b, beta);
}

/// Compact Householder reflectors produced by [`qr_mut`].
///
/// Stores, for each eliminated column `k`, the reflector vector (covering
/// rows `k..nrows`) and its scaling factor, enabling `Qᵀ` to be applied to
/// any right-hand side sharing `A`'s row count — including the extra rows
/// beyond `A`'s column count that carry residual/leftover information
/// (e.g. the current step's `R_bar`/`y_bar`).
pub struct QrReflectors<R: RealField> {
    reflectors: Vec<(usize, DVector<R>, R)>,
}

/// Reduce `a` to upper-trapezoidal form in place via Householder QR and
/// return the compact reflectors. Ported in spirit from the C original's
/// `matrix_create_mutate_qr` (itself a wrapper around LAPACK's `dgeqrf`).
pub fn qr_mut<R: RealField>(a: &mut DMatrix<R>) -> QrReflectors<R> {
    let nrows = a.nrows();
    let ncols = a.ncols();
    let k_max = nrows.min(ncols);
    let two = R::one() + R::one();
    let mut reflectors = Vec::with_capacity(k_max);

    for k in 0..k_max {
        let m = nrows - k;
        let mut v = DVector::<R>::zeros(m);
        for i in 0..m {
            v[i] = a[(k + i, k)].clone();
        }
        let norm_x = v.norm();
        if norm_x.is_zero() {
            reflectors.push((k, v, R::zero()));
            continue;
        }
        let alpha = if v[0].clone() >= R::zero() { -norm_x } else { norm_x };
        v[0] -= alpha;
        let norm_v2 = v.dot(&v);
        if norm_v2.is_zero() {
            reflectors.push((k, v, R::zero()));
            continue;
        }
        let beta = two.clone() / norm_v2;

        for j in k..ncols {
            let mut dot = R::zero();
            for i in 0..m {
                dot += v[i].clone() * a[(k + i, j)].clone();
            }
            let factor = beta.clone() * dot;
            for i in 0..m {
                let old = a[(k + i, j)].clone();
                a[(k + i, j)] = old - factor.clone() * v[i].clone();
            }
        }
        // The reflector zeroes this sub-column exactly in exact arithmetic;
        // zero explicitly to avoid carrying floating-point dust below the
        // diagonal into the trapezoidal factor.
        for i in (k + 1)..nrows {
            a[(i, k)] = R::zero();
        }
        reflectors.push((k, v, beta));
    }

    QrReflectors { reflectors }
}

/// `X ← Qᵀ X`, applying the reflectors produced by [`qr_mut`] for the
/// matching `A`.
pub fn apply_qt_mut<R: RealField>(refl: &QrReflectors<R>, x: &mut DMatrix<R>) {
    let xcols = x.ncols();
    for (k, v, beta) in refl.reflectors.iter() {
        if beta.is_zero() {
            continue;
        }
        let m = v.len();
        for j in 0..xcols {
            let mut dot = R::zero();
            for i in 0..m {
                dot += v[i].clone() * x[(k + i, j)].clone();
            }
            let factor = beta.clone() * dot;
            for i in 0..m {
                let old = x[(k + i, j)].clone();
                x[(k + i, j)] = old - factor.clone() * v[i].clone();
            }
        }
    }
}

/// `R⁻¹ B` for upper-triangular square `R`, via back-substitution.
pub fn trisolve<R: RealField>(r: &DMatrix<R>, b: &DMatrix<R>) -> DMatrix<R> {
    let mut x = b.clone();
    trisolve_mut(r, &mut x);
    x
}

/// `X ← R⁻¹ X` in place, for upper-triangular square `R`.
pub fn trisolve_mut<R: RealField>(r: &DMatrix<R>, x: &mut DMatrix<R>) {
    assert_eq!(r.nrows(), r.ncols(), "trisolve: R must be square");
    assert_eq!(r.nrows(), x.nrows(), "trisolve: row dimension mismatch");
    let n = r.nrows();
    for col in 0..x.ncols() {
        for i in (0..n).rev() {
            let mut sum = x[(i, col)].clone();
            for j in (i + 1)..n {
                sum -= r[(i, j)].clone() * x[(j, col)].clone();
            }
            let diag = r[(i, i)].clone();
            assert!(!diag.is_zero(), "trisolve: singular triangular system at row {}", i);
            x[(i, col)] = sum / diag;
        }
    }
}

/// General square solve `A⁻¹ B`, via LU factorization.
pub fn mldivide<R: RealField>(a: &DMatrix<R>, b: &DMatrix<R>) -> DMatrix<R> {
    assert_eq!(a.nrows(), a.ncols(), "mldivide: A must be square");
    a.clone()
        .lu()
        .solve(b)
        .expect("mldivide: singular system")
}

/// Matrix inverse.
pub fn inverse<R: RealField>(a: &DMatrix<R>) -> DMatrix<R> {
    a.clone().try_inverse().expect("inverse: singular matrix")
}

/// The IEEE 754 NaN sentinel for fields that cannot store an `f64` literal
/// directly, converted the way the rest of this crate converts constants
/// (`nalgebra::convert`, the same mechanism `lib.rs`'s
/// `debug_assert_symmetric!` macro uses for `1e-5`).
pub fn nan<R: RealField>() -> R {
    nalgebra::convert(f64::NAN)
}

/// View an `n x 1` column matrix as a `DVector`, the boundary between this
/// crate's internal `DMatrix`-only bookkeeping and its public `DVector`
/// surface.
pub fn to_vector<R: RealField>(a: &DMatrix<R>) -> DVector<R> {
    DVector::from_column_slice(a.as_slice())
}

/// The inverse of [`to_vector`].
pub fn from_vector<R: RealField>(v: &DVector<R>) -> DMatrix<R> {
    DMatrix::from_column_slice(v.len(), 1, v.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn qr_reconstructs_and_triangularizes() {
        let mut a: DMatrix<f64> =
            DMatrix::from_row_slice(4, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let original = a.clone();
        let refl = qr_mut(&mut a);
        // strictly lower part must be exactly zero
        for j in 0..a.ncols() {
            for i in (j + 1)..a.nrows() {
                assert_eq!(a[(i, j)], 0.0);
            }
        }
        // applying Q^T to a copy of the original column-space should
        // reproduce the trapezoidal factor (since Q^T * A = R).
        let mut qtx = original.clone();
        apply_qt_mut(&refl, &mut qtx);
        assert_relative_eq!(qtx, a, epsilon = 1e-9);
    }

    #[test]
    fn trisolve_matches_mldivide_for_triangular_system() {
        let r: DMatrix<f64> = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 0.0, 0.0, 3.0, 1.0, 0.0, 0.0, 4.0]);
        let b: DMatrix<f64> = DMatrix::from_row_slice(3, 1, &[5.0, 7.0, 8.0]);
        let x1 = trisolve(&r, &b);
        let x2 = mldivide(&r, &b);
        assert_relative_eq!(x1, x2, epsilon = 1e-9);
    }

    #[test]
    fn vconcat_is_null_tolerant() {
        let a: DMatrix<f64> = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(vconcat(Some(&a), None).unwrap(), a);
        assert_eq!(vconcat(None, Some(&a)).unwrap(), a);
        assert!(vconcat::<f64>(None, None).is_none());
        let b: DMatrix<f64> = DMatrix::from_row_slice(1, 2, &[5.0, 6.0]);
        let stacked = vconcat(Some(&a), Some(&b)).unwrap();
        assert_eq!(stacked.nrows(), 3);
        assert_eq!(stacked.row(2)[0], 5.0);
    }
}
