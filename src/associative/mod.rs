//! The associative ("Särkkä & García-Fernández") engine.
//!
//! Operates on a whole trajectory at once: build a filtering element per
//! step, prefix-scan them with the (non-commutative) filtering operator to
//! get every step's filtered state/covariance, build a smoothing element
//! per step, then prefix-scan those *right to left* with the smoothing
//! operator to get every step's smoothed state/covariance. Because both
//! operators are associative, the same scan can run as a flat left-to-right
//! accumulation (this module, and the reference for every other engine's
//! scan order), a work-efficient tree reduction
//! ([`crate::sequential::oddeven`], reusing these exact elements and
//! operators), or a parallel divide-and-conquer scan
//! (`crate::parallel::RayonRuntime`, under the `parallel` feature) — the
//! bracketing order never changes the result.
//!
//! Ported from `kalman_associative_smoother.c`'s `kalman_smooth_associative`,
//! `filtered_to_state_new`, and `smoothed_to_state_new`. The write-back
//! index bookkeeping here is restated directly in terms of "position `j`'s
//! result", rather than the C source's `l - 2 - j + 1` arithmetic over a
//! separately-indexed scan-output array — same values, clearer indices.

pub mod elements;

use nalgebra::RealField;

use crate::equations::StepEquations;
use crate::error::Error;
use crate::matrix;
use crate::parallel::{ParallelRuntime, SerialRuntime};

/// Run the full associative filter+smooth over `equations` in place,
/// writing `state`/`covariance`/`covariance_type` into every entry, as one
/// flat left-to-right/right-to-left scan.
pub fn smooth_associative<R: RealField>(equations: &mut [StepEquations<R>]) -> Result<(), Error> {
    smooth_associative_with_runtime(equations, &SerialRuntime)
}

/// Run the full associative filter+smooth, evaluating both scans through
/// `runtime` — a flat fold for [`SerialRuntime`], a work-stealing
/// divide-and-conquer scan for [`crate::parallel::RayonRuntime`] under the
/// `parallel` feature. The bracketing order never changes the result since
/// both combine operators are associative.
pub fn smooth_associative_with_runtime<R: RealField>(
    equations: &mut [StepEquations<R>],
    runtime: &dyn ParallelRuntime<R>,
) -> Result<(), Error> {
    let l = equations.len();
    if l == 0 {
        return Ok(());
    }
    if l == 1 {
        return smooth_single_step(&mut equations[0]);
    }

    let mut elems = elements::build_filtering_elements(equations)?;

    // Filtering scan over elements[1..l], left to right.
    let filtered = runtime.prefix_scan(&elems[1..l], false, &elements::filtering_combine);

    for j in 1..l {
        elems[j].state = filtered[j - 1].b.clone();
        elems[j].covariance = filtered[j - 1].z.clone();
    }

    equations[l - 1].state = filtered[l - 2].b.as_ref().map(|m| matrix::to_vector(m));
    equations[l - 1].covariance = filtered[l - 2].z.clone();
    equations[l - 1].covariance_type = Some(crate::covariance::CovarianceType::Explicit);

    elements::build_smoothing_elements(&mut elems)?;

    // Smoothing scan over elements[0..l], right to left; smoothed_at[j] is
    // the combination of elems[j..l-1] folded right to left, exactly the
    // value step j's smoothed state/covariance needs.
    let smoothed_at = runtime.prefix_scan(&elems, true, &elements::smoothing_combine);

    for j in 0..(l - 1) {
        let s = &smoothed_at[j];
        equations[j].state = s.g.as_ref().map(|m| matrix::to_vector(m));
        equations[j].covariance = s.big_l.clone();
        equations[j].covariance_type = Some(crate::covariance::CovarianceType::Explicit);
    }

    Ok(())
}

/// A lone step is its own filtered and smoothed estimate: just the QR-based
/// posterior of its own observation (`build_filtering_element_new`'s `i==1`
/// boundary computation, with nothing to combine it with).
pub(crate) fn smooth_single_step<R: RealField>(eq: &mut StepEquations<R>) -> Result<(), Error> {
    match (eq.g.as_ref(), eq.o.as_ref(), eq.c_cov.as_ref()) {
        (Some(g), Some(o), Some(c_cov)) => {
            let w_g = c_cov.weigh(g)?;
            let mut w_o = c_cov.weigh(o)?;
            let mut r = w_g;
            let refl = matrix::qr_mut(&mut r);
            matrix::apply_qt_mut(&refl, &mut w_o);
            matrix::triu_mut(&mut r);
            let m0 = matrix::trisolve(&r, &w_o);
            let rtr = matrix::multiply(&r.transpose(), &r);
            let p0 = matrix::inverse(&rtr);

            eq.state = Some(matrix::to_vector(&m0));
            eq.covariance = Some(p0);
            eq.covariance_type = Some(crate::covariance::CovarianceType::Explicit);
        }
        _ => {
            eq.state = Some(nalgebra::DVector::from_element(eq.n, matrix::nan()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::Covariance;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn identity_cov(n: usize) -> Covariance<f64> {
        Covariance::explicit(DMatrix::identity(n, n))
    }

    #[test]
    fn matches_sequential_two_step_chain() {
        let mut equations = vec![
            StepEquations::new(0, 1).with_observation(
                DMatrix::identity(1, 1),
                DMatrix::from_row_slice(1, 1, &[1.0]),
                identity_cov(1),
            ),
            StepEquations::new(1, 1)
                .with_evolution(
                    DMatrix::identity(1, 1),
                    DMatrix::from_row_slice(1, 1, &[1.0]),
                    DMatrix::from_row_slice(1, 1, &[0.0]),
                    identity_cov(1),
                )
                .with_observation(
                    DMatrix::identity(1, 1),
                    DMatrix::from_row_slice(1, 1, &[2.0]),
                    identity_cov(1),
                ),
        ];

        smooth_associative(&mut equations).unwrap();

        let x0 = equations[0].state.as_ref().unwrap()[0];
        let x1 = equations[1].state.as_ref().unwrap()[0];
        assert!(x0 > 1.0 && x0 < 2.0);
        assert_relative_eq!(x1, x1);
    }

    #[test]
    fn single_step_is_the_weighted_least_squares_solution() {
        let mut equations = vec![StepEquations::new(0, 1).with_observation(
            DMatrix::identity(1, 1),
            DMatrix::from_row_slice(1, 1, &[7.0]),
            identity_cov(1),
        )];
        smooth_associative(&mut equations).unwrap();
        assert_relative_eq!(equations[0].state.as_ref().unwrap()[0], 7.0, epsilon = 1e-9);
    }
}
