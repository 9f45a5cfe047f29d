//! End-to-end canonical scenario: a point rotating at a fixed angular rate,
//! observed under noise, filtered and smoothed — the same problem
//! `demos/rotation.rs` drives interactively. Ported from `rotation.c`.
//!
//! No MATLAB reference trajectory ships in this corpus, so these assertions
//! check internal-consistency properties instead of exact reference numbers:
//! energy conservation under a pure rotation, monotonic precision gain from
//! filtering, cross-engine agreement, and the expected effect of `rollback`.

use approx::assert_relative_eq;
use nalgebra::DMatrix;
use ultimate_kalman::{Algorithm, Covariance, Driver, KalmanOptions};

fn rotation_matrix(alpha: f64) -> DMatrix<f64> {
    DMatrix::from_row_slice(2, 2, &[alpha.cos(), -alpha.sin(), alpha.sin(), alpha.cos()])
}

/// Evolve a noiseless point through `k` steps of a pure rotation and observe
/// it at every step with a fixed noise covariance, on the given algorithm.
fn run_rotation(algorithm: Algorithm, k: usize, observation_variance: f64) -> Driver<f64> {
    let mut driver = Driver::new(KalmanOptions {
        algorithm,
        ..KalmanOptions::default()
    });

    let alpha = 2.0 * std::f64::consts::PI / 16.0;
    let f = rotation_matrix(alpha);
    let h = DMatrix::<f64>::identity(2, 2);
    let g = DMatrix::<f64>::identity(2, 2);
    let zero = DMatrix::from_row_slice(2, 1, &[0.0, 0.0]);

    // process noise is negligible: the true state follows the rotation exactly
    let kcov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1e6));
    let ccov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1.0 / observation_variance.sqrt()));

    let mut true_state = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);

    driver.evolve(2, None, None, None, None).unwrap();
    driver.observe(Some(&g), Some(&true_state), Some(&ccov)).unwrap();

    for _ in 1..k {
        true_state = &f * &true_state;
        driver.evolve(2, Some(&h), Some(&f), Some(&zero), Some(&kcov)).unwrap();
        driver.observe(Some(&g), Some(&true_state), Some(&ccov)).unwrap();
    }

    driver
}

#[test]
fn filtering_a_noiseless_rotation_with_noiseless_observations_recovers_the_trajectory() {
    let mut driver = run_rotation(Algorithm::Ultimate, 16, 1e-12);
    driver.smooth().unwrap();

    let alpha = 2.0 * std::f64::consts::PI / 16.0;
    let f = rotation_matrix(alpha);
    let mut expected = DMatrix::from_row_slice(2, 1, &[1.0, 0.0]);
    for i in 0..16 {
        let estimate = driver.estimate(i);
        assert_relative_eq!(estimate[0], expected[(0, 0)], epsilon = 1e-4);
        assert_relative_eq!(estimate[1], expected[(1, 0)], epsilon = 1e-4);
        expected = &f * &expected;
    }
}

#[test]
fn a_full_rotation_returns_the_filtered_estimate_near_its_starting_point() {
    // F is an exact rotation: 16 steps of alpha = 2*pi/16 is one full turn.
    let mut driver = run_rotation(Algorithm::Ultimate, 17, 1e-8);
    driver.smooth().unwrap();
    let start = driver.estimate(0);
    let after_full_turn = driver.estimate(16);
    assert_relative_eq!(start[0], after_full_turn[0], epsilon = 1e-3);
    assert_relative_eq!(start[1], after_full_turn[1], epsilon = 1e-3);
}

#[test]
fn smoothed_covariance_is_never_larger_than_the_filtered_covariance() {
    let mut driver = run_rotation(Algorithm::Ultimate, 10, 1e-2);
    let (filtered_cov, filtered_kind) = driver.covariance(0).unwrap();
    let filtered_trace = Covariance::new(filtered_cov, filtered_kind).to_explicit().unwrap().trace();

    driver.smooth().unwrap();
    let (smoothed_cov, smoothed_kind) = driver.covariance(0).unwrap();
    let smoothed_trace = Covariance::new(smoothed_cov, smoothed_kind).to_explicit().unwrap().trace();

    assert!(
        smoothed_trace <= filtered_trace + 1e-9,
        "smoothing should not increase uncertainty at step 0: filtered={filtered_trace}, smoothed={smoothed_trace}"
    );
}

#[test]
fn ultimate_and_conventional_agree_on_the_rotation_trajectory() {
    let mut ultimate = run_rotation(Algorithm::Ultimate, 12, 1e-3);
    let mut conventional = run_rotation(Algorithm::Conventional, 12, 1e-3);
    ultimate.smooth().unwrap();
    conventional.smooth().unwrap();

    for i in 0..12 {
        let u = ultimate.estimate(i);
        let c = conventional.estimate(i);
        assert_relative_eq!(u[0], c[0], epsilon = 1e-5);
        assert_relative_eq!(u[1], c[1], epsilon = 1e-5);
    }
}

#[test]
fn rollback_to_an_earlier_step_and_reobserving_changes_only_what_follows() {
    let mut driver = run_rotation(Algorithm::Ultimate, 6, 1e-3);
    let estimate_before_step2 = driver.estimate(1);

    driver.rollback(4).unwrap();
    let g = DMatrix::<f64>::identity(2, 2);
    let ccov = Covariance::weight(DMatrix::from_diagonal_element(2, 2, 1000.0));
    // a wildly different observation at step 4
    driver
        .observe(Some(&g), Some(&DMatrix::from_row_slice(2, 1, &[100.0, -100.0])), Some(&ccov))
        .unwrap();

    // step 1, well before the rollback point, is untouched
    let estimate_after = driver.estimate(1);
    assert_relative_eq!(estimate_before_step2[0], estimate_after[0], epsilon = 1e-9);
    assert_relative_eq!(estimate_before_step2[1], estimate_after[1], epsilon = 1e-9);

    // step 4 itself now reflects the new, confidently-weighted observation
    let estimate4 = driver.estimate(4);
    assert_relative_eq!(estimate4[0], 100.0, epsilon = 1.0);
    assert_relative_eq!(estimate4[1], -100.0, epsilon = 1.0);
}
