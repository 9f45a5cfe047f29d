//! Sequential and associative-parallel Kalman filtering and smoothing.
//!
//! This crate estimates the hidden-state trajectory of a discrete-time
//! linear Gaussian system from a sequence of noisy linear observations. Two
//! engines implement the same `evolve`/`observe`/`smooth` contract with
//! different internal structure:
//!
//! - [`sequential::UltimateEngine`] — a single-pass incremental solver that
//!   maintains a block-bidiagonal upper-triangular QR factorization of the
//!   whole observed-so-far problem. Supports on-line [`Driver::rollback`]
//!   and [`Driver::forget`] for bounded-memory filtering.
//! - [`associative::smooth_associative`] — the whole-trajectory smoother
//!   expressed as two prefix scans over an associative, non-commutative
//!   binary operator (Särkkä & García-Fernández, 2021), admitting a
//!   work-efficient parallel implementation via [`parallel::RayonRuntime`].
//!
//! [`driver::Driver`] is the entry point most callers want: it selects one
//! of four algorithms ([`driver::Algorithm::Ultimate`],
//! [`driver::Algorithm::Conventional`] — a classical two-pass
//! predict/update/RTS smoother, [`driver::Algorithm::OddEven`] — a batch
//! cyclic-reduction variant of the bidiagonal QR, or
//! [`driver::Algorithm::Associative`]) behind one uniform surface. All four
//! agree on filtered and smoothed estimates up to floating-point rounding
//! for a well-conditioned problem; only the sequential-family engines
//! support on-line `rollback`/`forget` mid-trajectory.
//!
//! Characteristics:
//! - Uses the [nalgebra](https://nalgebra.org) crate for dense linear algebra.
//! - Supports `no_std` (`matrix`, `covariance`, `equations`, `step_store`);
//!   the engines, the parallel runtime, and [`driver::Driver`] require the
//!   `std` feature, and `rayon`-backed parallelism is an additional opt-in
//!   `parallel` feature layered on top.
//! - Covariances carry an explicit tag ([`covariance::CovarianceType`]) so a
//!   caller can supply a weight, a triangular factor, a diagonal weight, or
//!   an explicit covariance matrix, whichever is cheapest to produce.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(non_snake_case)]

extern crate alloc;

pub mod matrix;

pub mod covariance;

pub mod equations;

pub mod step_store;

#[cfg(feature = "std")]
pub mod sequential;

#[cfg(feature = "std")]
pub mod associative;

#[cfg(feature = "std")]
pub mod parallel;

#[cfg(feature = "std")]
pub mod allocator_set;

#[cfg(feature = "std")]
pub mod driver;

mod error;
pub use error::{Error, ErrorKind};

mod state_and_covariance;
pub use state_and_covariance::StateAndCovariance;

pub use covariance::{Covariance, CovarianceType};
pub use equations::StepEquations;

#[cfg(feature = "std")]
pub use driver::{Algorithm, Driver, KalmanOptions};

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[cfg(feature = "std")]
    #[test]
    fn driver_round_trips_through_state_and_covariance() {
        let mut driver = Driver::<f64>::new(KalmanOptions::default());
        driver.evolve(1, None, None, None, None).unwrap();
        let g = DMatrix::<f64>::identity(1, 1);
        driver
            .observe(
                Some(&g),
                Some(&DMatrix::from_row_slice(1, 1, &[3.0])),
                Some(&Covariance::weight(DMatrix::identity(1, 1))),
            )
            .unwrap();

        let sc = driver.state_and_covariance(-1).unwrap();
        assert!((sc.state()[0] - 3.0).abs() < 1e-9);
        assert_eq!(sc.covariance().nrows(), 1);
    }
}
