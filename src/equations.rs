//! Caller-owned per-step equations.
//!
//! One `StepEquations<R>` carries everything a step contributes to the
//! system — the evolution equation `H x_i = F x_{i-1} + c + w` and the
//! observation equation `o = G x_i + v` — plus the `state`/`covariance`
//! fields every engine writes its answer back into. The sequential engines
//! (`sequential::UltimateEngine`, `ConventionalEngine`, `OddEvenEngine`)
//! consume these incrementally through their own `evolve`/`observe` calls
//! and never need the type itself; the associative engine operates on a
//! whole slice of them directly, matching the C original's
//! `kalman_step_equations_t` array.
//!
//! Ported from `kalman_associative_smoother.c`'s `kalman_step_equations_t`.

use nalgebra::{DMatrix, DVector, RealField};

use crate::covariance::{Covariance, CovarianceType};

/// The evolution and observation equations for one step, and the slot its
/// answer is written into.
#[derive(Debug, Clone)]
pub struct StepEquations<R: RealField> {
    /// Logical step index, `0` for the first step.
    pub step: i64,
    /// State dimension `n_i` at this step.
    pub n: usize,

    /// Implicit-observation matrix `H` (`n x n`). `None` at step 0.
    pub h: Option<DMatrix<R>>,
    /// Transition matrix `F` (`n x n_{i-1}`). `None` at step 0.
    pub f: Option<DMatrix<R>>,
    /// Transition offset `c` (`n x 1`). `None` at step 0.
    pub c: Option<DMatrix<R>>,
    /// Process noise covariance `K`. `None` at step 0.
    pub k: Option<Covariance<R>>,

    /// Observation matrix `G` (`m x n`), `None` if this step has no
    /// observation.
    pub g: Option<DMatrix<R>>,
    /// Observation `o` (`m x 1`).
    pub o: Option<DMatrix<R>>,
    /// Observation noise covariance `C`.
    pub c_cov: Option<Covariance<R>>,

    /// Filtered or smoothed state, once an engine has produced one.
    pub state: Option<DVector<R>>,
    /// Filtered or smoothed covariance, once an engine has produced one.
    pub covariance: Option<DMatrix<R>>,
    /// How `covariance` should be interpreted.
    pub covariance_type: Option<CovarianceType>,
}

impl<R: RealField> StepEquations<R> {
    /// A step with no evolution and no observation yet.
    pub fn new(step: i64, n: usize) -> Self {
        StepEquations {
            step,
            n,
            h: None,
            f: None,
            c: None,
            k: None,
            g: None,
            o: None,
            c_cov: None,
            state: None,
            covariance: None,
            covariance_type: None,
        }
    }

    /// Attach the evolution equation `H x_i = F x_{i-1} + c + w`.
    pub fn with_evolution(
        mut self,
        h: DMatrix<R>,
        f: DMatrix<R>,
        c: DMatrix<R>,
        k: Covariance<R>,
    ) -> Self {
        self.h = Some(h);
        self.f = Some(f);
        self.c = Some(c);
        self.k = Some(k);
        self
    }

    /// Attach the observation equation `o = G x_i + v`.
    pub fn with_observation(mut self, g: DMatrix<R>, o: DMatrix<R>, c_cov: Covariance<R>) -> Self {
        self.g = Some(g);
        self.o = Some(o);
        self.c_cov = Some(c_cov);
        self
    }

    pub fn has_observation(&self) -> bool {
        self.g.is_some()
    }
}
