//! The classical two-pass sequential engine: predict/update forward filter,
//! then a backward Rauch-Tung-Striebel smoother.
//!
//! `predict` (`x ← F x`, `P ← F P Fᵀ + Q`), Joseph-form `update`, and a
//! `smooth_from_filtered`/`smooth_step` backward recursion, re-hosted on
//! [`crate::equations::StepEquations`]'s per-step varying dimensions instead
//! of a fixed-dimension transition/observation trait-object pair, and
//! generalized from an `F`-only transition to the full implicit
//! `H x_i = F x_{i-1} + c + w` equation (solved via `H⁻¹`, matching the
//! bidiagonal engine's contract).

use nalgebra::{DMatrix, RealField};

#[cfg(feature = "std")]
use log::trace;

use crate::covariance::{Covariance, CovarianceType};
use crate::error::{Error, ErrorKind};
use crate::matrix;
use crate::step_store::StepStore;

#[cfg(not(feature = "std"))]
macro_rules! trace {
    ($e:expr) => {{}};
    ($e:expr, $($es:expr),+) => {{}};
}

#[derive(Debug, Clone)]
struct ConventionalStepRecord<R: RealField> {
    step: i64,
    n: usize,

    f_eff: Option<DMatrix<R>>,
    c_eff: Option<DMatrix<R>>,
    q_eff: Option<DMatrix<R>>,

    predicted_state: Option<DMatrix<R>>,
    predicted_covariance: Option<DMatrix<R>>,

    state: Option<DMatrix<R>>,
    covariance: Option<DMatrix<R>>,
}

impl<R: RealField> ConventionalStepRecord<R> {
    fn new(step: i64, n: usize) -> Self {
        ConventionalStepRecord {
            step,
            n,
            f_eff: None,
            c_eff: None,
            q_eff: None,
            predicted_state: None,
            predicted_covariance: None,
            state: None,
            covariance: None,
        }
    }
}

/// The classical predict/update-then-RTS-smooth sequential engine.
pub struct ConventionalEngine<R: RealField> {
    steps: StepStore<ConventionalStepRecord<R>>,
    current: Option<ConventionalStepRecord<R>>,
}

impl<R: RealField> Default for ConventionalEngine<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RealField> ConventionalEngine<R> {
    pub fn new() -> Self {
        ConventionalEngine {
            steps: StepStore::new(),
            current: None,
        }
    }

    pub fn earliest(&self) -> i64 {
        self.steps.first_index().map(|i| i as i64).unwrap_or(-1)
    }

    pub fn latest(&self) -> i64 {
        self.current
            .as_ref()
            .map(|c| c.step)
            .or_else(|| self.steps.last_index().map(|i| i as i64))
            .unwrap_or(-1)
    }

    pub fn evolve(
        &mut self,
        n: usize,
        h: Option<&DMatrix<R>>,
        f: Option<&DMatrix<R>>,
        c: Option<&DMatrix<R>>,
        k: Option<&Covariance<R>>,
    ) -> Result<(), Error> {
        let step = self.steps.last_index().map(|i| i as i64 + 1).unwrap_or(0);

        let mut record = ConventionalStepRecord::new(step, n);

        if step == 0 {
            assert!(
                h.is_none() && f.is_none() && c.is_none() && k.is_none(),
                "evolve: step 0 carries no evolution equation"
            );
            self.current = Some(record);
            return Ok(());
        }

        let h = h.expect("evolve: H is required beyond step 0");
        let f = f.expect("evolve: F is required beyond step 0");
        let c = c.expect("evolve: c is required beyond step 0");
        let k = k.expect("evolve: K is required beyond step 0");
        let q = k.to_explicit()?;

        let h_inv = matrix::inverse(h);
        let f_eff = matrix::multiply(&h_inv, f);
        let c_eff = matrix::multiply(&h_inv, c);
        let h_inv_t = h_inv.transpose();
        let q_eff = matrix::multiply(&matrix::multiply(&h_inv, &q), &h_inv_t);

        let last_index = self.steps.last_index().expect("evolve: no previous step to extend");
        let prev = self.steps.get(last_index).unwrap();
        let prev_state = prev
            .state
            .clone()
            .expect("evolve: previous step has no filtered state");
        let prev_cov = prev
            .covariance
            .clone()
            .expect("evolve: previous step has no filtered covariance");

        let predicted_state = &matrix::multiply(&f_eff, &prev_state) + &c_eff;
        let predicted_covariance = &matrix::multiply(&matrix::multiply(&f_eff, &prev_cov), &f_eff.transpose())
            + &q_eff;
        trace!("predicted_state {:?}", predicted_state);

        record.f_eff = Some(f_eff);
        record.c_eff = Some(c_eff);
        record.q_eff = Some(q_eff);
        record.predicted_state = Some(predicted_state);
        record.predicted_covariance = Some(predicted_covariance);

        self.current = Some(record);
        Ok(())
    }

    pub fn observe(
        &mut self,
        g: Option<&DMatrix<R>>,
        o: Option<&DMatrix<R>>,
        c_cov: Option<&Covariance<R>>,
    ) -> Result<(), Error> {
        let mut current = self
            .current
            .take()
            .expect("observe: evolve must be called before observe");
        let n_i = current.n;

        let (state, covariance) = if current.step == 0 {
            match (g, o) {
                (Some(g), Some(o)) => {
                    let c_cov = c_cov.expect("observe: C required when an observation is present");
                    let w_g = c_cov.weigh(g)?;
                    let mut w_o = c_cov.weigh(o)?;
                    let mut r = w_g;
                    let refl = matrix::qr_mut(&mut r);
                    matrix::apply_qt_mut(&refl, &mut w_o);
                    matrix::triu_mut(&mut r);
                    let m0 = matrix::trisolve(&r, &w_o);
                    let rtr = matrix::multiply(&r.transpose(), &r);
                    let p0 = matrix::inverse(&rtr);
                    (m0, p0)
                }
                _ => (
                    DMatrix::from_element(n_i, 1, matrix::nan()),
                    DMatrix::from_element(n_i, n_i, matrix::nan()),
                ),
            }
        } else {
            let predicted_state = current.predicted_state.clone().unwrap();
            let predicted_covariance = current.predicted_covariance.clone().unwrap();

            match (g, o) {
                (Some(g), Some(o)) => {
                    let c_cov = c_cov.expect("observe: C required when an observation is present");
                    let c_explicit = c_cov.to_explicit()?;

                    let gt = g.transpose();
                    let s = &matrix::multiply(&matrix::multiply(g, &predicted_covariance), &gt) + &c_explicit;

                    let s_chol = nalgebra::linalg::Cholesky::new(s.clone())
                        .ok_or(ErrorKind::CovarianceNotPositiveSemiDefinite)?;
                    let s_inv = s_chol.inverse();

                    let k_gain = matrix::multiply(&matrix::multiply(&predicted_covariance, &gt), &s_inv);

                    let predicted_obs = matrix::multiply(g, &predicted_state);
                    let innovation = o - &predicted_obs;
                    let state = &predicted_state + &matrix::multiply(&k_gain, &innovation);

                    let kh = matrix::multiply(&k_gain, g);
                    let one_minus_kh = matrix::identity::<R>(n_i, n_i) - &kh;
                    let left = matrix::multiply(&matrix::multiply(&one_minus_kh, &predicted_covariance), &one_minus_kh.transpose());
                    let right = matrix::multiply(&matrix::multiply(&k_gain, &c_explicit), &k_gain.transpose());
                    let covariance = &left + &right;

                    (state, covariance)
                }
                _ => (predicted_state, predicted_covariance),
            }
        };

        current.state = Some(state);
        current.covariance = Some(covariance);
        self.steps.append(current);
        Ok(())
    }

    /// Backward RTS pass over every retained step, overwriting the forward
    /// filtered `state`/`covariance` with the smoothed ones.
    pub fn smooth(&mut self) -> Result<(), Error> {
        let (first, last) = match (self.steps.first_index(), self.steps.last_index()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Ok(()),
        };
        if first == last {
            return Ok(());
        }

        let mut smooth_future_state = self.steps.get(last).unwrap().state.clone().unwrap();
        let mut smooth_future_covariance = self.steps.get(last).unwrap().covariance.clone().unwrap();

        for si in (first..last).rev() {
            let next = self.steps.get(si + 1).unwrap().clone();
            let rec = self.steps.get(si).unwrap();

            let f_eff = next.f_eff.clone().unwrap();
            let c_eff = next.c_eff.clone().unwrap();
            let q_eff = next.q_eff.clone().unwrap();

            let filt_state = rec.state.clone().unwrap();
            let filt_covariance = rec.covariance.clone().unwrap();

            let prior_state = &matrix::multiply(&f_eff, &filt_state) + &c_eff;
            let prior_covariance = &matrix::multiply(&matrix::multiply(&f_eff, &filt_covariance), &f_eff.transpose())
                + &q_eff;

            let v_chol = nalgebra::linalg::Cholesky::new(prior_covariance.clone())
                .ok_or(ErrorKind::CovarianceNotPositiveSemiDefinite)?;
            let inv_prior_covariance = v_chol.inverse();

            let j = matrix::multiply(&filt_covariance, &matrix::multiply(&f_eff.transpose(), &inv_prior_covariance));

            let residual_state = &smooth_future_state - &prior_state;
            let state = &filt_state + &matrix::multiply(&j, &residual_state);

            let residual_covariance = &smooth_future_covariance - &prior_covariance;
            let covariance = &filt_covariance
                + &matrix::multiply(&j, &matrix::multiply(&residual_covariance, &j.transpose()));

            self.steps.get_mut(si).unwrap().state = Some(state.clone());
            self.steps.get_mut(si).unwrap().covariance = Some(covariance.clone());

            smooth_future_state = state;
            smooth_future_covariance = covariance;
        }

        Ok(())
    }

    pub fn rollback(&mut self, si: i64) {
        loop {
            let dropped = match self.steps.drop_last() {
                Some(d) => d,
                None => return,
            };
            if dropped.step == si {
                let mut reopened = dropped;
                reopened.state = None;
                reopened.covariance = None;
                self.current = Some(reopened);
                return;
            }
            if dropped.step < si {
                return;
            }
        }
    }

    pub fn forget(&mut self, si: i64) {
        while let (Some(first), Some(last)) = (self.steps.first_index(), self.steps.last_index()) {
            if first as i64 > si || first == last {
                break;
            }
            self.steps.drop_first();
        }
    }

    /// Resolve the `-1` ("latest") sentinel against the step store.
    fn resolve_index(&self, si: i64) -> usize {
        if si < 0 {
            self.steps.last_index().expect("estimate/covariance: step store is empty")
        } else {
            si as usize
        }
    }

    pub fn estimate(&self, si: i64) -> nalgebra::DVector<R> {
        let index = self.resolve_index(si);
        let rec = self
            .steps
            .get(index)
            .expect("estimate: step index out of range");
        matrix::to_vector(rec.state.as_ref().expect("estimate: step has no state yet"))
    }

    pub fn covariance(&self, si: i64) -> Result<(DMatrix<R>, CovarianceType), Error> {
        let index = if si < 0 {
            self.steps.last_index().ok_or(ErrorKind::EmptyStepStore)?
        } else {
            si as usize
        };
        let rec = self
            .steps
            .get(index)
            .ok_or(ErrorKind::EmptyStepStore)?;
        Ok((
            rec.covariance.clone().expect("covariance: step has no covariance yet"),
            CovarianceType::Explicit,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn k_identity(n: usize, sigma2: f64) -> Covariance<f64> {
        Covariance::explicit(DMatrix::identity(n, n) * sigma2)
    }

    #[test]
    fn filtered_estimate_moves_toward_observation() {
        let mut engine = ConventionalEngine::<f64>::new();
        engine.evolve(1, None, None, None, None).unwrap();
        let g0 = DMatrix::<f64>::identity(1, 1);
        engine
            .observe(Some(&g0), Some(&DMatrix::from_row_slice(1, 1, &[0.0])), Some(&k_identity(1, 1.0)))
            .unwrap();

        let h = DMatrix::<f64>::identity(1, 1);
        let f = DMatrix::from_row_slice(1, 1, &[1.0]);
        let c = DMatrix::from_row_slice(1, 1, &[0.0]);
        engine
            .evolve(1, Some(&h), Some(&f), Some(&c), Some(&k_identity(1, 0.01)))
            .unwrap();
        engine
            .observe(Some(&g0), Some(&DMatrix::from_row_slice(1, 1, &[10.0])), Some(&k_identity(1, 1.0)))
            .unwrap();

        let x1 = engine.estimate(1);
        assert!(x1[0] > 0.0 && x1[0] < 10.0);
    }

    #[test]
    fn smoothing_pulls_earlier_estimate_toward_later_evidence() {
        let mut engine = ConventionalEngine::<f64>::new();
        engine.evolve(1, None, None, None, None).unwrap();
        let g0 = DMatrix::<f64>::identity(1, 1);
        engine
            .observe(Some(&g0), Some(&DMatrix::from_row_slice(1, 1, &[0.0])), Some(&k_identity(1, 1.0)))
            .unwrap();
        let before = engine.estimate(0)[0];

        let h = DMatrix::<f64>::identity(1, 1);
        let f = DMatrix::from_row_slice(1, 1, &[1.0]);
        let c = DMatrix::from_row_slice(1, 1, &[0.0]);
        engine
            .evolve(1, Some(&h), Some(&f), Some(&c), Some(&k_identity(1, 0.01)))
            .unwrap();
        engine
            .observe(Some(&g0), Some(&DMatrix::from_row_slice(1, 1, &[10.0])), Some(&k_identity(1, 1.0)))
            .unwrap();

        engine.smooth().unwrap();
        let after = engine.estimate(0)[0];
        assert_relative_eq!(before, 0.0, epsilon = 1e-9);
        assert!(after > before);
    }
}
