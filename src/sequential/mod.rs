//! The "Ultimate" sequential engine: block-bidiagonal incremental QR.
//!
//! Each step stores a triangular `r_diag`/`r_supdiag`/`y` block that is
//! refined one more time every time the *next* step is evolved, and
//! finalized (triangularized, chopped to its own row count) the moment the
//! next evolution arrives. `observe` folds the step's own observation into
//! whatever bidiagonal residual (`r_bar`/`y_bar`) the evolution left behind.
//! `smooth` then runs a single backward pass reusing the same triangular
//! solves. `rollback`/`forget` make the whole thing usable online.
//!
//! Ported line-for-line from `ultimatekalman.c`'s `kalman_evolve` /
//! `kalman_observe` / `kalman_smooth` / `kalman_rollback`; `forget` drops
//! the earliest retained steps outright rather than the C source's disabled
//! `#ifdef MOVED` variant (see `SPEC_FULL.md` Open Question 3 in `DESIGN.md`).

pub mod conventional;
pub mod oddeven;

use nalgebra::{DMatrix, DVector, RealField};

use crate::covariance::{Covariance, CovarianceType};
use crate::error::{Error, ErrorKind};
use crate::matrix;
use crate::step_store::StepStore;

/// One step's triangular block-bidiagonal bookkeeping.
#[derive(Debug, Clone)]
struct SequentialStepRecord<R: RealField> {
    step: i64,
    n: usize,

    /// Finalized (`step + 1` has already been evolved) upper-triangular
    /// diagonal block, or the in-progress one while this step is `current`.
    r_diag: Option<DMatrix<R>>,
    /// Finalized super-diagonal block relating this step to the next.
    r_supdiag: Option<DMatrix<R>>,
    /// Right-hand side aligned with `r_diag`.
    y: Option<DMatrix<R>>,

    /// Residual rows left over from this step's own evolution, not yet
    /// folded in by `observe`.
    r_bar: Option<DMatrix<R>>,
    y_bar: Option<DMatrix<R>>,

    state: Option<DMatrix<R>>,
    covariance: Option<DMatrix<R>>,
}

impl<R: RealField> SequentialStepRecord<R> {
    fn new(step: i64, n: usize) -> Self {
        SequentialStepRecord {
            step,
            n,
            r_diag: None,
            r_supdiag: None,
            y: None,
            r_bar: None,
            y_bar: None,
            state: None,
            covariance: None,
        }
    }
}

/// The block-bidiagonal sequential ("Ultimate") engine.
pub struct UltimateEngine<R: RealField> {
    steps: StepStore<SequentialStepRecord<R>>,
    current: Option<SequentialStepRecord<R>>,
}

impl<R: RealField> Default for UltimateEngine<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RealField> UltimateEngine<R> {
    pub fn new() -> Self {
        UltimateEngine {
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

    /// Evolve to a new step of dimension `n`. `h`/`f`/`c`/`k` must all be
    /// `Some` except at step 0, where they must all be `None`.
    pub fn evolve(
        &mut self,
        n: usize,
        h: Option<&DMatrix<R>>,
        f: Option<&DMatrix<R>>,
        c: Option<&DMatrix<R>>,
        k: Option<&Covariance<R>>,
    ) -> Result<(), Error> {
        let step = self.steps.last_index().map(|i| i as i64 + 1).unwrap_or(0);

        if step == 0 {
            assert!(
                h.is_none() && f.is_none() && c.is_none() && k.is_none(),
                "evolve: step 0 carries no evolution equation"
            );
            self.current = Some(SequentialStepRecord::new(0, n));
            return Ok(());
        }

        let h = h.expect("evolve: H is required beyond step 0");
        let f = f.expect("evolve: F is required beyond step 0");
        let c = c.expect("evolve: c is required beyond step 0");
        let k = k.expect("evolve: K is required beyond step 0");

        let wh = k.weigh(h)?;
        let mut wf = k.weigh(f)?;
        let wc = k.weigh(c)?;
        matrix::scale_mut(&mut wf, -R::one());

        let last_index = self
            .steps
            .last_index()
            .expect("evolve: no previous step to extend");
        let n_imo = self.steps.get(last_index).unwrap().n;

        let (mut a, mut b, mut y) = {
            let prev = self.steps.get(last_index).unwrap();
            if let Some(r_diag) = prev.r_diag.as_ref() {
                let z_i = r_diag.nrows();
                let a = matrix::vconcat(Some(r_diag), Some(&wf)).unwrap();
                let zero_block = matrix::constant::<R>(z_i, n, R::zero());
                let b = matrix::vconcat(Some(&zero_block), Some(&wh)).unwrap();
                let y = matrix::vconcat(prev.y.as_ref(), Some(&wc)).unwrap();
                (a, b, y)
            } else {
                (wf.clone(), wh.clone(), wc.clone())
            }
        };

        let refl = matrix::qr_mut(&mut a);
        matrix::apply_qt_mut(&refl, &mut b);
        matrix::apply_qt_mut(&refl, &mut y);

        let mut next_current = SequentialStepRecord::new(step, n);
        if b.nrows() > n_imo {
            next_current.r_bar = Some(matrix::sub_block(&b, n_imo, b.nrows() - n_imo, 0, b.ncols()));
            next_current.y_bar = Some(matrix::sub_block(&y, n_imo, y.nrows() - n_imo, 0, y.ncols()));
        }

        let mut r_diag = matrix::chop(&a, n_imo.min(a.nrows()), a.ncols());
        matrix::triu_mut(&mut r_diag);
        let r_supdiag = matrix::chop(&b, n_imo.min(b.nrows()), b.ncols());
        let y_chop = matrix::chop(&y, n_imo.min(y.nrows()), y.ncols());

        {
            let prev = self.steps.get_mut(last_index).unwrap();
            prev.r_diag = Some(r_diag);
            prev.r_supdiag = Some(r_supdiag);
            prev.y = Some(y_chop);
        }

        self.current = Some(next_current);
        Ok(())
    }

    /// Fold this step's own observation (`g`/`o`/`c`) into the residual rows
    /// left over from `evolve`, finalizing this step and appending it to
    /// the store. Pass `None` for all three when this step has no
    /// observation.
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

        let observation = match (g, o) {
            (Some(g), Some(o)) => {
                let c_cov = c_cov.expect("observe: C is required when an observation is present");
                Some((c_cov.weigh(g)?, c_cov.weigh(o)?))
            }
            (None, None) => None,
            _ => panic!("observe: G and o must both be present or both absent"),
        };

        let a = matrix::vconcat(current.r_bar.as_ref(), observation.as_ref().map(|(wg, _)| wg));
        let y = matrix::vconcat(current.y_bar.as_ref(), observation.as_ref().map(|(_, wo)| wo));

        let state = if let (Some(mut a), Some(mut y)) = (a, y) {
            if a.nrows() >= a.ncols() {
                let refl = matrix::qr_mut(&mut a);
                matrix::apply_qt_mut(&refl, &mut y);
            }
            let rows = a.nrows().min(n_i);
            let mut r_diag = matrix::chop(&a, rows, a.ncols());
            let y_chop = matrix::chop(&y, rows, y.ncols());
            matrix::triu_mut(&mut r_diag);

            let state = if r_diag.nrows() == n_i && r_diag.ncols() == n_i {
                Some(matrix::trisolve(&r_diag, &y_chop))
            } else {
                None
            };

            current.covariance = Some(r_diag.clone());
            current.r_diag = Some(r_diag);
            current.y = Some(y_chop);
            state
        } else {
            None
        };

        current.state = Some(state.unwrap_or_else(|| DMatrix::from_element(n_i, 1, matrix::nan())));
        self.steps.append(current);
        Ok(())
    }

    /// Backward RTS-style pass over every retained step, refining `state`
    /// (and, if `with_covariance`, `covariance`) in place.
    pub fn smooth(&mut self, with_covariance: bool) {
        let (first, last) = match (self.steps.first_index(), self.steps.last_index()) {
            (Some(f), Some(l)) => (f, l),
            _ => return,
        };

        let mut prev_state: Option<DMatrix<R>> = None;
        for si in (first..=last).rev() {
            let rec = self.steps.get(si).unwrap();
            let n_i = rec.n;
            let mut state_mat = rec
                .y
                .clone()
                .unwrap_or_else(|| DMatrix::from_element(n_i, 1, matrix::nan()));

            if si < last {
                if let (Some(r_supdiag), Some(ps)) = (rec.r_supdiag.as_ref(), prev_state.as_ref()) {
                    matrix::gemm_mut(&mut state_mat, -R::one(), r_supdiag, ps, R::one());
                }
            }

            state_mat = match rec.r_diag.as_ref() {
                Some(r_diag) if r_diag.nrows() == n_i && r_diag.ncols() == n_i => {
                    matrix::trisolve(r_diag, &state_mat)
                }
                _ => DMatrix::from_element(n_i, 1, matrix::nan()),
            };

            self.steps.get_mut(si).unwrap().state = Some(state_mat.clone());
            prev_state = Some(state_mat);
        }

        if !with_covariance {
            return;
        }

        let mut running: Option<DMatrix<R>> = None;
        for si in (first..=last).rev() {
            let r_diag = match self.steps.get(si).unwrap().r_diag.clone() {
                Some(r) => r,
                None => continue,
            };
            let n_i = r_diag.nrows();

            if si == last {
                self.steps.get_mut(si).unwrap().covariance = Some(r_diag.clone());
                running = Some(r_diag);
                continue;
            }

            let r_supdiag = self.steps.get(si).unwrap().r_supdiag.clone().unwrap();
            let r_ipo = running.take().unwrap();
            let n_ipo = r_ipo.nrows();

            let mut a = matrix::vconcat(Some(&r_supdiag), Some(&r_ipo)).unwrap();
            let zero_block = matrix::constant::<R>(n_ipo, r_diag.ncols(), R::zero());
            let mut s = matrix::vconcat(Some(&r_diag), Some(&zero_block)).unwrap();

            let refl = matrix::qr_mut(&mut a);
            matrix::apply_qt_mut(&refl, &mut s);

            let new_covariance = matrix::sub_block(&s, n_ipo, n_i, 0, n_i);
            self.steps.get_mut(si).unwrap().covariance = Some(new_covariance.clone());
            running = Some(new_covariance);
        }
    }

    /// Discard every step after `si` (inclusive of its finalized
    /// bidiagonal block), reopening it as `current` so it can be observed
    /// again with different data.
    pub fn rollback(&mut self, si: i64) {
        loop {
            let dropped = match self.steps.drop_last() {
                Some(d) => d,
                None => return,
            };
            if dropped.step == si {
                let mut reopened = dropped;
                reopened.r_diag = None;
                reopened.r_supdiag = None;
                reopened.y = None;
                reopened.state = None;
                reopened.covariance = None;
                self.current = Some(reopened);
                return;
            }
            if dropped.step < si {
                // si was never observed; nothing further to drop.
                return;
            }
        }
    }

    /// Drop steps with index `<= si` from the front, never dropping the
    /// last remaining step.
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

    pub fn estimate(&self, si: i64) -> DVector<R> {
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
        let r_diag = rec
            .covariance
            .clone()
            .expect("covariance: step has no covariance factor yet (was smooth(with_covariance=true) called?)");
        Ok((r_diag, CovarianceType::Weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn k_identity(n: usize) -> Covariance<f64> {
        Covariance::weight(DMatrix::identity(n, n))
    }

    #[test]
    fn single_step_matches_weighted_least_squares() {
        let mut engine = UltimateEngine::<f64>::new();
        engine.evolve(2, None, None, None, None).unwrap();
        let g = DMatrix::<f64>::identity(2, 2);
        let o = DMatrix::from_row_slice(2, 1, &[3.0, 4.0]);
        engine.observe(Some(&g), Some(&o), Some(&k_identity(2))).unwrap();
        let x = engine.estimate(0);
        assert_relative_eq!(x[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn unobserved_step_without_residual_is_nan() {
        let mut engine = UltimateEngine::<f64>::new();
        engine.evolve(2, None, None, None, None).unwrap();
        engine.observe(None, None, None).unwrap();
        let x = engine.estimate(0);
        assert!(x[0].is_nan());
    }

    #[test]
    fn two_step_chain_propagates_through_f() {
        let mut engine = UltimateEngine::<f64>::new();
        engine.evolve(1, None, None, None, None).unwrap();
        let g0 = DMatrix::<f64>::identity(1, 1);
        let o0 = DMatrix::from_row_slice(1, 1, &[1.0]);
        engine.observe(Some(&g0), Some(&o0), Some(&k_identity(1))).unwrap();

        let h = DMatrix::<f64>::identity(1, 1);
        let f = DMatrix::from_row_slice(1, 1, &[1.0]);
        let c = DMatrix::from_row_slice(1, 1, &[0.0]);
        engine.evolve(1, Some(&h), Some(&f), Some(&c), Some(&k_identity(1))).unwrap();
        let g1 = DMatrix::<f64>::identity(1, 1);
        let o1 = DMatrix::from_row_slice(1, 1, &[2.0]);
        engine.observe(Some(&g1), Some(&o1), Some(&k_identity(1))).unwrap();

        let x1 = engine.estimate(1);
        assert!(x1[0] > 1.0 && x1[0] < 2.0);

        engine.smooth(true);
        let smoothed0 = engine.estimate(0);
        assert!(smoothed0[0] > 1.0);
    }

    #[test]
    fn rollback_reopens_the_target_step() {
        let mut engine = UltimateEngine::<f64>::new();
        engine.evolve(1, None, None, None, None).unwrap();
        let g0 = DMatrix::<f64>::identity(1, 1);
        let o0 = DMatrix::from_row_slice(1, 1, &[1.0]);
        engine.observe(Some(&g0), Some(&o0), Some(&k_identity(1))).unwrap();
        assert_eq!(engine.latest(), 0);

        engine.rollback(0);
        assert_eq!(engine.earliest(), -1);
        let o0b = DMatrix::from_row_slice(1, 1, &[5.0]);
        engine.observe(Some(&g0), Some(&o0b), Some(&k_identity(1))).unwrap();
        assert_relative_eq!(engine.estimate(0)[0], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn forget_never_drops_the_last_step() {
        let mut engine = UltimateEngine::<f64>::new();
        engine.evolve(1, None, None, None, None).unwrap();
        let g = DMatrix::<f64>::identity(1, 1);
        engine
            .observe(Some(&g), Some(&DMatrix::from_row_slice(1, 1, &[1.0])), Some(&k_identity(1)))
            .unwrap();
        engine.forget(100);
        assert_eq!(engine.earliest(), 0);
    }
}
