//! Odd-even (Brent-Kung) scan variant of the associative filter/smoother.
//!
//! The filtering and smoothing operators in [`crate::associative::elements`]
//! are associative but not commutative, so a prefix scan over them can use
//! any bracketing of the sequence without changing the result — only the
//! left-to-right order of the elements matters, not how the combines are
//! grouped. `associative::smooth_associative` evaluates the scan as one
//! flat left-to-right accumulation; `parallel::RayonRuntime` evaluates it
//! as a divide-and-conquer tree across worker threads. This module
//! evaluates the same tree shape *sequentially* — a classic work-efficient
//! up-sweep/down-sweep (Brent-Kung) pass — which is occasionally faster
//! than the flat scan on long chains because it halves the number of
//! combines that depend on the previous one, improving instruction-level
//! parallelism even without threads.
//!
//! No C source in the retrieved corpus implements this traversal order; it
//! is built from `associative`'s own elements/operators plus the
//! tree-reduction shape spec.md attributes to the cyclic-reduction family
//! of block-tridiagonal solvers. Because the whole chain must be in hand to
//! build the tree, this engine is batch-only: no online `rollback`/`forget`.

use nalgebra::RealField;

use crate::associative::elements::{self, AssociativeElement};
use crate::covariance::CovarianceType;
use crate::equations::StepEquations;
use crate::error::Error;
use crate::matrix;

/// Run the full odd-even filter+smooth over `equations` in place.
pub fn smooth_oddeven<R: RealField>(equations: &mut [StepEquations<R>]) -> Result<(), Error> {
    let l = equations.len();
    if l == 0 {
        return Ok(());
    }
    if l == 1 {
        return crate::associative::smooth_single_step(&mut equations[0]);
    }

    let mut elems = elements::build_filtering_elements(equations)?;

    let filtering_slice = &elems[1..l];
    let filtered = tree_prefix_scan(filtering_slice, &elements::filtering_combine);

    for j in 1..l {
        elems[j].state = filtered[j - 1].b.clone();
        elems[j].covariance = filtered[j - 1].z.clone();
    }

    equations[l - 1].state = filtered[l - 2].b.as_ref().map(|m| matrix::to_vector(m));
    equations[l - 1].covariance = filtered[l - 2].z.clone();
    equations[l - 1].covariance_type = Some(CovarianceType::Explicit);

    elements::build_smoothing_elements(&mut elems)?;

    let reversed: Vec<AssociativeElement<R>> = elems.iter().rev().cloned().collect();
    let smoothed_rev = tree_prefix_scan(&reversed, &elements::smoothing_combine);
    // smoothed_rev[k] corresponds to position l - 1 - k.

    for j in 0..(l - 1) {
        let s = &smoothed_rev[l - 1 - j];
        equations[j].state = s.g.as_ref().map(|m| matrix::to_vector(m));
        equations[j].covariance = s.big_l.clone();
        equations[j].covariance_type = Some(CovarianceType::Explicit);
    }

    Ok(())
}

/// Inclusive left-to-right prefix scan, evaluated as a Brent-Kung
/// up-sweep/down-sweep over `combine` rather than a flat accumulation.
/// `out[i]` is `items[0] ∘ items[1] ∘ ... ∘ items[i]`.
fn tree_prefix_scan<R: RealField>(
    items: &[AssociativeElement<R>],
    combine: &dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R>,
) -> Vec<AssociativeElement<R>> {
    let n = items.len();
    let mut out: Vec<AssociativeElement<R>> = items.to_vec();
    scan_recursive(items, combine, &mut out);
    debug_assert_eq!(out.len(), n);
    out
}

fn scan_recursive<R: RealField>(
    items: &[AssociativeElement<R>],
    combine: &dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R>,
    out: &mut [AssociativeElement<R>],
) {
    let n = items.len();
    if n <= 1 {
        return;
    }
    let mid = n / 2;
    let (left_items, right_items) = items.split_at(mid);
    let (left_out, right_out) = out.split_at_mut(mid);

    scan_recursive(left_items, combine, left_out);
    scan_recursive(right_items, combine, right_out);

    let left_total = left_out[mid - 1].clone();
    for v in right_out.iter_mut() {
        *v = combine(&left_total, v);
    }
}
