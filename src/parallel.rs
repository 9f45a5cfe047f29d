//! Parallel execution facade for the associative engine.
//!
//! Ported from `parallel_tbb.cpp`'s `foreach_in_range`/`parallel_scan_c`
//! (blocksize/thread-count knobs, stride-reversal for right-to-left scans)
//! and `parallel_sequential.c`'s single-threaded fallback. `SerialRuntime`
//! is always available; `RayonRuntime` requires the `parallel` feature and
//! backs both the embarrassingly-parallel per-step element construction and
//! the scan itself with a work-stealing pool.

use nalgebra::RealField;

use crate::allocator_set::ScanArena;
use crate::associative::elements::AssociativeElement;

/// How a [`ParallelRuntime`] should be sized. `None` means "let the runtime
/// choose" (all available cores for `RayonRuntime`, irrelevant for
/// `SerialRuntime`), matching the C original's `-1` sentinel for
/// `nthreads`/`blocksize`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    pub nthreads: Option<usize>,
    pub blocksize: Option<usize>,
}

/// An execution strategy for the embarrassingly-parallel per-step work and
/// the associative prefix scan.
pub trait ParallelRuntime<R: RealField> {
    /// Run `f(i)` for every `i` in `0..n`, in whatever order and however
    /// many workers this runtime chooses.
    fn for_each(&self, n: usize, f: &(dyn Fn(usize) + Sync));

    /// Inclusive prefix scan: `out[i]` becomes `items[0] ∘ .. ∘ items[i]`
    /// for `reverse == false`, or `items[n-1] ∘ .. ∘ items[i]` for
    /// `reverse == true` (the scan used by the smoothing pass, which runs
    /// right to left).
    fn prefix_scan(
        &self,
        items: &[AssociativeElement<R>],
        reverse: bool,
        combine: &(dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R> + Sync),
    ) -> Vec<AssociativeElement<R>>;
}

/// Single-threaded reference runtime: a flat loop, a flat accumulation.
/// Always available, and what the crate uses when the `parallel` feature
/// is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialRuntime;

impl<R: RealField> ParallelRuntime<R> for SerialRuntime {
    fn for_each(&self, n: usize, f: &(dyn Fn(usize) + Sync)) {
        for i in 0..n {
            f(i);
        }
    }

    fn prefix_scan(
        &self,
        items: &[AssociativeElement<R>],
        reverse: bool,
        combine: &(dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R> + Sync),
    ) -> Vec<AssociativeElement<R>> {
        let n = items.len();
        let mut out: Vec<AssociativeElement<R>> = Vec::with_capacity(n);
        if n == 0 {
            return out;
        }
        let indices: Vec<usize> = if reverse {
            (0..n).rev().collect()
        } else {
            (0..n).collect()
        };
        let mut acc = items[indices[0]].clone();
        out.push(acc.clone());
        for &i in indices.iter().skip(1) {
            acc = combine(&acc, &items[i]);
            out.push(acc.clone());
        }
        if reverse {
            out.reverse();
        }
        out
    }
}

#[cfg(feature = "parallel")]
pub use rayon_runtime::RayonRuntime;

#[cfg(feature = "parallel")]
mod rayon_runtime {
    use super::*;

    /// `rayon`-backed runtime: `for_each` fans out over a `rayon::scope`,
    /// `prefix_scan` runs a divide-and-conquer (Blelloch-style) up-sweep/
    /// down-sweep via `rayon::join`. Falls back to a flat accumulation
    /// below `blocksize`, where fork overhead would dominate.
    pub struct RayonRuntime {
        pool: Option<rayon::ThreadPool>,
        blocksize: usize,
    }

    impl RayonRuntime {
        pub fn new(config: RuntimeConfig) -> Self {
            let pool = config.nthreads.map(|n| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .expect("RayonRuntime::new: failed to build thread pool")
            });
            RayonRuntime {
                pool,
                blocksize: config.blocksize.unwrap_or(64).max(1),
            }
        }

        fn run<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
            match &self.pool {
                Some(p) => p.install(f),
                None => f(),
            }
        }
    }

    impl<R: RealField> ParallelRuntime<R> for RayonRuntime {
        fn for_each(&self, n: usize, f: &(dyn Fn(usize) + Sync)) {
            let block = self.blocksize.min(n.max(1));
            self.run(|| {
                rayon::scope(|s| {
                    let mut start = 0;
                    while start < n {
                        let end = (start + block).min(n);
                        s.spawn(move |_| {
                            for i in start..end {
                                f(i);
                            }
                        });
                        start = end;
                    }
                });
            });
        }

        fn prefix_scan(
            &self,
            items: &[AssociativeElement<R>],
            reverse: bool,
            combine: &(dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R> + Sync),
        ) -> Vec<AssociativeElement<R>> {
            let n = items.len();
            if n == 0 {
                return Vec::new();
            }
            self.run(|| {
                let ordered: Vec<AssociativeElement<R>> = if reverse {
                    items.iter().rev().cloned().collect()
                } else {
                    items.to_vec()
                };
                let mut out = ordered.clone();
                let arena = ScanArena::new();
                self.scan_recursive(&ordered, combine, &mut out, &arena);
                arena.drain_and_drop();
                if reverse {
                    out.reverse();
                }
                out
            })
        }
    }

    impl RayonRuntime {
        /// Recursive up-sweep/down-sweep. Every `right_out[i]` computed by
        /// the right-hand recursive call is only correct relative to its own
        /// partition; folding in `left_total` below supersedes it with the
        /// absolute value. The superseded element is registered in `arena`
        /// rather than dropped in place, so a join-tree with many small
        /// partitions doesn't leave worker threads racing each other's
        /// allocator metadata on the way down.
        fn scan_recursive<R: RealField>(
            &self,
            items: &[AssociativeElement<R>],
            combine: &(dyn Fn(&AssociativeElement<R>, &AssociativeElement<R>) -> AssociativeElement<R> + Sync),
            out: &mut [AssociativeElement<R>],
            arena: &ScanArena<AssociativeElement<R>>,
        ) {
            let n = items.len();
            if n <= self.blocksize {
                let mut acc = items[0].clone();
                out[0] = acc.clone();
                for i in 1..n {
                    acc = combine(&acc, &items[i]);
                    out[i] = acc.clone();
                }
                return;
            }
            let mid = n / 2;
            let (left_items, right_items) = items.split_at(mid);
            let (left_out, right_out) = out.split_at_mut(mid);
            rayon::join(
                || self.scan_recursive(left_items, combine, left_out, arena),
                || self.scan_recursive(right_items, combine, right_out, arena),
            );
            let left_total = left_out[mid - 1].clone();
            for v in right_out.iter_mut() {
                let combined = combine(&left_total, v);
                let stale = core::mem::replace(v, combined);
                arena.insert(stale);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::associative::elements;
    use crate::covariance::Covariance;
    use crate::equations::StepEquations;
    use nalgebra::DMatrix;

    fn identity_cov(n: usize) -> Covariance<f64> {
        Covariance::explicit(DMatrix::identity(n, n))
    }

    #[test]
    fn serial_runtime_prefix_scan_matches_manual_fold() {
        let equations = vec![
            StepEquations::new(0, 1),
            StepEquations::<f64>::new(1, 1).with_evolution(
                DMatrix::identity(1, 1),
                DMatrix::from_row_slice(1, 1, &[1.0]),
                DMatrix::from_row_slice(1, 1, &[0.0]),
                identity_cov(1),
            ),
        ];
        let equations_with_obs: Vec<StepEquations<f64>> = equations
            .into_iter()
            .enumerate()
            .map(|(i, eq)| {
                if i == 0 {
                    eq.with_observation(
                        DMatrix::identity(1, 1),
                        DMatrix::from_row_slice(1, 1, &[1.0]),
                        identity_cov(1),
                    )
                } else {
                    eq.with_observation(
                        DMatrix::identity(1, 1),
                        DMatrix::from_row_slice(1, 1, &[2.0]),
                        identity_cov(1),
                    )
                }
            })
            .collect();

        let elems = elements::build_filtering_elements(&equations_with_obs).unwrap();
        let runtime = SerialRuntime;
        let scanned = runtime.prefix_scan(&elems[1..], false, &elements::filtering_combine);
        assert_eq!(scanned.len(), 1);
    }
}
