//! Concurrent scan-intermediate arena.
//!
//! The associative scan's `rayon::join` tree (`parallel::RayonRuntime::
//! scan_recursive`) computes one prefix value per internal node of the
//! down-sweep; each right-hand subtree's result is only correct relative to
//! its own partition; folding in the left subtree's total then supersedes
//! it, and the superseded value is otherwise just dropped in place on
//! whichever worker thread happens to be finishing that join branch.
//! `ScanArena<T>` gives those workers a place to register a superseded
//! intermediate without synchronizing with each other, and lets the caller
//! tear the whole batch down in one single-threaded pass once the scan
//! returns — the same insert-concurrently / drain-once shape as the C
//! original's `concurrent_set_t` (a spin-mutex-guarded insert-only set),
//! reworked into an arena whose lifetime is the scan itself rather than a
//! general-purpose set.

use crossbeam::queue::SegQueue;

/// A lock-free insert-only collection of scan intermediates, meant to be
/// dropped as a unit once the scan that populated it has returned.
pub struct ScanArena<T> {
    slots: SegQueue<T>,
}

impl<T> ScanArena<T> {
    pub fn new() -> Self {
        ScanArena {
            slots: SegQueue::new(),
        }
    }

    /// Register an intermediate. Safe to call concurrently from any number
    /// of scan workers; never blocks.
    pub fn insert(&self, value: T) {
        self.slots.push(value);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Single-threaded teardown: drop every registered intermediate.
    /// Takes `self` by value so the arena cannot be reused afterward.
    pub fn drain_and_drop(self) {
        while self.slots.pop().is_some() {}
    }
}

impl<T> Default for ScanArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_drain_sees_every_value() {
        let arena = ScanArena::new();
        for i in 0..8 {
            arena.insert(i);
        }
        assert_eq!(arena.len(), 8);
        arena.drain_and_drop();
    }
}
