//! Split-on-transient-failure application of a batch operation.
//!
//! `apply_bisecting` hands a slice to an operation. A transient failure
//! splits the slice in half and retries each half, down to a depth bound;
//! past that bound every item is applied on its own with a small retry
//! budget. A permanent failure marks the slice failed without retrying.

use sheetmerge_io::WriteError;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BisectPolicy {
    /// Number of halvings before degrading to per-item writes.
    pub max_depth: u32,
    /// Extra attempts per item on transient failure.
    pub unit_retries: u32,
}

impl Default for BisectPolicy {
    fn default() -> Self {
        Self {
            max_depth: 3,
            unit_retries: 3,
        }
    }
}

/// Counts for one `apply_bisecting` call.
///
/// `succeeded + failed == attempted` holds for every returned tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BisectTally {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub splits: usize,
    pub unit_fallbacks: usize,
    pub retries: usize,
    pub permanent_failures: usize,
}

impl BisectTally {
    pub fn merge(&mut self, other: BisectTally) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.splits += other.splits;
        self.unit_fallbacks += other.unit_fallbacks;
        self.retries += other.retries;
        self.permanent_failures += other.permanent_failures;
    }
}

/// Apply `op` to `items`. `op` receives the offset of the slice within
/// `items` and the slice itself.
///
/// Once `stop` is set, items not yet applied are counted as failed.
pub fn apply_bisecting<T, F>(
    items: &[T],
    policy: BisectPolicy,
    stop: &AtomicBool,
    mut op: F,
) -> BisectTally
where
    F: FnMut(usize, &[T]) -> Result<(), WriteError>,
{
    let mut tally = BisectTally {
        attempted: items.len(),
        ..BisectTally::default()
    };
    if !items.is_empty() {
        step(items, 0, 0, policy, stop, &mut op, &mut tally);
    }
    tally
}

fn step<T, F>(
    items: &[T],
    offset: usize,
    depth: u32,
    policy: BisectPolicy,
    stop: &AtomicBool,
    op: &mut F,
    tally: &mut BisectTally,
) where
    F: FnMut(usize, &[T]) -> Result<(), WriteError>,
{
    if stop.load(Ordering::Relaxed) {
        tally.failed += items.len();
        return;
    }
    let err = match op(offset, items) {
        Ok(()) => {
            tally.succeeded += items.len();
            return;
        }
        Err(err) => err,
    };
    if !err.is_transient() {
        tally.permanent_failures += 1;
        tally.failed += items.len();
        return;
    }
    if items.len() > 1 && depth < policy.max_depth {
        tally.splits += 1;
        let mid = items.len() / 2;
        step(&items[..mid], offset, depth + 1, policy, stop, op, tally);
        step(&items[mid..], offset + mid, depth + 1, policy, stop, op, tally);
        return;
    }
    tally.unit_fallbacks += 1;
    for i in 0..items.len() {
        if stop.load(Ordering::Relaxed) {
            tally.failed += items.len() - i;
            return;
        }
        let unit = &items[i..=i];
        let mut attempt = 0;
        loop {
            match op(offset + i, unit) {
                Ok(()) => {
                    tally.succeeded += 1;
                    break;
                }
                Err(e) if e.is_transient() && attempt < policy.unit_retries => {
                    attempt += 1;
                    tally.retries += 1;
                }
                Err(e) => {
                    if !e.is_transient() {
                        tally.permanent_failures += 1;
                    }
                    tally.failed += 1;
                    break;
                }
            }
        }
    }
}
