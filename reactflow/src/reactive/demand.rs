//! Outstanding demand accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Outstanding demand of one subscription.
///
/// Requests add up and saturate at `u64::MAX`, which is treated as unbounded:
/// once reached, emitting no longer consumes demand.
#[derive(Debug, Default)]
pub struct Demand {
    outstanding: AtomicU64,
}

impl Demand {
    /// Creates demand with nothing requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to the outstanding demand and returns the new total.
    pub fn add(&self, n: u64) -> u64 {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(n);
            match self.outstanding.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Consumes one unit of demand. Returns false if there was none.
    pub fn try_take(&self) -> bool {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            if current == u64::MAX {
                return true;
            }
            match self.outstanding.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the outstanding demand.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Returns true if at least one element may be emitted.
    #[must_use]
    pub fn has_demand(&self) -> bool {
        self.get() > 0
    }

    /// Returns true once demand has saturated.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.get() == u64::MAX
    }
}
