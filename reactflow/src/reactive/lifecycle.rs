//! Lifecycle state machine of a live artifact.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// The state of a live artifact.
///
/// `Unsubscribed → Active → {Completed | Cancelled | Errored}`. Terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    /// Built, no subscription yet.
    Unsubscribed = 0,
    /// Exchanging demand and elements.
    Active = 1,
    /// Finished normally.
    Completed = 2,
    /// Cancelled by the consumer.
    Cancelled = 3,
    /// Finished with an error.
    Errored = 4,
}

impl LifecycleState {
    /// Returns true for the absorbing states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Errored)
    }

    /// Returns the snake_case name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unsubscribed,
            1 => Self::Active,
            2 => Self::Completed,
            3 => Self::Cancelled,
            _ => Self::Errored,
        }
    }
}

/// An atomically updated [`LifecycleState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Unsubscribed as u8),
        }
    }
}

impl Lifecycle {
    /// Creates a lifecycle in the `Unsubscribed` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `Unsubscribed` to `Active`. Returns false from any other state.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                LifecycleState::Unsubscribed as u8,
                LifecycleState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Moves a non-terminal state to `to`.
    ///
    /// Returns false if the lifecycle was already terminal; the first terminal
    /// state wins.
    pub fn terminate(&self, to: LifecycleState) -> bool {
        debug_assert!(to.is_terminal());
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if LifecycleState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns true once a terminal state was reached.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Unsubscribed);
        assert!(lifecycle.activate());
        assert!(!lifecycle.activate());
        assert!(lifecycle.terminate(LifecycleState::Completed));
        assert_eq!(lifecycle.state(), LifecycleState::Completed);
    }

    #[test]
    fn test_terminal_is_absorbing() {
        let lifecycle = Lifecycle::new();
        lifecycle.activate();
        assert!(lifecycle.terminate(LifecycleState::Cancelled));
        assert!(!lifecycle.terminate(LifecycleState::Errored));
        assert!(!lifecycle.activate());
        assert_eq!(lifecycle.state(), LifecycleState::Cancelled);
    }

    #[test]
    fn test_terminate_before_subscription() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.terminate(LifecycleState::Errored));
        assert!(lifecycle.is_terminal());
    }
}
