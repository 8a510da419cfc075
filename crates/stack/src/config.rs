//! Allocator configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do when the guard page cannot be protected after a successful
/// reservation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GuardFailurePolicy {
    /// Release the reservation and return [`StackError::GuardProtection`]
    ///
    /// [`StackError::GuardProtection`]: crate::StackError::GuardProtection
    #[default]
    Rollback,
    /// Abort the process, leaving the unguarded mapping in place
    Abort,
}

/// Configuration for [`GuardedStackAllocator`](crate::GuardedStackAllocator)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StackConfig {
    /// Guard protection failure handling
    #[cfg_attr(feature = "serde", serde(default))]
    pub guard_failure: GuardFailurePolicy,
}

impl StackConfig {
    /// Recoverable configuration: guard failures roll back and return an error
    pub fn strict() -> Self {
        Self {
            guard_failure: GuardFailurePolicy::Rollback,
        }
    }

    /// Treat a guard failure as fatal, like a failed assertion
    pub fn abort_on_guard_failure() -> Self {
        Self {
            guard_failure: GuardFailurePolicy::Abort,
        }
    }
}
