//! Error types for guarded stack allocation
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.
//!
//! Two classes of failure exist:
//! - **Contract violations** ([`StackError::ContractViolation`]): a caller broke
//!   a precondition (size out of bounds, fewer than two pages, corrupted
//!   context). These are programming errors and are never retried.
//! - **Resource errors** ([`StackError::OutOfMemory`],
//!   [`StackError::GuardProtection`]): the operating system refused the
//!   request. The region has already been released when these are returned.

use std::io;

use thiserror::Error;

/// Result type for stack operations
pub type StackResult<T> = Result<T, StackError>;

/// Guarded stack allocation errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StackError {
    /// The OS could not reserve a region of the requested size
    #[error("Stack reservation failed: {size} bytes")]
    OutOfMemory {
        /// Page-rounded size that was requested from the OS
        size: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The guard page could not be made inaccessible; the region was released
    #[error("Failed to protect guard page at {address:#x} ({page_size} bytes)")]
    GuardProtection {
        /// Address of the guard page
        address: usize,
        /// Size of the guard page
        page_size: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A caller-side precondition did not hold
    #[error("Stack contract violated in {operation}: {reason}")]
    ContractViolation {
        /// Operation that detected the violation
        operation: &'static str,
        /// Human-readable description
        reason: String,
    },

    /// A traits or config value is inconsistent
    #[error("Invalid stack configuration: {reason}")]
    InvalidConfig {
        /// Human-readable description
        reason: String,
    },
}

impl StackError {
    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfMemory { .. } => "STACK:ALLOC:OOM",
            Self::GuardProtection { .. } => "STACK:ALLOC:GUARD",
            Self::ContractViolation { .. } => "STACK:CONTRACT",
            Self::InvalidConfig { .. } => "STACK:CONFIG:INVALID",
        }
    }

    /// Whether the caller may reasonably continue after this error.
    ///
    /// Contract violations and config errors indicate a bug at the call site.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory { .. } | Self::GuardProtection { .. }
        )
    }

    /// Check if error is a contract violation
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create out-of-memory error
    pub fn out_of_memory(size: usize, source: io::Error) -> Self {
        tracing::warn!(size, error = %source, "stack reservation failed");

        Self::OutOfMemory { size, source }
    }

    /// Create guard protection error
    pub fn guard_protection(address: usize, page_size: usize, source: io::Error) -> Self {
        tracing::error!(
            address = format_args!("{address:#x}"),
            page_size,
            error = %source,
            "guard page protection failed"
        );

        Self::GuardProtection {
            address,
            page_size,
            source,
        }
    }

    /// Create contract violation error
    pub fn contract_violation(operation: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::error!(operation, %reason, "stack contract violated");

        Self::ContractViolation { operation, reason }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case::oom(StackError::out_of_memory(8192, io::Error::from(io::ErrorKind::OutOfMemory)), "STACK:ALLOC:OOM", true)]
    #[case::guard(StackError::guard_protection(0x1000, 4096, io::Error::from(io::ErrorKind::PermissionDenied)), "STACK:ALLOC:GUARD", true)]
    #[case::contract(StackError::contract_violation("allocate", "too small"), "STACK:CONTRACT", false)]
    #[case::config(StackError::invalid_config("page size is zero"), "STACK:CONFIG:INVALID", false)]
    fn test_codes_and_recoverability(
        #[case] error: StackError,
        #[case] code: &str,
        #[case] recoverable: bool,
    ) {
        assert_eq!(error.code(), code);
        assert_eq!(error.is_recoverable(), recoverable);
    }

    #[test]
    fn test_display_includes_operation() {
        let error = StackError::contract_violation("deallocate", "size 0 below minimum 8192");
        assert_eq!(
            error.to_string(),
            "Stack contract violated in deallocate: size 0 below minimum 8192"
        );
        assert!(error.is_contract_violation());
    }

    #[test]
    fn test_guard_error_exposes_source() {
        use std::error::Error as _;

        let error = StackError::guard_protection(
            0xdead_0000,
            4096,
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(error.source().is_some());
        assert!(error.to_string().contains("0xdead0000"));
    }
}
