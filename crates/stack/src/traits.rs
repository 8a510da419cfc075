//! Stack sizing capability
//!
//! [`StackTraits`] describes page granularity and the admissible stack sizes.
//! The allocator is parameterized by a traits value instead of querying the
//! platform itself, so tests can inject synthetic page sizes and bounds.
//!
//! Two implementations ship with the crate:
//! - [`PlatformStackTraits`]: detected from the running OS, cached
//! - [`FixedStackTraits`]: plain configuration values

use std::sync::OnceLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{StackError, StackResult};
use crate::sys;

/// Page size and size bounds of a stack region
pub trait StackTraits {
    /// Virtual-memory page granularity in bytes; a positive power of two
    fn page_size(&self) -> usize;

    /// Smallest admissible stack size in bytes
    fn minimum_size(&self) -> usize;

    /// Largest admissible stack size in bytes, `None` when unbounded
    fn maximum_size(&self) -> Option<usize>;

    /// Size used when the caller does not ask for one
    fn default_size(&self) -> usize;

    /// Whether there is no upper bound on stack size
    fn is_unbounded(&self) -> bool {
        self.maximum_size().is_none()
    }

    /// Whether `size` lies within `[minimum_size, maximum_size]`
    fn admits(&self, size: usize) -> bool {
        self.minimum_size() <= size && self.maximum_size().is_none_or(|max| size <= max)
    }
}

impl<T: StackTraits + ?Sized> StackTraits for &T {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn minimum_size(&self) -> usize {
        (**self).minimum_size()
    }

    fn maximum_size(&self) -> Option<usize> {
        (**self).maximum_size()
    }

    fn default_size(&self) -> usize {
        (**self).default_size()
    }

    fn is_unbounded(&self) -> bool {
        (**self).is_unbounded()
    }
}

// ============================================================================
// FixedStackTraits
// ============================================================================

/// Stack traits given as plain configuration values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedStackTraits {
    /// Page granularity in bytes
    pub page_size: usize,
    /// Smallest admissible stack size
    pub minimum_size: usize,
    /// Largest admissible stack size, `None` for unbounded
    #[cfg_attr(feature = "serde", serde(default))]
    pub maximum_size: Option<usize>,
    /// Size used by `allocate_default`
    pub default_size: usize,
}

impl FixedStackTraits {
    /// Create validated traits
    pub fn new(
        page_size: usize,
        minimum_size: usize,
        maximum_size: Option<usize>,
        default_size: usize,
    ) -> StackResult<Self> {
        let traits = Self {
            page_size,
            minimum_size,
            maximum_size,
            default_size,
        };
        traits.validate()?;
        Ok(traits)
    }

    /// Unbounded traits with a minimum of two pages and a default of sixteen
    pub fn with_page_size(page_size: usize) -> StackResult<Self> {
        let minimum = page_size
            .checked_mul(2)
            .ok_or_else(|| StackError::invalid_config("page size overflows"))?;
        let default = page_size
            .checked_mul(16)
            .ok_or_else(|| StackError::invalid_config("page size overflows"))?;
        Self::new(page_size, minimum, None, default)
    }

    /// Set the upper bound, keeping the default inside it
    pub fn with_maximum(mut self, maximum_size: usize) -> StackResult<Self> {
        self.maximum_size = Some(maximum_size);
        self.default_size = self.default_size.min(maximum_size);
        self.validate()?;
        Ok(self)
    }

    /// Check internal consistency.
    ///
    /// A minimum below two pages is accepted here; `allocate` rejects requests
    /// that round down to fewer than two pages.
    pub fn validate(&self) -> StackResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(StackError::invalid_config(format!(
                "page_size ({}) must be a non-zero power of two",
                self.page_size
            )));
        }
        if self.minimum_size == 0 {
            return Err(StackError::invalid_config(
                "minimum_size must be greater than 0",
            ));
        }
        if self.default_size < self.minimum_size {
            return Err(StackError::invalid_config(format!(
                "default_size ({}) must not be below minimum_size ({})",
                self.default_size, self.minimum_size
            )));
        }
        if let Some(max) = self.maximum_size {
            if max < self.minimum_size {
                return Err(StackError::invalid_config(format!(
                    "maximum_size ({max}) must not be below minimum_size ({})",
                    self.minimum_size
                )));
            }
            if self.default_size > max {
                return Err(StackError::invalid_config(format!(
                    "default_size ({}) must not exceed maximum_size ({max})",
                    self.default_size
                )));
            }
        }
        Ok(())
    }
}

impl StackTraits for FixedStackTraits {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn minimum_size(&self) -> usize {
        self.minimum_size
    }

    fn maximum_size(&self) -> Option<usize> {
        self.maximum_size
    }

    fn default_size(&self) -> usize {
        self.default_size
    }
}

impl From<PlatformStackTraits> for FixedStackTraits {
    fn from(platform: PlatformStackTraits) -> Self {
        Self {
            page_size: platform.page_size,
            minimum_size: platform.minimum_size,
            maximum_size: platform.maximum_size,
            default_size: platform.default_size,
        }
    }
}

// ============================================================================
// PlatformStackTraits
// ============================================================================

/// Floor for the minimum stack size, matching the common `SIGSTKSZ`
const MIN_STACK_BYTES: usize = 8 * 1024;

/// `default_size` is this many times `minimum_size`, clamped to the maximum
const DEFAULT_STACK_MULTIPLIER: usize = 8;

static PLATFORM: OnceLock<PlatformStackTraits> = OnceLock::new();

/// Stack traits of the running platform
///
/// - `page_size`: OS page granularity
/// - `maximum_size`: hard `RLIMIT_STACK` on Unix (raised to `minimum_size`
///   when lower), unbounded elsewhere or when the limit is infinite
/// - `minimum_size`: 8 KiB rounded up to whole pages, at least two pages
/// - `default_size`: eight times the minimum, clamped to the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PlatformStackTraits {
    page_size: usize,
    minimum_size: usize,
    maximum_size: Option<usize>,
    default_size: usize,
}

impl PlatformStackTraits {
    /// Cached platform traits, detected on first use
    pub fn get() -> Self {
        *PLATFORM.get_or_init(Self::detect)
    }

    /// Query the OS without consulting the cache
    pub fn detect() -> Self {
        let traits = Self::from_parts(sys::page_size(), sys::stack_limit());
        tracing::debug!(
            page_size = traits.page_size,
            minimum_size = traits.minimum_size,
            maximum_size = ?traits.maximum_size,
            default_size = traits.default_size,
            "detected platform stack traits"
        );
        traits
    }

    fn from_parts(page_size: usize, maximum_size: Option<usize>) -> Self {
        let minimum_size = MIN_STACK_BYTES
            .div_ceil(page_size)
            .max(2)
            .saturating_mul(page_size);
        let maximum_size = maximum_size.map(|max| {
            if max < minimum_size {
                tracing::warn!(
                    stack_limit = max,
                    minimum_size,
                    "RLIMIT_STACK hard limit is below the minimum stack size; using the minimum"
                );
            }
            max.max(minimum_size)
        });
        let preferred = minimum_size.saturating_mul(DEFAULT_STACK_MULTIPLIER);
        let default_size = maximum_size
            .map_or(preferred, |max| preferred.min(max))
            .max(minimum_size);

        Self {
            page_size,
            minimum_size,
            maximum_size,
            default_size,
        }
    }
}

impl Default for PlatformStackTraits {
    fn default() -> Self {
        Self::get()
    }
}

impl StackTraits for PlatformStackTraits {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn minimum_size(&self) -> usize {
        self.minimum_size
    }

    fn maximum_size(&self) -> Option<usize> {
        self.maximum_size
    }

    fn default_size(&self) -> usize {
        self.default_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn test_admits_respects_bounds() {
        let traits = FixedStackTraits::new(4096, 8192, Some(65536), 16384).unwrap();
        assert!(!traits.admits(8191));
        assert!(traits.admits(8192));
        assert!(traits.admits(65536));
        assert!(!traits.admits(65537));
        assert!(!traits.is_unbounded());
    }

    #[test]
    fn test_unbounded_admits_anything_above_minimum() {
        let traits = FixedStackTraits::with_page_size(4096).unwrap();
        assert!(traits.is_unbounded());
        assert!(traits.admits(usize::MAX));
        assert_eq!(traits.minimum_size(), 8192);
        assert_eq!(traits.default_size(), 65536);
    }

    #[rstest]
    #[case::zero_page(0, 8192, None, 8192)]
    #[case::odd_page(3000, 8192, None, 8192)]
    #[case::zero_minimum(4096, 0, None, 8192)]
    #[case::default_below_minimum(4096, 8192, None, 4096)]
    #[case::maximum_below_minimum(4096, 8192, Some(4096), 8192)]
    #[case::default_above_maximum(4096, 8192, Some(16384), 32768)]
    fn test_validate_rejects(
        #[case] page: usize,
        #[case] min: usize,
        #[case] max: Option<usize>,
        #[case] default: usize,
    ) {
        let err = FixedStackTraits::new(page, min, max, default).unwrap_err();
        assert_eq!(err.code(), "STACK:CONFIG:INVALID");
    }

    #[test]
    fn test_with_maximum_clamps_default() {
        let traits = FixedStackTraits::with_page_size(4096)
            .unwrap()
            .with_maximum(32768)
            .unwrap();
        assert_eq!(traits.maximum_size(), Some(32768));
        assert_eq!(traits.default_size(), 32768);
    }

    #[test]
    fn test_reference_through_borrow() {
        fn describe(traits: impl StackTraits) -> (usize, bool) {
            (traits.page_size(), traits.is_unbounded())
        }

        let traits = FixedStackTraits::with_page_size(16384).unwrap();
        assert_eq!(describe(&traits), (16384, true));
        assert_eq!(describe(&traits as &dyn StackTraits), (16384, true));
    }

    #[rstest]
    #[case::small_pages(4096, None, 8192, 65536, None)]
    #[case::large_pages(65536, None, 131_072, 1_048_576, None)]
    #[case::limited(4096, Some(32768), 8192, 32768, Some(32768))]
    #[case::limit_below_minimum(4096, Some(4096), 8192, 8192, Some(8192))]
    fn test_platform_sizing(
        #[case] page: usize,
        #[case] limit: Option<usize>,
        #[case] expected_min: usize,
        #[case] expected_default: usize,
        #[case] expected_max: Option<usize>,
    ) {
        let traits = PlatformStackTraits::from_parts(page, limit);
        assert_eq!(traits.minimum_size(), expected_min);
        assert_eq!(traits.default_size(), expected_default);
        assert_eq!(traits.maximum_size(), expected_max);
        assert!(traits.admits(traits.default_size()));
    }

    #[test]
    fn test_tiny_stack_limit_still_allows_minimum_stack() {
        let traits = PlatformStackTraits::from_parts(4096, Some(1));
        FixedStackTraits::from(traits).validate().unwrap();
        assert!(traits.admits(traits.minimum_size()));
    }

    #[test]
    fn test_detected_traits_are_consistent() {
        let traits = PlatformStackTraits::get();
        assert!(traits.page_size().is_power_of_two());
        assert_eq!(traits.minimum_size() % traits.page_size(), 0);
        assert!(traits.minimum_size() >= 2 * traits.page_size());
        assert!(traits.default_size() >= traits.minimum_size());
        assert_eq!(traits, PlatformStackTraits::get());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_fixed_traits_from_json() {
        let traits: FixedStackTraits = serde_json::from_str(
            r#"{ "page_size": 4096, "minimum_size": 8192, "default_size": 65536 }"#,
        )
        .unwrap();
        assert!(traits.is_unbounded());
        traits.validate().unwrap();
    }
}
