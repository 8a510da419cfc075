//! Descriptor of one allocated guarded stack
//!
//! # Memory Layout
//! ```text
//! base                base + page                                  top
//!  |------ guard ------|----------------- usable ------------------|
//!  <-------------------------------- size ------------------------->
//! ```
//!
//! Stacks grow downward on every supported target, so the guard page is the
//! lowest page of the region and `top` is the initial stack pointer.

use core::fmt;
use core::ops::Range;
use core::ptr::NonNull;

use crate::error::{StackError, StackResult};

/// Top address and size of a guarded stack region
///
/// Created only by [`GuardedStackAllocator::allocate`] and consumed by
/// [`GuardedStackAllocator::deallocate`]. Dropping a context without
/// deallocating it leaks the mapping.
///
/// [`GuardedStackAllocator::allocate`]: crate::GuardedStackAllocator::allocate
/// [`GuardedStackAllocator::deallocate`]: crate::GuardedStackAllocator::deallocate
#[must_use = "dropping a StackContext leaks its mapping; pass it to deallocate"]
#[derive(PartialEq, Eq, Hash)]
pub struct StackContext {
    top: NonNull<u8>,
    size: usize,
}

// SAFETY: a context is a pair of addresses. The mapping it names belongs to
// the process, not to a thread, so it may be released from any thread.
unsafe impl Send for StackContext {}

// SAFETY: every accessor takes `&self` and only reads the two plain fields.
unsafe impl Sync for StackContext {}

impl StackContext {
    pub(crate) fn new(top: NonNull<u8>, size: usize) -> Self {
        Self { top, size }
    }

    /// Rebuild a context from [`into_raw_parts`](Self::into_raw_parts) output,
    /// e.g. after passing it through a context switch or FFI.
    ///
    /// A null `top`, or a `size` larger than the `top` address, is rejected
    /// as a contract violation, so `base()` never underflows.
    ///
    /// # Safety
    ///
    /// `top` and `size` must come from a single `into_raw_parts` call on a
    /// context that has not been rebuilt since.
    pub unsafe fn from_raw_parts(top: *mut u8, size: usize) -> StackResult<Self> {
        let top = NonNull::new(top).ok_or_else(|| {
            StackError::contract_violation("from_raw_parts", "stack top is null")
        })?;
        if (top.as_ptr() as usize) < size {
            return Err(StackError::contract_violation(
                "from_raw_parts",
                format!("size {size} reaches below address zero from top {top:p}"),
            ));
        }
        Ok(Self { top, size })
    }

    /// Decompose into the raw top pointer and size
    pub fn into_raw_parts(self) -> (*mut u8, usize) {
        (self.top.as_ptr(), self.size)
    }

    /// One past the highest usable byte; the initial stack pointer
    #[inline]
    pub fn top(&self) -> NonNull<u8> {
        self.top
    }

    /// Size of the whole region including the guard page
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Lowest address of the region (start of the guard page)
    #[inline]
    pub fn base(&self) -> usize {
        self.top.as_ptr() as usize - self.size
    }

    /// Address range of the guard page, capped at `top`
    pub fn guard_page(&self, page_size: usize) -> Range<usize> {
        let base = self.base();
        base..base.saturating_add(page_size).min(self.top_addr())
    }

    /// Bytes available to the stack above the guard page
    pub fn usable_size(&self, page_size: usize) -> usize {
        self.size.saturating_sub(page_size)
    }

    /// Address range a stack may legally touch
    pub fn usable_range(&self, page_size: usize) -> Range<usize> {
        self.guard_page(page_size).end..self.top_addr()
    }

    /// Whether `addr` lies anywhere in the region, guard page included
    pub fn contains(&self, addr: usize) -> bool {
        (self.base()..self.top_addr()).contains(&addr)
    }

    fn top_addr(&self) -> usize {
        self.top.as_ptr() as usize
    }
}

impl fmt::Debug for StackContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackContext")
            .field("top", &self.top)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context_at(base: usize, size: usize) -> StackContext {
        StackContext::new(NonNull::new((base + size) as *mut u8).unwrap(), size)
    }

    #[test]
    fn test_geometry_of_two_page_stack() {
        let ctx = context_at(0x10_0000, 8192);

        assert_eq!(ctx.base(), 0x10_0000);
        assert_eq!(ctx.top().as_ptr() as usize, 0x10_2000);
        assert_eq!(ctx.guard_page(4096), 0x10_0000..0x10_1000);
        assert_eq!(ctx.usable_range(4096), 0x10_1000..0x10_2000);
        assert_eq!(ctx.usable_size(4096), 4096);
    }

    #[test]
    fn test_contains_is_half_open() {
        let ctx = context_at(0x20_0000, 3 * 4096);

        assert!(ctx.contains(0x20_0000));
        assert!(ctx.contains(0x20_2fff));
        assert!(!ctx.contains(0x20_3000));
        assert!(!ctx.contains(0x1f_ffff));
    }

    #[test]
    fn test_raw_parts_roundtrip() {
        let ctx = context_at(0x30_0000, 8192);
        let (top, size) = ctx.into_raw_parts();

        let rebuilt = unsafe { StackContext::from_raw_parts(top, size) }.unwrap();
        assert_eq!(rebuilt.base(), 0x30_0000);
        assert_eq!(rebuilt.size(), 8192);
    }

    #[test]
    fn test_null_top_is_contract_violation() {
        let err = unsafe { StackContext::from_raw_parts(core::ptr::null_mut(), 8192) }.unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_size_beyond_top_is_contract_violation() {
        let err = unsafe { StackContext::from_raw_parts(0x1000 as *mut u8, 0x4000) }.unwrap_err();
        assert!(err.is_contract_violation());

        // exactly down to address zero is still representable
        let ctx = unsafe { StackContext::from_raw_parts(0x4000 as *mut u8, 0x4000) }.unwrap();
        assert_eq!(ctx.base(), 0);
        assert_eq!(ctx.guard_page(4096), 0..0x1000);
        assert_eq!(ctx.usable_range(4096), 0x1000..0x4000);
    }

    #[test]
    fn test_oversized_page_is_capped_at_top() {
        let ctx = context_at(0x40_0000, 8192);
        assert_eq!(ctx.guard_page(16384), 0x40_0000..0x40_2000);
        assert_eq!(ctx.usable_range(16384), 0x40_2000..0x40_2000);
    }

    #[test]
    fn test_context_is_send() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<StackContext>();
    }
}
