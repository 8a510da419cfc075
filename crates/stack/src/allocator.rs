//! Guarded stack allocator
//!
//! # Algorithm
//!
//! 1. Check `minimum_size <= requested <= maximum_size`.
//! 2. Round the request **down** to whole pages; at least two pages must
//!    remain (one becomes the guard page).
//! 3. Reserve an anonymous, private, read/write region of that size.
//! 4. Remove all access from the lowest page.
//! 5. Return `top = base + size`.
//!
//! Deallocation validates the context against the same bounds and releases
//! the whole region, guard page included.
//!
//! ## Thread Safety
//!
//! The allocator holds only immutable data (traits, config, backend handle).
//! Both operations take `&self` and rely on the OS for synchronization.

use core::ptr::NonNull;

use crate::config::{GuardFailurePolicy, StackConfig};
use crate::context::StackContext;
use crate::error::{StackError, StackResult};
use crate::guarded::GuardedStack;
use crate::sys::{OsVirtualMemory, VirtualMemory};
use crate::traits::{PlatformStackTraits, StackTraits};

/// Allocates stacks whose lowest page is an inaccessible guard page
///
/// # Example
///
/// ```no_run
/// use nebula_stack::GuardedStackAllocator;
///
/// fn main() -> nebula_stack::StackResult<()> {
///     let allocator = GuardedStackAllocator::new();
///     let ctx = allocator.allocate(256 * 1024)?;
///
///     // hand `ctx.top()` to the context-switch code as the initial stack pointer
///
///     allocator.deallocate(ctx)?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct GuardedStackAllocator<T = PlatformStackTraits, V = OsVirtualMemory> {
    traits: T,
    memory: V,
    config: StackConfig,
}

impl GuardedStackAllocator {
    /// Allocator for the running platform backed by the OS
    pub fn new() -> Self {
        Self::with_traits(PlatformStackTraits::get())
    }
}

impl Default for GuardedStackAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StackTraits> GuardedStackAllocator<T, OsVirtualMemory> {
    /// OS-backed allocator with custom traits
    pub fn with_traits(traits: T) -> Self {
        Self::with_backend(traits, OsVirtualMemory, StackConfig::default())
    }
}

impl<T: StackTraits, V: VirtualMemory> GuardedStackAllocator<T, V> {
    /// Allocator with explicit traits, virtual-memory backend and config
    pub fn with_backend(traits: T, memory: V, config: StackConfig) -> Self {
        Self {
            traits,
            memory,
            config,
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: StackConfig) -> Self {
        self.config = config;
        self
    }

    /// Traits this allocator sizes stacks with
    pub fn traits(&self) -> &T {
        &self.traits
    }

    /// Active configuration
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Virtual-memory backend
    pub fn memory(&self) -> &V {
        &self.memory
    }

    /// Page-rounded region size `allocate(requested)` would reserve.
    ///
    /// Performs every contract check `allocate` does, without touching memory.
    pub fn stack_size_for(&self, requested: usize) -> StackResult<usize> {
        let page_size = self.page_size("allocate")?;
        self.check_bounds("allocate", requested)?;

        let pages = requested / page_size;
        if pages < 2 {
            return Err(StackError::contract_violation(
                "allocate",
                format!(
                    "{requested} bytes is {pages} page(s) of {page_size}; at least two pages \
                     must fit (one is the guard page)"
                ),
            ));
        }

        Ok(pages * page_size)
    }

    /// Allocate a stack of at least two pages, at most `requested` bytes.
    ///
    /// `requested` is rounded **down** to whole pages. The returned context
    /// must eventually be passed to [`deallocate`](Self::deallocate).
    pub fn allocate(&self, requested: usize) -> StackResult<StackContext> {
        let size = self.stack_size_for(requested)?;
        let page_size = self.traits.page_size();

        let base = self
            .memory
            .reserve(size)
            .map_err(|e| StackError::out_of_memory(size, e))?;

        // SAFETY: `base` starts a fresh `size`-byte reservation, `size` is at
        // least two pages, and nothing references the region yet.
        if let Err(e) = unsafe { self.memory.protect_no_access(base, page_size) } {
            return Err(self.guard_failed(base, size, e));
        }

        // SAFETY: `size` bytes starting at `base` are mapped, so `base + size`
        // is one past the end of the same allocation and non-null.
        let top = unsafe { NonNull::new_unchecked(base.as_ptr().add(size)) };

        tracing::trace!(
            requested,
            size,
            pages = size / page_size,
            top = ?top,
            "allocated guarded stack"
        );

        Ok(StackContext::new(top, size))
    }

    /// Allocate a stack of `default_size` bytes
    pub fn allocate_default(&self) -> StackResult<StackContext> {
        self.allocate(self.traits.default_size())
    }

    /// Allocate a stack of `minimum_size` bytes
    pub fn allocate_minimum(&self) -> StackResult<StackContext> {
        self.allocate(self.traits.minimum_size())
    }

    /// Allocate a stack that is released when the handle drops
    pub fn allocate_guarded(&self, requested: usize) -> StackResult<GuardedStack<'_, T, V>> {
        self.allocate(requested)
            .map(|ctx| GuardedStack::new(self, ctx))
    }

    /// Release a stack, guard page included.
    ///
    /// The context is validated against the same bounds `allocate` enforces.
    /// A failing release means the context did not describe a live region and
    /// is reported as a contract violation.
    pub fn deallocate(&self, ctx: StackContext) -> StackResult<()> {
        let page_size = self.page_size("deallocate")?;
        let size = ctx.size();
        self.check_bounds("deallocate", size)?;

        if size % page_size != 0 || size / page_size < 2 {
            return Err(StackError::contract_violation(
                "deallocate",
                format!("size {size} is not a whole number of at least two {page_size}-byte pages"),
            ));
        }

        let base = Some(ctx.base())
            .filter(|base| base % page_size == 0)
            .and_then(|base| NonNull::new(base as *mut u8))
            .ok_or_else(|| {
                StackError::contract_violation(
                    "deallocate",
                    format!("top {:p} with size {size} does not start on a page", ctx.top()),
                )
            })?;

        // SAFETY: the context was produced by `allocate` (caller contract) and is
        // consumed here, so `[base, base + size)` is one live reservation.
        unsafe { self.memory.release(base, size) }.map_err(|e| {
            StackError::contract_violation(
                "deallocate",
                format!("releasing {size} bytes at {base:p} failed: {e}"),
            )
        })?;

        tracing::trace!(size, base = ?base, "released guarded stack");
        Ok(())
    }

    fn page_size(&self, operation: &'static str) -> StackResult<usize> {
        let page_size = self.traits.page_size();
        if page_size.is_power_of_two() {
            Ok(page_size)
        } else {
            Err(StackError::contract_violation(
                operation,
                format!("page size {page_size} is not a non-zero power of two"),
            ))
        }
    }

    fn check_bounds(&self, operation: &'static str, size: usize) -> StackResult<()> {
        let minimum = self.traits.minimum_size();
        if size < minimum {
            return Err(StackError::contract_violation(
                operation,
                format!("size {size} is below minimum {minimum}"),
            ));
        }
        if let Some(maximum) = self.traits.maximum_size()
            && size > maximum
        {
            return Err(StackError::contract_violation(
                operation,
                format!("size {size} exceeds maximum {maximum}"),
            ));
        }
        Ok(())
    }

    #[cold]
    fn guard_failed(&self, base: NonNull<u8>, size: usize, source: std::io::Error) -> StackError {
        let page_size = self.traits.page_size();
        let error = StackError::guard_protection(base.as_ptr() as usize, page_size, source);

        match self.config.guard_failure {
            GuardFailurePolicy::Abort => {
                tracing::error!(size, "aborting: stack region left without a guard page");
                std::process::abort();
            }
            GuardFailurePolicy::Rollback => {
                // SAFETY: `base`/`size` is the reservation made by this call and
                // no context for it was handed out.
                if let Err(e) = unsafe { self.memory.release(base, size) } {
                    tracing::error!(size, error = %e, "rollback of unguarded stack region failed");
                }
                error
            }
        }
    }
}
