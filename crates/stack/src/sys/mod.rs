//! Low-level virtual-memory calls backing guarded stacks
//!
//! # Architecture
//!
//! - **direct.rs** - Direct syscall wrappers (mmap/mprotect/munmap, VirtualAlloc, etc.)
//! - **info.rs** - Page size, stack rlimit and protection queries
//!
//! The allocator never calls these functions directly; it goes through the
//! [`VirtualMemory`] trait so page arithmetic can be exercised against a fake
//! backend.
//!
//! # Safety
//!
//! Protection changes and releases operate on raw addresses. Callers must pass
//! regions previously returned by [`VirtualMemory::reserve`].

use std::io;
use std::ptr::NonNull;

mod direct;
pub use direct::*;

mod info;
pub use info::*;

/// Reserve/protect/release primitives consumed by the allocator
///
/// Implementations must be internally synchronized: the allocator calls them
/// through `&self` from any thread.
pub trait VirtualMemory {
    /// Reserve a private, anonymous, zero-filled, read/write region of exactly
    /// `size` bytes. `size` is a multiple of the page size.
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>>;

    /// Remove all access rights from `[addr, addr + size)`.
    ///
    /// # Safety
    ///
    /// The range must lie inside a region returned by [`reserve`](Self::reserve)
    /// and must not be referenced by live Rust borrows.
    unsafe fn protect_no_access(&self, addr: NonNull<u8>, size: usize) -> io::Result<()>;

    /// Release a whole region back to the OS.
    ///
    /// # Safety
    ///
    /// `addr` and `size` must describe exactly one region returned by
    /// [`reserve`](Self::reserve) that has not been released yet.
    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> io::Result<()>;
}

impl<V: VirtualMemory + ?Sized> VirtualMemory for &V {
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>> {
        (**self).reserve(size)
    }

    unsafe fn protect_no_access(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).protect_no_access(addr, size) }
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).release(addr, size) }
    }
}

/// The operating system's virtual-memory interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsVirtualMemory;

impl VirtualMemory for OsVirtualMemory {
    fn reserve(&self, size: usize) -> io::Result<NonNull<u8>> {
        memory_map_stack(size)
    }

    unsafe fn protect_no_access(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { memory_protect(addr, size, MemoryProtection::None) }
    }

    unsafe fn release(&self, addr: NonNull<u8>, size: usize) -> io::Result<()> {
        // SAFETY: forwarded caller contract.
        unsafe { memory_unmap(addr, size) }
    }
}
