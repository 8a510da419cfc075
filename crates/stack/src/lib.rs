#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![allow(unsafe_code)] // Stack regions are raw OS mappings
//! # Nebula Stack
//!
//! Guard-page protected execution stacks for coroutine, fiber and green-thread
//! runtimes.
//!
//! A stack is a private anonymous mapping whose lowest page is made
//! inaccessible, so running off the end of the stack faults immediately
//! instead of corrupting neighbouring memory.
//!
//! - [`GuardedStackAllocator`]: allocate/deallocate pair
//! - [`StackContext`]: top address and size handed to the context-switch code
//! - [`StackTraits`]: page size and size bounds, injected into the allocator
//! - [`sys::VirtualMemory`]: reserve/protect/release seam over the OS
//!
//! ## Features
//!
//! - `serde`: (de)serialize [`FixedStackTraits`] and [`StackConfig`]
//!
//! ## Example
//!
//! ```no_run
//! use nebula_stack::{FixedStackTraits, GuardedStackAllocator, StackTraits};
//!
//! fn main() -> nebula_stack::StackResult<()> {
//!     let traits = FixedStackTraits::with_page_size(nebula_stack::sys::page_size())?;
//!     let allocator = GuardedStackAllocator::with_traits(traits);
//!
//!     let stack = allocator.allocate_guarded(traits.default_size())?;
//!     println!("stack top {:p}, {} bytes", stack.top(), stack.size());
//!     // released when `stack` drops
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod context;
pub mod error;
pub mod guarded;
pub mod sys;
pub mod traits;

#[cfg(test)]
mod testing;

// Re-exports
pub use allocator::GuardedStackAllocator;
pub use config::{GuardFailurePolicy, StackConfig};
pub use context::StackContext;
pub use error::{StackError, StackResult};
pub use guarded::GuardedStack;
pub use traits::{FixedStackTraits, PlatformStackTraits, StackTraits};

/// Convenient re-exports of commonly used types and traits
pub mod prelude {
    pub use crate::allocator::GuardedStackAllocator;
    pub use crate::config::{GuardFailurePolicy, StackConfig};
    pub use crate::context::StackContext;
    pub use crate::error::{StackError, StackResult};
    pub use crate::guarded::GuardedStack;
    pub use crate::sys::{OsVirtualMemory, VirtualMemory};
    pub use crate::traits::{FixedStackTraits, PlatformStackTraits, StackTraits};
}
