//! RAII handle that releases its stack on drop

use core::mem::ManuallyDrop;
use core::ops::Deref;

use crate::allocator::GuardedStackAllocator;
use crate::context::StackContext;
use crate::sys::VirtualMemory;
use crate::traits::StackTraits;

/// A [`StackContext`] tied to the allocator that produced it
///
/// Dropping the handle deallocates the stack. Use
/// [`into_context`](Self::into_context) to take manual ownership instead.
pub struct GuardedStack<'a, T: StackTraits, V: VirtualMemory> {
    allocator: &'a GuardedStackAllocator<T, V>,
    context: ManuallyDrop<StackContext>,
}

impl<'a, T: StackTraits, V: VirtualMemory> GuardedStack<'a, T, V> {
    pub(crate) fn new(allocator: &'a GuardedStackAllocator<T, V>, context: StackContext) -> Self {
        Self {
            allocator,
            context: ManuallyDrop::new(context),
        }
    }

    /// Give up automatic release and return the raw context
    pub fn into_context(self) -> StackContext {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the context is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.context) }
    }

    /// Lowest address a stack pointer may reach
    pub fn limit(&self) -> usize {
        self.context
            .usable_range(self.allocator.traits().page_size())
            .start
    }
}

impl<T: StackTraits, V: VirtualMemory> Deref for GuardedStack<'_, T, V> {
    type Target = StackContext;

    fn deref(&self) -> &StackContext {
        &self.context
    }
}

impl<T: StackTraits, V: VirtualMemory> core::fmt::Debug for GuardedStack<'_, T, V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("GuardedStack").field(&*self.context).finish()
    }
}

impl<T: StackTraits, V: VirtualMemory> Drop for GuardedStack<'_, T, V> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and the context is not used afterwards.
        let context = unsafe { ManuallyDrop::take(&mut self.context) };
        if let Err(e) = self.allocator.deallocate(context) {
            tracing::error!(error = %e, "failed to release guarded stack on drop");
        }
    }
}
