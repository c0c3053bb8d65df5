//! Block allocation.
//!
//! Storage blocks are heap objects obtained through a [`BlockAllocator`].
//! Allocation failure is unrecoverable: a runtime that can no longer track
//! its root handles cannot safely continue, so the default allocator aborts
//! through [`handle_alloc_error`] rather than surfacing an error.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Supplies and reclaims the memory backing storage blocks.
///
/// Implementations return uninitialized memory; the storage initializes the
/// block in place. There is no fallible variant — an implementation that
/// cannot satisfy a request must abort the process.
pub trait BlockAllocator {
    /// Allocates uninitialized memory for one `T`.
    ///
    /// Never returns on failure.
    fn allocate_block<T>(&self) -> NonNull<T>;

    /// Returns a block's memory.
    ///
    /// # Safety
    ///
    /// `block` must have come from `allocate_block::<T>` on `self` and must
    /// not be used afterwards.
    unsafe fn deallocate_block<T>(&self, block: NonNull<T>);
}

/// The default allocator: plain global-allocator storage, fatal on failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBlockAllocator;

impl BlockAllocator for SystemBlockAllocator {
    fn allocate_block<T>(&self) -> NonNull<T> {
        let layout = Layout::new::<T>();
        debug_assert!(layout.size() > 0);
        // SAFETY: block types are never zero-sized.
        let ptr = unsafe { alloc(layout) };
        let Some(ptr) = NonNull::new(ptr.cast::<T>()) else {
            handle_alloc_error(layout);
        };
        ptr
    }

    unsafe fn deallocate_block<T>(&self, block: NonNull<T>) {
        // SAFETY: `block` was produced by `allocate_block::<T>` with the
        // same layout.
        unsafe { dealloc(block.as_ptr().cast::<u8>(), Layout::new::<T>()) };
    }
}
