//! Top-level handle storage.
//!
//! `GlobalStorage` owns three independent block chains — normal handles,
//! unified (cross-VM) handles, and weak handles — over one shared chain
//! implementation. A handle is a stable address into a block slot; the
//! collector enumerates live slots through the iteration entry points and
//! treats them as roots (or weak references).

#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};

use crate::alloc::{BlockAllocator, SystemBlockAllocator};
use crate::block::NodeBlock;
use crate::events;
use crate::node::{BlockNode, Node, WeakClearCallback, WeakNode};
use crate::stats::StorageStats;
use crate::value::HandleValue;

/// An opaque, stable address for a live global handle.
///
/// The token stays valid until the handle is disposed or relocated by
/// [`GlobalStorage::set_weak`]/[`GlobalStorage::clear_weak`]; using it past
/// that point is a caller bug the storage does not detect. Copying the token
/// does not duplicate the handle.
pub struct GlobalHandle<V: HandleValue> {
    node: NonNull<Node<V>>,
}

impl<V: HandleValue> GlobalHandle<V> {
    pub(crate) fn from_node(node: *mut Node<V>) -> Self {
        debug_assert!(!node.is_null());
        // SAFETY: allocation either returns a live slot or aborts; internal
        // callers never pass null.
        let node = unsafe { NonNull::new_unchecked(node) };
        Self { node }
    }

    pub(crate) fn as_node_ptr(&self) -> *mut Node<V> {
        self.node.as_ptr()
    }

    /// Reads the stored value.
    ///
    /// # Safety
    ///
    /// The handle must still be valid: not disposed, not invalidated by a
    /// weak promotion/demotion, and its storage must still be alive.
    #[inline]
    pub unsafe fn value(&self) -> V {
        // SAFETY: per contract.
        unsafe { self.node.as_ref().value() }
    }

    /// Overwrites the stored value in place.
    ///
    /// # Safety
    ///
    /// Same validity contract as [`GlobalHandle::value`]. The new value
    /// must be one the collector is prepared to see as a root.
    #[inline]
    pub unsafe fn set_value(&self, value: V) {
        // SAFETY: per contract; the slot is exclusively owned by the
        // storage's single owner.
        unsafe { (*self.node.as_ptr()).set_value(value) };
    }

    /// The raw address of the value slot. Embedding layers that traffic in
    /// raw addresses round-trip through this and
    /// [`GlobalHandle::from_value_ptr`].
    #[inline]
    pub fn value_ptr(&self) -> *mut V {
        self.node.as_ptr().cast::<V>()
    }

    /// Rebuilds a handle from a value-slot address.
    ///
    /// # Safety
    ///
    /// `slot` must be an address previously obtained from
    /// [`GlobalHandle::value_ptr`] on a handle that is still valid.
    #[inline]
    pub unsafe fn from_value_ptr(slot: *mut V) -> Self {
        debug_assert!(!slot.is_null());
        // SAFETY: the value is the first field of its node, so the slot
        // address is the node address.
        let node = unsafe { NonNull::new_unchecked(slot.cast::<Node<V>>()) };
        Self { node }
    }
}

impl<V: HandleValue> Clone for GlobalHandle<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V: HandleValue> Copy for GlobalHandle<V> {}

impl<V: HandleValue> PartialEq for GlobalHandle<V> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl<V: HandleValue> Eq for GlobalHandle<V> {}

impl<V: HandleValue> Hash for GlobalHandle<V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

impl<V: HandleValue> fmt::Debug for GlobalHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GlobalHandle").field(&self.node).finish()
    }
}

/// One category's block chain: the all-blocks list (head to tail) plus the
/// chain of blocks with reusable slots.
struct Chain<T: BlockNode> {
    head: *mut NodeBlock<T>,
    tail: *mut NodeBlock<T>,
    free_head: *mut NodeBlock<T>,
    blocks: usize,
    live: usize,
    label: &'static str,
}

impl<T: BlockNode> Chain<T> {
    /// A chain starts with one block and never drops below one.
    fn new<A: BlockAllocator>(allocator: &A, label: &'static str) -> Self {
        let mut chain = Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            free_head: ptr::null_mut(),
            blocks: 0,
            live: 0,
            label,
        };
        let block = chain.create_block(allocator);
        chain.head = block;
        chain.tail = block;
        chain
    }

    fn create_block<A: BlockAllocator>(&mut self, allocator: &A) -> *mut NodeBlock<T> {
        let block = allocator.allocate_block::<NodeBlock<T>>();
        // SAFETY: fresh allocation sized and aligned for a block.
        unsafe { NodeBlock::init(block) };
        self.blocks += 1;
        events::block_created(self.label, self.blocks);
        block.as_ptr()
    }

    fn allocate<A: BlockAllocator>(&mut self, allocator: &A, value: T::Value) -> *mut T {
        self.live += 1;
        // Freed slots are reused before virgin capacity so blocks stay
        // dense and disposed addresses come back into circulation.
        if !self.free_head.is_null() {
            let block = self.free_head;
            // SAFETY: free-chain blocks are live and hold at least one
            // reusable slot.
            unsafe {
                let node = (*block).get_free_node(value);
                debug_assert!(!node.is_null());
                if !(*block).has_free_node() {
                    self.remove_from_free_chain(block);
                }
                return node;
            }
        }
        // SAFETY: the tail block is always live.
        unsafe {
            if !(*self.tail).is_full() {
                return (*self.tail).new_node(value);
            }
        }
        let block = self.create_block(allocator);
        // SAFETY: `block` is fresh and unlinked; the old tail is live with
        // no successor.
        unsafe {
            (*block).link_to(self.tail);
            self.tail = block;
            (*block).new_node(value)
        }
    }

    /// Frees the slot and recycles its block once nothing keeps the block
    /// alive — unless it is the chain's only block.
    ///
    /// # Safety
    ///
    /// `node` must be an in-use slot of a block owned by this chain.
    unsafe fn dispose<A: BlockAllocator>(&mut self, allocator: &A, node: *mut T) {
        self.live -= 1;
        // SAFETY: per contract; the owner pointer was wired at block init.
        unsafe {
            let block = (*node).base().owner().cast::<NodeBlock<T>>();
            (*block).free_node(node);

            let only_block = self.head == block && self.tail == block;
            if !(*block).has_used_node() && !only_block {
                if self.head == block {
                    self.head = (*block).block_next();
                }
                if self.tail == block {
                    self.tail = (*block).block_prev();
                }
                if self.free_head == block {
                    self.free_head = (*block).free_next();
                }
                (*block).unlink();
                self.blocks -= 1;
                events::block_recycled(self.label, self.blocks);
                allocator.deallocate_block(NonNull::new_unchecked(block));
            } else {
                self.register_free_block(block);
            }
        }
    }

    fn remove_from_free_chain(&mut self, block: *mut NodeBlock<T>) {
        // SAFETY: `block` and its free-chain neighbors are live chain
        // members.
        unsafe {
            if self.free_head == block {
                self.free_head = (*block).free_next();
            }
            (*block).detach_free_chain();
        }
    }

    fn register_free_block(&mut self, block: *mut NodeBlock<T>) {
        // SAFETY: `block` is a live member of this chain.
        unsafe {
            if (*block).on_free_chain(self.free_head) {
                return;
            }
            (*block).set_free_next(self.free_head);
            if !self.free_head.is_null() {
                (*self.free_head).set_free_prev(block);
            }
            self.free_head = block;
        }
    }

    fn iterate_used<F: FnMut(&mut T)>(&mut self, mut callback: F) {
        let mut block = self.head;
        while !block.is_null() {
            // SAFETY: chain blocks are live; the successor is captured
            // before the block is visited.
            unsafe {
                let next = (*block).block_next();
                (*block).iterate_used(&mut callback);
                block = next;
            }
        }
    }

    /// Visits every live slot one last time, then returns all blocks to the
    /// allocator.
    fn teardown<A: BlockAllocator, F: FnMut(&mut T)>(&mut self, allocator: &A, mut callback: F) {
        let mut block = self.head;
        while !block.is_null() {
            // SAFETY: chain blocks are live until deallocated here, and
            // each is visited exactly once.
            unsafe {
                let next = (*block).block_next();
                (*block).iterate_used(&mut callback);
                allocator.deallocate_block(NonNull::new_unchecked(block));
                block = next;
            }
        }
        self.head = ptr::null_mut();
        self.tail = ptr::null_mut();
        self.free_head = ptr::null_mut();
        self.blocks = 0;
        self.live = 0;
    }
}

/// Storage for global handles: GC roots that outlive any stack scope.
///
/// One instance belongs to exactly one execution context (one VM thread,
/// one isolate); it is `!Send`/`!Sync` and performs no locking. A collector
/// consuming [`GlobalStorage::iterate_strong`]/[`GlobalStorage::iterate_weak`]
/// must run on the owning thread or while it is provably suspended.
///
/// # Example
///
/// ```
/// use rootstore::GlobalStorage;
///
/// let mut storage = GlobalStorage::<u64>::new();
/// let handle = storage.allocate(0x2a);
/// assert_eq!(unsafe { handle.value() }, 0x2a);
/// storage.dispose(handle);
/// ```
pub struct GlobalStorage<V: HandleValue, A: BlockAllocator = SystemBlockAllocator> {
    normal: Chain<Node<V>>,
    unified: Chain<Node<V>>,
    weak: Chain<WeakNode<V>>,
    allocator: A,
}

impl<V: HandleValue> GlobalStorage<V> {
    /// Creates a storage backed by the global allocator.
    pub fn new() -> Self {
        Self::with_allocator(SystemBlockAllocator)
    }
}

impl<V: HandleValue> Default for GlobalStorage<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HandleValue, A: BlockAllocator> GlobalStorage<V, A> {
    /// Creates a storage backed by the given block allocator. Each of the
    /// three chains starts with one block.
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            normal: Chain::new(&allocator, "normal"),
            unified: Chain::new(&allocator, "unified"),
            weak: Chain::new(&allocator, "weak"),
            allocator,
        }
    }

    /// Mints a normal global handle for `value`.
    pub fn allocate(&mut self, value: V) -> GlobalHandle<V> {
        GlobalHandle::from_node(self.normal.allocate(&self.allocator, value))
    }

    /// Mints a unified (cross-VM) global handle for `value`.
    pub fn allocate_unified(&mut self, value: V) -> GlobalHandle<V> {
        GlobalHandle::from_node(self.unified.allocate(&self.allocator, value))
    }

    /// Releases a normal or weak handle, returning its slot for reuse.
    ///
    /// A handle whose slot is no longer in use is ignored, which tolerates
    /// the double-dispose patterns embedding layers produce. No weak
    /// callbacks fire here; clearing callbacks is the collector's job.
    pub fn dispose(&mut self, handle: GlobalHandle<V>) {
        let node = handle.as_node_ptr();
        // SAFETY: the handle contract guarantees the slot belongs to this
        // storage; a stale handle whose slot was reused is a caller bug the
        // in-use check cannot fully catch.
        unsafe {
            if !(*node).is_in_use() {
                return;
            }
            if (*node).is_weak() {
                self.weak
                    .dispose(&self.allocator, node.cast::<WeakNode<V>>());
            } else {
                self.normal.dispose(&self.allocator, node);
            }
        }
    }

    /// Releases a unified handle, returning its slot for reuse.
    pub fn dispose_unified(&mut self, handle: GlobalHandle<V>) {
        let node = handle.as_node_ptr();
        // SAFETY: as for `dispose`, against the unified chain.
        unsafe {
            if !(*node).is_in_use() {
                return;
            }
            self.unified.dispose(&self.allocator, node);
        }
    }

    /// Turns a handle weak: the value moves to a fresh weak slot carrying
    /// `reference` and the callback pair, and the old handle is invalidated.
    ///
    /// This relocates rather than flags in place — only the returned handle
    /// is valid afterwards.
    pub fn set_weak(
        &mut self,
        handle: GlobalHandle<V>,
        reference: *mut c_void,
        free_callback: Option<WeakClearCallback>,
        finalize_callback: Option<WeakClearCallback>,
    ) -> GlobalHandle<V> {
        let node = handle.as_node_ptr();
        // SAFETY: handle contract; the value is copied out before the old
        // slot is recycled.
        unsafe {
            let value = (*node).value();
            if (*node).is_weak() {
                self.weak
                    .dispose(&self.allocator, node.cast::<WeakNode<V>>());
            } else {
                self.normal.dispose(&self.allocator, node);
            }
            let weak = self.weak.allocate(&self.allocator, value);
            (*weak).set_reference(reference);
            (*weak).set_free_callback(free_callback);
            (*weak).set_finalize_callback(finalize_callback);
            GlobalHandle::from_node(weak.cast::<Node<V>>())
        }
    }

    /// Turns a weak handle back into a normal one, invalidating it.
    ///
    /// Returns `None` when the referent was already cleared by the
    /// collector — there is nothing left to pin, and the weak slot is left
    /// untouched for the embedder to dispose.
    pub fn clear_weak(&mut self, handle: GlobalHandle<V>) -> Option<GlobalHandle<V>> {
        let node = handle.as_node_ptr();
        // SAFETY: handle contract.
        unsafe {
            let value = (*node).value();
            if value.is_undefined() {
                return None;
            }
            debug_assert!((*node).is_weak());
            self.weak
                .dispose(&self.allocator, node.cast::<WeakNode<V>>());
            Some(GlobalHandle::from_node(
                self.normal.allocate(&self.allocator, value),
            ))
        }
    }

    /// Whether the handle currently lives in the weak chain.
    pub fn is_weak(&self, handle: GlobalHandle<V>) -> bool {
        // SAFETY: handle contract.
        unsafe { handle.node.as_ref().is_weak() }
    }

    /// Visits every live normal and unified value — the collector's
    /// root-marking entry point. Values may be updated in place.
    pub fn iterate_strong<F: FnMut(&mut V)>(&mut self, mut visitor: F) {
        self.normal.iterate_used(|node| visitor(node.value_mut()));
        self.unified.iterate_used(|node| visitor(node.value_mut()));
    }

    /// Visits every live weak slot — the collector's weak-processing entry
    /// point. For a dead referent the collector clears the value to
    /// [`HandleValue::UNDEFINED`] and fires the slot's callbacks; the
    /// embedder disposes the handle later.
    pub fn iterate_weak<F: FnMut(&mut WeakNode<V>)>(&mut self, visitor: F) {
        self.weak.iterate_used(visitor);
    }

    /// Current counters for all three categories.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            normal_live: self.normal.live,
            unified_live: self.unified.live,
            weak_live: self.weak.live,
            normal_blocks: self.normal.blocks,
            unified_blocks: self.unified.blocks,
            weak_blocks: self.weak.blocks,
        }
    }
}

impl<V: HandleValue, A: BlockAllocator> Drop for GlobalStorage<V, A> {
    /// Tears down all three chains. Every live weak slot is cleared and
    /// fires both callbacks exactly once; normal and unified slots are
    /// reset before their blocks are returned to the allocator.
    fn drop(&mut self) {
        events::storage_teardown(self.normal.live + self.unified.live + self.weak.live);
        self.weak.teardown(&self.allocator, |node| {
            node.set_value(V::UNDEFINED);
            node.call_free_callback();
            node.call_finalize_callback();
        });
        self.normal
            .teardown(&self.allocator, |node| node.set_value(V::UNDEFINED));
        self.unified
            .teardown(&self.allocator, |node| node.set_value(V::UNDEFINED));
    }
}

impl<V: HandleValue, A: BlockAllocator> fmt::Debug for GlobalStorage<V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalStorage")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
