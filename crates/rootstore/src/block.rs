//! Fixed-capacity node blocks.
//!
//! A block owns 256 slots inline and hands them out in two ways: a bump
//! cursor over never-used slots, and a free list of returned slots threaded
//! through the same links as the used list. Blocks chain together twice —
//! once in the owning chain's all-blocks list, once in its free-blocks list
//! (blocks with at least one reusable slot). The two memberships are
//! independent; detaching from one never detaches from the other.

#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

use std::ptr::{self, NonNull};

use crate::alloc::{BlockAllocator, SystemBlockAllocator};
use crate::node::BlockNode;
use crate::value::HandleValue;

/// Number of slots per block.
pub const NODE_BLOCK_SIZE: usize = 256;

/// A block of [`NODE_BLOCK_SIZE`] handle slots.
///
/// Public for tests and embedder diagnostics; embedders normally go through
/// [`GlobalStorage`](crate::GlobalStorage).
pub struct NodeBlock<T: BlockNode> {
    slots: [T; NODE_BLOCK_SIZE],
    used_head: *mut T,
    free_head: *mut T,
    alloc_cursor: usize,
    block_prev: *mut NodeBlock<T>,
    block_next: *mut NodeBlock<T>,
    free_prev: *mut NodeBlock<T>,
    free_next: *mut NodeBlock<T>,
}

impl<T: BlockNode> NodeBlock<T> {
    fn empty() -> Self {
        Self {
            slots: std::array::from_fn(|_| T::empty()),
            used_head: ptr::null_mut(),
            free_head: ptr::null_mut(),
            alloc_cursor: 0,
            block_prev: ptr::null_mut(),
            block_next: ptr::null_mut(),
            free_prev: ptr::null_mut(),
            free_next: ptr::null_mut(),
        }
    }

    /// Initializes a block in place, wiring every slot's owner pointer.
    ///
    /// This is the only point where slots learn their block and their weak
    /// flag.
    ///
    /// # Safety
    ///
    /// `block` must point to memory valid for writes of `Self` and stay at
    /// that address for the block's lifetime.
    pub unsafe fn init(block: NonNull<Self>) {
        // SAFETY: per contract, `block` is writable and correctly sized.
        unsafe { block.as_ptr().write(Self::empty()) };
        let owner = block.as_ptr().cast::<()>();
        // SAFETY: just initialized above.
        let slots = unsafe { &mut (*block.as_ptr()).slots };
        for slot in slots {
            slot.base_mut().set_owner(owner);
        }
    }

    /// Allocates and initializes a standalone block on the global allocator.
    pub fn boxed() -> Box<Self> {
        let block = SystemBlockAllocator.allocate_block::<Self>();
        // SAFETY: freshly allocated, correctly laid out for `Self`; the Box
        // keeps it pinned at this address.
        unsafe {
            Self::init(block);
            Box::from_raw(block.as_ptr())
        }
    }

    /// Takes the next never-used slot, or returns null if the bump cursor
    /// has reached capacity. The slot is linked to the front of the used
    /// list. O(1).
    pub fn new_node(&mut self, value: T::Value) -> *mut T {
        if self.alloc_cursor >= NODE_BLOCK_SIZE {
            return ptr::null_mut();
        }
        let node: *mut T = &mut self.slots[self.alloc_cursor];
        self.alloc_cursor += 1;
        // SAFETY: `node` is an in-bounds slot of this block.
        unsafe { self.push_used(node, value) };
        node
    }

    /// Pops a previously freed slot, or returns null if the free list is
    /// empty. The slot is relinked to the front of the used list. O(1).
    pub fn get_free_node(&mut self, value: T::Value) -> *mut T {
        let node = self.free_head;
        if node.is_null() {
            return node;
        }
        // SAFETY: the free list only holds slots of this block.
        unsafe {
            let next = (*node).base().next().cast::<T>();
            if !next.is_null() {
                (*next).base_mut().set_prev(ptr::null_mut());
            }
            self.free_head = next;
            self.push_used(node, value);
        }
        node
    }

    /// Moves a used slot onto the free list, clearing its value and, for
    /// weak slots, the embedder reference and callbacks. O(1).
    ///
    /// # Safety
    ///
    /// `node` must be a slot of this block currently on its used list.
    pub unsafe fn free_node(&mut self, node: *mut T) {
        // SAFETY: per contract, `node` and its list neighbors are live slots
        // of this block.
        unsafe {
            let prev = (*node).base().prev().cast::<T>();
            let next = (*node).base().next().cast::<T>();
            if prev.is_null() {
                debug_assert_eq!(self.used_head, node);
                self.used_head = next;
            } else {
                (*prev).base_mut().set_next(next.cast());
            }
            if !next.is_null() {
                (*next).base_mut().set_prev(prev.cast());
            }

            let free_head = self.free_head;
            (*node)
                .base_mut()
                .reset(free_head.cast(), <T::Value as HandleValue>::UNDEFINED, false);
            if !free_head.is_null() {
                (*free_head).base_mut().set_prev(node.cast());
            }
            self.free_head = node;
            (*node).on_free();
        }
    }

    /// # Safety
    ///
    /// `node` must be an in-bounds slot of this block, on neither list.
    unsafe fn push_used(&mut self, node: *mut T, value: T::Value) {
        let head = self.used_head;
        // SAFETY: per contract plus the used-list invariant for `head`.
        unsafe {
            (*node).base_mut().reset(head.cast(), value, true);
            if !head.is_null() {
                (*head).base_mut().set_prev(node.cast());
            }
        }
        self.used_head = node;
    }

    /// `true` if at least one freed slot is ready for reuse.
    #[inline]
    pub fn has_free_node(&self) -> bool {
        !self.free_head.is_null()
    }

    /// `true` if the block still has never-used capacity or occupied slots.
    /// A block may only be destroyed once this is `false`.
    #[inline]
    pub fn has_used_node(&self) -> bool {
        self.alloc_cursor < NODE_BLOCK_SIZE || !self.used_head.is_null()
    }

    /// `true` once every slot has been handed out at least once.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.alloc_cursor >= NODE_BLOCK_SIZE
    }

    /// Position of the bump cursor: the number of slots handed out at least
    /// once.
    #[inline]
    pub fn alloc_cursor(&self) -> usize {
        self.alloc_cursor
    }

    /// Walks the used list front to back.
    ///
    /// The successor is captured before each callback, so the callback may
    /// free the node it is handed without derailing the walk.
    pub fn iterate_used<F: FnMut(&mut T)>(&mut self, mut callback: F) {
        let mut current = self.used_head;
        while !current.is_null() {
            // SAFETY: the used list only holds live slots of this block.
            let next = unsafe { (*current).base().next().cast::<T>() };
            assert_ne!(current, next, "used list cycle");
            // SAFETY: as above; the callback may free `current` but cannot
            // invalidate `next`.
            unsafe { callback(&mut *current) };
            current = next;
        }
    }

    /// Appends this block after `prev` in the all-blocks chain.
    ///
    /// # Safety
    ///
    /// `prev` must be null or a live block of the same chain whose
    /// `block_next` is null.
    pub(crate) unsafe fn link_to(&mut self, prev: *mut Self) {
        self.block_prev = prev;
        self.block_next = ptr::null_mut();
        if !prev.is_null() {
            // SAFETY: per contract, `prev` is live.
            unsafe { (*prev).block_next = self };
        }
    }

    /// Splices this block out of the all-blocks chain and the free-blocks
    /// chain. Chain head/tail pointers are the caller's to patch.
    ///
    /// # Safety
    ///
    /// All linked neighbor blocks must be live.
    pub(crate) unsafe fn unlink(&mut self) {
        // SAFETY: per contract.
        unsafe {
            if !self.block_next.is_null() {
                (*self.block_next).block_prev = self.block_prev;
            }
            if !self.block_prev.is_null() {
                (*self.block_prev).block_next = self.block_next;
            }
            self.block_prev = ptr::null_mut();
            self.block_next = ptr::null_mut();
            self.detach_free_chain();
        }
    }

    /// Splices this block out of the free-blocks chain only.
    ///
    /// # Safety
    ///
    /// All linked neighbor blocks must be live.
    pub(crate) unsafe fn detach_free_chain(&mut self) {
        // SAFETY: per contract.
        unsafe {
            if !self.free_next.is_null() {
                (*self.free_next).free_prev = self.free_prev;
            }
            if !self.free_prev.is_null() {
                (*self.free_prev).free_next = self.free_next;
            }
        }
        self.free_prev = ptr::null_mut();
        self.free_next = ptr::null_mut();
    }

    /// `true` if this block is already reachable from the given free-chain
    /// head.
    pub(crate) fn on_free_chain(&self, chain_head: *const Self) -> bool {
        !self.free_prev.is_null() || !self.free_next.is_null() || ptr::eq(chain_head, self)
    }

    #[inline]
    pub(crate) fn block_prev(&self) -> *mut Self {
        self.block_prev
    }

    #[inline]
    pub(crate) fn block_next(&self) -> *mut Self {
        self.block_next
    }

    #[inline]
    pub(crate) fn free_next(&self) -> *mut Self {
        self.free_next
    }

    #[inline]
    pub(crate) fn set_free_next(&mut self, next: *mut Self) {
        self.free_next = next;
    }

    #[inline]
    pub(crate) fn set_free_prev(&mut self, prev: *mut Self) {
        self.free_prev = prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    fn collect_used(block: &mut NodeBlock<Node<u64>>) -> Vec<u64> {
        let mut values = Vec::new();
        block.iterate_used(|node| values.push(node.value()));
        values
    }

    fn count_free(block: &NodeBlock<Node<u64>>) -> usize {
        let mut count = 0;
        let mut current = block.free_head;
        while !current.is_null() {
            count += 1;
            current = unsafe { (*current).next() };
        }
        count
    }

    #[test]
    fn test_bump_allocation_until_full() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        assert!(!block.is_full());

        let mut nodes = Vec::new();
        for i in 0..NODE_BLOCK_SIZE {
            let node = block.new_node(i as u64);
            assert!(!node.is_null());
            nodes.push(node);
        }
        assert!(block.is_full());
        assert_eq!(block.alloc_cursor(), NODE_BLOCK_SIZE);

        // Every slot distinct, all in use.
        nodes.sort_unstable();
        nodes.dedup();
        assert_eq!(nodes.len(), NODE_BLOCK_SIZE);

        assert!(block.new_node(999).is_null());
    }

    #[test]
    fn test_owner_points_back_to_block() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        let node = block.new_node(1);
        let owner = unsafe { (*node).owner() };
        assert_eq!(owner, (&raw mut *block).cast::<()>());
    }

    #[test]
    fn test_used_list_most_recent_first() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        block.new_node(10);
        block.new_node(20);
        block.new_node(30);
        assert_eq!(collect_used(&mut block), vec![30, 20, 10]);
    }

    #[test]
    fn test_free_middle_node_unlinks() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        block.new_node(1);
        let b = block.new_node(2);
        block.new_node(3);

        unsafe { block.free_node(b) };
        assert_eq!(collect_used(&mut block), vec![3, 1]);
        assert!(block.has_free_node());
        unsafe {
            assert!((*b).value().is_undefined());
            assert!(!(*b).is_in_use());
        }
    }

    #[test]
    fn test_free_head_node_updates_used_head() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        block.new_node(1);
        let head = block.new_node(2);
        unsafe { block.free_node(head) };
        assert_eq!(collect_used(&mut block), vec![1]);
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        block.new_node(1);
        let b = block.new_node(2);
        block.new_node(3);

        unsafe { block.free_node(b) };
        let reused = block.get_free_node(4);
        assert_eq!(reused, b);
        assert!(!block.has_free_node());
        unsafe {
            assert_eq!((*reused).value(), 4);
            assert!((*reused).is_in_use());
        }
        assert_eq!(collect_used(&mut block), vec![4, 3, 1]);
    }

    #[test]
    fn test_get_free_node_empty_list() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        assert!(block.get_free_node(1).is_null());
    }

    #[test]
    fn test_slot_never_on_both_lists() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        let mut live = Vec::new();
        for i in 0..32 {
            live.push(block.new_node(i));
        }
        // Free every other slot, then take two back.
        for node in live.iter().step_by(2) {
            unsafe { block.free_node(*node) };
        }
        block.get_free_node(100);
        block.get_free_node(101);

        let used = collect_used(&mut block).len();
        let free = count_free(&block);
        assert_eq!(used, 18);
        assert_eq!(free, 14);
        assert_eq!(used + free, block.alloc_cursor());
    }

    #[test]
    fn test_has_used_node_counts_virgin_capacity() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        // Untouched capacity keeps the block alive even with nothing held.
        assert!(block.has_used_node());

        let mut nodes = Vec::new();
        for i in 0..NODE_BLOCK_SIZE {
            nodes.push(block.new_node(i as u64));
        }
        assert!(block.has_used_node());

        for node in nodes {
            unsafe { block.free_node(node) };
        }
        assert!(!block.has_used_node());
        assert!(block.has_free_node());
    }

    #[test]
    fn test_iterate_used_freeing_current_node() {
        let mut block = NodeBlock::<Node<u64>>::boxed();
        for i in 0..5 {
            block.new_node(i);
        }

        let blk: *mut NodeBlock<Node<u64>> = &mut *block;
        let mut visited = Vec::new();
        unsafe {
            (*blk).iterate_used(|node| {
                visited.push(node.value());
                let ptr: *mut Node<u64> = node;
                unsafe { (*blk).free_node(ptr) };
            });
        }

        assert_eq!(visited, vec![4, 3, 2, 1, 0]);
        assert!(collect_used(&mut block).is_empty());
        assert_eq!(count_free(&block), 5);
    }

    #[test]
    fn test_block_chain_link_unlink() {
        let mut a = NodeBlock::<Node<u64>>::boxed();
        let mut b = NodeBlock::<Node<u64>>::boxed();
        let mut c = NodeBlock::<Node<u64>>::boxed();

        unsafe {
            b.link_to(&mut *a);
            c.link_to(&mut *b);
        }
        assert_eq!(a.block_next(), &raw mut *b);
        assert_eq!(c.block_prev(), &raw mut *b);

        unsafe { b.unlink() };
        assert_eq!(a.block_next(), &raw mut *c);
        assert_eq!(c.block_prev(), &raw mut *a);
        assert!(b.block_next().is_null());
        assert!(b.block_prev().is_null());
    }

    #[test]
    fn test_free_chain_membership_independent_of_block_chain() {
        let mut a = NodeBlock::<Node<u64>>::boxed();
        let mut b = NodeBlock::<Node<u64>>::boxed();

        unsafe { b.link_to(&mut *a) };
        a.set_free_next(&mut *b);
        b.set_free_prev(&mut *a);

        assert!(b.on_free_chain(std::ptr::null()));
        unsafe { b.detach_free_chain() };
        assert!(!b.on_free_chain(std::ptr::null()));
        // Still on the all-blocks chain.
        assert_eq!(a.block_next(), &raw mut *b);
        assert!(a.free_next().is_null());
    }
}
