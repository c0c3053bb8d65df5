//! Handle slots: `Node` and `WeakNode`.
//!
//! A node is one fixed-size slot inside a [`NodeBlock`](crate::NodeBlock).
//! The same pair of intrusive links threads a node through either the
//! block's used list or its free list — a slot is on exactly one of the two
//! at any time. `WeakNode` extends `Node` with an embedder reference and the
//! callback pair fired when the referent is cleared.

#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

use std::ffi::c_void;
use std::ptr;

use crate::value::HandleValue;

/// Callback invoked with a weak node's embedder reference when the referent
/// is cleared by the collector or the storage is torn down.
///
/// The reference is the opaque pointer installed alongside the callback; the
/// storage never dereferences it.
pub type WeakClearCallback = fn(*mut c_void);

/// A slot holding one live handle value plus its list linkage.
///
/// The value sits at offset zero, so a pointer to the node doubles as a
/// pointer to the value slot — the embedder-visible handle address. The
/// `prev`/`next` links are shared between the owning block's used and free
/// lists; the owner pointer leads back to that block.
#[repr(C)]
pub struct Node<V: HandleValue> {
    value: V,
    prev: *mut Node<V>,
    next: *mut Node<V>,
    owner: *mut (),
    in_use: bool,
    is_weak: bool,
}

impl<V: HandleValue> Node<V> {
    /// Creates an unlinked, unused slot. The weak flag is fixed here and
    /// never changes for the lifetime of the slot.
    pub(crate) fn empty(is_weak: bool) -> Self {
        Self {
            value: V::UNDEFINED,
            prev: ptr::null_mut(),
            next: ptr::null_mut(),
            owner: ptr::null_mut(),
            in_use: false,
            is_weak,
        }
    }

    /// Reinitializes the slot for hand-out or return to the free list.
    ///
    /// Sets `prev` to null, `next` to the given list head, and overwrites
    /// the value and in-use flag. Does no list surgery on neighbors; the
    /// caller unlinks the node first.
    pub(crate) fn reset(&mut self, next: *mut Self, value: V, in_use: bool) {
        self.prev = ptr::null_mut();
        self.next = next;
        self.value = value;
        self.in_use = in_use;
    }

    /// The stored value.
    #[inline]
    pub fn value(&self) -> V {
        self.value
    }

    /// Overwrites the stored value in place.
    #[inline]
    pub fn set_value(&mut self, value: V) {
        self.value = value;
    }

    pub(crate) fn value_mut(&mut self) -> &mut V {
        &mut self.value
    }

    /// `true` while the slot holds a live handle.
    #[inline]
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// `true` if this slot belongs to a weak block.
    #[inline]
    pub fn is_weak(&self) -> bool {
        self.is_weak
    }

    #[inline]
    pub(crate) fn next(&self) -> *mut Self {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: *mut Self) {
        self.next = next;
    }

    #[inline]
    pub(crate) fn prev(&self) -> *mut Self {
        self.prev
    }

    #[inline]
    pub(crate) fn set_prev(&mut self, prev: *mut Self) {
        self.prev = prev;
    }

    /// Type-erased pointer to the owning block.
    #[inline]
    pub(crate) fn owner(&self) -> *mut () {
        self.owner
    }

    #[inline]
    pub(crate) fn set_owner(&mut self, owner: *mut ()) {
        self.owner = owner;
    }
}

/// A slot for a weak handle: a [`Node`] plus the embedder reference and the
/// clear/finalize callback pair.
///
/// The base node is the first field, so a `*mut WeakNode<V>` is also a valid
/// `*mut Node<V>`; the storage relies on this to inspect a bare handle
/// address before it knows which chain the slot belongs to.
#[repr(C)]
pub struct WeakNode<V: HandleValue> {
    node: Node<V>,
    reference: *mut c_void,
    free_callback: Option<WeakClearCallback>,
    finalize_callback: Option<WeakClearCallback>,
}

impl<V: HandleValue> WeakNode<V> {
    /// The stored value.
    #[inline]
    pub fn value(&self) -> V {
        self.node.value()
    }

    /// Overwrites the stored value; a collector clears a dead referent by
    /// writing [`HandleValue::UNDEFINED`] here.
    #[inline]
    pub fn set_value(&mut self, value: V) {
        self.node.set_value(value);
    }

    /// The opaque embedder reference passed to both callbacks.
    #[inline]
    pub fn reference(&self) -> *mut c_void {
        self.reference
    }

    /// Installs the embedder reference. Not owned; the embedder keeps it
    /// alive for as long as the callbacks may fire.
    #[inline]
    pub fn set_reference(&mut self, reference: *mut c_void) {
        self.reference = reference;
    }

    /// The callback fired when the referent is cleared.
    #[inline]
    pub fn free_callback(&self) -> Option<WeakClearCallback> {
        self.free_callback
    }

    /// Installs the free callback.
    #[inline]
    pub fn set_free_callback(&mut self, callback: Option<WeakClearCallback>) {
        self.free_callback = callback;
    }

    /// The callback fired to release embedder-native resources.
    #[inline]
    pub fn finalize_callback(&self) -> Option<WeakClearCallback> {
        self.finalize_callback
    }

    /// Installs the finalize callback.
    #[inline]
    pub fn set_finalize_callback(&mut self, callback: Option<WeakClearCallback>) {
        self.finalize_callback = callback;
    }

    /// Invokes the free callback with the stored reference, if one is set.
    #[inline]
    pub fn call_free_callback(&self) {
        if let Some(callback) = self.free_callback {
            callback(self.reference);
        }
    }

    /// Invokes the finalize callback with the stored reference, if one is set.
    #[inline]
    pub fn call_finalize_callback(&self) {
        if let Some(callback) = self.finalize_callback {
            callback(self.reference);
        }
    }
}

/// The seam between [`NodeBlock`](crate::NodeBlock) and its two slot kinds.
///
/// Implemented by [`Node`] and [`WeakNode`] only; the block code goes
/// through this trait so the used/free list mechanics exist once. The base
/// node must be the implementor's first field under `#[repr(C)]` — block and
/// storage code casts between `*mut Self` and `*mut Node<Self::Value>`.
pub trait BlockNode: Sized {
    /// The payload type stored in the slot.
    type Value: HandleValue;

    /// Whether blocks of this slot kind hold weak handles.
    const IS_WEAK: bool;

    /// Creates an unlinked, unused slot.
    fn empty() -> Self;

    /// The embedded base node.
    fn base(&self) -> &Node<Self::Value>;

    /// The embedded base node, mutably.
    fn base_mut(&mut self) -> &mut Node<Self::Value>;

    /// Hook run when the slot is returned to the free list.
    fn on_free(&mut self);
}

impl<V: HandleValue> BlockNode for Node<V> {
    type Value = V;

    const IS_WEAK: bool = false;

    fn empty() -> Self {
        Self::empty(Self::IS_WEAK)
    }

    #[inline]
    fn base(&self) -> &Node<V> {
        self
    }

    #[inline]
    fn base_mut(&mut self) -> &mut Node<V> {
        self
    }

    #[inline]
    fn on_free(&mut self) {}
}

impl<V: HandleValue> BlockNode for WeakNode<V> {
    type Value = V;

    const IS_WEAK: bool = true;

    fn empty() -> Self {
        Self {
            node: Node::empty(Self::IS_WEAK),
            reference: ptr::null_mut(),
            free_callback: None,
            finalize_callback: None,
        }
    }

    #[inline]
    fn base(&self) -> &Node<V> {
        &self.node
    }

    #[inline]
    fn base_mut(&mut self) -> &mut Node<V> {
        &mut self.node
    }

    fn on_free(&mut self) {
        self.reference = ptr::null_mut();
        self.free_callback = None;
        self.finalize_callback = None;
    }
}
