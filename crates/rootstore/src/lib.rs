//! Segmented free-list storage for long-lived GC root handles.
//!
//! `rootstore` tracks *global handles*: references to collector-managed
//! values that must survive outside any stack-scoped handle region. Handles
//! live in fixed 256-slot blocks chained per category, with freed slots
//! recycled through intrusive free lists, so minting and releasing a handle
//! are O(1) and a handle's address never moves.
//!
//! # Features
//!
//! - **Three handle categories**: normal, unified (cross-VM), and weak,
//!   sharing one block-chain implementation
//! - **Weak handles with callbacks**: an embedder reference plus a
//!   free/finalize callback pair fired when the referent is cleared
//! - **Block recycling**: empty blocks are returned to the allocator; a
//!   chain never drops below one block
//! - **Root enumeration**: the collector walks live handles through
//!   [`GlobalStorage::iterate_strong`] and [`GlobalStorage::iterate_weak`]
//!
//! # Quick Start
//!
//! ```
//! use rootstore::GlobalStorage;
//!
//! let mut storage = GlobalStorage::<u64>::new();
//!
//! let handle = storage.allocate(0x1234);
//! assert_eq!(unsafe { handle.value() }, 0x1234);
//!
//! // Promote to weak; the old handle is invalidated.
//! let weak = storage.set_weak(handle, std::ptr::null_mut(), None, None);
//! assert!(storage.is_weak(weak));
//!
//! storage.dispose(weak);
//! ```
//!
//! # Thread Safety
//!
//! A `GlobalStorage` belongs to exactly one execution context — one VM
//! thread, one isolate — and is `!Send`/`!Sync`. It performs no locking;
//! a collector consuming the iteration entry points must run on the owning
//! thread or while that thread is provably suspended. Independent contexts
//! each own their own instance.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod alloc;
mod block;
mod events;
mod node;
mod stats;
mod storage;
mod value;

// Re-export public API
pub use alloc::{BlockAllocator, SystemBlockAllocator};
pub use block::{NodeBlock, NODE_BLOCK_SIZE};
pub use node::{BlockNode, Node, WeakClearCallback, WeakNode};
pub use stats::StorageStats;
pub use storage::{GlobalHandle, GlobalStorage};
pub use value::HandleValue;
