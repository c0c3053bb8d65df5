//! Storage teardown: callback delivery and block accounting.

mod common;

use std::collections::HashSet;
use std::ffi::c_void;

use common::TrackingAllocator;
use rootstore::GlobalStorage;

fn bump(reference: *mut c_void) {
    unsafe { *reference.cast::<u32>() += 1 };
}

#[test]
fn test_teardown_returns_every_block() {
    let allocator = TrackingAllocator::new();
    {
        let mut storage = GlobalStorage::<u64, _>::with_allocator(allocator.clone());
        for i in 0..600u64 {
            storage.allocate(i);
        }
        for i in 0..10u64 {
            storage.allocate_unified(i);
        }
        for i in 0..5u64 {
            let handle = storage.allocate(i);
            storage.set_weak(handle, std::ptr::null_mut(), None, None);
        }
    }

    let log = allocator.log.borrow();
    assert_eq!(log.allocated.len(), log.deallocated.len());
    let allocated: HashSet<_> = log.allocated.iter().copied().collect();
    let deallocated: HashSet<_> = log.deallocated.iter().copied().collect();
    assert_eq!(allocated, deallocated);
}

#[test]
fn test_teardown_clears_every_live_weak_handle() {
    let mut free_count: u32 = 0;
    let mut finalize_count: u32 = 0;
    {
        let mut storage = GlobalStorage::<u64>::new();
        for i in 0..300u64 {
            let handle = storage.allocate(i);
            storage.set_weak(
                handle,
                if i % 2 == 0 {
                    (&raw mut free_count).cast::<c_void>()
                } else {
                    (&raw mut finalize_count).cast::<c_void>()
                },
                Some(bump),
                Some(bump),
            );
        }
        // Live normal and unified handles do not interfere.
        storage.allocate(1);
        storage.allocate_unified(2);
    }
    // Both callbacks ran for each weak handle, once each.
    assert_eq!(free_count, 300);
    assert_eq!(finalize_count, 300);
}

#[test]
fn test_teardown_skips_disposed_weak_handles() {
    let mut count: u32 = 0;
    {
        let mut storage = GlobalStorage::<u64>::new();
        let handle = storage.allocate(3);
        let weak = storage.set_weak(
            handle,
            (&raw mut count).cast::<c_void>(),
            Some(bump),
            Some(bump),
        );
        storage.dispose(weak);
    }
    assert_eq!(count, 0);
}
