//! Integration tests for the storage tracing feature.
//!
//! These verify that block-lifecycle events are emitted without panicking
//! when a subscriber is installed.

#![cfg(feature = "tracing")]

use rootstore::{GlobalStorage, NODE_BLOCK_SIZE};

fn init_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

#[test]
fn test_block_growth_with_tracing() {
    init_subscriber();

    let mut storage = GlobalStorage::<u64>::new();
    let mut handles = Vec::new();
    for i in 0..(NODE_BLOCK_SIZE + 10) as u64 {
        handles.push(storage.allocate(i));
    }
    // Growth emitted block_created; draining the second block emits
    // block_recycled.
    for handle in handles {
        storage.dispose(handle);
    }
    assert_eq!(storage.stats().normal_blocks, 1);
}

#[test]
fn test_teardown_with_tracing() {
    init_subscriber();

    let mut storage = GlobalStorage::<u64>::new();
    for i in 0..10u64 {
        storage.allocate(i);
    }
    drop(storage);
}
