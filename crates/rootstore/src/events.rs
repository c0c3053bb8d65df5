//! Storage lifecycle events.
//!
//! When the `tracing` feature is enabled, block creation/recycling and
//! storage teardown emit structured debug events. Without the feature the
//! hooks compile to nothing.

#[cfg(feature = "tracing")]
mod internal {
    pub fn block_created(category: &'static str, blocks: usize) {
        tracing::debug!(category, blocks, "block_created");
    }

    pub fn block_recycled(category: &'static str, blocks: usize) {
        tracing::debug!(category, blocks, "block_recycled");
    }

    pub fn storage_teardown(live_nodes: usize) {
        tracing::debug!(live_nodes, "storage_teardown");
    }
}

#[cfg(not(feature = "tracing"))]
mod internal {
    pub fn block_created(_category: &'static str, _blocks: usize) {}

    pub fn block_recycled(_category: &'static str, _blocks: usize) {}

    pub fn storage_teardown(_live_nodes: usize) {}
}

pub(crate) use internal::{block_created, block_recycled, storage_teardown};
