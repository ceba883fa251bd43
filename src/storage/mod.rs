//! Storage module
//!
//! Persistence for image and tag metadata.

pub mod metadata;

pub use metadata::{
    JsonMetadataStore, MemoryMetadataStore, MetadataLock, MetadataStore, Snapshot,
    SNAPSHOT_VERSION,
};
