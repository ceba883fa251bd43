//! Image management module
//!
//! This module maps human-readable names to content-addressed images, tracks
//! what keeps each image alive, and removes names and images on request.

pub mod catalog;
pub mod id;
pub mod layers;
pub mod record;
pub mod removal;
pub mod store;
pub mod tags;

pub use catalog::{Catalog, Target};
pub use id::ContentId;
pub use layers::{DirLayerStore, LayerStore, MemoryLayerStore};
pub use record::{ImageRecord, ImageSpec};
pub use removal::Action;
pub use store::{ImageRow, ImageStore, NONE_LABEL};
pub use tags::TagIndex;
