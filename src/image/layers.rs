//! Layer storage reclaimed when an image is deleted
//!
//! Layer content itself is owned by the content store. The catalog only tells
//! it which image IDs are gone.

use super::id::ContentId;
use crate::error::{Result, StoreError};
use std::path::PathBuf;
use std::sync::Mutex;

/// Content store hook for deleted images
pub trait LayerStore: Send + Sync {
    /// Reclaim the storage held for `id`
    fn release(&self, id: &ContentId) -> Result<()>;
}

/// Layers kept as one directory per image under a root
pub struct DirLayerStore {
    root: PathBuf,
}

impl DirLayerStore {
    /// Create a layer store rooted at `root`
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Directory holding the layers of `id`
    pub fn image_path(&self, id: &ContentId) -> PathBuf {
        self.root.join(id.as_str())
    }
}

impl LayerStore for DirLayerStore {
    fn release(&self, id: &ContentId) -> Result<()> {
        let path = self.image_path(id);
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(())
    }
}

/// Layer store that only records what was released
#[derive(Default)]
pub struct MemoryLayerStore {
    released: Mutex<Vec<ContentId>>,
}

impl MemoryLayerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// IDs released so far, in order
    pub fn released(&self) -> Result<Vec<ContentId>> {
        let released = self
            .released
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire layer lock".to_string()))?;
        Ok(released.clone())
    }
}

impl LayerStore for MemoryLayerStore {
    fn release(&self, id: &ContentId) -> Result<()> {
        let mut released = self
            .released
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire layer lock".to_string()))?;
        released.push(id.clone());
        Ok(())
    }
}
