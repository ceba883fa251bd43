//! Metadata persistence for the image catalog
//!
//! The catalog is flushed as one JSON snapshot after every mutating operation.
//! Writes go to a temporary file that is renamed over the previous snapshot,
//! so a crash leaves either the old or the new state on disk.
//!
//! Several processes may share one data directory. Readers hold a shared
//! advisory lock on a sidecar lock file while loading; a transaction holds the
//! exclusive lock from its reload until its save.

use crate::container::ContainerRef;
use crate::error::{Result, StoreError};
use crate::image::id::ContentId;
use crate::image::record::ImageRecord;
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version
    pub version: u32,
    /// Image records, oldest first
    pub images: Vec<ImageRecord>,
    /// Repository -> tag -> image ID
    pub repositories: BTreeMap<String, BTreeMap<String, ContentId>>,
    /// Containers in creation order
    #[serde(default)]
    pub containers: Vec<ContainerRef>,
}

/// Advisory lock on a metadata store, released on drop
#[derive(Debug, Default)]
pub struct MetadataLock {
    _file: Option<File>,
}

impl MetadataLock {
    /// Lock for stores no other process can see
    pub fn unshared() -> Self {
        Self::default()
    }
}

/// Durable home of the catalog
pub trait MetadataStore: Send + Sync {
    /// Load the last saved snapshot, if any
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the saved snapshot
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Block until no other process is writing
    fn lock_shared(&self) -> Result<MetadataLock> {
        Ok(MetadataLock::unshared())
    }

    /// Block until this process is the only reader or writer
    fn lock_exclusive(&self) -> Result<MetadataLock> {
        Ok(MetadataLock::unshared())
    }
}

/// Snapshot stored as a JSON file
pub struct JsonMetadataStore {
    path: PathBuf,
}

impl JsonMetadataStore {
    /// Create a store writing to `path`, creating its directory
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Snapshot file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    /// Lock file guarding the snapshot
    pub fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn open_lock_file(&self) -> Result<File> {
        let path = self.lock_path();
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::Lock(format!("failed to open {}: {}", path.display(), e)))
    }
}

impl MetadataStore for JsonMetadataStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            tracing::debug!("No snapshot at {}, starting empty", self.path.display());
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents).map_err(|e| {
            StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
        })?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "{}: unsupported snapshot version {}",
                self.path.display(),
                snapshot.version
            )));
        }

        tracing::debug!(
            "Loaded snapshot with {} images from {}",
            snapshot.images.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    fn lock_shared(&self) -> Result<MetadataLock> {
        let file = self.open_lock_file()?;
        FileExt::lock_shared(&file).map_err(|e| {
            StoreError::Lock(format!("failed to lock {}: {}", self.lock_path().display(), e))
        })?;
        Ok(MetadataLock { _file: Some(file) })
    }

    fn lock_exclusive(&self) -> Result<MetadataLock> {
        let file = self.open_lock_file()?;
        FileExt::lock_exclusive(&file).map_err(|e| {
            StoreError::Lock(format!("failed to lock {}: {}", self.lock_path().display(), e))
        })?;
        Ok(MetadataLock { _file: Some(file) })
    }
}

/// Snapshot kept in memory, for ephemeral stores
#[derive(Default)]
pub struct MemoryMetadataStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemoryMetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn load(&self) -> Result<Option<Snapshot>> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire snapshot lock".to_string()))?;
        Ok(snapshot.clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut saved = self
            .snapshot
            .lock()
            .map_err(|_| StoreError::Lock("Failed to acquire snapshot lock".to_string()))?;
        *saved = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::record::ImageSpec;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let image = ImageRecord::new(&ImageSpec::root("import busybox")).unwrap();
        let mut tags = BTreeMap::new();
        tags.insert("latest".to_string(), image.id.clone());
        let mut repositories = BTreeMap::new();
        repositories.insert("busybox".to_string(), tags);

        Snapshot {
            version: SNAPSHOT_VERSION,
            images: vec![image],
            repositories,
            containers: Vec::new(),
        }
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let temp = tempdir().unwrap();
        let store = JsonMetadataStore::new(temp.path().join("state").join("refstore.json")).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(temp.path().join("state").exists());
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let store = JsonMetadataStore::new(temp.path().join("refstore.json")).unwrap();
        let snapshot = sample();

        store.save(&snapshot).unwrap();
        assert!(!temp.path().join("refstore.json.tmp").exists());
        assert_eq!(store.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("refstore.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonMetadataStore::new(path).unwrap();
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_exclusive_lock_excludes_other_handles() {
        let temp = tempdir().unwrap();
        let store = JsonMetadataStore::new(temp.path().join("refstore.json")).unwrap();

        let held = store.lock_exclusive().unwrap();
        assert!(store.lock_path().exists());

        let other = File::open(store.lock_path()).unwrap();
        assert!(FileExt::try_lock_shared(&other).is_err());

        drop(held);
        FileExt::try_lock_shared(&other).unwrap();
        let _shared = store.lock_shared().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryMetadataStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&sample()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().images.len(), 1);
    }
}
