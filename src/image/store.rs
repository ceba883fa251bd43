//! Image store - the shared, lock-guarded entry point to the catalog
//!
//! Every mutation runs as a transaction: the write lock is held while a copy
//! of the catalog is changed, checked, flushed to the metadata store and
//! swapped in. A failed step leaves both memory and disk untouched.
//!
//! Other processes may change the same data directory, so the catalog is
//! reloaded under the metadata store's advisory lock before every read and
//! every transaction. The in-process lock is always taken before the file lock.

use super::catalog::Catalog;
use super::id::ContentId;
use super::layers::{DirLayerStore, LayerStore, MemoryLayerStore};
use super::record::{ImageRecord, ImageSpec};
use super::removal::{self, Action};
use crate::config::StoreConfig;
use crate::container::{ContainerRef, ContainerStatus, LifecycleEvent};
use crate::error::{Result, StoreError};
use crate::reference::Reference;
use crate::storage::{JsonMetadataStore, MemoryMetadataStore, MetadataStore};
use chrono::{DateTime, Utc};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Placeholder shown for untagged images
pub const NONE_LABEL: &str = "<none>";

/// One line of an image listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRow {
    /// Repository, or `<none>`
    pub repository: String,
    /// Tag, or `<none>`
    pub tag: String,
    /// Image ID
    pub id: ContentId,
    /// Created timestamp
    pub created: DateTime<Utc>,
}

/// Image store for managing local image names and references
pub struct ImageStore {
    catalog: RwLock<Catalog>,
    metadata: Box<dyn MetadataStore>,
    layers: Box<dyn LayerStore>,
}

impl ImageStore {
    /// Open the store described by `config`, loading any saved state
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let metadata = JsonMetadataStore::new(config.state_path())?;
        let layers = DirLayerStore::new(config.layers_dir())?;
        Self::with_backends(Box::new(metadata), Box::new(layers))
    }

    /// Store that keeps everything in memory
    pub fn in_memory() -> Self {
        Self {
            catalog: RwLock::new(Catalog::new()),
            metadata: Box::new(MemoryMetadataStore::new()),
            layers: Box::new(MemoryLayerStore::new()),
        }
    }

    /// Store over explicit persistence and layer backends
    pub fn with_backends(
        metadata: Box<dyn MetadataStore>,
        layers: Box<dyn LayerStore>,
    ) -> Result<Self> {
        let catalog = match metadata.load()? {
            Some(snapshot) => Catalog::from_snapshot(snapshot)?,
            None => Catalog::new(),
        };
        debug!(
            "Opened image store with {} images and {} tags",
            catalog.len(),
            catalog.tags.len()
        );

        Ok(Self {
            catalog: RwLock::new(catalog),
            metadata,
            layers,
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Catalog>> {
        self.catalog
            .write()
            .map_err(|_| StoreError::Lock("Failed to acquire write lock".to_string()))
    }

    /// Replace the in-memory catalog with the last saved snapshot
    fn reload(&self, catalog: &mut Catalog) -> Result<()> {
        if let Some(snapshot) = self.metadata.load()? {
            *catalog = Catalog::from_snapshot(snapshot)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Catalog>> {
        {
            let mut catalog = self.write()?;
            let _shared = self.metadata.lock_shared()?;
            self.reload(&mut catalog)?;
        }
        self.catalog
            .read()
            .map_err(|_| StoreError::Lock("Failed to acquire read lock".to_string()))
    }

    /// Apply `op` to a copy of the catalog and commit it if everything holds
    fn transact<T>(&self, op: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut catalog = self.write()?;
        let _exclusive = self.metadata.lock_exclusive()?;
        self.reload(&mut catalog)?;

        let mut next = catalog.clone();
        let out = op(&mut next)?;
        next.verify()?;
        self.metadata.save(&next.to_snapshot())?;
        *catalog = next;
        Ok(out)
    }

    /// Add an image, applying its tag if one is given
    pub fn create_image(&self, spec: ImageSpec) -> Result<ImageRecord> {
        let record = ImageRecord::new(&spec)?;
        self.transact(|catalog| {
            if !catalog.insert_image(record.clone())? {
                debug!("Image {} already present", record.id.short());
            }
            if let Some(tag) = spec.tag {
                catalog.tags.add(tag, record.id.clone());
            }
            Ok(())
        })?;
        info!("Created image {}", record.id.short());
        Ok(record)
    }

    /// Build an image on top of `base`
    pub fn build(&self, base: &str, tag: Reference, created_by: &str) -> Result<ImageRecord> {
        let parent = self.resolve(base)?;
        self.create_image(ImageSpec::child(parent, created_by).tag(tag))
    }

    /// Create an image from a container's image, optionally naming it
    pub fn commit(
        &self,
        container: &str,
        tag: Option<Reference>,
        comment: &str,
    ) -> Result<ImageRecord> {
        let source = self.container(container)?;
        let mut spec = ImageSpec::child(source.image, &format!("commit {}", source.name))
            .comment(comment);
        spec.tag = tag;
        self.create_image(spec)
    }

    /// Point `target` at the image `source` resolves to
    pub fn tag(&self, source: &str, target: &str) -> Result<()> {
        let target = Reference::parse(target)?;
        let (id, previous) = self.transact(|catalog| {
            let id = catalog.resolve(source)?.id().clone();
            let previous = catalog.tags.add(target.clone(), id.clone());
            Ok((id, previous))
        })?;

        match previous {
            Some(old) => info!("Moved {} from {} to {}", target, old.short(), id.short()),
            None => info!("Tagged {} as {}", id.short(), target),
        }
        Ok(())
    }

    /// Resolve a name or ID to an image ID
    pub fn resolve(&self, reference: &str) -> Result<ContentId> {
        Ok(self.read()?.resolve(reference)?.id().clone())
    }

    /// Get an image record by name or ID
    pub fn get(&self, reference: &str) -> Result<ImageRecord> {
        let catalog = self.read()?;
        let id = catalog.resolve(reference)?.id().clone();
        catalog
            .image(&id)
            .cloned()
            .ok_or_else(|| StoreError::Internal(format!("resolved missing image {}", id)))
    }

    /// Names currently pointing at the image `reference` resolves to
    pub fn tags_of(&self, reference: &str) -> Result<Vec<Reference>> {
        let catalog = self.read()?;
        let id = catalog.resolve(reference)?.id().clone();
        Ok(catalog.tags.tags_of(&id))
    }

    /// One row per tag, newest image first
    ///
    /// Untagged images appear as `<none>` rows: with `all`, every untagged
    /// image; otherwise only those no other image is built on.
    pub fn list(&self, all: bool) -> Result<Vec<ImageRow>> {
        let catalog = self.read()?;
        let mut rows = Vec::new();

        for (name, id) in catalog.tags.iter() {
            let record = catalog
                .image(id)
                .ok_or_else(|| StoreError::Internal(format!("tag {} has no image", name)))?;
            rows.push(ImageRow {
                repository: name.repository().to_string(),
                tag: name.tag().to_string(),
                id: id.clone(),
                created: record.created,
            });
        }

        for record in catalog.images() {
            if catalog.tags.is_tagged(&record.id) {
                continue;
            }
            if all || !catalog.usage.has_children(&record.id) {
                rows.push(ImageRow {
                    repository: NONE_LABEL.to_string(),
                    tag: NONE_LABEL.to_string(),
                    id: record.id.clone(),
                    created: record.created,
                });
            }
        }

        rows.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| a.repository.cmp(&b.repository))
                .then_with(|| a.tag.cmp(&b.tag))
        });
        Ok(rows)
    }

    /// The image and its ancestors, newest first
    pub fn history(&self, reference: &str) -> Result<Vec<ImageRecord>> {
        let catalog = self.read()?;
        let mut next = Some(catalog.resolve(reference)?.id().clone());
        let mut chain = Vec::new();

        while let Some(id) = next {
            if chain.len() > catalog.len() {
                return Err(StoreError::Internal(format!(
                    "parent chain of {} does not terminate",
                    reference
                )));
            }
            let record = catalog
                .image(&id)
                .cloned()
                .ok_or_else(|| StoreError::Internal(format!("missing ancestor {}", id)))?;
            next = record.parent.clone();
            chain.push(record);
        }

        Ok(chain)
    }

    /// Remove a name or image, returning each action taken
    ///
    /// When every name of an image was removed but the image itself could not
    /// be deleted, the untags stay committed and are returned inside
    /// [`StoreError::PartialRemoval`].
    pub fn remove(&self, reference: &str, force: bool) -> Result<Vec<Action>> {
        let removal = self.transact(|catalog| removal::remove(catalog, reference, force))?;
        self.release(removal.deleted());

        match removal.failure {
            None => Ok(removal.actions),
            Some(source) => Err(StoreError::PartialRemoval {
                actions: removal.actions,
                source: Box::new(source),
            }),
        }
    }

    /// Delete every untagged image with no children and no containers
    pub fn prune(&self) -> Result<Vec<Action>> {
        let actions = self.transact(removal::prune)?;
        self.release(actions.iter().filter_map(|a| match a {
            Action::Deleted(id) => Some(id),
            Action::Untagged(_) => None,
        }));
        Ok(actions)
    }

    /// Reclaim layer storage; metadata is already committed, so failures only warn
    fn release<'a>(&self, ids: impl Iterator<Item = &'a ContentId>) {
        for id in ids {
            if let Err(e) = self.layers.release(id) {
                warn!("Failed to release layers of {}: {}", id.short(), e);
            }
        }
    }

    /// Register a container against the image `image` resolves to
    pub fn create_container(
        &self,
        image: &str,
        name: &str,
        cmd: Vec<String>,
        status: ContainerStatus,
    ) -> Result<ContainerRef> {
        self.transact(|catalog| {
            let id = catalog.resolve(image)?.id().clone();
            let container = ContainerRef::new(name, id, image).cmd(cmd).status(status);
            catalog.usage.register(container.clone())?;
            Ok(container)
        })
        .inspect(|c| info!("Created container {} from {}", c.id, c.image.short()))
    }

    /// Register an already-built container record
    ///
    /// Fails if its image no longer exists, so no container can attach to an
    /// image deleted concurrently.
    pub fn register_container(&self, container: ContainerRef) -> Result<()> {
        self.transact(|catalog| {
            if !catalog.contains(&container.image) {
                return Err(StoreError::ImageNotFound(container.image.to_string()));
            }
            catalog.usage.register(container)
        })
    }

    /// Unregister a container; running ones need `force`
    pub fn remove_container(&self, reference: &str, force: bool) -> Result<ContainerRef> {
        self.transact(|catalog| {
            let container = catalog.usage.get(reference)?;
            if container.is_running() && !force {
                return Err(StoreError::ContainerRunning(container.name.clone()));
            }
            catalog.usage.unregister(reference)
        })
        .inspect(|c| info!("Removed container {}", c.id))
    }

    /// Record a container status change
    pub fn set_container_status(&self, reference: &str, status: ContainerStatus) -> Result<()> {
        self.transact(|catalog| catalog.usage.set_status(reference, status))
    }

    /// Look up a container by ID, ID prefix or name
    pub fn container(&self, reference: &str) -> Result<ContainerRef> {
        Ok(self.read()?.usage.get(reference)?.clone())
    }

    /// List containers in creation order
    pub fn containers(&self, all: bool) -> Result<Vec<ContainerRef>> {
        Ok(self.read()?.usage.list(all).into_iter().cloned().collect())
    }

    /// Apply a container lifecycle event
    pub fn apply(&self, event: LifecycleEvent) -> Result<()> {
        debug!("Applying lifecycle event {:?}", event);
        match event {
            LifecycleEvent::Created { container } => self.register_container(container),
            LifecycleEvent::Started { id } => {
                self.set_container_status(&id, ContainerStatus::Running)
            }
            LifecycleEvent::Stopped { id } => self.set_container_status(&id, ContainerStatus::Exited),
            LifecycleEvent::Destroyed { id } => self.remove_container(&id, true).map(|_| ()),
        }
    }

    /// Number of images
    pub fn image_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn seeded() -> (ImageStore, ContentId) {
        let store = ImageStore::in_memory();
        let record = store
            .create_image(ImageSpec::root("import busybox").tag(Reference::parse("busybox").unwrap()))
            .unwrap();
        (store, record.id)
    }

    /// Every tag resolves to the image that lists it, and nothing else does
    fn assert_consistent(store: &ImageStore) {
        let catalog = store.read().unwrap();
        catalog.verify().unwrap();
        for (name, id) in catalog.tags.iter() {
            assert!(catalog.tags.tags_of(id).contains(name));
        }
    }

    #[test]
    fn test_rmi_with_container_fails() {
        let (store, id) = seeded();
        store
            .create_container("busybox", "", vec!["true".to_string()], ContainerStatus::Running)
            .unwrap();

        let err = store.remove("busybox", false).unwrap_err();
        assert!(err.to_string().contains("is using it"));
        assert_eq!(store.tags_of("busybox").unwrap().len(), 1);
        assert_eq!(store.resolve("busybox").unwrap(), id);
        assert_consistent(&store);
    }

    #[test]
    fn test_rmi_tag() {
        let (store, _) = seeded();
        let before = store.list(true).unwrap().len();

        store.tag("busybox", "utest:tag1").unwrap();
        store.tag("busybox", "utest/docker:tag2").unwrap();
        store.tag("busybox", "utest:5000/docker:tag3").unwrap();
        assert_eq!(store.list(true).unwrap().len(), before + 3);

        store.remove("utest/docker:tag2", false).unwrap();
        assert_eq!(store.list(true).unwrap().len(), before + 2);
        store.remove("utest:5000/docker:tag3", false).unwrap();
        assert_eq!(store.list(true).unwrap().len(), before + 1);
        store.remove("utest:tag1", false).unwrap();
        assert_eq!(store.list(true).unwrap().len(), before);
        assert_consistent(&store);
    }

    #[test]
    fn test_rmi_tag_with_existing_containers() {
        let (store, _) = seeded();
        store.tag("busybox:latest", "busybox:newtag").unwrap();
        store
            .create_container("busybox:latest", "test-delete-tag", vec![], ContainerStatus::Exited)
            .unwrap();

        let actions = store.remove("busybox:newtag", false).unwrap();
        assert_eq!(
            actions,
            vec![Action::Untagged(Reference::parse("busybox:newtag").unwrap())]
        );
    }

    #[test]
    fn test_rmi_force_with_existing_containers() {
        let (store, _) = seeded();
        let clone = store
            .build("busybox", Reference::parse("busybox-clone").unwrap(), "MAINTAINER foo")
            .unwrap();
        store
            .create_container("busybox-clone", "test-force-rmi", vec![], ContainerStatus::Exited)
            .unwrap();

        let actions = store.remove("busybox-clone", true).unwrap();
        assert_eq!(actions.last(), Some(&Action::Deleted(clone.id.clone())));

        // The deleted image cannot gain new containers
        let late = ContainerRef::new("late", clone.id, "busybox-clone");
        assert!(matches!(
            store.register_container(late),
            Err(StoreError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_rmi_with_multiple_repositories() {
        let (store, base) = seeded();
        store.tag("busybox", "127.0.0.1:5000/busybox").unwrap();
        store
            .create_container("busybox", "test", vec![], ContainerStatus::Exited)
            .unwrap();
        let committed = store
            .commit("test", Some(Reference::parse("busybox:test").unwrap()), "")
            .unwrap();
        assert_eq!(committed.parent, Some(base.clone()));

        let actions = store.remove("busybox:test", false).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Untagged(Reference::parse("busybox:test").unwrap()),
                Action::Deleted(committed.id),
            ]
        );
        assert_eq!(store.resolve("127.0.0.1:5000/busybox").unwrap(), base);
    }

    #[test]
    fn test_partial_removal_by_id() {
        let (store, id) = seeded();
        store.tag("busybox", "other:x").unwrap();
        store
            .create_container("busybox", "user", vec![], ContainerStatus::Running)
            .unwrap();

        let err = store.remove(id.as_str(), false).unwrap_err();
        assert_eq!(err.completed_actions().len(), 2);
        assert!(err.to_string().contains("is using it"));
        assert!(store.tags_of(id.short()).unwrap().is_empty());
        assert_eq!(store.image_count().unwrap(), 1);
    }

    #[test]
    fn test_list_hides_untagged_parents_without_all() {
        let (store, base) = seeded();
        store
            .build("busybox", Reference::parse("app").unwrap(), "RUN make")
            .unwrap();
        store.remove("busybox", false).unwrap_err();

        // Untagging the base through its ID leaves it as an intermediate layer
        let err = store.remove(base.as_str(), false).unwrap_err();
        assert!(matches!(
            err,
            StoreError::PartialRemoval { ref source, .. } if matches!(**source, StoreError::HasChildren { .. })
        ));

        assert_eq!(store.list(false).unwrap().len(), 1);
        let all = store.list(true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|row| row.repository == NONE_LABEL && row.id == base));
        assert_eq!(store.history("app").unwrap().len(), 2);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::with_data_dir(temp.path().to_path_buf());

        let id = {
            let store = ImageStore::open(&config).unwrap();
            let record = store
                .create_image(ImageSpec::root("import busybox").tag(Reference::parse("busybox").unwrap()))
                .unwrap();
            store.tag("busybox", "utest:tag1").unwrap();
            store
                .create_container("utest:tag1", "web", vec![], ContainerStatus::Running)
                .unwrap();
            record.id
        };

        let store = ImageStore::open(&config).unwrap();
        assert_eq!(store.resolve("utest:tag1").unwrap(), id);
        assert_eq!(store.containers(false).unwrap().len(), 1);
        assert!(store.remove("busybox", false).is_ok());
        assert!(store.remove("utest:tag1", false).is_err());
    }

    #[test]
    fn test_stores_sharing_a_directory_see_each_other() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::with_data_dir(temp.path().to_path_buf());
        let remover = ImageStore::open(&config).unwrap();
        let runner = ImageStore::open(&config).unwrap();

        let record = remover
            .create_image(ImageSpec::root("import race").tag(Reference::parse("race").unwrap()))
            .unwrap();
        assert_eq!(runner.resolve("race").unwrap(), record.id);

        let actions = remover.remove("race", false).unwrap();
        assert!(actions.contains(&Action::Deleted(record.id.clone())));

        // The second store must not attach a container to its stale view
        assert!(matches!(
            runner.create_container("race", "late", vec![], ContainerStatus::Running),
            Err(StoreError::ImageNotFound(_))
        ));
        let late = ContainerRef::new("late", record.id.clone(), "race");
        assert!(matches!(
            runner.register_container(late),
            Err(StoreError::ImageNotFound(_))
        ));

        let reopened = ImageStore::open(&config).unwrap();
        assert!(matches!(
            reopened.resolve("race"),
            Err(StoreError::ImageNotFound(_))
        ));
        assert!(reopened.containers(true).unwrap().is_empty());
        assert_eq!(reopened.image_count().unwrap(), 0);
    }

    #[test]
    fn test_removal_sees_container_from_other_store() {
        let temp = tempdir().unwrap();
        let config = StoreConfig::with_data_dir(temp.path().to_path_buf());
        let remover = ImageStore::open(&config).unwrap();
        let runner = ImageStore::open(&config).unwrap();

        remover
            .create_image(ImageSpec::root("import busybox").tag(Reference::parse("busybox").unwrap()))
            .unwrap();
        runner
            .create_container("busybox", "web", vec![], ContainerStatus::Running)
            .unwrap();

        let err = remover.remove("busybox", false).unwrap_err();
        assert!(matches!(err, StoreError::ImageInUse { .. }));
        assert_eq!(runner.tags_of("busybox").unwrap().len(), 1);
    }

    #[test]
    fn test_lifecycle_events() {
        let (store, id) = seeded();
        let container = ContainerRef::new("evented", id, "busybox");
        let cid = container.id.clone();

        store.apply(LifecycleEvent::Created { container }).unwrap();
        store.apply(LifecycleEvent::Started { id: cid.clone() }).unwrap();
        assert!(store.container("evented").unwrap().is_running());
        assert!(store.remove("busybox", false).is_err());

        store.apply(LifecycleEvent::Stopped { id: cid.clone() }).unwrap();
        store.apply(LifecycleEvent::Destroyed { id: cid }).unwrap();
        assert!(store.remove("busybox", false).is_ok());
    }

    #[test]
    fn test_running_container_needs_force() {
        let (store, _) = seeded();
        store
            .create_container("busybox", "web", vec![], ContainerStatus::Running)
            .unwrap();
        assert!(matches!(
            store.remove_container("web", false),
            Err(StoreError::ContainerRunning(_))
        ));
        store.remove_container("web", true).unwrap();
        assert!(store.containers(true).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_create_never_attaches_to_deleted_image() {
        for round in 0..20 {
            let store = Arc::new(ImageStore::in_memory());
            let record = store
                .create_image(
                    ImageSpec::root(&format!("import race {}", round))
                        .tag(Reference::parse("race").unwrap()),
                )
                .unwrap();

            let creator = {
                let store = store.clone();
                thread::spawn(move || {
                    store.create_container("race", "racer", vec![], ContainerStatus::Running)
                })
            };
            let remover = {
                let store = store.clone();
                thread::spawn(move || store.remove("race", false))
            };

            let created = creator.join().unwrap();
            let removed = remover.join().unwrap();

            match (created, removed) {
                // Container first: removal was refused
                (Ok(_), Err(e)) => {
                    assert!(matches!(e, StoreError::ImageInUse { .. }));
                    assert_eq!(store.resolve("race").unwrap(), record.id);
                }
                // Removal first: the container could not resolve the name
                (Err(e), Ok(actions)) => {
                    assert!(matches!(e, StoreError::ImageNotFound(_)));
                    assert!(actions.contains(&Action::Deleted(record.id.clone())));
                    assert!(store.containers(true).unwrap().is_empty());
                }
                other => panic!("unexpected race outcome: {:?}", other),
            }
        }
    }
}
