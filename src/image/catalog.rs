//! Image catalog - the arena of image records plus the indexes over it
//!
//! Images, tags, children and containers live together so a single lock
//! covers every cross-index check.

use super::id::{looks_like_id, ContentId};
use super::record::ImageRecord;
use super::tags::TagIndex;
use crate::container::UsageTracker;
use crate::error::{Result, StoreError};
use crate::reference::Reference;
use crate::storage::{Snapshot, SNAPSHOT_VERSION};
use std::collections::{BTreeMap, HashMap};

/// What a user-supplied name or ID resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A live tag and the image it points to
    Tag(Reference, ContentId),
    /// An image addressed by (a prefix of) its ID
    Id(ContentId),
}

impl Target {
    /// Image the target refers to
    pub fn id(&self) -> &ContentId {
        match self {
            Target::Tag(_, id) | Target::Id(id) => id,
        }
    }
}

/// All image metadata under one consistency domain
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    images: HashMap<ContentId, ImageRecord>,
    /// Tag index
    pub tags: TagIndex,
    /// Container and child references
    pub usage: UsageTracker,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image; its parent must already exist
    ///
    /// Returns `false` if an image with the same ID was already present.
    pub fn insert_image(&mut self, record: ImageRecord) -> Result<bool> {
        if self.images.contains_key(&record.id) {
            return Ok(false);
        }
        if let Some(parent) = &record.parent {
            if !self.images.contains_key(parent) {
                return Err(StoreError::ImageNotFound(parent.to_string()));
            }
            self.usage.link_child(parent, &record.id);
        }
        self.images.insert(record.id.clone(), record);
        Ok(true)
    }

    /// Remove an image record, unlinking it from its parent
    ///
    /// The caller has already established that nothing names or builds on it.
    pub fn delete_image(&mut self, id: &ContentId) -> Result<ImageRecord> {
        if self.tags.is_tagged(id) {
            return Err(StoreError::Internal(format!(
                "refusing to delete tagged image {}",
                id
            )));
        }
        if self.usage.has_children(id) {
            return Err(StoreError::Internal(format!(
                "refusing to delete image {} with children",
                id
            )));
        }

        let record = self
            .images
            .remove(id)
            .ok_or_else(|| StoreError::Internal(format!("deleting unknown image {}", id)))?;
        if let Some(parent) = &record.parent {
            self.usage.unlink_child(parent, id);
        }
        Ok(record)
    }

    /// Image record by exact ID
    pub fn image(&self, id: &ContentId) -> Option<&ImageRecord> {
        self.images.get(id)
    }

    /// Whether an image exists
    pub fn contains(&self, id: &ContentId) -> bool {
        self.images.contains_key(id)
    }

    /// All image records
    pub fn images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.images.values()
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the catalog holds no images
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Whether an image is untagged, childless and unused
    pub fn is_dangling(&self, id: &ContentId) -> bool {
        !self.tags.is_tagged(id) && !self.usage.has_children(id) && !self.usage.is_used(id)
    }

    /// Resolve a tag name first, then an image ID or unique ID prefix
    pub fn resolve(&self, input: &str) -> Result<Target> {
        let parsed = Reference::parse(input);
        if let Ok(name) = &parsed {
            if let Some(id) = self.tags.resolve(name) {
                tracing::debug!("Resolved {} to tag {} -> {}", input, name, id.short());
                return Ok(Target::Tag(name.clone(), id.clone()));
            }
        }

        if looks_like_id(input) {
            let matches: Vec<&ContentId> = self
                .images
                .keys()
                .filter(|id| id.matches_prefix(input))
                .collect();
            match matches.as_slice() {
                [id] => {
                    tracing::debug!("Resolved {} to image {}", input, id.short());
                    return Ok(Target::Id((*id).clone()));
                }
                [] => {}
                many => {
                    return Err(StoreError::AmbiguousReference {
                        reference: input.to_string(),
                        matches: many.len(),
                    })
                }
            }
        }

        match parsed {
            Err(e) if !looks_like_id(input) => Err(e),
            _ => Err(StoreError::ImageNotFound(input.to_string())),
        }
    }

    /// Check every cross-index invariant
    pub fn verify(&self) -> Result<()> {
        self.tags.verify()?;

        for (name, id) in self.tags.iter() {
            if !self.images.contains_key(id) {
                return Err(StoreError::Internal(format!(
                    "tag {} points at missing image {}",
                    name, id
                )));
            }
        }

        let mut edges = 0;
        for record in self.images.values() {
            if let Some(parent) = &record.parent {
                edges += 1;
                if !self.images.contains_key(parent) {
                    return Err(StoreError::Internal(format!(
                        "image {} has missing parent {}",
                        record.id, parent
                    )));
                }
                if !self.usage.child_images(parent).contains(&record.id) {
                    return Err(StoreError::Internal(format!(
                        "image {} missing from children of {}",
                        record.id, parent
                    )));
                }
            }
        }
        if self.usage.child_edges().count() != edges {
            return Err(StoreError::Internal(
                "children index has edges without parent pointers".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize into a snapshot
    pub fn to_snapshot(&self) -> Snapshot {
        let mut images: Vec<ImageRecord> = self.images.values().cloned().collect();
        images.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        let mut repositories: BTreeMap<String, BTreeMap<String, ContentId>> = BTreeMap::new();
        for (name, id) in self.tags.iter() {
            repositories
                .entry(name.repository().to_string())
                .or_default()
                .insert(name.tag().to_string(), id.clone());
        }

        Snapshot {
            version: SNAPSHOT_VERSION,
            images,
            repositories,
            containers: self.usage.list(true).into_iter().cloned().collect(),
        }
    }

    /// Rebuild from a snapshot, rejecting one that breaks the invariants
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut catalog = Catalog::new();

        for record in snapshot.images {
            if catalog.images.insert(record.id.clone(), record).is_some() {
                return Err(StoreError::Corrupt("duplicate image record".to_string()));
            }
        }

        let edges: Vec<(ContentId, ContentId)> = catalog
            .images
            .values()
            .filter_map(|r| r.parent.clone().map(|p| (p, r.id.clone())))
            .collect();
        for (parent, child) in &edges {
            if !catalog.images.contains_key(parent) {
                return Err(StoreError::Corrupt(format!(
                    "image {} has missing parent {}",
                    child, parent
                )));
            }
            catalog.usage.link_child(parent, child);
        }
        catalog.check_acyclic()?;

        for (repository, tags) in snapshot.repositories {
            for (tag, id) in tags {
                let name = Reference::from_parts(&repository, &tag)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                if !catalog.images.contains_key(&id) {
                    return Err(StoreError::Corrupt(format!(
                        "tag {} points at missing image {}",
                        name, id
                    )));
                }
                catalog.tags.add(name, id);
            }
        }

        // Containers may outlive a forcibly deleted image
        for container in snapshot.containers {
            catalog
                .usage
                .register(container)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        }

        catalog
            .verify()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(catalog)
    }

    fn check_acyclic(&self) -> Result<()> {
        for record in self.images.values() {
            let mut steps = 0;
            let mut next = record.parent.as_ref();
            while let Some(parent) = next {
                steps += 1;
                if steps > self.images.len() {
                    return Err(StoreError::Corrupt(format!(
                        "parent chain of {} contains a cycle",
                        record.id
                    )));
                }
                next = self.images.get(parent).and_then(|r| r.parent.as_ref());
            }
        }
        Ok(())
    }
}
