//! Usage tracker - which images are pinned by containers or child images

use super::config::{ContainerRef, ContainerStatus};
use crate::error::{Result, StoreError};
use crate::image::id::ContentId;
use std::collections::{BTreeSet, HashMap};

/// Container and child-image references to images
///
/// Containers are kept in creation order. Children are the reverse of the
/// parent pointers in the image arena, maintained incrementally.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    containers: Vec<ContainerRef>,
    children: HashMap<ContentId, BTreeSet<ContentId>>,
}

impl UsageTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Live containers instantiated from `id`, in creation order
    pub fn blocking_containers(&self, id: &ContentId) -> Vec<&ContainerRef> {
        self.containers.iter().filter(|c| c.image == *id).collect()
    }

    /// Whether any container references `id`
    pub fn is_used(&self, id: &ContentId) -> bool {
        self.containers.iter().any(|c| c.image == *id)
    }

    /// Images whose recorded parent is `id`
    pub fn child_images(&self, id: &ContentId) -> BTreeSet<ContentId> {
        self.children.get(id).cloned().unwrap_or_default()
    }

    /// Whether `id` has any child image
    pub fn has_children(&self, id: &ContentId) -> bool {
        self.children.contains_key(id)
    }

    /// Record that `child` was built from `parent`
    pub fn link_child(&mut self, parent: &ContentId, child: &ContentId) {
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
    }

    /// Forget the `parent` -> `child` edge
    pub fn unlink_child(&mut self, parent: &ContentId, child: &ContentId) {
        if let Some(set) = self.children.get_mut(parent) {
            set.remove(child);
            if set.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    /// All child edges as (parent, child) pairs
    pub fn child_edges(&self) -> impl Iterator<Item = (&ContentId, &ContentId)> {
        self.children
            .iter()
            .flat_map(|(parent, kids)| kids.iter().map(move |kid| (parent, kid)))
    }

    /// Register a new container
    pub fn register(&mut self, container: ContainerRef) -> Result<()> {
        if self
            .containers
            .iter()
            .any(|c| c.id == container.id || c.name == container.name)
        {
            return Err(StoreError::ContainerExists(container.name));
        }
        self.containers.push(container);
        Ok(())
    }

    /// Unregister a container by ID, ID prefix or name
    pub fn unregister(&mut self, reference: &str) -> Result<ContainerRef> {
        let index = self.position(reference)?;
        Ok(self.containers.remove(index))
    }

    /// Look up a container by ID, ID prefix or name
    pub fn get(&self, reference: &str) -> Result<&ContainerRef> {
        let index = self.position(reference)?;
        Ok(&self.containers[index])
    }

    /// Change a container's status
    pub fn set_status(&mut self, reference: &str, status: ContainerStatus) -> Result<()> {
        let index = self.position(reference)?;
        self.containers[index].status = status;
        Ok(())
    }

    /// List containers in creation order; `all` includes stopped ones
    pub fn list(&self, all: bool) -> Vec<&ContainerRef> {
        self.containers
            .iter()
            .filter(|c| all || c.is_running())
            .collect()
    }

    /// Number of tracked containers
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether no containers are tracked
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    fn position(&self, reference: &str) -> Result<usize> {
        if let Some(i) = self
            .containers
            .iter()
            .position(|c| c.id == reference || c.name == reference)
        {
            return Ok(i);
        }

        let matches: Vec<usize> = self
            .containers
            .iter()
            .enumerate()
            .filter(|(_, c)| !reference.is_empty() && c.id.starts_with(reference))
            .map(|(i, _)| i)
            .collect();

        match matches.as_slice() {
            [i] => Ok(*i),
            [] => Err(StoreError::ContainerNotFound(reference.to_string())),
            _ => Err(StoreError::ContainerNotFound(format!(
                "{} (ambiguous prefix)",
                reference
            ))),
        }
    }
}
