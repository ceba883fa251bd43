//! Tag index - bidirectional mapping between names and image ids

use super::id::ContentId;
use crate::error::{Result, StoreError};
use crate::reference::Reference;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Forward (name to id) and reverse (id to names) maps kept as exact inverses
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    forward: BTreeMap<Reference, ContentId>,
    reverse: HashMap<ContentId, BTreeSet<Reference>>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id a name points to
    pub fn resolve(&self, name: &Reference) -> Option<&ContentId> {
        self.forward.get(name)
    }

    /// Point `name` at `id`, replacing any previous mapping
    ///
    /// Returns the id the name pointed to before, if it changed.
    pub fn add(&mut self, name: Reference, id: ContentId) -> Option<ContentId> {
        let previous = self.forward.insert(name.clone(), id.clone());
        if let Some(old) = &previous {
            if *old != id {
                self.unlink(old, &name);
            }
        }
        self.reverse.entry(id.clone()).or_default().insert(name);
        previous.filter(|old| *old != id)
    }

    /// Remove a name, returning the id it pointed to
    pub fn remove(&mut self, name: &Reference) -> Result<ContentId> {
        let id = self
            .forward
            .remove(name)
            .ok_or_else(|| StoreError::ImageNotFound(name.to_string()))?;
        self.unlink(&id, name);
        Ok(id)
    }

    fn unlink(&mut self, id: &ContentId, name: &Reference) {
        if let Some(names) = self.reverse.get_mut(id) {
            names.remove(name);
            if names.is_empty() {
                self.reverse.remove(id);
            }
        }
    }

    /// All names pointing at `id`, sorted
    pub fn tags_of(&self, id: &ContentId) -> Vec<Reference> {
        self.reverse
            .get(id)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any name points at `id`
    pub fn is_tagged(&self, id: &ContentId) -> bool {
        self.reverse.contains_key(id)
    }

    /// Iterate over all (name, id) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&Reference, &ContentId)> {
        self.forward.iter()
    }

    /// Number of live names
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the index holds no names
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Check that the reverse map is exactly the inverse of the forward map
    pub fn verify(&self) -> Result<()> {
        for (name, id) in &self.forward {
            let linked = self
                .reverse
                .get(id)
                .map(|names| names.contains(name))
                .unwrap_or(false);
            if !linked {
                return Err(StoreError::Internal(format!(
                    "tag {} -> {} missing from reverse index",
                    name, id
                )));
            }
        }

        for (id, names) in &self.reverse {
            if names.is_empty() {
                return Err(StoreError::Internal(format!(
                    "empty reverse entry for {}",
                    id
                )));
            }
            for name in names {
                if self.forward.get(name) != Some(id) {
                    return Err(StoreError::Internal(format!(
                        "reverse entry {} -> {} has no forward mapping",
                        id, name
                    )));
                }
            }
        }

        Ok(())
    }
}
