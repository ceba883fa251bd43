//! Removal engine - untag names and delete images that lose their last name
//!
//! A request names either one tag or an image ID. Removing a tag that is not
//! the image's last name only untags it. Removing the last name, or an ID,
//! deletes the image unless a child image depends on it or a container uses it
//! (the latter only without force). Deleting an image re-examines its parent,
//! and so on up the chain.

use super::catalog::{Catalog, Target};
use super::id::ContentId;
use crate::error::{Result, StoreError};
use crate::reference::Reference;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// One step taken by a removal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A name was removed
    Untagged(Reference),
    /// An image was deleted
    Deleted(ContentId),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Untagged(name) => write!(f, "Untagged: {}", name),
            Action::Deleted(id) => write!(f, "Deleted: {}", id),
        }
    }
}

/// Outcome of a removal that mutated the catalog
///
/// `failure` is set when the names of an image were removed but the image
/// itself could not be deleted; the actions still have to be committed.
#[derive(Debug, Default)]
pub struct Removal {
    pub actions: Vec<Action>,
    pub failure: Option<StoreError>,
}

impl Removal {
    /// IDs deleted by this removal, in order
    pub fn deleted(&self) -> impl Iterator<Item = &ContentId> {
        self.actions.iter().filter_map(|a| match a {
            Action::Deleted(id) => Some(id),
            Action::Untagged(_) => None,
        })
    }
}

/// Remove `input` from the catalog
///
/// An `Err` means the catalog was not touched.
pub fn remove(catalog: &mut Catalog, input: &str, force: bool) -> Result<Removal> {
    let mut removal = Removal::default();

    match catalog.resolve(input)? {
        Target::Tag(name, id) => {
            if catalog.tags.tags_of(&id).len() > 1 {
                catalog.tags.remove(&name)?;
                info!("Untagged {} from {}", name, id.short());
                removal.actions.push(Action::Untagged(name));
                return Ok(removal);
            }

            check_deletable(catalog, &id, input, force)?;
            catalog.tags.remove(&name)?;
            info!("Untagged {} from {}", name, id.short());
            removal.actions.push(Action::Untagged(name));
            delete_chain(catalog, id, &mut removal.actions)?;
        }
        Target::Id(id) => {
            for name in catalog.tags.tags_of(&id) {
                catalog.tags.remove(&name)?;
                info!("Untagged {} from {}", name, id.short());
                removal.actions.push(Action::Untagged(name));
            }

            if let Err(e) = check_deletable(catalog, &id, input, force) {
                if removal.actions.is_empty() {
                    return Err(e);
                }
                removal.failure = Some(e);
                return Ok(removal);
            }
            delete_chain(catalog, id, &mut removal.actions)?;
        }
    }

    Ok(removal)
}

/// Delete every dangling image until none is left
pub fn prune(catalog: &mut Catalog) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    loop {
        let mut dangling: Vec<ContentId> = catalog
            .images()
            .filter(|record| catalog.is_dangling(&record.id))
            .map(|record| record.id.clone())
            .collect();
        if dangling.is_empty() {
            return Ok(actions);
        }
        dangling.sort();

        for id in dangling {
            catalog.delete_image(&id)?;
            info!("Pruned image {}", id.short());
            actions.push(Action::Deleted(id));
        }
    }
}

fn check_deletable(catalog: &Catalog, id: &ContentId, reference: &str, force: bool) -> Result<()> {
    if !force {
        if let Some(container) = catalog.usage.blocking_containers(id).first() {
            return Err(StoreError::ImageInUse {
                reference: reference.to_string(),
                image: id.short().to_string(),
                container: container.id.clone(),
            });
        }
    }

    if catalog.usage.has_children(id) {
        return Err(StoreError::HasChildren {
            reference: reference.to_string(),
            image: id.short().to_string(),
        });
    }

    Ok(())
}

/// Delete `id`, then each ancestor left untagged, childless and unused
fn delete_chain(catalog: &mut Catalog, id: ContentId, actions: &mut Vec<Action>) -> Result<()> {
    let users = catalog.usage.blocking_containers(&id).len();
    if users > 0 {
        warn!(
            "Deleting image {} still used by {} container(s)",
            id.short(),
            users
        );
    }

    let mut next = catalog.delete_image(&id)?.parent;
    info!("Deleted image {}", id.short());
    actions.push(Action::Deleted(id));

    while let Some(parent) = next {
        if !catalog.is_dangling(&parent) {
            break;
        }
        next = catalog.delete_image(&parent)?.parent;
        info!("Deleted parent image {}", parent.short());
        actions.push(Action::Deleted(parent));
    }

    Ok(())
}
