//! Error types for refstore

use crate::image::removal::Action;
use thiserror::Error;

/// Result type for refstore operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// refstore error types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No such image: {0}")]
    ImageNotFound(String),

    #[error("Ambiguous image reference {reference}: matches {matches} images")]
    AmbiguousReference { reference: String, matches: usize },

    #[error("Invalid reference format: {0}")]
    InvalidReference(String),

    #[error("conflict: unable to delete {image} ({reference}) - container {container} is using it, use -f to force")]
    ImageInUse {
        reference: String,
        image: String,
        container: String,
    },

    #[error("conflict: unable to delete {image} (cannot be forced) - image {reference} has dependent child images")]
    HasChildren { reference: String, image: String },

    #[error("{source}")]
    PartialRemoval {
        /// Actions that were committed before the failure
        actions: Vec<Action>,
        source: Box<StoreError>,
    },

    #[error("No such container: {0}")]
    ContainerNotFound(String),

    #[error("Container already exists: {0}")]
    ContainerExists(String),

    #[error("You cannot remove a running container {0}. Stop the container before attempting removal or use -f")]
    ContainerRunning(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Corrupt metadata: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Actions committed before this error, if it is a partial removal
    pub fn completed_actions(&self) -> &[Action] {
        match self {
            StoreError::PartialRemoval { actions, .. } => actions,
            _ => &[],
        }
    }
}
