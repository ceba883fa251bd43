//! Container lifecycle events consumed by the image store

use super::config::ContainerRef;
use crate::image::ImageStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Event emitted by the container runtime
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A container was created from an image
    Created { container: ContainerRef },
    /// A container started running
    Started { id: String },
    /// A container stopped
    Stopped { id: String },
    /// A container was removed
    Destroyed { id: String },
}

impl LifecycleEvent {
    /// Container the event is about
    pub fn container_id(&self) -> &str {
        match self {
            LifecycleEvent::Created { container } => &container.id,
            LifecycleEvent::Started { id }
            | LifecycleEvent::Stopped { id }
            | LifecycleEvent::Destroyed { id } => id,
        }
    }
}

/// Apply events from `events` to `store` until the sender side closes
///
/// Returns the number of events applied. Events that fail to apply (for
/// example a container created from an image deleted in the meantime) are
/// logged and skipped.
pub fn listen(
    store: Arc<ImageStore>,
    mut events: mpsc::Receiver<LifecycleEvent>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut applied = 0;
        while let Some(event) = events.recv().await {
            let container = event.container_id().to_string();
            match store.apply(event) {
                Ok(()) => applied += 1,
                Err(e) => tracing::warn!("Dropped lifecycle event for {}: {}", container, e),
            }
        }
        tracing::debug!("Lifecycle listener stopped after {} events", applied);
        applied
    })
}
