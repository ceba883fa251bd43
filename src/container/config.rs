//! Container records as seen by the image store

use crate::image::id::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Container status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Container is created but not running
    Created,
    /// Container is running
    Running,
    /// Container has exited
    Exited,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Exited => write!(f, "exited"),
        }
    }
}

/// A running or stopped container pinned to one image for its whole lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    /// Unique container ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image the container was instantiated from
    pub image: ContentId,
    /// Name the image was requested by, for display
    pub image_name: String,
    /// Command to run
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Current status
    pub status: ContainerStatus,
    /// Creation time
    pub created: DateTime<Utc>,
}

impl ContainerRef {
    /// Create a container record with a fresh ID
    pub fn new(name: &str, image: ContentId, image_name: &str) -> Self {
        let id = Uuid::new_v4().simple().to_string()[..12].to_string();
        let name = if name.is_empty() {
            format!("refstore-{}", &id[..8])
        } else {
            name.to_string()
        };

        Self {
            id,
            name,
            image,
            image_name: image_name.to_string(),
            cmd: Vec::new(),
            status: ContainerStatus::Created,
            created: Utc::now(),
        }
    }

    /// Set the command
    pub fn cmd(mut self, cmd: Vec<String>) -> Self {
        self.cmd = cmd;
        self
    }

    /// Set the initial status
    pub fn status(mut self, status: ContainerStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if container is running
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }
}
