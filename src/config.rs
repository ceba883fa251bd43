//! Store configuration

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "REFSTORE_DATA_DIR";

/// Default snapshot file name inside the data directory
pub const DEFAULT_STATE_FILE: &str = "refstore.json";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory for metadata and layers
    pub data_dir: PathBuf,
    /// Snapshot file name, relative to `data_dir`
    pub state_file: String,
    /// Layer directory name, relative to `data_dir`
    pub layers_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("/var/lib"))
                    .join("refstore")
            });

        Self::with_data_dir(data_dir)
    }
}

impl StoreConfig {
    /// Configuration rooted at `data_dir` with default file names
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            state_file: DEFAULT_STATE_FILE.to_string(),
            layers_dir: "layers".to_string(),
        }
    }

    /// Path of the metadata snapshot
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(&self.state_file)
    }

    /// Root of per-image layer directories
    pub fn layers_dir(&self) -> PathBuf {
        self.data_dir.join(&self.layers_dir)
    }

    /// Reject configurations that cannot name a file
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig(
                "data directory cannot be empty".to_string(),
            ));
        }
        if self.state_file.is_empty() || self.state_file.contains('/') {
            return Err(StoreError::InvalidConfig(format!(
                "state file must be a plain file name, got {:?}",
                self.state_file
            )));
        }
        if self.layers_dir.is_empty() {
            return Err(StoreError::InvalidConfig(
                "layers directory cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let config = StoreConfig::with_data_dir(PathBuf::from("/tmp/refstore"));
        assert_eq!(config.state_path(), PathBuf::from("/tmp/refstore/refstore.json"));
        assert_eq!(config.layers_dir(), PathBuf::from("/tmp/refstore/layers"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreConfig::with_data_dir(PathBuf::new());
        assert!(config.validate().is_err());

        config.data_dir = PathBuf::from("/tmp/refstore");
        config.state_file = "nested/state.json".to_string();
        assert!(config.validate().is_err());
    }
}
