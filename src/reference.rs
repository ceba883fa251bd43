//! Image reference parsing
//!
//! Handles names like `busybox`, `busybox:1.36`, `utest/docker:tag2` and
//! registry-qualified repositories such as `127.0.0.1:5000/busybox`. A missing
//! tag always normalizes to `latest`, so `busybox` and `busybox:latest` name the
//! same tag.

use crate::error::{Result, StoreError};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Tag applied when a reference omits one
pub const DEFAULT_TAG: &str = "latest";

const MAX_TAG_LEN: usize = 128;

fn path_component() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid component regex")
    })
}

fn registry_host() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?$")
            .expect("valid host regex")
    })
}

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("valid tag regex"))
}

fn full_hex_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9]{64}$").expect("valid id regex"))
}

/// A normalized `repository:tag` name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    repository: String,
    tag: String,
}

impl Reference {
    /// Parse and normalize a reference
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(StoreError::InvalidReference(
                "reference cannot be empty".to_string(),
            ));
        }
        if input.contains('@') {
            return Err(StoreError::InvalidReference(format!(
                "{}: digest references cannot be tagged or untagged",
                input
            )));
        }

        // The last colon separates the tag unless it belongs to a registry port
        let (repository, tag) = match input.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag),
            _ => (input, DEFAULT_TAG),
        };

        Self::validate_repository(input, repository)?;

        if tag.len() > MAX_TAG_LEN || !tag_pattern().is_match(tag) {
            return Err(StoreError::InvalidReference(format!(
                "{}: invalid tag {:?}",
                input, tag
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    fn validate_repository(input: &str, repository: &str) -> Result<()> {
        if repository.is_empty() {
            return Err(StoreError::InvalidReference(format!(
                "{}: repository name cannot be empty",
                input
            )));
        }

        let mut components: Vec<&str> = repository.split('/').collect();

        // A leading component with a dot, a port, or "localhost" is a registry host
        if components.len() > 1 {
            let first = components[0];
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if !registry_host().is_match(first) {
                    return Err(StoreError::InvalidReference(format!(
                        "{}: invalid registry host {:?}",
                        input, first
                    )));
                }
                components.remove(0);
            }
        }

        for component in &components {
            if !path_component().is_match(component) {
                return Err(StoreError::InvalidReference(format!(
                    "{}: repository name must be lowercase alphanumeric components, got {:?}",
                    input, component
                )));
            }
        }

        if full_hex_id().is_match(repository) {
            return Err(StoreError::InvalidReference(format!(
                "{}: repository name cannot be a 64-character hexadecimal id",
                input
            )));
        }

        Ok(())
    }

    /// Repository, including any registry host prefix
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag label
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Build a reference from already-split parts
    pub fn from_parts(repository: &str, tag: &str) -> Result<Self> {
        Self::parse(&format!("{}:{}", repository, tag))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for Reference {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
