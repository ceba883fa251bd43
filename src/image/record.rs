//! Image metadata records

use super::id::ContentId;
use crate::error::Result;
use crate::reference::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one image in the arena
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Content-derived image ID
    pub id: ContentId,
    /// Image this one was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ContentId>,
    /// Created timestamp
    pub created: DateTime<Utc>,
    /// Instruction that produced the image
    #[serde(default)]
    pub created_by: String,
    /// Comment
    #[serde(default)]
    pub comment: String,
    /// Author
    #[serde(default)]
    pub author: String,
}

/// Canonical form hashed into the image ID
#[derive(Serialize)]
struct Canonical<'a> {
    parent: Option<&'a ContentId>,
    created: &'a DateTime<Utc>,
    created_by: &'a str,
    comment: &'a str,
    author: &'a str,
}

impl ImageRecord {
    /// Create a record, deriving its ID from the metadata
    pub fn new(spec: &ImageSpec) -> Result<Self> {
        let created = Utc::now();
        let canonical = Canonical {
            parent: spec.parent.as_ref(),
            created: &created,
            created_by: &spec.created_by,
            comment: &spec.comment,
            author: &spec.author,
        };
        let id = ContentId::from_content(&serde_json::to_vec(&canonical)?);

        Ok(Self {
            id,
            parent: spec.parent.clone(),
            created,
            created_by: spec.created_by.clone(),
            comment: spec.comment.clone(),
            author: spec.author.clone(),
        })
    }
}

/// Description of an image to add to the store
#[derive(Debug, Clone, Default)]
pub struct ImageSpec {
    /// Parent image
    pub parent: Option<ContentId>,
    /// Instruction summary
    pub created_by: String,
    /// Comment
    pub comment: String,
    /// Author
    pub author: String,
    /// Name to apply once the image exists
    pub tag: Option<Reference>,
}

impl ImageSpec {
    /// Root image with no parent
    pub fn root(created_by: &str) -> Self {
        Self {
            created_by: created_by.to_string(),
            ..Default::default()
        }
    }

    /// Image built on top of `parent`
    pub fn child(parent: ContentId, created_by: &str) -> Self {
        Self {
            parent: Some(parent),
            created_by: created_by.to_string(),
            ..Default::default()
        }
    }

    /// Set the name
    pub fn tag(mut self, tag: Reference) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Set the comment
    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    /// Set the author
    pub fn author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }
}
