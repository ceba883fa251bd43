//! refstore - image tag and reference store for a Docker-compatible container service
//!
//! refstore keeps the names of local images and what uses them:
//!
//! - Many `repository:tag` names can point at one content-addressed image
//! - Containers and child images keep their image alive
//! - Removing a name untags it; removing the last name deletes the image,
//!   cascading to parents that are no longer referenced
//! - Removal of an image a container uses is refused unless forced

pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod reference;
pub mod storage;

pub use error::{Result, StoreError};
