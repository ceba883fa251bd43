//! Container references module
//!
//! Containers are run by the runtime; the image store only needs to know
//! which image each one was created from, and in what order.

pub mod config;
pub mod lifecycle;
pub mod usage;

pub use config::{ContainerRef, ContainerStatus};
pub use lifecycle::{listen, LifecycleEvent};
pub use usage::UsageTracker;
