//! Lazy read path for container image files exposed through FUSE.
//!
//! File metadata comes from [`Resource`] records and is available
//! immediately. File content is resolved through the blob cache from
//! `libblobcache` on the first read.

pub mod file;
pub mod resource;

pub use file::{LazyFile, resource_to_attr};
pub use resource::{FileKind, Resource};
