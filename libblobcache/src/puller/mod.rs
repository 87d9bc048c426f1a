//! Remote sources of blobs and manifests.

use std::pin::Pin;

use async_trait::async_trait;
use oci_spec::image::{ImageIndex, ImageManifest};
use tokio::io::AsyncRead;

use crate::digest::Digest;
use crate::error::BoxError;

pub mod memory;
pub mod reference;
pub mod registry;

pub use memory::MemoryPuller;
pub use reference::ImageReference;
pub use registry::{RegistryError, RegistryPuller};

/// Byte stream of one blob. Dropping it closes the underlying connection.
pub type BlobStream = Pin<Box<dyn AsyncRead + Send>>;

/// Top-level manifest of an image reference.
#[derive(Clone, Debug)]
pub enum Manifest {
    Index(ImageIndex),
    Image(ImageManifest),
}

#[async_trait]
pub trait Puller: Send + Sync {
    /// Opens a stream over the full content of `digest` within `image`.
    async fn pull_blob(&self, image: &str, digest: &Digest) -> Result<BlobStream, BoxError>;

    /// Fetches the manifest or manifest index that `image` points at.
    async fn pull_manifest(&self, image: &str) -> Result<Manifest, BoxError>;
}
