//! Content-addressable blob storage on the local filesystem.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{create_dir_all, metadata, remove_dir_all, try_exists};

use crate::digest::{Algorithm, Digest};
use crate::error::Result;

pub mod paths;
pub mod reader;
pub mod writer;

pub use paths::PathManager;
pub use reader::BlobReader;
pub use writer::{BlobWriter, ClosedBlob};

/// Blob store rooted at a directory that nothing else writes to.
#[derive(Clone, Debug)]
pub struct BlobStore {
    path_manager: PathManager,
}

impl BlobStore {
    /// Opens the store under `root`, which must already exist.
    ///
    /// Leftovers from writes that never completed are discarded. The store
    /// assumes it owns `root` exclusively: opening a second store on the same
    /// root, in this process or another, wipes the first one's in-flight
    /// writes.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !metadata(root).await?.is_dir() {
            return Err(io::Error::other(format!(
                "cache root `{}` is not a directory",
                root.display()
            ))
            .into());
        }
        let path_manager = PathManager::new(root);

        let staging = path_manager.staging_path();
        match remove_dir_all(&staging).await {
            Ok(()) => tracing::debug!("Discarded stale staging files in {}", staging.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        create_dir_all(&staging).await?;
        create_dir_all(path_manager.blobs_path()).await?;

        Ok(BlobStore { path_manager })
    }

    pub fn paths(&self) -> &PathManager {
        &self.path_manager
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.path_manager.blob_data_path(digest)
    }

    /// Starts a new blob whose digest is computed with `algorithm`.
    pub async fn writer(&self, algorithm: Algorithm) -> Result<BlobWriter> {
        BlobWriter::create(self.path_manager.clone(), algorithm).await
    }

    /// Opens a published blob, failing with `BlobUnknown` if there is none.
    pub async fn open(&self, digest: &Digest) -> Result<BlobReader> {
        BlobReader::open(&self.path_manager.blob_data_path(digest), digest).await
    }

    pub async fn contains(&self, digest: &Digest) -> bool {
        try_exists(self.path_manager.blob_data_path(digest))
            .await
            .unwrap_or(false)
    }
}
