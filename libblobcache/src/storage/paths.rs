// PathManager maps digests and staging ids to locations under the cache root.
//
// The layout of the cache root is as follows:
//
//	<root>
//	├── blobs
//	│   └── <algorithm>
//	│       └── <first two hex chars of digest>
//	│           └── <hex digest>
//	└── staging
//	    └── <uuid>
//
// Blobs are only ever created under `staging` and then renamed into `blobs`
// once their content has been verified, so every file below `blobs` is complete.

use std::path::{Path, PathBuf};

use crate::digest::Digest;

#[derive(Clone, Debug)]
pub struct PathManager {
    root_path: PathBuf,
}

impl PathManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathManager {
            root_path: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Returns the path to the root of the published blobs,
    /// (e.g. `<root>/blobs`).
    pub fn blobs_path(&self) -> PathBuf {
        self.root_path.join("blobs")
    }

    /// Returns the path to a single published blob,
    /// (e.g. `<root>/blobs/<algorithm>/<first two hex chars>/<hex digest>`).
    pub fn blob_data_path(&self, digest: &Digest) -> PathBuf {
        self.blobs_path()
            .join(digest.algorithm().as_str())
            .join(&digest.hex()[..2])
            .join(digest.hex())
    }

    /// Returns the path to the staging area,
    /// (e.g. `<root>/staging`).
    pub fn staging_path(&self) -> PathBuf {
        self.root_path.join("staging")
    }

    /// Returns the path to the data of a single in-progress write,
    /// (e.g. `<root>/staging/<id>`).
    pub fn staging_data_path(&self, id: &str) -> PathBuf {
        self.staging_path().join(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_data_path_is_derived_from_digest() {
        let digest = Digest::sha256(b"hello");
        let paths = PathManager::new("/cache");
        assert_eq!(
            paths.blob_data_path(&digest),
            PathBuf::from(
                "/cache/blobs/sha256/2c/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            )
        );
        assert_eq!(
            paths.staging_data_path("abc"),
            PathBuf::from("/cache/staging/abc")
        );
    }
}
