//! Per-file metadata handed over by whatever translated the image manifest.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use libblobcache::Digest;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

/// Metadata of one virtual file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    pub kind: FileKind,
    /// Permission bits, including setuid/setgid/sticky.
    pub mode: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    /// Modification time in seconds since the epoch.
    #[serde(default)]
    pub mtime: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Content digests of the file. Only the first one is used for reads and
    /// must be valid; later entries the cache cannot verify are skipped.
    #[serde(default, deserialize_with = "deserialize_digests")]
    pub digests: Vec<Digest>,
}

impl Resource {
    /// The digest that backs this file's content.
    pub fn content_digest(&self) -> Option<&Digest> {
        self.digests.first()
    }

    /// Modification time, saturating at the largest representable second
    /// count and falling back to the epoch where the platform cannot
    /// represent it.
    pub fn modified(&self) -> SystemTime {
        let secs = self.mtime.min(i64::MAX as u64);
        UNIX_EPOCH
            .checked_add(Duration::from_secs(secs))
            .unwrap_or(UNIX_EPOCH)
    }
}

fn deserialize_digests<'de, D>(deserializer: D) -> Result<Vec<Digest>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    let mut digests = Vec::with_capacity(raw.len());
    for (idx, s) in raw.iter().enumerate() {
        match s.parse::<Digest>() {
            Ok(digest) => digests.push(digest),
            Err(err) if idx == 0 => return Err(serde::de::Error::custom(err)),
            Err(err) => tracing::debug!("skipping alternate digest {s}: {err}"),
        }
    }
    Ok(digests)
}
