//! Lazily populated files.
//!
//! A [`LazyFile`] answers attribute requests straight from its [`Resource`]
//! and only touches the blob cache when its content is read. The first read
//! of a blob pulls it; later reads, from any file sharing the digest, are
//! served from the local copy.

use std::sync::Arc;

use bytes::Bytes;
use libblobcache::{BlobCacher, CacheError};
use rfuse3::raw::reply::{FileAttr, ReplyData};
use rfuse3::{FileType as FuseFileType, Result as FuseResult, Timestamp};

use crate::resource::{FileKind, Resource};

const BLOCK_SIZE: u32 = 4096;

fn kind_to_fuse(kind: FileKind) -> FuseFileType {
    match kind {
        FileKind::Regular => FuseFileType::RegularFile,
        FileKind::Directory => FuseFileType::Directory,
        FileKind::Symlink => FuseFileType::Symlink,
        FileKind::CharDevice => FuseFileType::CharDevice,
        FileKind::BlockDevice => FuseFileType::BlockDevice,
        FileKind::Fifo => FuseFileType::NamedPipe,
        FileKind::Socket => FuseFileType::Socket,
    }
}

/// Translates resource metadata to FUSE attributes. Pure, never blocks.
pub fn resource_to_attr(res: &Resource, ino: u64) -> FileAttr {
    let mtime = Timestamp::from(res.modified());
    let size = match (res.kind, &res.target) {
        (FileKind::Symlink, Some(target)) => target.len() as u64,
        _ => res.size,
    };
    FileAttr {
        ino,
        size,
        // st_blocks is in 512-byte units
        blocks: size.div_ceil(512),
        atime: mtime,
        mtime,
        ctime: mtime,
        #[cfg(target_os = "macos")]
        crtime: mtime,
        kind: kind_to_fuse(res.kind),
        perm: (res.mode & 0o7777) as u16,
        nlink: if res.kind == FileKind::Directory { 2 } else { 1 },
        uid: res.uid,
        gid: res.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

pub struct LazyFile {
    image: String,
    resource: Arc<Resource>,
    cacher: Arc<BlobCacher>,
}

impl LazyFile {
    /// `image` is the reference the content digests are pulled from.
    pub fn new(image: impl Into<String>, resource: Arc<Resource>, cacher: Arc<BlobCacher>) -> Self {
        LazyFile {
            image: image.into(),
            resource,
            cacher,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn get_attr(&self, ino: u64) -> FileAttr {
        resource_to_attr(&self.resource, ino)
    }

    /// Reads into `buf` from `offset`, pulling the backing blob on first use.
    ///
    /// Returns `0` at or past the end of the content. Errors keep their kind
    /// for callers outside the FUSE layer.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, CacheError> {
        let digest = self
            .resource
            .content_digest()
            .ok_or(CacheError::MissingDigest)?;
        let mut blob = self.cacher.pull_blob(&self.image, digest).await?;
        blob.read_at(buf, offset).await
    }

    /// FUSE read: any failure is logged and reported as `EIO`.
    pub async fn read(&self, offset: u64, size: u32) -> FuseResult<ReplyData> {
        let mut buf = vec![0u8; size as usize];
        match self.read_at(&mut buf, offset).await {
            Ok(n) => {
                buf.truncate(n);
                Ok(ReplyData {
                    data: Bytes::from(buf),
                })
            }
            Err(err) => {
                tracing::error!(
                    "error while reading {} bytes at {} for {}: {}",
                    size,
                    offset,
                    self.resource.path,
                    err
                );
                Err(libc::EIO.into())
            }
        }
    }
}
