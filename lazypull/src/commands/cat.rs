use crate::commands::{normalize_image, parse_digest};
use crate::config::Config;
use anyhow::{Context, Result};
use clap::Args;
use libblobcache::{BlobCacher, Digest};
use liblazyfs::{FileKind, LazyFile, Resource};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

const CHUNK_SIZE: usize = 128 * 1024;

#[derive(Args, Debug)]
pub struct CatArgs {
    /// Image the blob belongs to
    pub image: String,

    /// Blob digest, e.g. `sha256:...`
    pub digest: String,

    /// Byte offset to start reading at
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Number of bytes to read; reads to the end when omitted
    #[arg(long)]
    pub length: Option<u64>,
}

pub async fn run(config: &Config, args: CatArgs) -> Result<()> {
    let image = normalize_image(&args.image)?.to_string();
    let digest = parse_digest(&args.digest)?;
    let cacher = config.open_cacher().await?;

    let mut stdout = tokio::io::stdout();
    let copied = copy_range(cacher, &image, digest, args.offset, args.length, &mut stdout).await?;
    stdout.flush().await?;
    tracing::debug!("wrote {copied} bytes of {} from offset {}", args.digest, args.offset);
    Ok(())
}

/// Copies `length` bytes of the blob from `offset` to `out` through the lazy
/// read path. Stops early at the end of the blob.
pub async fn copy_range<W>(
    cacher: Arc<BlobCacher>,
    image: &str,
    digest: Digest,
    offset: u64,
    length: Option<u64>,
    out: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let resource = Resource {
        path: digest.to_string(),
        kind: FileKind::Regular,
        mode: 0o444,
        size: 0,
        uid: 0,
        gid: 0,
        mtime: 0,
        target: None,
        digests: vec![digest],
    };
    let file = LazyFile::new(image, Arc::new(resource), cacher);

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut pos = offset;
    let mut remaining = length.unwrap_or(u64::MAX);
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = file
            .read_at(&mut buf[..want], pos)
            .await
            .with_context(|| format!("Failed to read {} at offset {pos}", file.resource().path))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        pos += n as u64;
        remaining -= n as u64;
    }
    Ok(pos - offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use libblobcache::{ErrorKind, MemoryPuller};

    const IMAGE: &str = "docker.io/library/app:latest";

    async fn setup(data: Vec<u8>) -> (tempfile::TempDir, Arc<MemoryPuller>, Arc<BlobCacher>, Digest) {
        let puller = Arc::new(MemoryPuller::new());
        let digest = puller.insert(data);
        let dir = tempfile::tempdir().unwrap();
        let cacher = BlobCacher::new(dir.path(), puller.clone()).await.unwrap();
        (dir, puller, Arc::new(cacher), digest)
    }

    #[tokio::test]
    async fn test_copy_whole_blob_across_chunks() {
        let data = (0..CHUNK_SIZE * 2 + 17).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let (_dir, puller, cacher, digest) = setup(data.clone()).await;

        let mut out = Vec::new();
        let copied = copy_range(cacher, IMAGE, digest, 0, None, &mut out).await.unwrap();
        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(puller.blob_pulls(), 1);
    }

    #[tokio::test]
    async fn test_copy_range_clamps_at_end() {
        let (_dir, _puller, cacher, digest) = setup(b"0123456789".to_vec()).await;

        let mut out = Vec::new();
        let copied = copy_range(cacher.clone(), IMAGE, digest.clone(), 3, Some(4), &mut out)
            .await
            .unwrap();
        assert_eq!(copied, 4);
        assert_eq!(out, b"3456");

        let mut out = Vec::new();
        let copied = copy_range(cacher.clone(), IMAGE, digest.clone(), 8, Some(100), &mut out)
            .await
            .unwrap();
        assert_eq!(copied, 2);
        assert_eq!(out, b"89");

        let mut out = Vec::new();
        let copied = copy_range(cacher, IMAGE, digest, 10, None, &mut out).await.unwrap();
        assert_eq!(copied, 0);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_copy_unknown_blob_fails() {
        let (_dir, _puller, cacher, _digest) = setup(b"known".to_vec()).await;

        let mut out = Vec::new();
        let err = copy_range(cacher, IMAGE, Digest::sha256(b"unknown"), 0, None, &mut out)
            .await
            .unwrap_err();
        let cache_err = err.downcast_ref::<libblobcache::CacheError>().unwrap();
        assert_eq!(cache_err.kind(), ErrorKind::Fetch);
        assert!(out.is_empty());
    }
}
