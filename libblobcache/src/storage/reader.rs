use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf};

use crate::digest::Digest;
use crate::error::{CacheError, Result};

/// Random-access reader over a published blob.
#[derive(Debug)]
pub struct BlobReader {
    file: File,
    digest: Digest,
    size: u64,
}

impl BlobReader {
    pub(crate) async fn open(path: &Path, digest: &Digest) -> Result<Self> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::BlobUnknown(digest.clone()));
            }
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata().await?.len();
        Ok(BlobReader {
            file,
            digest: digest.clone(),
            size,
        })
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only when the end of the blob is reached, and `0`
    /// when `offset` is at or past the end. Running out of data before the
    /// size recorded at open time is an error.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let want = (self.size - offset).min(buf.len() as u64) as usize;
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < want {
            let n = self.file.read(&mut buf[filled..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "blob {} ended after {} of {} bytes at offset {}",
                        self.digest, filled, want, offset
                    ),
                )
                .into());
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl AsyncRead for BlobReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl AsyncSeek for BlobReader {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.file).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.file).poll_complete(cx)
    }
}
