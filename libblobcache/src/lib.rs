//! On-demand blob acquisition for lazily populated container images.
//!
//! A [`BlobCacher`] sits between readers and a remote [`Puller`]. Asking it
//! for a digest either returns the locally cached copy or pulls the blob
//! once, verifies it against the digest and publishes it to the
//! content-addressable [`BlobStore`]:
//!
//! ```text
//! read(digest) -> PullStatusTracker gate -> Puller::pull_blob -> BlobWriter
//!                                                   |
//!                 BlobStore::open <- ClosedBlob::publish (digest verified)
//! ```
//!
//! Pull status and statistics live only as long as the process.

pub mod cacher;
pub mod digest;
pub mod error;
pub mod puller;
pub mod stats;
pub mod status;
pub mod storage;

pub use cacher::BlobCacher;
pub use digest::{Algorithm, Digest};
pub use error::{BoxError, CacheError, ErrorKind, Result};
pub use puller::{BlobStream, ImageReference, Manifest, MemoryPuller, Puller, RegistryPuller};
pub use stats::CacheStatsSnapshot;
pub use status::PullState;
pub use storage::{BlobReader, BlobStore};
