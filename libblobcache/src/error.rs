use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::digest::Digest;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Coarse classification of a [`CacheError`], for callers that branch on the
/// failure instead of only reporting it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MissingDigest,
    InvalidInput,
    Fetch,
    Store,
    IntegrityMismatch,
    NotFound,
}

/// Errors of the blob cache.
///
/// The type is `Clone` so that the outcome of one pull can be handed to every
/// task that was waiting on it.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("resource has no content digest")]
    MissingDigest,

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("failed to pull blob {digest}: {source}")]
    Fetch {
        digest: Digest,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("pull of blob {0} was abandoned before completion")]
    Abandoned(Digest),

    #[error("blob store I/O error: {0}")]
    Store(#[source] Arc<io::Error>),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: Digest, actual: Digest },

    #[error("blob unknown: {0}")]
    BlobUnknown(Digest),
}

impl CacheError {
    pub fn fetch(digest: &Digest, source: impl Into<BoxError>) -> Self {
        CacheError::Fetch {
            digest: digest.clone(),
            source: Arc::from(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::MissingDigest => ErrorKind::MissingDigest,
            CacheError::InvalidDigest(_) | CacheError::UnsupportedAlgorithm(_) => {
                ErrorKind::InvalidInput
            }
            CacheError::Fetch { .. } | CacheError::Abandoned(_) => ErrorKind::Fetch,
            CacheError::Store(_) => ErrorKind::Store,
            CacheError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            CacheError::BlobUnknown(_) => ErrorKind::NotFound,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        CacheError::Store(Arc::new(err))
    }
}
