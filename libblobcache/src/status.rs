//! Per-digest pull status with single-flight coordination.
//!
//! Every digest moves through `Unknown -> Pulling -> Pulled`, or
//! `Pulling -> Failed` when a pull does not succeed. Only one task at a time
//! holds the right to pull a given digest. Others park on that digest's own
//! completion signal, so finishing one blob never wakes tasks waiting on an
//! unrelated one.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::digest::Digest;
use crate::error::{CacheError, Result};

/// `None` while the pull is in flight.
type PullOutcome = Option<Result<()>>;

enum PullStatus {
    Pulling(watch::Receiver<PullOutcome>),
    Pulled,
    Failed(CacheError),
}

/// Observable status of a digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullState {
    Unknown,
    Pulling,
    Pulled,
    Failed,
}

/// Result of [`PullStatusTracker::begin_or_wait`].
pub enum PullTicket<'a> {
    /// The caller won the gate and must pull the blob, then resolve the guard.
    Fetch(PullGuard<'a>),
    /// The blob is already cached.
    Cached,
}

#[derive(Default)]
pub struct PullStatusTracker {
    statuses: Mutex<HashMap<Digest, PullStatus>>,
}

impl PullStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, digest: &Digest) -> PullState {
        match self.statuses.lock().unwrap().get(digest) {
            None => PullState::Unknown,
            Some(PullStatus::Pulling(_)) => PullState::Pulling,
            Some(PullStatus::Pulled) => PullState::Pulled,
            Some(PullStatus::Failed(_)) => PullState::Failed,
        }
    }

    /// Single-flight gate for `digest`.
    ///
    /// Exactly one caller at a time receives [`PullTicket::Fetch`]. Callers
    /// arriving while that pull is in flight wait for it and then get either
    /// [`PullTicket::Cached`] or the error the pull ended with. A digest whose
    /// last pull failed is handed out for pulling again. Waiters of a pull
    /// that was abandoned retry instead of failing.
    pub async fn begin_or_wait(&self, digest: &Digest) -> Result<PullTicket<'_>> {
        loop {
            let mut pending = {
                let mut statuses = self.statuses.lock().unwrap();
                let in_flight = match statuses.get(digest) {
                    Some(PullStatus::Pulled) => return Ok(PullTicket::Cached),
                    Some(PullStatus::Pulling(rx)) => Some(rx.clone()),
                    Some(PullStatus::Failed(_)) | None => None,
                };
                match in_flight {
                    Some(rx) => rx,
                    None => {
                        let (tx, rx) = watch::channel(None);
                        statuses.insert(digest.clone(), PullStatus::Pulling(rx));
                        tracing::debug!("Pulling blob {digest}");
                        return Ok(PullTicket::Fetch(PullGuard {
                            tracker: self,
                            digest: digest.clone(),
                            tx,
                            resolved: false,
                        }));
                    }
                }
            };

            tracing::debug!("Waiting for in-flight pull of blob {digest}");
            let outcome = match pending.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            match outcome {
                Some(Ok(())) => return Ok(PullTicket::Cached),
                // the puller went away, so this caller competes for the gate again
                Some(Err(CacheError::Abandoned(_))) => continue,
                Some(Err(err)) => return Err(err),
                // signal went away without an outcome, look at the map again
                None => continue,
            }
        }
    }
}

/// The right to pull one digest.
///
/// Dropping the guard without resolving it marks the digest failed with
/// [`CacheError::Abandoned`]. Its waiters wake up and compete for the gate
/// again.
pub struct PullGuard<'a> {
    tracker: &'a PullStatusTracker,
    digest: Digest,
    tx: watch::Sender<PullOutcome>,
    resolved: bool,
}

impl PullGuard<'_> {
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn mark_pulled(mut self) {
        self.resolve(Ok(()));
    }

    pub fn mark_failed(mut self, err: CacheError) {
        self.resolve(Err(err));
    }

    fn resolve(&mut self, outcome: Result<()>) {
        self.resolved = true;
        let status = match &outcome {
            Ok(()) => PullStatus::Pulled,
            Err(err) => PullStatus::Failed(err.clone()),
        };
        // The map must be updated before waiters are released.
        self.tracker
            .statuses
            .lock()
            .unwrap()
            .insert(self.digest.clone(), status);
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!("Pull of blob {} was abandoned", self.digest);
            self.resolve(Err(CacheError::Abandoned(self.digest.clone())));
        }
    }
}
