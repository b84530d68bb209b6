//! Background last-used tracking
//!
//! `record` only enqueues, into a bounded queue. A detached worker drains it
//! and applies each update on the blocking pool. When the queue is full the
//! update is dropped. Failures are logged and dropped; there is no retry and
//! no ordering guarantee against later requests.

use crate::{IdentityLinkStore, PubKey};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pending updates held before new ones are dropped
pub const DEFAULT_USAGE_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<PubKey>,
}

impl UsageRecorder {
    /// Start the worker on the current tokio runtime
    pub fn spawn(store: Arc<dyn IdentityLinkStore>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_capacity(store, DEFAULT_USAGE_QUEUE_CAPACITY)
    }

    pub fn spawn_with_capacity(store: Arc<dyn IdentityLinkStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(store, rx));
        (UsageRecorder { tx }, handle)
    }

    /// Schedule a `last_used_at` update for `pubkey`. Never waits.
    pub fn record(&self, pubkey: PubKey) {
        match self.tx.try_send(pubkey) {
            Ok(()) => {}
            Err(TrySendError::Full(pubkey)) => {
                warn!(%pubkey, "usage queue full, dropping update");
            }
            Err(TrySendError::Closed(pubkey)) => {
                debug!(%pubkey, "usage worker stopped, dropping update");
            }
        }
    }
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

async fn run_worker(store: Arc<dyn IdentityLinkStore>, mut rx: mpsc::Receiver<PubKey>) {
    while let Some(pubkey) = rx.recv().await {
        let store = Arc::clone(&store);
        let key = pubkey.clone();

        match tokio::task::spawn_blocking(move || store.touch(&key)).await {
            Ok(Ok(())) => debug!(%pubkey, "recorded key usage"),
            Ok(Err(e)) => warn!(%pubkey, error = %e, "failed to record key usage"),
            Err(e) => warn!(%pubkey, error = %e, "usage update task panicked"),
        }
    }
    debug!("usage worker exiting");
}
