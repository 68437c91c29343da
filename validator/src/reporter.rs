use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use subnet_protocol::StoreSnapshot;

use crate::error::SinkError;

/// Destination for peer table snapshots
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn store(&self, snapshot: &StoreSnapshot) -> Result<(), SinkError>;
}

pub struct HttpSnapshotSink {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpSnapshotSink {
    pub fn new(storage_url: &str, token: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/store_miner_info", storage_url.trim_end_matches('/')),
            token,
            timeout,
        }
    }
}

#[async_trait]
impl SnapshotSink for HttpSnapshotSink {
    async fn store(&self, snapshot: &StoreSnapshot) -> Result<(), SinkError> {
        let mut req = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(snapshot);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(SinkError::Status(resp.status()));
        }
        Ok(())
    }
}

/// Pushes snapshots to a [`SnapshotSink`] from a background task.
///
/// Submitting never waits. Failed pushes are logged and not retried. When the
/// queue is full the new snapshot is dropped; a later cycle sends a fresher one.
/// Shutdown waits at most `drain_timeout` for the queue to empty.
pub struct PersistenceReporter {
    tx: mpsc::Sender<StoreSnapshot>,
    task: JoinHandle<()>,
    drain_timeout: Duration,
}

impl PersistenceReporter {
    pub fn spawn(sink: Arc<dyn SnapshotSink>, capacity: usize, drain_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreSnapshot>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                match sink.store(&snapshot).await {
                    Ok(()) => tracing::debug!(peers = snapshot.peers.len(), "Stored peer info"),
                    Err(e) => tracing::error!(error = %e, "Failed to store peer info"),
                }
            }
        });
        Self {
            tx,
            task,
            drain_timeout,
        }
    }

    /// Queue a snapshot. Returns `false` if it was dropped.
    pub fn submit(&self, snapshot: StoreSnapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Persistence queue full, snapshot dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!("Persistence reporter stopped, snapshot dropped");
                false
            }
        }
    }

    /// Stop accepting snapshots and wait until the queued ones have been pushed,
    /// or until the drain timeout runs out, whichever comes first.
    pub async fn shutdown(self) {
        let Self {
            tx,
            mut task,
            drain_timeout,
        } = self;
        let pending = tx.max_capacity() - tx.capacity();
        drop(tx);
        match tokio::time::timeout(drain_timeout, &mut task).await {
            Ok(Ok(())) => tracing::info!("Persistence reporter drained"),
            Ok(Err(e)) => tracing::error!(error = %e, "Persistence reporter task failed"),
            Err(_) => {
                task.abort();
                tracing::warn!(
                    queued_at_shutdown = pending,
                    timeout_ms = drain_timeout.as_millis() as u64,
                    "Persistence reporter did not drain in time, remaining snapshots dropped"
                );
            }
        }
    }
}
