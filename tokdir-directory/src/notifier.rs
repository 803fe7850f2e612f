//! Fan-out of one notification to every registered device.
//!
//! The notifier only reads the directory through `scan_all` and only writes
//! through `unregister_token`, which it calls when the push transport says a
//! token is permanently invalid.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokdir_docstore::DocumentStore;
use tracing::{debug, error, info, warn};

use crate::{DirectoryError, TokenDirectory, TokenEntry, metrics};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The device is gone; its token should be pruned.
    #[error("push token is no longer registered")]
    InvalidToken,
    #[error("push delivery failed: {0}")]
    Transient(String),
}

/// Push-delivery transport.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn send(
        &self,
        token: &str,
        message: &PushMessage,
    ) -> Result<(), PushError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub sent: usize,
    pub pruned: usize,
    pub failed: usize,
}

impl FanoutReport {
    fn merge(&mut self, other: FanoutReport) {
        self.sent += other.sent;
        self.pruned += other.pruned;
        self.failed += other.failed;
    }
}

pub struct FanoutNotifier<S, P> {
    directory: Arc<TokenDirectory<S>>,
    transport: Arc<P>,
    batch_size: usize,
    concurrency: usize,
}

impl<S: DocumentStore, P: PushTransport> FanoutNotifier<S, P> {
    pub fn new(
        directory: Arc<TokenDirectory<S>>,
        transport: Arc<P>,
        batch_size: usize,
    ) -> Self {
        let concurrency = directory.config().fanout_concurrency;
        Self {
            directory,
            transport,
            batch_size,
            concurrency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Deliver `message` to every registered token. A failure for one
    /// device is logged and counted. A failing scan aborts, and a worker
    /// that dies yields `FanoutIncomplete` carrying the partial report.
    pub async fn broadcast(
        &self,
        message: PushMessage,
    ) -> Result<FanoutReport, DirectoryError> {
        let mut scan = self.directory.scan_all(self.batch_size)?;
        let message = Arc::new(message);
        let (tx, rx) = flume::bounded::<TokenEntry>(self.batch_size);

        let workers: Vec<_> = (0..self.concurrency)
            .map(|_| {
                let rx = rx.clone();
                let directory = self.directory.clone();
                let transport = self.transport.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    let mut report = FanoutReport::default();
                    while let Ok(entry) = rx.recv_async().await {
                        deliver(&directory, &*transport, &entry, &message, &mut report)
                            .await;
                    }
                    report
                })
            })
            .collect();
        drop(rx);

        let scanned = async {
            while let Some(batch) = scan.next_batch().await? {
                for entry in batch {
                    // every worker is gone; the join below reports it
                    if tx.send_async(entry).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Ok::<_, DirectoryError>(())
        }
        .await;
        drop(tx);

        let mut report = FanoutReport::default();
        let mut lost_workers = 0;
        for worker in workers {
            match worker.await {
                Ok(part) => report.merge(part),
                Err(e) => {
                    error!(error = %e, "fan-out worker died");
                    lost_workers += 1;
                }
            }
        }
        metrics::record_fanout(report.sent, report.pruned, report.failed);
        scanned?;
        if lost_workers > 0 {
            return Err(DirectoryError::FanoutIncomplete {
                lost_workers,
                report,
            });
        }
        info!(
            sent = report.sent,
            pruned = report.pruned,
            failed = report.failed,
            "fan-out finished"
        );
        Ok(report)
    }
}

async fn deliver<S: DocumentStore, P: PushTransport>(
    directory: &TokenDirectory<S>,
    transport: &P,
    entry: &TokenEntry,
    message: &PushMessage,
    report: &mut FanoutReport,
) {
    let device = entry.device_id.as_str();
    match transport.send(&entry.token, message).await {
        Ok(()) => {
            report.sent += 1;
        }
        Err(PushError::InvalidToken) => {
            match directory.unregister_token(device).await {
                Ok(()) => {
                    debug!(device, "pruned stale push token");
                    report.pruned += 1;
                }
                Err(DirectoryError::NotFound(_)) => {
                    report.pruned += 1;
                }
                Err(e) => {
                    warn!(device, error = %e, "failed to prune stale push token");
                    report.failed += 1;
                }
            }
        }
        Err(e) => {
            warn!(device, error = %e, "push failed");
            report.failed += 1;
        }
    }
}
