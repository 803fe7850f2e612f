use std::collections::VecDeque;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokdir_docstore::DocumentStore;
use tracing::warn;

use crate::{DirectoryError, ShardReader};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub device_id: String,
    pub token: String,
}

/// Lazy, finite walk over every committed (device, token) pair.
///
/// Shards are paged in id order and read outside any transaction, so a
/// batch may be slightly stale, but every shard it came from was a
/// committed snapshot. A device moved by unregister + register during the
/// walk can show up twice or not at all; delivery is at-least-once.
pub struct TokenScan<S> {
    reader: ShardReader<S>,
    batch_size: usize,
    page_shards: usize,
    cursor: Option<String>,
    buffer: VecDeque<TokenEntry>,
    exhausted: bool,
}

impl<S: DocumentStore> TokenScan<S> {
    pub(crate) fn new(
        reader: ShardReader<S>,
        batch_size: usize,
        page_shards: usize,
    ) -> Self {
        Self {
            reader,
            batch_size,
            page_shards,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Next batch of at most `batch_size` pairs, `None` once exhausted
    pub async fn next_batch(
        &mut self,
    ) -> Result<Option<Vec<TokenEntry>>, DirectoryError> {
        while self.buffer.len() < self.batch_size && !self.exhausted {
            let page = self
                .reader
                .list_page(self.cursor.as_deref(), self.page_shards)
                .await?;
            if page.len() < self.page_shards {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(last.id.clone());
            }
            for shard in page {
                if shard.devices.len() != shard.tokens.len() {
                    warn!(shard = %shard.id, "skipping shard with unpaired tokens");
                    continue;
                }
                self.buffer.extend(shard.entries().map(|(d, t)| TokenEntry {
                    device_id: d.to_string(),
                    token: t.to_string(),
                }));
            }
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }
        let n = self.batch_size.min(self.buffer.len());
        Ok(Some(self.buffer.drain(..n).collect()))
    }

    /// Drain the whole scan into memory
    pub async fn collect_all(mut self) -> Result<Vec<TokenEntry>, DirectoryError> {
        let mut out = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            out.extend(batch);
        }
        Ok(out)
    }

    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<Vec<TokenEntry>, DirectoryError>> {
        futures_util::stream::try_unfold(self, |mut scan| async move {
            let batch = scan.next_batch().await?;
            Ok::<_, DirectoryError>(batch.map(|batch| (batch, scan)))
        })
    }
}
