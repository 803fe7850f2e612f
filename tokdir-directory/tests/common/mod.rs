#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokdir_directory::{DirectoryConfig, TokenDirectory, TokenShard};
use tokdir_docstore::{
    Document, DocumentStore, DocumentTransaction, MemoryDocumentStore,
    MemoryTransaction, Query, StoreConfig, StoreError, StoreResult, encode,
};

pub const COLLECTION: &str = "token";

pub fn config(capacity: u32) -> DirectoryConfig {
    DirectoryConfig::default()
        .with_shard_capacity(capacity)
        .with_retry_backoff_ms(1, 10)
}

pub fn memory_directory(
    conf: DirectoryConfig,
) -> (Arc<TokenDirectory<MemoryDocumentStore>>, MemoryDocumentStore) {
    memory_directory_with(StoreConfig::default(), conf)
}

/// Directory over a memory store with its own record limits
pub fn memory_directory_with(
    store_config: StoreConfig,
    conf: DirectoryConfig,
) -> (Arc<TokenDirectory<MemoryDocumentStore>>, MemoryDocumentStore) {
    conf.check_store_limits(&store_config)
        .expect("shard fits store limits");
    let store = MemoryDocumentStore::new(store_config);
    let directory = TokenDirectory::new(Arc::new(store.clone()), conf)
        .expect("valid config");
    (Arc::new(directory), store)
}

/// Every committed shard, in id order
pub async fn shards<S: DocumentStore>(store: &S) -> Vec<TokenShard> {
    store
        .list(COLLECTION, None, usize::MAX)
        .await
        .expect("list shards")
        .iter()
        .map(|doc| TokenShard::from_document(doc).expect("decode shard"))
        .collect()
}

/// Check bookkeeping and global uniqueness over all shards and return the
/// device -> token mapping they hold.
pub async fn assert_invariants<S: DocumentStore>(
    store: &S,
    capacity: u32,
) -> HashMap<String, String> {
    let mut seen = HashMap::new();
    for shard in shards(store).await {
        assert!(!shard.is_empty(), "empty shard {} left behind", shard.id);
        shard
            .check(capacity)
            .unwrap_or_else(|e| panic!("shard {}: {}", shard.id, e));
        for (device, token) in shard.entries() {
            let prev = seen.insert(device.to_string(), token.to_string());
            assert!(prev.is_none(), "device {} in more than one shard", device);
        }
    }
    seen
}

/// Write a shard straight into the store, bypassing the directory
pub async fn seed_shard<S: DocumentStore>(store: &S, shard: &TokenShard) {
    let mut tx = store.begin_transaction().await.expect("begin");
    tx.put(COLLECTION, &shard.id, encode(shard).expect("encode"))
        .await
        .expect("put");
    tx.commit().await.expect("commit");
}

#[derive(Debug, Default)]
pub struct Faults {
    /// Commits still to reject as conflicts; `u32::MAX` rejects forever
    conflicts: AtomicU32,
    stall: AtomicBool,
    commits: AtomicU32,
}

/// Memory store wrapper that can inject commit conflicts and stalls
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    pub inner: MemoryDocumentStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn conflict_next(&self, commits: u32) {
        self.faults.conflicts.store(commits, Ordering::SeqCst);
    }

    pub fn conflict_always(&self) {
        self.conflict_next(u32::MAX);
    }

    pub fn stall(&self, on: bool) {
        self.faults.stall.store(on, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> u32 {
        self.faults.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    type Transaction = FaultyTransaction;

    async fn begin_transaction(&self) -> StoreResult<FaultyTransaction> {
        if self.faults.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(FaultyTransaction {
            inner: self.inner.begin_transaction().await?,
            faults: self.faults.clone(),
        })
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        self.inner.query(collection, query).await
    }

    async fn list(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        self.inner.list(collection, start_after, limit).await
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.inner.count(collection).await
    }

    async fn health(&self) -> StoreResult<()> {
        self.inner.health().await
    }
}

pub struct FaultyTransaction {
    inner: MemoryTransaction,
    faults: Arc<Faults>,
}

#[async_trait]
impl DocumentTransaction for FaultyTransaction {
    async fn get(
        &mut self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        self.inner.query(collection, query).await
    }

    async fn create(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()> {
        self.inner.create(collection, id, body).await
    }

    async fn put(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()> {
        self.inner.put(collection, id, body).await
    }

    async fn delete(&mut self, collection: &str, id: &str) -> StoreResult<()> {
        self.inner.delete(collection, id).await
    }

    async fn commit(self) -> StoreResult<()> {
        self.faults.commits.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .faults
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if injected {
            self.inner.rollback().await?;
            return Err(StoreError::conflict("injected conflict"));
        }
        self.inner.commit().await
    }

    async fn rollback(self) -> StoreResult<()> {
        self.inner.rollback().await
    }
}
