use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::trace;

use crate::{
    Document, DocumentStore, DocumentTransaction, Query, StoreConfig,
    StoreError, StoreResult, Version,
};

#[derive(Debug, Clone)]
struct StoredDoc {
    version: Version,
    body: Value,
}

/// One collection plus its array-containment index
/// (field -> string element -> document ids).
#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, StoredDoc>,
    array_index: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl Collection {
    fn index_insert(&mut self, id: &str, body: &Value) {
        let Some(fields) = body.as_object() else {
            return;
        };
        for (field, value) in fields {
            let Some(items) = value.as_array() else {
                continue;
            };
            let by_elem = self.array_index.entry(field.clone()).or_default();
            for item in items {
                if let Value::String(s) = item {
                    by_elem.entry(s.clone()).or_default().insert(id.to_string());
                }
            }
        }
    }

    fn index_remove(&mut self, id: &str, body: &Value) {
        let Some(fields) = body.as_object() else {
            return;
        };
        for (field, value) in fields {
            let (Some(items), Some(by_elem)) =
                (value.as_array(), self.array_index.get_mut(field))
            else {
                continue;
            };
            for item in items {
                if let Value::String(s) = item {
                    if let Some(ids) = by_elem.get_mut(s) {
                        ids.remove(id);
                        if ids.is_empty() {
                            by_elem.remove(s);
                        }
                    }
                }
            }
        }
    }

    fn version_of(&self, id: &str) -> Option<Version> {
        self.docs.get(id).map(|d| d.version)
    }

    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let limit = query.limit.unwrap_or(usize::MAX);
        let to_doc = |id: &String, d: &StoredDoc| {
            Document::new(id.clone(), d.version, d.body.clone())
        };
        if let Some((field, elem)) = query.indexed_lookup() {
            let Some(ids) =
                self.array_index.get(field).and_then(|m| m.get(elem))
            else {
                return Vec::new();
            };
            ids.iter()
                .filter_map(|id| self.docs.get(id).map(|d| (id, d)))
                .filter(|(_, d)| query.matches(&d.body))
                .take(limit)
                .map(|(id, d)| to_doc(id, d))
                .collect()
        } else {
            self.docs
                .iter()
                .filter(|(_, d)| query.matches(&d.body))
                .take(limit)
                .map(|(id, d)| to_doc(id, d))
                .collect()
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: HashMap<String, Collection>,
    commit_seq: Version,
}

impl MemoryState {
    fn version_of(&self, collection: &str, id: &str) -> Option<Version> {
        self.collections
            .get(collection)
            .and_then(|c| c.version_of(id))
    }

    fn evaluate(&self, collection: &str, query: &Query) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|c| c.evaluate(query))
            .unwrap_or_default()
    }
}

/// In-memory document store with optimistic transactions
#[derive(Debug, Clone)]
pub struct MemoryDocumentStore {
    state: Arc<RwLock<MemoryState>>,
    config: StoreConfig,
    available: Arc<AtomicBool>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl MemoryDocumentStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            config,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Simulate losing (or regaining) connectivity to the store. While
    /// unavailable every call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        ensure_available(&self.available)
    }
}

fn ensure_available(flag: &AtomicBool) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::unavailable("memory store is offline"))
    }
}

fn check_limits(config: &StoreConfig, id: &str, body: &Value) -> StoreResult<()> {
    let size = serde_json::to_vec(body)?.len();
    if size > config.max_document_bytes {
        return Err(StoreError::DocumentTooLarge {
            id: id.to_string(),
            reason: format!(
                "{} bytes exceeds limit of {}",
                size, config.max_document_bytes
            ),
        });
    }
    if let Some(fields) = body.as_object() {
        for (field, value) in fields {
            if let Some(items) = value.as_array() {
                if items.len() > config.max_array_len {
                    return Err(StoreError::DocumentTooLarge {
                        id: id.to_string(),
                        reason: format!(
                            "array '{}' has {} elements, limit is {}",
                            field,
                            items.len(),
                            config.max_array_len
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    type Transaction = MemoryTransaction;

    async fn begin_transaction(&self) -> StoreResult<Self::Transaction> {
        self.ensure_available()?;
        Ok(MemoryTransaction::new(
            self.state.clone(),
            self.config.clone(),
            self.available.clone(),
        ))
    }

    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .map(|d| Document::new(id, d.version, d.body.clone())))
    }

    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state.evaluate(collection, query))
    }

    async fn list(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Document>> {
        self.ensure_available()?;
        let state = self.state.read().await;
        let Some(col) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let lower = match start_after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(col
            .docs
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, d)| Document::new(id.clone(), d.version, d.body.clone()))
            .collect())
    }

    async fn count(&self, collection: &str) -> StoreResult<u64> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .map(|c| c.docs.len() as u64)
            .unwrap_or(0))
    }

    async fn health(&self) -> StoreResult<()> {
        self.ensure_available()
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Create {
        collection: String,
        id: String,
        body: Value,
    },
    Put {
        collection: String,
        id: String,
        body: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    fn target(&self) -> (&str, &str) {
        match self {
            WriteOp::Create { collection, id, .. }
            | WriteOp::Put { collection, id, .. }
            | WriteOp::Delete { collection, id } => {
                (collection.as_str(), id.as_str())
            }
        }
    }
}

#[derive(Debug)]
struct QueryRead {
    collection: String,
    query: Query,
    ids: Vec<String>,
}

/// Memory store transaction. Writes are buffered until commit; reads are
/// tracked so commit can detect that another transaction got there first.
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    config: StoreConfig,
    available: Arc<AtomicBool>,
    reads: HashMap<(String, String), Option<Version>>,
    queries: Vec<QueryRead>,
    writes: Vec<WriteOp>,
}

impl MemoryTransaction {
    fn new(
        state: Arc<RwLock<MemoryState>>,
        config: StoreConfig,
        available: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            config,
            available,
            reads: HashMap::new(),
            queries: Vec::new(),
            writes: Vec::new(),
        }
    }

    fn record_read(&mut self, collection: &str, id: &str, version: Option<Version>) {
        self.reads
            .entry((collection.to_string(), id.to_string()))
            .or_insert(version);
    }

    fn pending(&self, collection: &str, id: &str) -> Option<&WriteOp> {
        self.writes
            .iter()
            .rev()
            .find(|op| op.target() == (collection, id))
    }

    fn validate(&self, state: &MemoryState) -> StoreResult<()> {
        for ((collection, id), observed) in &self.reads {
            if state.version_of(collection, id) != *observed {
                return Err(StoreError::conflict(format!(
                    "{}/{} changed since read",
                    collection, id
                )));
            }
        }
        for read in &self.queries {
            let now: Vec<String> = state
                .evaluate(&read.collection, &read.query)
                .into_iter()
                .map(|d| d.id)
                .collect();
            if now != read.ids {
                return Err(StoreError::conflict(format!(
                    "query result on {} changed since read",
                    read.collection
                )));
            }
        }
        for op in &self.writes {
            if let WriteOp::Create { collection, id, .. } = op {
                if state.version_of(collection, id).is_some() {
                    return Err(StoreError::AlreadyExists(format!(
                        "{}/{}",
                        collection, id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentTransaction for MemoryTransaction {
    async fn get(
        &mut self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>> {
        ensure_available(&self.available)?;
        if let Some(op) = self.pending(collection, id) {
            return Ok(match op {
                WriteOp::Create { body, .. } | WriteOp::Put { body, .. } => {
                    Some(Document::new(id, 0, body.clone()))
                }
                WriteOp::Delete { .. } => None,
            });
        }

        let doc = {
            let state = self.state.read().await;
            state
                .collections
                .get(collection)
                .and_then(|c| c.docs.get(id))
                .map(|d| Document::new(id, d.version, d.body.clone()))
        };
        self.record_read(collection, id, doc.as_ref().map(|d| d.version));
        Ok(doc)
    }

    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>> {
        ensure_available(&self.available)?;
        if !self.writes.is_empty() {
            return Err(StoreError::invalid_operation(
                "queries must run before any write in a transaction",
            ));
        }
        let docs = {
            let state = self.state.read().await;
            state.evaluate(collection, query)
        };
        for doc in &docs {
            self.record_read(collection, &doc.id, Some(doc.version));
        }
        self.queries.push(QueryRead {
            collection: collection.to_string(),
            query: query.clone(),
            ids: docs.iter().map(|d| d.id.clone()).collect(),
        });
        Ok(docs)
    }

    async fn create(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()> {
        check_limits(&self.config, id, &body)?;
        self.writes.push(WriteOp::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            body,
        });
        Ok(())
    }

    async fn put(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()> {
        check_limits(&self.config, id, &body)?;
        self.writes.push(WriteOp::Put {
            collection: collection.to_string(),
            id: id.to_string(),
            body,
        });
        Ok(())
    }

    async fn delete(&mut self, collection: &str, id: &str) -> StoreResult<()> {
        self.writes.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        ensure_available(&self.available)?;
        let mut guard = self.state.write().await;
        self.validate(&guard)?;
        if self.writes.is_empty() {
            return Ok(());
        }

        let state = &mut *guard;
        state.commit_seq += 1;
        let seq = state.commit_seq;
        for op in self.writes {
            match op {
                WriteOp::Create {
                    collection,
                    id,
                    body,
                }
                | WriteOp::Put {
                    collection,
                    id,
                    body,
                } => {
                    let col = state.collections.entry(collection).or_default();
                    if let Some(old) = col.docs.remove(&id) {
                        col.index_remove(&id, &old.body);
                    }
                    col.index_insert(&id, &body);
                    col.docs.insert(id, StoredDoc { version: seq, body });
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(col) = state.collections.get_mut(&collection) {
                        if let Some(old) = col.docs.remove(&id) {
                            col.index_remove(&id, &old.body);
                        }
                    }
                }
            }
        }
        trace!(seq, "memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        // Nothing has been applied yet
        Ok(())
    }
}
