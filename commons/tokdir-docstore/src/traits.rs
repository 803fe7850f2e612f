use async_trait::async_trait;
use serde_json::Value;

use crate::{Document, Query, StoreResult};

/// Document backing store with multi-document optimistic transactions
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Transaction: DocumentTransaction;

    /// Begin a new optimistic transaction
    async fn begin_transaction(&self) -> StoreResult<Self::Transaction>;

    /// Read the latest committed version of a document
    async fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>>;

    /// Evaluate a query against the latest committed state
    async fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>>;

    /// Page through a collection in id order, starting after `start_after`
    async fn list(
        &self,
        collection: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<Document>>;

    /// Number of documents in a collection
    async fn count(&self, collection: &str) -> StoreResult<u64>;

    /// Lightweight connectivity check to the backing store.
    async fn health(&self) -> StoreResult<()>;
}

/// Read-modify-write scope. Every read is recorded and re-validated on
/// commit; a stale read makes `commit` fail with `StoreError::Conflict`.
#[async_trait]
pub trait DocumentTransaction: Send + Sync + Sized {
    /// Get a document, observing this transaction's own pending writes
    async fn get(
        &mut self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Option<Document>>;

    /// Run a query. Queries must precede writes in the same transaction.
    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> StoreResult<Vec<Document>>;

    /// Insert a document that must not exist at commit time
    async fn create(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()>;

    /// Insert or overwrite a document
    async fn put(
        &mut self,
        collection: &str,
        id: &str,
        body: Value,
    ) -> StoreResult<()>;

    /// Remove a document
    async fn delete(&mut self, collection: &str, id: &str) -> StoreResult<()>;

    /// Validate the read set and apply all writes atomically
    async fn commit(self) -> StoreResult<()>;

    /// Discard all pending writes
    async fn rollback(self) -> StoreResult<()>;
}
