use std::sync::Arc;

use tokdir_docstore::{
    DocumentStore, DocumentTransaction, Query, StoreResult, encode,
};
use tracing::error;

use crate::metrics;
use crate::shard::{AVAIL_FIELD, DEVICES_FIELD, TokenShard, new_shard_id};

/// Typed accessor over the shard collection, bound to one transaction.
pub struct ShardStore<'t, T> {
    tx: &'t mut T,
    collection: &'t str,
}

impl<'t, T: DocumentTransaction> ShardStore<'t, T> {
    pub fn new(tx: &'t mut T, collection: &'t str) -> Self {
        Self { tx, collection }
    }

    /// Shards whose `devices` contain `device`. A consistent directory
    /// yields at most one; the query stops at two so a duplicate is still
    /// visible to the caller.
    pub async fn find_by_device(
        &mut self,
        device: &str,
    ) -> StoreResult<Vec<TokenShard>> {
        let query = Query::new().array_contains(DEVICES_FIELD, device).limit(2);
        self.tx
            .query(self.collection, &query)
            .await?
            .iter()
            .map(TokenShard::from_document)
            .collect()
    }

    /// Up to `limit` shards with a free slot, first by id. Records that no
    /// longer decode are logged and left out.
    pub async fn find_with_capacity(
        &mut self,
        limit: usize,
    ) -> StoreResult<Vec<TokenShard>> {
        let query = Query::new().greater_than(AVAIL_FIELD, 0).limit(limit);
        let docs = self.tx.query(self.collection, &query).await?;
        Ok(docs
            .iter()
            .filter_map(|doc| match TokenShard::from_document(doc) {
                Ok(shard) => Some(shard),
                Err(e) => {
                    metrics::inc_consistency_fault();
                    error!(shard = %doc.id, error = %e, "undecodable token shard");
                    None
                }
            })
            .collect())
    }

    /// Persist a brand-new shard, assigning an id when it has none
    pub async fn create(&mut self, mut shard: TokenShard) -> StoreResult<TokenShard> {
        if shard.id.is_empty() {
            shard.id = new_shard_id();
        }
        self.tx
            .create(self.collection, &shard.id, encode(&shard)?)
            .await?;
        Ok(shard)
    }

    pub async fn save(&mut self, shard: &TokenShard) -> StoreResult<()> {
        self.tx.put(self.collection, &shard.id, encode(shard)?).await
    }

    pub async fn delete(&mut self, shard_id: &str) -> StoreResult<()> {
        self.tx.delete(self.collection, shard_id).await
    }
}

/// Non-transactional reads of committed shards
pub struct ShardReader<S> {
    store: Arc<S>,
    collection: String,
}

impl<S> Clone for ShardReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection.clone(),
        }
    }
}

impl<S: DocumentStore> ShardReader<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Up to `limit` shards in id order, starting after `start_after`
    pub async fn list_page(
        &self,
        start_after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<TokenShard>> {
        self.store
            .list(&self.collection, start_after, limit)
            .await?
            .iter()
            .map(TokenShard::from_document)
            .collect()
    }

    pub async fn find_by_device(
        &self,
        device: &str,
    ) -> StoreResult<Vec<TokenShard>> {
        let query = Query::new().array_contains(DEVICES_FIELD, device).limit(2);
        self.store
            .query(&self.collection, &query)
            .await?
            .iter()
            .map(TokenShard::from_document)
            .collect()
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.store.count(&self.collection).await
    }
}
