use std::sync::Arc;

use async_trait::async_trait;
use tokdir_docstore::{DocumentStore, DocumentTransaction};
use tracing::{debug, error, info};

use crate::{
    metrics, DirectoryConfig, DirectoryError, RetryPolicy, ShardReader, ShardStore,
    TokenScan, TokenShard, TxnBody, TxnRunner,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum RegisterOutcome {
    Unchanged { shard_id: String },
    Replaced { shard_id: String },
    Appended { shard_id: String },
    Created { shard_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnregisterOutcome {
    Removed { shard_id: String },
    ShardDropped { shard_id: String },
}

/// Device -> push token directory sharded over bounded-capacity records.
pub struct TokenDirectory<S> {
    runner: TxnRunner<S>,
    reader: ShardReader<S>,
    store: Arc<S>,
    config: DirectoryConfig,
}

impl<S: DocumentStore> TokenDirectory<S> {
    pub fn new(
        store: Arc<S>,
        config: DirectoryConfig,
    ) -> Result<Self, DirectoryError> {
        config.validate()?;
        Ok(Self {
            runner: TxnRunner::new(
                store.clone(),
                RetryPolicy::from_config(&config),
            ),
            reader: ShardReader::new(
                store.clone(),
                config.shard_collection.clone(),
            ),
            store,
            config,
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn reader(&self) -> &ShardReader<S> {
        &self.reader
    }

    /// Register `token` for `device`, replacing any previous token.
    /// Registering the same pair again is a no-op.
    pub async fn register_token(
        &self,
        device: &str,
        token: &str,
    ) -> Result<(), DirectoryError> {
        validate_id("device id", device, self.config.max_device_bytes)?;
        validate_id("token", token, self.config.max_token_bytes)?;
        let body = RegisterToken {
            device,
            token,
            capacity: self.config.shard_capacity,
            collection: &self.config.shard_collection,
        };
        match self.runner.run("register_token", &body).await? {
            RegisterOutcome::Unchanged { shard_id } => {
                debug!(device, shard = %shard_id, "same token, no update")
            }
            RegisterOutcome::Replaced { shard_id } => {
                debug!(device, shard = %shard_id, "token updated")
            }
            RegisterOutcome::Appended { shard_id } => {
                debug!(device, shard = %shard_id, "token added")
            }
            RegisterOutcome::Created { shard_id } => {
                info!(device, shard = %shard_id, "token added to new shard")
            }
        }
        Ok(())
    }

    /// Remove `device` from the directory. Fails with `NotFound` when it
    /// is not registered.
    pub async fn unregister_token(
        &self,
        device: &str,
    ) -> Result<(), DirectoryError> {
        validate_id("device id", device, self.config.max_device_bytes)?;
        let body = UnregisterToken {
            device,
            capacity: self.config.shard_capacity,
            collection: &self.config.shard_collection,
        };
        match self.runner.run("unregister_token", &body).await? {
            UnregisterOutcome::Removed { shard_id } => {
                debug!(device, shard = %shard_id, "token deleted")
            }
            UnregisterOutcome::ShardDropped { shard_id } => {
                info!(device, shard = %shard_id, "token deleted, empty shard removed")
            }
        }
        Ok(())
    }

    /// Current token of `device` from committed state
    pub async fn lookup_token(
        &self,
        device: &str,
    ) -> Result<Option<String>, DirectoryError> {
        validate_id("device id", device, self.config.max_device_bytes)?;
        let shards = self.reader.find_by_device(device).await?;
        Ok(single_shard(device, shards)?
            .and_then(|shard| shard.token_of(device).map(str::to_string)))
    }

    /// Lazy full scan in batches of `batch_size` pairs. Each call starts
    /// from the beginning.
    pub fn scan_all(
        &self,
        batch_size: usize,
    ) -> Result<TokenScan<S>, DirectoryError> {
        if batch_size == 0 {
            return Err(DirectoryError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(TokenScan::new(
            self.reader.clone(),
            batch_size,
            self.config.scan_page_shards,
        ))
    }

    pub async fn shard_count(&self) -> Result<u64, DirectoryError> {
        Ok(self.reader.count().await?)
    }

    pub async fn health(&self) -> Result<(), DirectoryError> {
        Ok(self.store.health().await?)
    }
}

/// Ids are bounded by their JSON-encoded size, which is what counts
/// against the store's record limit.
fn validate_id(
    what: &str,
    value: &str,
    max_bytes: usize,
) -> Result<(), DirectoryError> {
    if value.is_empty() {
        return Err(DirectoryError::InvalidArgument(format!(
            "{} cannot be empty",
            what
        )));
    }
    let encoded = serde_json::to_string(value)
        .map_err(|e| DirectoryError::InvalidArgument(e.to_string()))?
        .len();
    if encoded > max_bytes {
        return Err(DirectoryError::InvalidArgument(format!(
            "{} is {} bytes encoded, limit is {}",
            what, encoded, max_bytes
        )));
    }
    Ok(())
}

/// Collapse a by-device lookup. More than one hit means the global
/// uniqueness of devices is broken; that is reported, never merged.
fn single_shard(
    device: &str,
    mut shards: Vec<TokenShard>,
) -> Result<Option<TokenShard>, DirectoryError> {
    match shards.len() {
        0 => Ok(None),
        1 => Ok(shards.pop()),
        _ => {
            let ids: Vec<String> = shards.into_iter().map(|s| s.id).collect();
            metrics::inc_consistency_fault();
            error!(device, shards = ?ids, "device registered in more than one shard");
            Err(DirectoryError::ConsistencyFault {
                device: device.to_string(),
                shards: ids,
                reason: "device present in more than one shard".to_string(),
            })
        }
    }
}

fn checked(
    device: &str,
    shard: &TokenShard,
    capacity: u32,
) -> Result<usize, DirectoryError> {
    let fault = |reason: String| {
        metrics::inc_consistency_fault();
        error!(device, shard = %shard.id, %reason, "corrupt token shard");
        DirectoryError::ConsistencyFault {
            device: device.to_string(),
            shards: vec![shard.id.clone()],
            reason,
        }
    };
    shard.check(capacity).map_err(fault)?;
    shard
        .position(device)
        .ok_or_else(|| fault("matched shard does not list the device".to_string()))
}

/// Open shards read per registration. Corrupt ones among them are
/// skipped, so a few bad records cannot block new devices.
const CAPACITY_CANDIDATES: usize = 8;

struct RegisterToken<'a> {
    device: &'a str,
    token: &'a str,
    capacity: u32,
    collection: &'a str,
}

#[async_trait]
impl<'a, T: DocumentTransaction> TxnBody<T> for RegisterToken<'a> {
    type Output = RegisterOutcome;

    async fn apply(&self, tx: &mut T) -> Result<RegisterOutcome, DirectoryError> {
        let mut shards = ShardStore::new(tx, self.collection);
        let found = shards.find_by_device(self.device).await?;

        if let Some(mut shard) = single_shard(self.device, found)? {
            let idx = checked(self.device, &shard, self.capacity)?;
            if shard.tokens[idx] == self.token {
                return Ok(RegisterOutcome::Unchanged { shard_id: shard.id });
            }
            shard.tokens[idx] = self.token.to_string();
            shards.save(&shard).await?;
            return Ok(RegisterOutcome::Replaced { shard_id: shard.id });
        }

        let candidates = shards.find_with_capacity(CAPACITY_CANDIDATES).await?;
        let open = candidates.into_iter().find(|shard| {
            match shard.check(self.capacity) {
                Ok(()) => true,
                Err(reason) => {
                    metrics::inc_consistency_fault();
                    error!(
                        shard = %shard.id,
                        %reason,
                        "corrupt token shard, not appending to it"
                    );
                    false
                }
            }
        });
        match open {
            Some(mut shard) => {
                shard.push(self.device, self.token);
                shards.save(&shard).await?;
                Ok(RegisterOutcome::Appended { shard_id: shard.id })
            }
            None => {
                let shard = TokenShard::with_entry(
                    self.device,
                    self.token,
                    self.capacity,
                );
                let shard = shards.create(shard).await?;
                Ok(RegisterOutcome::Created { shard_id: shard.id })
            }
        }
    }
}

struct UnregisterToken<'a> {
    device: &'a str,
    capacity: u32,
    collection: &'a str,
}

#[async_trait]
impl<'a, T: DocumentTransaction> TxnBody<T> for UnregisterToken<'a> {
    type Output = UnregisterOutcome;

    async fn apply(&self, tx: &mut T) -> Result<UnregisterOutcome, DirectoryError> {
        let mut shards = ShardStore::new(tx, self.collection);
        let found = shards.find_by_device(self.device).await?;
        let Some(mut shard) = single_shard(self.device, found)? else {
            return Err(DirectoryError::NotFound(self.device.to_string()));
        };

        let idx = checked(self.device, &shard, self.capacity)?;
        shard.swap_remove(idx);
        if shard.is_empty() {
            shards.delete(&shard.id).await?;
            Ok(UnregisterOutcome::ShardDropped { shard_id: shard.id })
        } else {
            shards.save(&shard).await?;
            Ok(UnregisterOutcome::Removed { shard_id: shard.id })
        }
    }
}
