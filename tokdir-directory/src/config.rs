use envconfig::Envconfig;
use tokdir_docstore::StoreConfig;

use crate::DirectoryError;

/// Fixed JSON framing of a shard record: field names, brackets and `avail`
const SHARD_FRAME_BYTES: usize = 64;

#[derive(Envconfig, Clone, Debug, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Devices per shard record
    #[envconfig(from = "TOKDIR_SHARD_CAPACITY", default = "1000")]
    pub shard_capacity: u32,
    #[envconfig(from = "TOKDIR_MAX_RETRY_ATTEMPTS", default = "100")]
    pub max_retry_attempts: u32,
    #[envconfig(from = "TOKDIR_RETRY_BACKOFF_MS", default = "2")]
    pub retry_backoff_ms: u64,
    #[envconfig(from = "TOKDIR_RETRY_BACKOFF_MAX_MS", default = "100")]
    pub retry_backoff_max_ms: u64,
    /// Deadline for a single store call or transaction body
    #[envconfig(from = "TOKDIR_STORE_TIMEOUT_MS", default = "5000")]
    pub store_timeout_ms: u64,
    #[envconfig(from = "TOKDIR_SHARD_COLLECTION", default = "token")]
    pub shard_collection: String,
    /// Shards fetched per page during a full scan
    #[envconfig(from = "TOKDIR_SCAN_PAGE_SHARDS", default = "8")]
    pub scan_page_shards: usize,
    /// Concurrent push deliveries during fan-out
    #[envconfig(from = "TOKDIR_FANOUT_CONCURRENCY", default = "16")]
    pub fanout_concurrency: usize,
    /// Longest accepted device id, measured JSON-encoded
    #[envconfig(from = "TOKDIR_MAX_DEVICE_BYTES", default = "128")]
    pub max_device_bytes: usize,
    /// Longest accepted push token, measured JSON-encoded
    #[envconfig(from = "TOKDIR_MAX_TOKEN_BYTES", default = "256")]
    pub max_token_bytes: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            shard_capacity: 1000,
            max_retry_attempts: 100,
            retry_backoff_ms: 2,
            retry_backoff_max_ms: 100,
            store_timeout_ms: 5000,
            shard_collection: "token".to_string(),
            scan_page_shards: 8,
            fanout_concurrency: 16,
            max_device_bytes: 128,
            max_token_bytes: 256,
        }
    }
}

impl DirectoryConfig {
    pub fn with_shard_capacity(mut self, capacity: u32) -> Self {
        self.shard_capacity = capacity;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_backoff_ms(mut self, base: u64, max: u64) -> Self {
        self.retry_backoff_ms = base;
        self.retry_backoff_max_ms = max;
        self
    }

    pub fn with_store_timeout_ms(mut self, timeout: u64) -> Self {
        self.store_timeout_ms = timeout;
        self
    }

    pub fn with_scan_page_shards(mut self, shards: usize) -> Self {
        self.scan_page_shards = shards;
        self
    }

    pub fn with_fanout_concurrency(mut self, workers: usize) -> Self {
        self.fanout_concurrency = workers;
        self
    }

    pub fn with_max_entry_bytes(mut self, device: usize, token: usize) -> Self {
        self.max_device_bytes = device;
        self.max_token_bytes = token;
        self
    }

    /// Upper bound on the encoded size of a full shard record
    pub fn max_shard_bytes(&self) -> usize {
        // each pair also costs one comma in both arrays
        let pair = self.max_device_bytes + self.max_token_bytes + 2;
        (self.shard_capacity as usize)
            .saturating_mul(pair)
            .saturating_add(SHARD_FRAME_BYTES)
    }

    /// A full shard must always fit under the store's record limits, so
    /// that `avail` stays the only capacity signal.
    pub fn check_store_limits(
        &self,
        store: &StoreConfig,
    ) -> Result<(), DirectoryError> {
        if self.shard_capacity as usize > store.max_array_len {
            return Err(DirectoryError::Config(format!(
                "shard capacity {} exceeds store array limit {}",
                self.shard_capacity, store.max_array_len
            )));
        }
        if self.max_shard_bytes() > store.max_document_bytes {
            return Err(DirectoryError::Config(format!(
                "a full shard may need {} bytes, store limit is {}",
                self.max_shard_bytes(),
                store.max_document_bytes
            )));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.shard_capacity == 0 {
            return Err(DirectoryError::Config(
                "shard capacity cannot be 0".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(DirectoryError::Config(
                "max retry attempts cannot be 0".to_string(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(DirectoryError::Config(
                "store timeout cannot be 0".to_string(),
            ));
        }
        if self.shard_collection.is_empty() {
            return Err(DirectoryError::Config(
                "shard collection cannot be empty".to_string(),
            ));
        }
        if self.scan_page_shards == 0 {
            return Err(DirectoryError::Config(
                "scan page size cannot be 0".to_string(),
            ));
        }
        if self.fanout_concurrency == 0 {
            return Err(DirectoryError::Config(
                "fan-out concurrency cannot be 0".to_string(),
            ));
        }
        // room for at least `"x"`
        if self.max_device_bytes < 3 || self.max_token_bytes < 3 {
            return Err(DirectoryError::Config(
                "device and token limits must allow a non-empty value".to_string(),
            ));
        }
        Ok(())
    }
}
