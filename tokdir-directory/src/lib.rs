mod config;
mod directory;
mod error;
mod metrics;
pub mod notifier;
mod scan;
mod shard;
mod shard_store;
mod txn;

pub use config::DirectoryConfig;
pub use directory::TokenDirectory;
pub use error::DirectoryError;
pub use scan::{TokenEntry, TokenScan};
pub use shard::{TokenShard, new_shard_id};
pub use shard_store::{ShardReader, ShardStore};
pub use txn::{RetryPolicy, TxnBody, TxnRunner};
