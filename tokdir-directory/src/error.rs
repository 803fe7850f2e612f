use tokdir_docstore::StoreError;

use crate::notifier::FanoutReport;

#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("Device `{0}` is not registered")]
    NotFound(String),
    #[error("`{op}` could not commit within {attempts} attempts")]
    RetryBudgetExhausted { op: &'static str, attempts: u32 },
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Consistency fault on device `{device}` (shards {shards:?}): {reason}")]
    ConsistencyFault {
        device: String,
        shards: Vec<String>,
        reason: String,
    },
    #[error("Invalid: {0}")]
    InvalidArgument(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(StoreError),
    /// Some fan-out workers died, so part of the directory was never reached.
    #[error("Fan-out incomplete: {lost_workers} worker(s) lost after {report:?}")]
    FanoutIncomplete {
        lost_workers: usize,
        report: FanoutReport,
    },
}

impl DirectoryError {
    /// Lost an optimistic race; the whole transaction body may run again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DirectoryError::Storage(e) if e.is_conflict())
    }
}

impl From<StoreError> for DirectoryError {
    fn from(value: StoreError) -> Self {
        if value.is_unavailable() {
            DirectoryError::StoreUnavailable(value.to_string())
        } else {
            DirectoryError::Storage(value)
        }
    }
}
