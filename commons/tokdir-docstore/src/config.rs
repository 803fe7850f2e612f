use serde::{Deserialize, Serialize};

/// Firestore-style ceiling on a single record.
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_ARRAY_LEN: usize = 20_000;

/// Limits enforced by a document store on every write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub max_document_bytes: usize,
    pub max_array_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_array_len: DEFAULT_MAX_ARRAY_LEN,
        }
    }
}

impl StoreConfig {
    /// Set the maximum serialized size of one document
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = bytes;
        self
    }

    /// Set the maximum length of any array field
    pub fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_document_bytes == 0 {
            return Err("max_document_bytes cannot be 0".to_string());
        }
        if self.max_array_len == 0 {
            return Err("max_array_len cannot be 0".to_string());
        }
        Ok(())
    }
}
