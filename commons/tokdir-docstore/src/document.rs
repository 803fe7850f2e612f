use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::StoreResult;

/// Commit sequence number assigned to a document by its last write.
pub type Version = u64;

/// A stored record: opaque id, store-assigned version and a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub version: Version,
    pub body: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, version: Version, body: Value) -> Self {
        Self {
            id: id.into(),
            version,
            body,
        }
    }

    /// Deserialize the body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Look up a top-level field of the body
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

/// Serialize a typed record into a document body
pub fn encode<T: Serialize>(record: &T) -> StoreResult<Value> {
    Ok(serde_json::to_value(record)?)
}
