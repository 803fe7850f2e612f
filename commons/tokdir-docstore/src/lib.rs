pub mod backends;
pub mod config;
pub mod document;
pub mod error;
pub mod query;
pub mod traits;

pub use config::*;
pub use document::*;
pub use error::*;
pub use query::*;
pub use traits::*;

#[cfg(feature = "memory")]
pub use backends::memory::{MemoryDocumentStore, MemoryTransaction};
