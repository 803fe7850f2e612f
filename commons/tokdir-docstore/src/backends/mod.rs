#[cfg(feature = "memory")]
pub mod memory;
