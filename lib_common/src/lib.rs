// Declare the modules, gated by the features in Cargo.toml
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;

// Re-export the tracking core
#[cfg(feature = "core")]
pub use crate::core::*;
