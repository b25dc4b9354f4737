//! Inspectus Common Library
//!
//! Data model, content-addressed material store and the fingerprint rule
//! shared by the execution engine and the CLI.

pub mod error;
pub mod fingerprint;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use fingerprint::{pair_materials, Fingerprint, MaterialPair};
pub use store::MaterialStore;
pub use types::*;

/// Inspectus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
