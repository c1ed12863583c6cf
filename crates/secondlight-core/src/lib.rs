//! # secondlight-core
//!
//! Core types, traits, and abstractions for Second Light.
//!
//! This crate provides the document lifecycle state machine, the analysis
//! result entities, and the repository/backend traits that the database,
//! inference, and analysis crates implement or consume.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Generate a new time-ordered UUIDv7.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
