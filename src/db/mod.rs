//! Storage module for upwatch.
//!
//! A small key-value interface with SQLite and in-memory backends, plus the
//! read paths the API serves from.

mod memory;
mod models;
mod queries;
mod store;

pub use memory::*;
pub use models::*;
pub use queries::*;
pub use store::*;
