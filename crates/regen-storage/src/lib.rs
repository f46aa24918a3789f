//! Storage abstraction for regen pipeline state.
//!
//! Provides the [`RecordStore`] trait defining the relation-scoped key-value
//! contract that all backends implement, plus [`InMemoryStore`] and
//! [`SqliteStore`] as first-class backends.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: Record alias and Criteria exact-match filters
//! - [`traits`]: RecordStore trait definition and exclusive sections
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: SQL migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
mod locks;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{RecordStore, Section};
pub use types::{Criteria, Record};
