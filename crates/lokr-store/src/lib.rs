//! # lokr-store
//!
//! Deduplicating storage engine for the Lokr vault.
//!
//! - `backend`: raw key→bytes storage (local directory or object store)
//! - `metadata`: blob/file/user/share rows (SQLite or in-memory)
//! - `cas`: the content store tying the two together with reference counts
//!
//! The content store never branches on which backend or metadata store it
//! was given; both are chosen once at startup and injected as trait objects.

pub mod backend;
pub mod cas;
pub mod metadata;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export main types
pub use backend::{open_backend, BackendSettings, BlobBackend, BlobError, ObjectProvider};
pub use cas::{ContentStore, ReleaseOutcome, SweepReport, DEFAULT_BACKEND_TIMEOUT};
pub use metadata::{
    MemoryMetadataStore, MetadataError, MetadataResult, MetadataStore, SqliteMetadataStore,
};

use lokr_core::error::LokrError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, LokrError>;
