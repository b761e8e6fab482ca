//! # lokr-core
//!
//! Core types and utilities shared across all Lokr crates.
//!
//! This crate provides:
//! - The persisted record types (`ContentBlob`, `LogicalFile`, `User`, `FileShare`)
//! - LokrError enum for unified error handling
//! - The content hasher: fingerprints and declared/sniffed MIME validation
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types and identifiers
//! - `error`: Error types and result aliases
//! - `utils`: Fingerprinting and content-type validation

pub mod error;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{LokrError, LokrResult};
pub use types::{
    BlobRef, ContentBlob, FileId, FileShare, LogicalFile, Permission, User, UserId, Visibility,
};
pub use utils::hash::{fingerprint, Fingerprint};
pub use utils::mime::{check_mime, validate_mime};
