//! Core data types for the Lokr vault.
//!
//! This module provides the records persisted by the metadata store:
//! - Identifiers for users and logical files
//! - Content blobs and the references handed out by the content store
//! - Logical files, their visibility, and per-user shares

pub mod blob;
pub mod file;
pub mod ids;
pub mod share;
pub mod user;

// Re-export all public types
pub use blob::{BlobRef, ContentBlob};
pub use file::{LogicalFile, Visibility};
pub use ids::{FileId, UserId};
pub use share::{FileShare, Permission};
pub use user::User;
