//! Utility functions and helpers.
//!
//! The content hasher: fingerprinting and declared-type validation.

pub mod hash;
pub mod mime;

// Re-export commonly used utilities
pub use hash::{fingerprint, verify_integrity, Fingerprint};
pub use mime::{check_mime, normalize_mime, sniff_mime, validate_mime};
