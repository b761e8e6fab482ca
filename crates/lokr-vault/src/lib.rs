//! # lokr-vault
//!
//! The file vault proper: logical files over the deduplicating content
//! store, per-user quotas, and sharing.
//!
//! ## Modules
//!
//! - `registry`: upload and delete protocols with rollback
//! - `quota`: per-user byte accounting
//! - `sharing`: public tokens, per-user grants and access checks
//! - `reconcile`: repair of derived counters
//! - `vault`: the [`Vault`] facade

pub mod quota;
pub mod reconcile;
pub mod registry;
pub mod sharing;
pub mod vault;

pub use quota::{QuotaLedger, DEFAULT_QUOTA_BYTES};
pub use reconcile::ReconcileReport;
pub use registry::{FileRegistry, UploadOptions, UploadRequest};
pub use sharing::{permits, AccessPolicy, PublicShare, SharingService};
pub use vault::{ResolveTarget, ResolvedFile, Vault, VaultSettings, DEFAULT_ORPHAN_BATCH};
