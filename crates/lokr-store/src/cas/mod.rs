//! Content-addressable storage
//!
//! One physical blob per fingerprint, shared by every logical file with the
//! same bytes and kept alive by a reference count in the metadata store.

pub mod store;
pub mod sweep;


pub use store::{ContentStore, ReleaseOutcome, DEFAULT_BACKEND_TIMEOUT};
pub use sweep::SweepReport;
