//! Quota ledger
//!
//! Per-user byte accounting. Every logical file is charged its full size,
//! whether or not its bytes were already stored for someone else.

use lokr_core::error::{LokrError, LokrResult};
use lokr_core::types::{User, UserId};
use lokr_store::metadata::MetadataStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Default quota for users registered without an explicit one (1 GiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct QuotaLedger {
    metadata: Arc<dyn MetadataStore>,
    default_quota: u64,
}

impl std::fmt::Debug for QuotaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaLedger")
            .field("default_quota", &self.default_quota)
            .finish()
    }
}

impl QuotaLedger {
    pub fn new(metadata: Arc<dyn MetadataStore>, default_quota: u64) -> Self {
        Self {
            metadata,
            default_quota,
        }
    }

    pub fn default_quota(&self) -> u64 {
        self.default_quota
    }

    /// Register a user with `quota` bytes (or the default)
    pub async fn register(&self, user: &UserId, quota: Option<u64>) -> LokrResult<User> {
        let record = User::new(user.clone(), quota.unwrap_or(self.default_quota));
        self.metadata.insert_user(&record).await?;
        info!("Registered user {} with quota {}", user, record.storage_quota);
        Ok(record)
    }

    /// Current usage and quota for a user
    pub async fn usage(&self, user: &UserId) -> LokrResult<User> {
        self.metadata
            .get_user(user)
            .await?
            .ok_or_else(|| LokrError::not_found(format!("user {}", user)))
    }

    pub async fn set_quota(&self, user: &UserId, quota: u64) -> LokrResult<()> {
        if !self.metadata.set_storage_quota(user, quota).await? {
            return Err(LokrError::not_found(format!("user {}", user)));
        }
        Ok(())
    }

    /// `used + delta <= quota`; a negative delta is always allowed
    pub async fn can_charge(&self, user: &UserId, delta: i64) -> LokrResult<bool> {
        Ok(self.usage(user).await?.can_charge(delta))
    }

    /// Check and charge `bytes` in one atomic step. Returns the new usage.
    ///
    /// Concurrent reservations can never push usage past the quota.
    pub async fn reserve(&self, user: &UserId, bytes: u64) -> LokrResult<u64> {
        if let Some(used) = self.metadata.reserve_storage(user, bytes).await? {
            debug!("Reserved {} bytes for {} (now {})", bytes, user, used);
            return Ok(used);
        }
        let current = self.usage(user).await?;
        Err(LokrError::QuotaExceeded {
            user: user.to_string(),
            requested: bytes,
            available: current.available(),
        })
    }

    /// Apply `used += delta`, floored at zero. Returns the new usage.
    pub async fn charge(&self, user: &UserId, delta: i64) -> LokrResult<u64> {
        let used = self
            .metadata
            .adjust_storage_used(user, delta)
            .await?
            .ok_or_else(|| LokrError::not_found(format!("user {}", user)))?;
        debug!("Charged {} bytes to {} (now {})", delta, user, used);
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lokr_store::MemoryMetadataStore;
    use proptest::prelude::*;
    use proptest::test_runner::Config as ProptestConfig;

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(Arc::new(MemoryMetadataStore::new()), 100)
    }

    #[tokio::test]
    async fn test_register_uses_default_quota() {
        let ledger = ledger();
        let alice = UserId::new("alice");

        let user = ledger.register(&alice, None).await.unwrap();
        assert_eq!(user.storage_quota, 100);
        assert_eq!(user.storage_used, 0);

        let err = ledger.register(&alice, Some(5)).await.unwrap_err();
        assert!(matches!(err, LokrError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_can_charge_boundaries() {
        let ledger = ledger();
        let alice = UserId::new("alice");
        ledger.register(&alice, None).await.unwrap();
        ledger.charge(&alice, 90).await.unwrap();

        assert!(ledger.can_charge(&alice, 10).await.unwrap());
        assert!(!ledger.can_charge(&alice, 11).await.unwrap());
        assert!(ledger.can_charge(&alice, -1_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_charge_floors_at_zero() {
        let ledger = ledger();
        let bob = UserId::new("bob");
        ledger.register(&bob, Some(50)).await.unwrap();

        assert_eq!(ledger.charge(&bob, 20).await.unwrap(), 20);
        assert_eq!(ledger.charge(&bob, -30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let ledger = ledger();
        let ghost = UserId::new("ghost");

        assert!(matches!(
            ledger.can_charge(&ghost, 1).await.unwrap_err(),
            LokrError::NotFound { .. }
        ));
        assert!(ledger.charge(&ghost, 1).await.is_err());
        assert!(ledger.set_quota(&ghost, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_set_quota() {
        let ledger = ledger();
        let carol = UserId::new("carol");
        ledger.register(&carol, None).await.unwrap();
        ledger.set_quota(&carol, 5_000).await.unwrap();
        assert_eq!(ledger.usage(&carol).await.unwrap().storage_quota, 5_000);
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing() {
        let ledger = ledger();
        let dana = UserId::new("dana");
        ledger.register(&dana, None).await.unwrap();

        assert_eq!(ledger.reserve(&dana, 70).await.unwrap(), 70);
        match ledger.reserve(&dana, 31).await.unwrap_err() {
            LokrError::QuotaExceeded {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 31);
                assert_eq!(available, 30);
            }
            other => panic!("expected quota error, got {other:?}"),
        }
        assert_eq!(ledger.usage(&dana).await.unwrap().storage_used, 70);
        assert_eq!(ledger.reserve(&dana, 30).await.unwrap(), 100);

        assert!(matches!(
            ledger.reserve(&UserId::new("ghost"), 1).await.unwrap_err(),
            LokrError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reserves_stay_within_quota() {
        let ledger = ledger();
        let erin = UserId::new("erin");
        ledger.register(&erin, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            let erin = erin.clone();
            handles.push(tokio::spawn(async move { ledger.reserve(&erin, 40).await }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
        assert_eq!(ledger.usage(&erin).await.unwrap().storage_used, 80);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_usage_is_floored_running_sum(deltas in prop::collection::vec(-500i64..500, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let ledger = ledger();
                let dave = UserId::new("dave");
                ledger.register(&dave, None).await.unwrap();

                let mut expected: u64 = 0;
                for delta in deltas {
                    expected = if delta < 0 {
                        expected.saturating_sub(delta.unsigned_abs())
                    } else {
                        expected + delta as u64
                    };
                    assert_eq!(ledger.charge(&dave, delta).await.unwrap(), expected);
                }
            });
        }
    }
}
