//! Unit tests for sharing authorization

use super::*;
use chrono::Duration;
use lokr_core::types::{ContentBlob, User};
use lokr_core::utils::hash::fingerprint;
use lokr_store::MemoryMetadataStore;

fn file_owned_by(owner: &str, visibility: Visibility) -> LogicalFile {
    let mut file = LogicalFile::new(
        UserId::new(owner),
        fingerprint(b"shared"),
        "doc.pdf".to_string(),
        "application/pdf".to_string(),
        6,
    );
    file.visibility = visibility;
    file
}

async fn service_with_file() -> (SharingService, Arc<dyn MetadataStore>, LogicalFile) {
    let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
    for id in ["alice", "bob", "carol"] {
        metadata.insert_user(&User::new(UserId::new(id), 100)).await.unwrap();
    }
    metadata
        .insert_blob(&ContentBlob::new(fingerprint(b"shared"), 6))
        .await
        .unwrap();
    let file = file_owned_by("alice", Visibility::Private);
    metadata.insert_file(&file).await.unwrap();

    let service = SharingService::new(metadata.clone(), "https://lokr.example/s").unwrap();
    (service, metadata, file)
}

#[test]
fn test_owner_may_do_anything() {
    let file = file_owned_by("alice", Visibility::Private);
    let alice = UserId::new("alice");
    for action in [Permission::View, Permission::Download, Permission::Edit, Permission::Delete] {
        assert!(permits(&file, Some(&alice), action, None, Utc::now()));
    }
}

#[test]
fn test_public_grants_read_only() {
    let file = file_owned_by("alice", Visibility::Public);
    let now = Utc::now();
    assert!(permits(&file, None, Permission::View, None, now));
    assert!(permits(&file, None, Permission::Download, None, now));
    assert!(!permits(&file, None, Permission::Delete, None, now));
    assert!(!permits(&file, Some(&UserId::new("bob")), Permission::Edit, None, now));
}

#[test]
fn test_share_permission_is_exact() {
    let file = file_owned_by("alice", Visibility::Shared);
    let bob = UserId::new("bob");
    let now = Utc::now();
    let view = FileShare::new(file.id, bob.clone(), Permission::View, None);

    assert!(permits(&file, Some(&bob), Permission::View, Some(&view), now));
    assert!(!permits(&file, Some(&bob), Permission::Download, Some(&view), now));

    // A share for someone else grants nothing
    let carol = UserId::new("carol");
    assert!(!permits(&file, Some(&carol), Permission::View, Some(&view), now));

    let expired = FileShare::new(file.id, bob.clone(), Permission::View, Some(now - Duration::seconds(1)));
    assert!(!permits(&file, Some(&bob), Permission::View, Some(&expired), now));
}

#[test]
fn test_public_url_joins_token() {
    let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
    let with_slash = SharingService::new(metadata.clone(), "https://lokr.example/s/").unwrap();
    let without = SharingService::new(metadata.clone(), "https://lokr.example/s").unwrap();

    assert_eq!(with_slash.public_url("abc").unwrap().as_str(), "https://lokr.example/s/abc");
    assert_eq!(without.public_url("abc").unwrap().as_str(), "https://lokr.example/s/abc");

    assert!(SharingService::new(metadata, "not a url").is_err());
}

#[tokio::test]
async fn test_public_share_lifecycle() {
    let (service, metadata, file) = service_with_file().await;
    let alice = UserId::new("alice");

    let share = service.create_public_share(file.id, &alice).await.unwrap();
    assert_eq!(share.token.len(), 22);
    assert!(share.url.as_str().ends_with(&share.token));

    let published = metadata.get_file(file.id).await.unwrap().unwrap();
    assert_eq!(published.visibility, Visibility::Public);
    assert_eq!(published.share_token.as_deref(), Some(share.token.as_str()));

    // Publishing again keeps the token
    let again = service.create_public_share(file.id, &alice).await.unwrap();
    assert_eq!(again.token, share.token);

    service.revoke_public_share(file.id, &alice).await.unwrap();
    let revoked = metadata.get_file(file.id).await.unwrap().unwrap();
    assert_eq!(revoked.visibility, Visibility::Private);
    assert!(revoked.share_token.is_none());
    assert!(metadata.get_file_by_token(&share.token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_only_owner_manages_shares() {
    let (service, _metadata, file) = service_with_file().await;
    let bob = UserId::new("bob");

    assert!(matches!(
        service.create_public_share(file.id, &bob).await.unwrap_err(),
        LokrError::Forbidden { .. }
    ));
    assert!(matches!(
        service
            .share_with_user(file.id, &bob, Permission::View, None, &bob)
            .await
            .unwrap_err(),
        LokrError::Forbidden { .. }
    ));
    assert!(matches!(
        service.create_public_share(FileId::new(), &bob).await.unwrap_err(),
        LokrError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_share_with_user_upserts_and_tracks_visibility() {
    let (service, metadata, file) = service_with_file().await;
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    service
        .share_with_user(file.id, &bob, Permission::View, None, &alice)
        .await
        .unwrap();
    let expiry = Utc::now() + Duration::hours(1);
    let updated = service
        .share_with_user(file.id, &bob, Permission::Download, Some(expiry), &alice)
        .await
        .unwrap();
    assert_eq!(updated.permission, Permission::Download);

    let shares = service.list_shares(file.id, &alice).await.unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0].permission, Permission::Download);
    assert_eq!(
        metadata.get_file(file.id).await.unwrap().unwrap().visibility,
        Visibility::Shared
    );

    service.revoke_share(file.id, &bob, &alice).await.unwrap();
    assert_eq!(
        metadata.get_file(file.id).await.unwrap().unwrap().visibility,
        Visibility::Private
    );
    assert!(matches!(
        service.revoke_share(file.id, &bob, &alice).await.unwrap_err(),
        LokrError::NotFound { .. }
    ));
}

#[tokio::test]
async fn test_share_validation() {
    let (service, _metadata, file) = service_with_file().await;
    let alice = UserId::new("alice");

    let err = service
        .share_with_user(file.id, &alice, Permission::View, None, &alice)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = service
        .share_with_user(
            file.id,
            &UserId::new("bob"),
            Permission::View,
            Some(Utc::now() - Duration::minutes(1)),
            &alice,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = service
        .share_with_user(file.id, &UserId::new("nobody"), Permission::View, None, &alice)
        .await
        .unwrap_err();
    assert!(matches!(err, LokrError::NotFound { .. }));
}

#[tokio::test]
async fn test_access_policy_loads_shares() {
    let (service, metadata, file) = service_with_file().await;
    let policy = AccessPolicy::new(metadata.clone());
    let alice = UserId::new("alice");
    let carol = UserId::new("carol");

    assert!(policy.authorize(&file, Some(&carol), Permission::View).await.is_err());
    assert!(policy.authorize(&file, None, Permission::View).await.is_err());

    service
        .share_with_user(file.id, &carol, Permission::Delete, None, &alice)
        .await
        .unwrap();
    policy.authorize(&file, Some(&carol), Permission::Delete).await.unwrap();
    assert!(matches!(
        policy
            .authorize(&file, Some(&carol), Permission::View)
            .await
            .unwrap_err(),
        LokrError::Forbidden { .. }
    ));
}
