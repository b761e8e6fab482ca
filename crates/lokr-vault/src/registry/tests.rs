use super::*;
use lokr_core::error::LokrError;
use lokr_store::metadata::{BlobRepo, MemoryMetadataStore, UserRepo};
use lokr_store::testing::{FaultyBackend, FaultyMetadata};

struct Fixture {
    registry: FileRegistry,
    backend: Arc<FaultyBackend>,
    metadata: Arc<FaultyMetadata>,
}

async fn fixture() -> Fixture {
    let backend = Arc::new(FaultyBackend::in_memory());
    let metadata = Arc::new(FaultyMetadata::new(Arc::new(MemoryMetadataStore::new())));
    let content = Arc::new(ContentStore::new(backend.clone(), metadata.clone()));
    let quota = QuotaLedger::new(metadata.clone(), 100);
    let access = AccessPolicy::new(metadata.clone());
    quota.register(&UserId::new("alice"), None).await.unwrap();
    quota.register(&UserId::new("bob"), Some(8)).await.unwrap();
    Fixture {
        registry: FileRegistry::new(content, quota, access),
        backend,
        metadata,
    }
}

fn text(owner: &str, body: &[u8]) -> UploadRequest {
    UploadRequest::new(UserId::new(owner), "notes.txt", "text/plain", body.to_vec())
}

async fn used(f: &Fixture, user: &str) -> u64 {
    f.metadata
        .get_user(&UserId::new(user))
        .await
        .unwrap()
        .unwrap()
        .storage_used
}

async fn blob_count(f: &Fixture, body: &[u8]) -> Option<u64> {
    f.metadata
        .get_blob(&fingerprint(body))
        .await
        .unwrap()
        .map(|b| b.reference_count)
}

#[test]
fn test_validate_name() {
    assert!(validate_name("report.pdf").is_ok());
    assert!(validate_name("   ").is_err());
    assert!(validate_name("a/b.txt").is_err());
    assert!(validate_name("bad\nname").is_err());
    assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
}

#[tokio::test]
async fn test_upload_charges_and_references() {
    let f = fixture().await;

    let file = f.registry.upload_file(text("alice", b"hello lokr")).await.unwrap();
    assert_eq!(file.byte_size, 10);
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.visibility, lokr_core::types::Visibility::Private);
    assert_eq!(used(&f, "alice").await, 10);
    assert_eq!(blob_count(&f, b"hello lokr").await, Some(1));

    let listed = f.registry.list_files(&UserId::new("alice")).await.unwrap();
    assert_eq!(listed, vec![file]);
}

#[tokio::test]
async fn test_upload_validation_touches_nothing() {
    let f = fixture().await;

    let err = f.registry.upload_file(text("alice", b"")).await.unwrap_err();
    assert!(matches!(err, LokrError::InvalidSize { size: 0 }));

    let png = UploadRequest::new(UserId::new("alice"), "fake.png", "image/png", b"plain words".to_vec());
    let err = f.registry.upload_file(png).await.unwrap_err();
    assert!(matches!(err, LokrError::MimeMismatch { .. }));

    let err = f
        .registry
        .upload_file(UploadRequest::new(UserId::new("alice"), "", "text/plain", b"x".to_vec()))
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(f.backend.store_calls(), 0);
    assert_eq!(used(&f, "alice").await, 0);
}

#[tokio::test]
async fn test_quota_rejection_rolls_back_reference() {
    let f = fixture().await;

    let err = f
        .registry
        .upload_file(text("bob", b"ten bytes!"))
        .await
        .unwrap_err();
    match err {
        LokrError::QuotaExceeded {
            user,
            requested,
            available,
        } => {
            assert_eq!(user, "bob");
            assert_eq!(requested, 10);
            assert_eq!(available, 8);
        }
        other => panic!("expected quota error, got {other:?}"),
    }

    assert_eq!(used(&f, "bob").await, 0);
    // The freshly created blob was released and swept
    assert_eq!(blob_count(&f, b"ten bytes!").await, None);
    assert!(f.registry.list_files(&UserId::new("bob")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_quota_rejection_keeps_shared_blob() {
    let f = fixture().await;
    f.registry.upload_file(text("alice", b"ten bytes!")).await.unwrap();

    assert!(f.registry.upload_file(text("bob", b"ten bytes!")).await.is_err());
    assert_eq!(blob_count(&f, b"ten bytes!").await, Some(1));
}

#[tokio::test]
async fn test_unknown_owner_is_rolled_back() {
    let f = fixture().await;

    let err = f
        .registry
        .upload_file(text("ghost", b"boo"))
        .await
        .unwrap_err();
    assert!(matches!(err, LokrError::NotFound { .. }));
    assert_eq!(blob_count(&f, b"boo").await, None);
}

#[tokio::test]
async fn test_failed_file_insert_rolls_back() {
    let f = fixture().await;
    f.metadata.fail_file_insert(true);

    let err = f.registry.upload_file(text("alice", b"orphan me")).await.unwrap_err();
    assert!(matches!(err, LokrError::StorageFailure { .. }));
    assert_eq!(blob_count(&f, b"orphan me").await, None);
    assert_eq!(used(&f, "alice").await, 0);
}

#[tokio::test]
async fn test_failed_reservation_rolls_back() {
    let f = fixture().await;
    f.metadata.fail_adjust_usage(true);

    let err = f.registry.upload_file(text("alice", b"uncharged")).await.unwrap_err();
    assert!(matches!(err, LokrError::StorageFailure { .. }));
    assert_eq!(blob_count(&f, b"uncharged").await, None);
    assert!(f.registry.list_files(&UserId::new("alice")).await.unwrap().is_empty());

    f.metadata.fail_adjust_usage(false);
    assert_eq!(used(&f, "alice").await, 0);
}

#[tokio::test]
async fn test_concurrent_uploads_respect_quota() {
    let f = fixture().await;

    let mut handles = Vec::new();
    for i in 0..10u8 {
        let registry = f.registry.clone();
        // 20 distinct bytes each, so no upload shares a blob
        let body = vec![b'a' + i; 20];
        handles.push(tokio::spawn(async move {
            registry.upload_file(text("alice", &body)).await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(e) => assert!(matches!(e, LokrError::QuotaExceeded { .. }), "{e:?}"),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(used(&f, "alice").await, 100);
    let files = f.registry.list_files(&UserId::new("alice")).await.unwrap();
    assert_eq!(files.len(), 5);
    // Rejected uploads left no references behind
    assert_eq!(f.metadata.list_blobs().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_abandoned_upload_still_completes() {
    let f = fixture().await;
    f.backend.set_delay(Duration::from_millis(100));

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        f.registry.upload_file(text("alice", b"keep going")),
    )
    .await;
    assert!(abandoned.is_err(), "upload should still be in flight");

    let alice = UserId::new("alice");
    let mut files = Vec::new();
    for _ in 0..50 {
        files = f.registry.list_files(&alice).await.unwrap();
        if !files.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].byte_size, 10);
    assert_eq!(blob_count(&f, b"keep going").await, Some(1));
    assert_eq!(used(&f, "alice").await, 10);
}

#[tokio::test]
async fn test_abandoned_delete_still_completes() {
    let f = fixture().await;
    let alice = UserId::new("alice");
    let file = f.registry.upload_file(text("alice", b"going away")).await.unwrap();
    f.backend.set_delay(Duration::from_millis(100));

    let abandoned =
        tokio::time::timeout(Duration::from_millis(20), f.registry.delete_file(file.id, &alice)).await;
    assert!(abandoned.is_err(), "delete should still be in flight");

    for _ in 0..50 {
        if blob_count(&f, b"going away").await.is_none() && used(&f, "alice").await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(blob_count(&f, b"going away").await, None);
    assert!(f.registry.list_files(&alice).await.unwrap().is_empty());
    assert_eq!(used(&f, "alice").await, 0);
}

#[tokio::test]
async fn test_backend_failure_surfaces_as_storage_failure() {
    let f = fixture().await;
    f.backend.fail_store(true);

    let err = f.registry.upload_file(text("alice", b"unwritable")).await.unwrap_err();
    assert!(matches!(err, LokrError::StorageFailure { .. }));
    assert_eq!(blob_count(&f, b"unwritable").await, None);
    assert_eq!(used(&f, "alice").await, 0);
}

#[tokio::test]
async fn test_upload_deadline() {
    let f = fixture().await;
    f.backend.set_delay(Duration::from_millis(200));

    let request = text("alice", b"slow bytes").with_deadline(Duration::from_millis(20));
    let err = f.registry.upload_file(request).await.unwrap_err();
    assert!(matches!(err, LokrError::StorageFailure { .. }));
    assert_eq!(blob_count(&f, b"slow bytes").await, None);
}

#[tokio::test]
async fn test_delete_releases_and_credits() {
    let f = fixture().await;
    let alice = UserId::new("alice");
    let file = f.registry.upload_file(text("alice", b"short lived")).await.unwrap();

    f.registry.delete_file(file.id, &alice).await.unwrap();
    assert_eq!(used(&f, "alice").await, 0);
    assert_eq!(blob_count(&f, b"short lived").await, None);

    let err = f.registry.delete_file(file.id, &alice).await.unwrap_err();
    assert!(matches!(err, LokrError::NotFound { .. }));
}

#[tokio::test]
async fn test_delete_requires_permission() {
    let f = fixture().await;
    let file = f.registry.upload_file(text("alice", b"mine")).await.unwrap();

    let err = f
        .registry
        .delete_file(file.id, &UserId::new("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, LokrError::Forbidden { .. }));
    assert_eq!(blob_count(&f, b"mine").await, Some(1));
}

#[tokio::test]
async fn test_delete_survives_deferred_blob_cleanup() {
    let f = fixture().await;
    let alice = UserId::new("alice");
    let file = f.registry.upload_file(text("alice", b"sticky")).await.unwrap();
    f.backend.fail_delete(true);

    f.registry.delete_file(file.id, &alice).await.unwrap();
    assert_eq!(used(&f, "alice").await, 0);
    // Left for the sweeper
    assert_eq!(blob_count(&f, b"sticky").await, Some(0));
}

#[tokio::test]
async fn test_get_file_checks_view() {
    let f = fixture().await;
    let file = f.registry.upload_file(text("alice", b"private")).await.unwrap();

    assert!(f.registry.get_file(file.id, Some(&UserId::new("alice"))).await.is_ok());
    assert!(matches!(
        f.registry.get_file(file.id, None).await.unwrap_err(),
        LokrError::Forbidden { .. }
    ));
    assert!(matches!(
        f.registry.get_file(FileId::new(), None).await.unwrap_err(),
        LokrError::NotFound { .. }
    ));
}
