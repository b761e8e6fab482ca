//! Unit tests for CLI commands.

use super::*;
use crate::ShareCommand;
use lokr_core::types::{FileId, Permission};
use std::fs;
use tempfile::TempDir;

/// Create a temporary directory for testing
fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test command context in a temporary directory
fn create_test_context(temp_dir: &TempDir) -> CommandContext {
    let cwd = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf()).expect("temp dir is not UTF-8");
    CommandContext::in_dir(cwd)
}

fn as_user(mut ctx: CommandContext, user: &str) -> CommandContext {
    ctx.user = Some(user.parse().expect("valid user id"));
    ctx
}

/// Initialize a vault in `temp_dir` with alice and bob registered
async fn initialized(temp_dir: &TempDir) -> CommandContext {
    let ctx = create_test_context(temp_dir);
    init::execute(false, &ctx).await.expect("init succeeds");
    let vault = ctx.open_vault().await.expect("vault opens");
    vault.register_user(&"alice".parse().unwrap(), None).await.unwrap();
    vault.register_user(&"bob".parse().unwrap(), Some(64)).await.unwrap();
    as_user(ctx, "alice")
}

#[tokio::test]
async fn test_init_command_empty_directory() {
    let temp_dir = create_temp_dir();
    let ctx = create_test_context(&temp_dir);

    init::execute(false, &ctx).await.unwrap();

    let config = fs::read_to_string(temp_dir.path().join("lokr.toml")).unwrap();
    assert!(config.starts_with("# Lokr vault configuration"));
    assert!(config.contains("[storage]"));
    assert!(temp_dir.path().join(".lokr/.gitignore").exists());
    assert!(temp_dir.path().join(".lokr/metadata.db").exists());
}

#[tokio::test]
async fn test_init_command_existing_lokr_toml() {
    let temp_dir = create_temp_dir();
    let ctx = create_test_context(&temp_dir);
    fs::write(temp_dir.path().join("lokr.toml"), "[quota]\ndefault_bytes = 42\n").unwrap();

    init::execute(false, &ctx).await.unwrap();
    let config = fs::read_to_string(temp_dir.path().join("lokr.toml")).unwrap();
    assert_eq!(config, "[quota]\ndefault_bytes = 42\n");

    init::execute(true, &ctx).await.unwrap();
    let config = fs::read_to_string(temp_dir.path().join("lokr.toml")).unwrap();
    assert!(config.starts_with("# Lokr vault configuration"));
}

#[test]
fn test_backend_settings_mapping() {
    let mut config = LokrToml::default();
    config.storage.root = Utf8PathBuf::from("/srv/lokr/blobs");
    match backend_settings(&config).unwrap() {
        BackendSettings::Local { root } => assert_eq!(root, Utf8PathBuf::from("/srv/lokr/blobs")),
        other => panic!("expected local backend, got {:?}", other),
    }

    config.storage.backend = BackendKind::Object;
    let err = backend_settings(&config).unwrap_err();
    assert!(matches!(err, LokrError::ConfigValidation { ref field, .. } if field == "storage.object"));
}

#[test]
fn test_vault_settings_mapping() {
    let mut config = LokrToml::default();
    config.quota.default_bytes = 2048;
    config.maintenance.orphan_batch = 7;
    config.maintenance.verify_blobs = true;

    let settings = vault_settings(&config);
    assert_eq!(settings.default_quota_bytes, 2048);
    assert_eq!(settings.orphan_batch, 7);
    assert!(settings.verify_blobs);
    assert_eq!(settings.public_base_url, config.sharing.public_base_url);
}

#[test]
fn test_sqlite_file() {
    assert_eq!(
        sqlite_file("sqlite:///var/lib/lokr/metadata.db"),
        Some(Utf8Path::new("/var/lib/lokr/metadata.db"))
    );
    assert_eq!(
        sqlite_file("sqlite://.lokr/metadata.db?mode=rwc"),
        Some(Utf8Path::new(".lokr/metadata.db"))
    );
    assert_eq!(sqlite_file("sqlite::memory:"), None);
    assert_eq!(sqlite_file("sqlite://:memory:"), None);
    assert_eq!(sqlite_file("postgres://localhost/lokr"), None);
}

#[test]
fn test_requester_required() {
    let temp_dir = create_temp_dir();
    let ctx = create_test_context(&temp_dir);
    assert!(ctx.requester().unwrap_err().is_validation());

    let ctx = as_user(ctx, "alice");
    assert_eq!(ctx.requester().unwrap().as_str(), "alice");
}

#[test]
fn test_guess_mime() {
    assert_eq!(files::guess_mime(Utf8Path::new("notes.txt"), b"hello"), "text/plain");
    assert_eq!(files::guess_mime(Utf8Path::new("data.JSON"), b"{}"), "application/json");
    assert_eq!(files::guess_mime(Utf8Path::new("README"), b"plain words"), "text/plain");
    assert_eq!(
        files::guess_mime(Utf8Path::new("blob"), &[0x9f, 0x92, 0x96, 0x00]),
        "application/octet-stream"
    );
    let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d];
    assert_eq!(files::guess_mime(Utf8Path::new("picture.txt"), &png), "image/png");
}

#[tokio::test]
async fn test_upload_get_and_remove() {
    let temp_dir = create_temp_dir();
    let ctx = initialized(&temp_dir).await;
    fs::write(temp_dir.path().join("notes.txt"), "hello lokr\n").unwrap();

    files::upload("notes.txt".into(), None, None, None, &ctx).await.unwrap();

    let vault = ctx.open_vault().await.unwrap();
    let alice = ctx.requester().unwrap();
    let listed = vault.list_files(alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].display_name, "notes.txt");
    assert_eq!(listed[0].mime_type, "text/plain");
    assert_eq!(vault.quota().usage(alice).await.unwrap().storage_used, 11);

    files::get(listed[0].id, Some("copy.txt".into()), &ctx).await.unwrap();
    assert_eq!(fs::read_to_string(temp_dir.path().join("copy.txt")).unwrap(), "hello lokr\n");

    files::remove(listed[0].id, &ctx).await.unwrap();
    assert!(vault.list_files(alice).await.unwrap().is_empty());
    assert_eq!(vault.quota().usage(alice).await.unwrap().storage_used, 0);

    let err = files::remove(listed[0].id, &ctx).await.unwrap_err();
    assert!(matches!(err, LokrError::NotFound { .. }));
}

#[tokio::test]
async fn test_upload_missing_file() {
    let temp_dir = create_temp_dir();
    let ctx = initialized(&temp_dir).await;

    let err = files::upload("absent.bin".into(), None, None, None, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, LokrError::Io { .. }));
}

#[tokio::test]
async fn test_public_share_and_fetch() {
    let temp_dir = create_temp_dir();
    let ctx = initialized(&temp_dir).await;
    fs::write(temp_dir.path().join("report.csv"), "a,b\n1,2\n").unwrap();
    files::upload("report.csv".into(), Some("q3.csv".into()), None, None, &ctx)
        .await
        .unwrap();

    let vault = ctx.open_vault().await.unwrap();
    let file = vault.list_files(ctx.requester().unwrap()).await.unwrap().remove(0);

    share::execute(ShareCommand::Public { id: file.id }, &ctx).await.unwrap();
    let token = vault
        .get_file(file.id, ctx.requester().ok())
        .await
        .unwrap()
        .share_token
        .expect("token issued");

    let anonymous = create_test_context(&temp_dir);
    let url = format!("{}/{}", anonymous.load_config().await.unwrap().config.sharing.public_base_url, token);
    files::fetch(url, Some("fetched.csv".into()), &anonymous).await.unwrap();
    assert_eq!(fs::read_to_string(temp_dir.path().join("fetched.csv")).unwrap(), "a,b\n1,2\n");
    assert_eq!(vault.get_file(file.id, ctx.requester().ok()).await.unwrap().download_count, 1);

    share::execute(ShareCommand::Unpublish { id: file.id }, &ctx).await.unwrap();
    let err = files::fetch(token, Some("again.csv".into()), &anonymous).await.unwrap_err();
    assert!(matches!(err, LokrError::NotFound { .. }));
}

#[tokio::test]
async fn test_grant_lets_grantee_download() {
    let temp_dir = create_temp_dir();
    let ctx = initialized(&temp_dir).await;
    fs::write(temp_dir.path().join("plan.md"), "# plan\n").unwrap();
    files::upload("plan.md".into(), None, None, None, &ctx).await.unwrap();

    let vault = ctx.open_vault().await.unwrap();
    let id: FileId = vault.list_files(ctx.requester().unwrap()).await.unwrap()[0].id;
    let bob = as_user(create_test_context(&temp_dir), "bob");

    let err = files::get(id, Some("denied.md".into()), &bob).await.unwrap_err();
    assert!(matches!(err, LokrError::Forbidden { .. }));

    share::execute(
        ShareCommand::Grant {
            id,
            grantee: "bob".parse().unwrap(),
            permission: Permission::Download,
            expires_in: Some(3600),
        },
        &ctx,
    )
    .await
    .unwrap();
    files::get(id, Some("granted.md".into()), &bob).await.unwrap();
    assert_eq!(fs::read_to_string(temp_dir.path().join("granted.md")).unwrap(), "# plan\n");

    share::execute(
        ShareCommand::Revoke {
            id,
            grantee: "bob".parse().unwrap(),
        },
        &ctx,
    )
    .await
    .unwrap();
    assert!(files::get(id, Some("again.md".into()), &bob).await.is_err());
}

#[tokio::test]
async fn test_reconcile_clean_vault() {
    let temp_dir = create_temp_dir();
    let ctx = initialized(&temp_dir).await;
    fs::write(temp_dir.path().join("a.txt"), "same bytes").unwrap();
    fs::write(temp_dir.path().join("b.txt"), "same bytes").unwrap();
    files::upload("a.txt".into(), None, None, None, &ctx).await.unwrap();
    files::upload("b.txt".into(), None, None, None, &ctx).await.unwrap();

    maintenance::reconcile(true, false, &ctx).await.unwrap();
    maintenance::sweep(&ctx).await.unwrap();

    let vault = ctx.open_vault().await.unwrap();
    assert_eq!(vault.quota().usage(ctx.requester().unwrap()).await.unwrap().storage_used, 20);
}

#[tokio::test]
async fn test_show_version() {
    let temp_dir = create_temp_dir();
    let ctx = create_test_context(&temp_dir);

    let result = show_version(&ctx).await;
    assert!(result.is_ok());
}
