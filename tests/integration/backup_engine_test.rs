//! End-to-end properties of the backup engine against a real filesystem.

use std::io::Read;
use std::path::PathBuf;

use flate2::read::GzDecoder;
use invhub_backup::{BackupError, BackupManager, DatastoreLock, Verification};

use crate::helpers::{backup_config, corrupt_one_byte, pseudo_random_bytes, write_datastore};

fn gunzip(path: &std::path::Path) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(std::fs::File::open(path).unwrap())
        .read_to_end(&mut out)
        .unwrap();
    out
}

#[tokio::test]
async fn test_verify_after_create_is_verified() {
    let dir = tempfile::tempdir().unwrap();
    let config = backup_config(dir.path(), "inventory");
    write_datastore(&config, b"sku,qty\nA-1,4\nB-2,9\n");
    let manager = BackupManager::open(&config).await.unwrap();

    let snapshot = manager.create_snapshot("alice").await.unwrap();
    let verification = manager.verify(snapshot.name.as_str()).await.unwrap();

    assert!(verification.is_verified(), "got {verification:?}");
    assert_eq!(snapshot.created_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_listing_follows_archives_not_sidecars() {
    let dir = tempfile::tempdir().unwrap();
    let first = backup_config(dir.path(), "first");
    let second = backup_config(dir.path(), "second");
    write_datastore(&first, b"inventory rows");
    let lock = DatastoreLock::new(first.datastore_path());
    let a = BackupManager::with_lock(&first, lock.clone()).await.unwrap();
    let b = BackupManager::with_lock(&second, lock).await.unwrap();

    let kept = a.create_snapshot("ops").await.unwrap();
    let gone = b.create_snapshot("ops").await.unwrap();

    // A snapshot survives losing its sidecars, but not its archive.
    std::fs::remove_file(&kept.metadata_path).unwrap();
    std::fs::remove_file(&kept.checksum_path).unwrap();
    std::fs::remove_file(&gone.archive_path).unwrap();

    let names: Vec<String> = a
        .list_snapshots()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name.to_string())
        .collect();
    assert_eq!(names, vec![kept.name.to_string()]);

    let listed = a.get_snapshot(kept.name.as_str()).await.unwrap();
    assert!(!listed.has_metadata);
    assert!(!listed.has_checksum);
    assert_eq!(listed.size_bytes, std::fs::metadata(&kept.archive_path).unwrap().len());
}

#[tokio::test]
async fn test_restore_round_trip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = backup_config(dir.path(), "inventory");
    let original = pseudo_random_bytes(1024 * 1024, 7);
    write_datastore(&config, &original);
    let manager = BackupManager::open(&config).await.unwrap();

    let snapshot = manager.create_snapshot("alice").await.unwrap();
    write_datastore(&config, b"rows edited after the snapshot");

    let outcome = manager.restore(snapshot.name.as_str(), "alice").await.unwrap();

    assert!(outcome.restart_required);
    assert_eq!(outcome.restored_bytes, original.len() as u64);
    assert_eq!(std::fs::read(&config.datastore_path).unwrap(), original);
}

#[tokio::test]
async fn test_corrupt_archive_never_touches_datastore() {
    let dir = tempfile::tempdir().unwrap();
    let config = backup_config(dir.path(), "inventory");
    write_datastore(&config, b"snapshot contents");
    let manager = BackupManager::open(&config).await.unwrap();

    let snapshot = manager.create_snapshot("alice").await.unwrap();
    write_datastore(&config, b"live contents");
    corrupt_one_byte(&snapshot.archive_path);

    let verification = manager.verify(snapshot.name.as_str()).await.unwrap();
    assert!(matches!(verification, Verification::Mismatch { .. }));

    let err = manager
        .restore(snapshot.name.as_str(), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::ChecksumMismatch { .. }), "got {err:?}");
    assert_eq!(std::fs::read(&config.datastore_path).unwrap(), b"live contents");
}

#[tokio::test]
async fn test_delete_removes_snapshot_from_listing() {
    let dir = tempfile::tempdir().unwrap();
    let config = backup_config(dir.path(), "inventory");
    write_datastore(&config, b"rows");
    let manager = BackupManager::open(&config).await.unwrap();

    let snapshot = manager.create_snapshot("alice").await.unwrap();
    let name = snapshot.name.to_string();

    let report = manager.delete_snapshot(&name).await.unwrap();
    assert!(report.is_complete());
    assert!(!snapshot.archive_path.exists());
    assert!(!snapshot.metadata_path.exists());
    assert!(!snapshot.checksum_path.exists());
    assert!(manager.list_snapshots().await.unwrap().is_empty());

    let again = manager.delete_snapshot(&name).await.unwrap_err();
    assert!(matches!(again, BackupError::SnapshotNotFound { .. }));
}

#[tokio::test]
async fn test_large_datastore_snapshot_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = backup_config(dir.path(), "inventory");
    let content = pseudo_random_bytes(10 * 1024 * 1024, 42);
    write_datastore(&config, &content);
    let manager = BackupManager::open(&config).await.unwrap();

    let snapshot = manager.create_snapshot("alice").await.unwrap();

    assert!(snapshot.archive_path.exists());
    assert!(snapshot.metadata_path.exists());
    assert!(snapshot.checksum_path.exists());
    assert_eq!(
        snapshot.size_bytes,
        std::fs::metadata(&snapshot.archive_path).unwrap().len()
    );

    let metadata: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&snapshot.metadata_path).unwrap()).unwrap();
    assert_eq!(metadata["size_bytes"], snapshot.size_bytes);
    assert_eq!(metadata["uncompressed_bytes"], content.len() as u64);
    assert_eq!(gunzip(&snapshot.archive_path), content);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_create_and_restore_never_mixes_contents() {
    let dir = tempfile::tempdir().unwrap();
    let seed_config = backup_config(dir.path(), "seed");
    let live_config = backup_config(dir.path(), "inventory");
    let content_a = pseudo_random_bytes(2 * 1024 * 1024, 1);
    let content_b = pseudo_random_bytes(2 * 1024 * 1024, 2);

    // Separate managers with separate lock handles, as the server and the
    // CLI would have; only the lock file next to the datastore is shared.
    write_datastore(&seed_config, &content_a);
    let seeder = BackupManager::open(&seed_config).await.unwrap();
    let seed = seeder.create_snapshot("ops").await.unwrap();

    write_datastore(&live_config, &content_b);
    let live = BackupManager::open(&live_config).await.unwrap();

    let (created, restored) = tokio::join!(
        live.create_snapshot("ops"),
        seeder.restore(seed.name.as_str(), "ops"),
    );
    let created = created.unwrap();
    restored.unwrap();

    let snapshot_content = gunzip(&created.archive_path);
    assert!(
        snapshot_content == content_a || snapshot_content == content_b,
        "snapshot mixes datastore versions"
    );
    assert!(live.verify(created.name.as_str()).await.unwrap().is_verified());

    let datastore: PathBuf = live_config.datastore_path.into();
    assert_eq!(std::fs::read(datastore).unwrap(), content_a);
}
