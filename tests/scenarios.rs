//! End-to-end runs against the in-memory pool and store

use std::path::PathBuf;

use zfs_s3_backup::cancel::CancelToken;
use zfs_s3_backup::collaborators::memory::{
    MemoryPool, MemoryStore, PoolCall, RecordingNotifier, StoreCall,
};
use zfs_s3_backup::collaborators::{Notifier, RawCompressor, ZstdCompressor};
use zfs_s3_backup::config::{BackupConfig, RemoteTarget, Settings};
use zfs_s3_backup::filter::FilterRule;
use zfs_s3_backup::models::{BackupMode, DeletionMode, RunTimestamp};
use zfs_s3_backup::orchestrator::{BackupRunner, Collaborators, RunStage};
use zfs_s3_backup::retention::RetentionPolicy;
use zfs_s3_backup::BackupError;

const LABEL: &str = "20250110_120000";

fn stamp() -> RunTimestamp {
    RunTimestamp::parse(LABEL).unwrap()
}

fn base_config(pool: &str, mode: BackupMode) -> BackupConfig {
    let mut config = BackupConfig::new(
        pool,
        RemoteTarget::Local {
            path: PathBuf::from("/unused"),
        },
    );
    config.mode = mode;
    config
}

fn collaborators<'a>(
    pool: &'a MemoryPool,
    store: &'a MemoryStore,
    notifier: Option<&'a dyn Notifier>,
) -> Collaborators<'a> {
    Collaborators {
        storage: pool,
        compressor: &RawCompressor,
        remote: store,
        notifier,
    }
}

fn destroy_calls(pool: &MemoryPool) -> usize {
    pool.count_calls(|c| matches!(c, PoolCall::Destroy(_)))
}

fn create_calls(pool: &MemoryPool) -> usize {
    pool.count_calls(|c| matches!(c, PoolCall::Create(_)))
}

#[test]
fn scenario_a_whole_pool_post_delete_keeps_newest_three() {
    let pool = MemoryPool::new("tank", &["tank/home", "tank/docs"]);
    let existing: Vec<String> = (1..=5)
        .map(|day| format!("full_tank_2025010{}_000000.zfs.zst", day))
        .collect();
    let store = MemoryStore::with_keys(&existing);

    let mut config = base_config("tank", BackupMode::Full);
    config.retention = Some(RetentionPolicy::new(3, DeletionMode::Post));
    let zstd = ZstdCompressor::new(3);
    let collab = Collaborators {
        storage: &pool,
        compressor: &zstd,
        remote: &store,
        notifier: None,
    };

    let report = BackupRunner::new(&config, collab, CancelToken::new())
        .run_at(stamp())
        .unwrap();

    let new_key = "full_tank_20250110_120000.zfs.zst";
    assert_eq!(
        store.keys(),
        vec![
            "full_tank_20250104_000000.zfs.zst",
            "full_tank_20250105_000000.zfs.zst",
            new_key,
        ]
    );
    assert_eq!(report.evicted(), 3);

    // the upload is a decodable replication stream
    let stored = store.get(new_key).unwrap();
    assert!(!zstd::decode_all(&stored[..]).unwrap().is_empty());

    // deletion happened after the upload
    let calls = store.calls();
    let write_at = calls
        .iter()
        .position(|c| matches!(c, StoreCall::Write(_)))
        .unwrap();
    assert!(calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, StoreCall::Delete(_)))
        .all(|(i, _)| i > write_at));

    assert_eq!(create_calls(&pool), 1);
    assert_eq!(destroy_calls(&pool), 1);
    assert_eq!(pool.snapshot_count(), 0);
}

#[test]
fn scenario_b_split_include_matches_whole_segments() {
    let pool = MemoryPool::new("pool", &["pool/home", "pool/tmp", "pool/docs/photos"]);
    let store = MemoryStore::new();

    let mut config = base_config("pool", BackupMode::Split);
    config.filter = FilterRule::Include(vec!["home".into(), "docs".into()]);

    let report = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap();

    let datasets: Vec<&str> = report.units.iter().map(|u| u.dataset.as_str()).collect();
    assert_eq!(datasets, vec!["pool/docs/photos", "pool/home"]);
    assert_eq!(
        pool.sent(),
        vec![
            format!("pool/docs/photos@{}", LABEL),
            format!("pool/home@{}", LABEL)
        ]
    );
    assert_eq!(
        store.keys(),
        vec![
            "split_pool-docs-photos_20250110_120000.zfs.zst",
            "split_pool-home_20250110_120000.zfs.zst",
        ]
    );
    assert_eq!(pool.snapshot_count(), 0);
}

#[test]
fn scenario_c_whole_pool_with_filter_fails_validation() {
    // from settings: rejected before a config even exists
    let settings = Settings {
        pool: Some("tank".into()),
        remote_url: Some("file:///srv/backups".into()),
        filter_mode: Some("include".into()),
        filter_list: Some(vec!["home".into()]),
        ..Default::default()
    };
    let err = BackupConfig::from_settings(&settings).unwrap_err();
    assert!(matches!(err, BackupError::Config(_)));

    // hand-built: the runner refuses at VALIDATING
    let pool = MemoryPool::new("tank", &["tank/home"]);
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::new();
    let mut config = base_config("tank", BackupMode::Full);
    config.filter = FilterRule::Include(vec!["home".into()]);

    let failure = BackupRunner::new(
        &config,
        collaborators(&pool, &store, Some(&notifier)),
        CancelToken::new(),
    )
    .run_at(stamp())
    .unwrap_err();

    assert_eq!(failure.stage, RunStage::Validating);
    assert!(failure.error.is_config());
    assert!(pool.calls().is_empty());
    assert!(store.calls().is_empty());
    assert_eq!(notifier.messages().len(), 1);
    assert!(notifier.messages()[0].starts_with("tank backup failed during validating: "));
}

#[test]
fn scenario_d_failed_unit_stops_the_run() {
    let pool = MemoryPool::new("tank", &["tank/a", "tank/b", "tank/c"])
        .with_payload(vec![9u8; 2_000_000]);
    pool.fail_send(&format!("tank/b@{}", LABEL), 700_000);
    let store = MemoryStore::new();

    let mut config = base_config("tank", BackupMode::Split);
    config.filter = FilterRule::Include(vec!["a".into(), "b".into(), "c".into()]);

    let failure = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Sending);
    assert_eq!(failure.dataset.as_deref(), Some("tank/b"));
    match &failure.error {
        BackupError::Transfer { unit, message } => {
            assert_eq!(unit, &format!("tank/b@{}", LABEL));
            assert!(message.contains("read stage"), "{}", message);
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert_eq!(
        pool.sent(),
        vec![format!("tank/a@{}", LABEL), format!("tank/b@{}", LABEL)]
    );
    assert_eq!(store.keys(), vec!["split_tank-a_20250110_120000.zfs.zst"]);
    assert_eq!(destroy_calls(&pool), 1);
    assert_eq!(pool.snapshot_count(), 0);
}

#[test]
fn failed_send_destroys_snapshot_exactly_once() {
    let pool = MemoryPool::new("tank", &["tank/home"]);
    let store = MemoryStore::new();
    store.fail_write("connection reset by peer");
    let config = base_config("tank", BackupMode::Full);

    let failure = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Sending);
    assert!(failure.error.to_string().contains("connection reset by peer"));
    assert_eq!(
        pool.calls()
            .iter()
            .filter(|c| **c == PoolCall::Destroy(format!("tank@{}", LABEL)))
            .count(),
        1
    );
    assert_eq!(pool.snapshot_count(), 0);
    assert!(store.keys().is_empty());
}

#[test]
fn failing_notifier_does_not_mask_the_error() {
    let pool = MemoryPool::new("tank", &[]);
    pool.fail_create("pool is busy");
    let store = MemoryStore::new();
    let notifier = RecordingNotifier::failing();
    let config = base_config("tank", BackupMode::Full);

    let failure = BackupRunner::new(
        &config,
        collaborators(&pool, &store, Some(&notifier)),
        CancelToken::new(),
    )
    .run_at(stamp())
    .unwrap_err();

    assert_eq!(failure.stage, RunStage::Snapshotting);
    assert!(matches!(failure.error, BackupError::SnapshotCreate(_)));
    assert_eq!(
        notifier.messages(),
        vec!["tank backup failed during snapshotting: Snapshot create error: pool is busy"]
    );
    assert_eq!(destroy_calls(&pool), 0);
}

#[test]
fn empty_selection_fails_before_snapshot() {
    let pool = MemoryPool::new("tank", &["tank/home"]);
    let store = MemoryStore::new();
    let mut config = base_config("tank", BackupMode::Split);
    config.filter = FilterRule::Include(vec!["media".into()]);

    let failure = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::Selecting);
    assert!(matches!(failure.error, BackupError::EmptySelection(_)));
    assert_eq!(create_calls(&pool), 0);
}

#[test]
fn post_retention_listing_failure_still_cleans_up() {
    let pool = MemoryPool::new("tank", &[]);
    let store = MemoryStore::new();
    store.fail_list("ListObjects denied");
    let mut config = base_config("tank", BackupMode::Full);
    config.retention = Some(RetentionPolicy::new(2, DeletionMode::Post));

    let failure = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap_err();

    assert_eq!(failure.stage, RunStage::PostRetaining);
    assert!(matches!(failure.error, BackupError::Retention(_)));
    // the upload itself succeeded
    assert_eq!(store.keys(), vec!["full_tank_20250110_120000.zfs.zst"]);
    assert_eq!(destroy_calls(&pool), 1);
}

#[test]
fn pre_delete_failure_is_reported_but_not_fatal() {
    let pool = MemoryPool::new("tank", &[]);
    let store = MemoryStore::with_keys(&[
        "full_tank_20250101_000000.zfs.zst",
        "full_tank_20250102_000000.zfs.zst",
    ]);
    store.fail_delete("full_tank_20250101_000000.zfs.zst");
    let mut config = base_config("tank", BackupMode::Full);
    config.retention = Some(RetentionPolicy::new(2, DeletionMode::Pre));

    let report = BackupRunner::new(&config, collaborators(&pool, &store, None), CancelToken::new())
        .run_at(stamp())
        .unwrap();

    assert_eq!(
        report.failed_deletes()[0].0,
        "full_tank_20250101_000000.zfs.zst"
    );
    assert_eq!(store.keys().len(), 3);
    assert_eq!(pool.snapshot_count(), 0);
}
