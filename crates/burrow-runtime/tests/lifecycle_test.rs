//! Lifecycle tests that need no privileges: records, reconciliation,
//! logs, and commit against a temporary state and data directory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use burrow_common::config::RuntimeConfig;
use burrow_common::error::BurrowError;
use burrow_common::types::ContainerStatus;
use burrow_runtime::Engine;
use burrow_runtime::state::ContainerRegistry;

fn setup() -> (tempfile::TempDir, RuntimeConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = RuntimeConfig::new(dir.path().join("state"), dir.path().join("data"));
    (dir, config)
}

fn own_pid() -> i32 {
    i32::try_from(std::process::id()).expect("pid")
}

// ── Records ──────────────────────────────────────────────────────────

#[test]
fn records_are_shared_between_registry_and_engine() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let record = registry
        .record(own_pid(), &["sleep".into(), "60".into()], "web", Some("/data:/srv"), "busybox")
        .expect("record");

    let engine = Engine::new(config);
    let loaded = engine.get("web").expect("get");
    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.command, "sleep 60");
    assert_eq!(loaded.volume.as_deref(), Some("/data:/srv"));
    assert!(loaded.is_running());
}

#[test]
fn unnamed_records_are_keyed_by_their_id() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let record = registry
        .record(own_pid(), &["top".into()], "", None, "busybox")
        .expect("record");
    assert_eq!(record.name, record.id.as_str());
    assert!(registry.contains(record.id.as_str()));
}

#[test]
fn listing_survives_a_corrupt_record() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let _ = registry
        .record(own_pid(), &["top".into()], "good", None, "busybox")
        .expect("record");
    std::fs::create_dir_all(config.container_dir("broken")).expect("dir");
    std::fs::write(config.config_file("broken"), "{ not json").expect("write");

    let engine = Engine::new(config);
    let names: Vec<_> = engine
        .list()
        .expect("list")
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, ["good"]);
}

// ── Reconciliation ───────────────────────────────────────────────────

#[test]
fn exited_containers_can_be_removed() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let _ = registry
        .record(i32::MAX - 1, &["true".into()], "done", None, "busybox")
        .expect("record");

    let engine = Engine::new(config);
    assert_eq!(engine.get("done").expect("get").status, ContainerStatus::Exited);
    engine.remove("done").expect("remove");
    assert!(engine.get("done").expect_err("gone").is_not_found());
    assert!(!registry.dir("done").exists());
}

#[test]
fn stopping_an_exited_container_is_rejected() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let _ = registry
        .record(i32::MAX - 1, &["true".into()], "done", None, "busybox")
        .expect("record");

    let engine = Engine::new(config);
    assert!(matches!(
        engine.stop("done"),
        Err(BurrowError::InvalidState { .. })
    ));
}

// ── Logs ─────────────────────────────────────────────────────────────

#[test]
fn logs_of_a_container_without_output_are_empty() {
    let (_dir, config) = setup();
    let _ = ContainerRegistry::new(&config)
        .record(own_pid(), &["sh".into()], "tty", None, "busybox")
        .expect("record");
    assert_eq!(Engine::new(config).logs("tty").expect("logs"), "");
}

#[test]
fn following_a_finished_container_prints_everything_and_returns() {
    let (_dir, config) = setup();
    let registry = ContainerRegistry::new(&config);
    let _ = registry
        .record(i32::MAX - 1, &["echo".into()], "batch", None, "busybox")
        .expect("record");
    std::fs::write(config.log_file("batch"), "line one\nline two\n").expect("log");

    let mut out = Vec::new();
    Engine::new(config)
        .follow_logs("batch", &mut out)
        .expect("follow");
    assert_eq!(String::from_utf8(out).expect("utf8"), "line one\nline two\n");
}

// ── Commit & Images ──────────────────────────────────────────────────

#[test]
fn commit_archives_the_mounted_rootfs_as_an_image() {
    let (_dir, config) = setup();
    let _ = ContainerRegistry::new(&config)
        .record(own_pid(), &["sh".into()], "box", None, "busybox")
        .expect("record");
    let rootfs = config.mnt_root().join("box");
    std::fs::create_dir_all(rootfs.join("etc")).expect("rootfs");
    std::fs::write(rootfs.join("etc/motd"), "hello\n").expect("file");

    let engine = Engine::new(config);
    let archive = engine.commit("box", "snapshot").expect("commit");
    assert!(archive.ends_with("snapshot.tar"));

    let images = engine.images().expect("images");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].name, "snapshot");
    assert!(images[0].size_bytes > 0);
    assert!(!images[0].extracted);
}

#[test]
fn commit_of_an_unknown_container_is_not_found() {
    let (_dir, config) = setup();
    let engine = Engine::new(config);
    assert!(engine
        .commit("nobody", "snapshot")
        .expect_err("unknown")
        .is_not_found());
    assert!(engine.images().expect("images").is_empty());
}
