//! Engine configuration loaded from disk

use crate::common::*;
use cadbatch::CONFIG_FILE_NAME;
use tempfile::TempDir;

#[test]
fn default_file_starts_an_engine() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, EngineConfig::default_toml()).unwrap();

    let config = EngineConfig::from_file(&path).unwrap();
    let engine = ExecutionFacade::builder()
        .provider(MemoryDocument::shared())
        .config(config)
        .build()
        .unwrap();
    assert!(engine.scheduler_stats().unwrap().running);
}

#[test]
fn batching_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "batching_enabled = false\n").unwrap();

    let doc = MemoryDocument::shared();
    let engine = ExecutionFacade::builder()
        .provider(doc.clone())
        .config(EngineConfig::from_file(&path).unwrap())
        .build()
        .unwrap();

    for _ in 0..10 {
        engine
            .execute("line", |_: &Session| Ok::<_, EngineError>(()))
            .unwrap();
    }
    assert!(engine.scheduler_stats().is_none());
    assert_eq!(doc.stats().commits, 10);
}

#[test]
fn invalid_file_names_the_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[admission]\nburst_window_ms = 5000\n").unwrap();

    match EngineConfig::from_file(&path) {
        Err(EngineError::InvalidConfig(reason)) => {
            assert!(reason.contains(CONFIG_FILE_NAME));
        }
        other => panic!("expected invalid config, got {:?}", other),
    }
}
