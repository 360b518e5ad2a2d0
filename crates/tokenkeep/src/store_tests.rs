// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn memory_store_roundtrip() {
    let store = MemoryStore::new();
    assert_eq!(store.get(DEVICE_FINGERPRINT_KEY), None);
    store.set(DEVICE_FINGERPRINT_KEY, "0002b5c4");
    assert_eq!(store.get(DEVICE_FINGERPRINT_KEY).as_deref(), Some("0002b5c4"));
    store.remove(DEVICE_FINGERPRINT_KEY);
    assert_eq!(store.get(DEVICE_FINGERPRINT_KEY), None);
}

#[test]
fn file_store_starts_empty_when_missing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = FileStore::open(dir.path().join("nested/session.json"))?;
    assert_eq!(store.get("anything"), None);
    Ok(())
}

#[test]
fn file_store_persists_across_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");

    let store = FileStore::open(&path)?;
    store.set(DEVICE_FINGERPRINT_KEY, "abc123");
    store.set("other", "value");
    store.remove("other");
    drop(store);

    let reopened = FileStore::open(&path)?;
    assert_eq!(reopened.get(DEVICE_FINGERPRINT_KEY).as_deref(), Some("abc123"));
    assert_eq!(reopened.get("other"), None);

    // No temp files left behind.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
    Ok(())
}

#[test]
fn file_store_rejects_corrupt_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{not json")?;
    assert!(FileStore::open(&path).is_err());
    Ok(())
}
