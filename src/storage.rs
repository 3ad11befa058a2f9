// SPDX-License-Identifier: GPL-3.0-only

//! Durable local key-value storage
//!
//! The controller writes every accepted barcode to [`PENDING_SCAN_KEY`]
//! before any callback runs, so a reload between detection and UI update
//! does not lose the scan.

use crate::constants::PENDING_SCAN_KEY;
use crate::errors::{ScanError, ScanResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// String-to-string store that survives process restarts
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> ScanResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> ScanResult<()>;
    fn remove(&self, key: &str) -> ScanResult<()>;
}

/// JSON object on disk, rewritten atomically on every change
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> ScanResult<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| ScanError::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(ScanError::Storage(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> ScanResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScanError::Storage(e.to_string()))?;
        }
        let text = serde_json::to_string(map).map_err(|e| ScanError::Storage(e.to_string()))?;

        // Write to a sibling file, then rename over the target
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text).map_err(|e| ScanError::Storage(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ScanError::Storage(e.to_string()))
    }

    fn update<F>(&self, f: F) -> ScanResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = self.read_map()?;
        f(&mut map);
        self.write_map(&map)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ScanResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ScanResult<()> {
        self.update(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> ScanResult<()> {
        self.update(|map| {
            map.remove(key);
        })
    }
}

/// In-memory store for tests and for hosts without a writable data directory
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ScanResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ScanResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ScanResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// The single handoff slot holding the last accepted barcode
#[derive(Clone)]
pub struct PendingScanSlot {
    store: Arc<dyn KeyValueStore>,
}

impl PendingScanSlot {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn record(&self, raw_value: &str) -> ScanResult<()> {
        debug!(raw_value, "Persisting pending scan");
        self.store.set(PENDING_SCAN_KEY, raw_value)
    }

    pub fn peek(&self) -> ScanResult<Option<String>> {
        self.store.get(PENDING_SCAN_KEY)
    }

    /// Read and clear the slot
    pub fn take(&self) -> ScanResult<Option<String>> {
        let value = self.store.get(PENDING_SCAN_KEY)?;
        if value.is_some() {
            self.store.remove(PENDING_SCAN_KEY)?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (FileStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("hyperpos-store-{}", uuid::Uuid::new_v4()));
        (FileStore::new(dir.join("pending.json")), dir)
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let (store, dir) = temp_store();
        store.set(PENDING_SCAN_KEY, "6281000000011").unwrap();

        let reopened = FileStore::new(store.path());
        assert_eq!(
            reopened.get(PENDING_SCAN_KEY).unwrap().as_deref(),
            Some("6281000000011")
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let (store, _dir) = temp_store();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn test_file_store_keeps_other_keys() {
        let (store, dir) = temp_store();
        store.set("other", "kept").unwrap();
        store.set(PENDING_SCAN_KEY, "123").unwrap();
        store.remove(PENDING_SCAN_KEY).unwrap();
        assert_eq!(store.get("other").unwrap().as_deref(), Some("kept"));
        assert_eq!(store.get(PENDING_SCAN_KEY).unwrap(), None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_pending_slot_take_clears() {
        let slot = PendingScanSlot::new(Arc::new(MemoryStore::new()));
        slot.record("ABC-123").unwrap();
        assert_eq!(slot.peek().unwrap().as_deref(), Some("ABC-123"));
        assert_eq!(slot.take().unwrap().as_deref(), Some("ABC-123"));
        assert_eq!(slot.take().unwrap(), None);
    }

    #[test]
    fn test_record_overwrites() {
        let slot = PendingScanSlot::new(Arc::new(MemoryStore::new()));
        slot.record("first").unwrap();
        slot.record("second").unwrap();
        assert_eq!(slot.peek().unwrap().as_deref(), Some("second"));
    }
}
