//! In-memory decision store.
//!
//! Mirrors the ConfigMap record shape (a string map with the gate value under
//! the `allow` key) so the upsert and fail-open semantics can be exercised
//! without a cluster. Used by tests and by `--store memory` local runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use pipeshield_core::{GateState, StoredGate, GATE_KEY};

use crate::traits::{DecisionStore, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    record: RwLock<Option<BTreeMap<String, String>>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record, e.g. one carrying unrelated fields.
    pub fn with_record(record: BTreeMap<String, String>) -> Self {
        Self {
            record: RwLock::new(Some(record)),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Make subsequent reads fail with a backend error, for exercising the
    /// webhook's fail-closed path.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the stored record, for assertions.
    pub fn record(&self) -> Option<BTreeMap<String, String>> {
        self.record.read().expect("store lock poisoned").clone()
    }
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn read(&self) -> StoreResult<StoredGate> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected read failure".to_string()));
        }
        let record = self.record.read().expect("store lock poisoned");
        let value = record
            .as_ref()
            .and_then(|data| data.get(GATE_KEY))
            .map(String::as_str);
        Ok(StoredGate::from_record_value(value))
    }

    async fn write(&self, allowed: bool) -> StoreResult<()> {
        let value = GateState::from_allowed(allowed).record_value();
        let mut record = self.record.write().expect("store lock poisoned");
        record
            .get_or_insert_with(BTreeMap::new)
            .insert(GATE_KEY.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_fails_open_when_no_record_exists() {
        let store = MemoryStore::new();
        let gate = store.read().await.unwrap();
        assert_eq!(gate, StoredGate::Absent);
        assert!(gate.allowed_or_default());
    }

    #[tokio::test]
    async fn read_fails_open_when_gate_key_is_missing() {
        let store =
            MemoryStore::with_record([("other".to_string(), "data".to_string())].into());
        assert_eq!(store.read().await.unwrap(), StoredGate::Absent);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let store = MemoryStore::new();
        for allowed in [true, false] {
            store.write(allowed).await.unwrap();
            assert_eq!(store.read().await.unwrap().allowed_or_default(), allowed);
        }
    }

    #[tokio::test]
    async fn repeated_writes_are_idempotent() {
        let store = MemoryStore::new();
        store.write(false).await.unwrap();
        store.write(false).await.unwrap();
        assert_eq!(store.read().await.unwrap(), StoredGate::Denied);
    }

    #[tokio::test]
    async fn write_preserves_unrelated_fields() {
        let store =
            MemoryStore::with_record([("other".to_string(), "data".to_string())].into());
        store.write(true).await.unwrap();
        let record = store.record().unwrap();
        assert_eq!(record.get("other").map(String::as_str), Some("data"));
        assert_eq!(record.get(GATE_KEY).map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn malformed_stored_value_reads_as_denied() {
        let store =
            MemoryStore::with_record([(GATE_KEY.to_string(), "banana".to_string())].into());
        assert_eq!(store.read().await.unwrap(), StoredGate::Denied);
    }

    #[tokio::test]
    async fn injected_read_failure_surfaces_as_error() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.read().await.is_err());
    }
}
