//! In-memory health-record store for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::RwLock;

use scalesync_common::{Error, Result};

use super::records::{HealthRecord, RecordKind, TimeRange};
use super::store::{Availability, HealthStore};

/// In-memory health-record store.
///
/// Useful for testing and for running without a host store. All records
/// are lost on drop.
pub struct MemoryHealthStore {
    records: RwLock<Vec<HealthRecord>>,
    availability: StdMutex<Availability>,
    granted: StdMutex<HashSet<RecordKind>>,
    fail_inserts: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryHealthStore {
    /// Create an available store with every write permission granted.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            availability: StdMutex::new(Availability::Available),
            granted: StdMutex::new(RecordKind::ALL.into_iter().collect()),
            fail_inserts: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_availability(&self, availability: Availability) {
        if let Ok(mut current) = self.availability.lock() {
            *current = availability;
        }
    }

    pub fn set_granted(&self, kinds: impl IntoIterator<Item = RecordKind>) {
        if let Ok(mut granted) = self.granted.lock() {
            *granted = kinds.into_iter().collect();
        }
    }

    /// Make every subsequent insert fail without storing anything.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of store calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored record.
    pub async fn records(&self) -> Vec<HealthRecord> {
        self.records.read().await.clone()
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryHealthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn availability(&self) -> Availability {
        self.record_call();
        self.availability
            .lock()
            .map(|a| *a)
            .unwrap_or(Availability::NotInstalled)
    }

    async fn granted_permissions(&self) -> Result<HashSet<RecordKind>> {
        self.record_call();
        self.granted
            .lock()
            .map(|g| g.clone())
            .map_err(|_| Error::Unavailable("permission state poisoned".to_string()))
    }

    async fn insert_records(&self, records: Vec<HealthRecord>) -> Result<()> {
        self.record_call();
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("store rejected write".to_string()));
        }

        let mut stored = self.records.write().await;
        for record in records {
            let existing = stored.iter_mut().find(|r| {
                r.kind == record.kind
                    && r.metadata.client_record_id == record.metadata.client_record_id
                    && r.metadata.data_origin == record.metadata.data_origin
            });

            match existing {
                Some(current) if current.version() <= record.version() => *current = record,
                Some(_) => {}
                None => stored.push(record),
            }
        }
        Ok(())
    }

    async fn read_records(
        &self,
        kind: RecordKind,
        range: &TimeRange,
        origins: &[String],
    ) -> Result<Vec<HealthRecord>> {
        self.record_call();
        let stored = self.records.read().await;
        Ok(stored
            .iter()
            .filter(|r| r.kind == kind && range.contains(r.time))
            .filter(|r| origins.is_empty() || origins.contains(&r.metadata.data_origin))
            .cloned()
            .collect())
    }

    async fn delete_records(&self, kind: RecordKind, range: &TimeRange, origin: &str) -> Result<()> {
        self.record_call();
        let mut stored = self.records.write().await;
        stored.retain(|r| !(r.kind == kind && range.contains(r.time) && r.metadata.data_origin == origin));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::records::RecordMetadata;
    use chrono::{Duration, FixedOffset, TimeZone, Utc};

    fn record(client_id: &str, version: i64, value: f64, origin: &str) -> HealthRecord {
        HealthRecord {
            kind: RecordKind::Weight,
            time: Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap(),
            zone_offset: FixedOffset::east_opt(0).unwrap(),
            value,
            metadata: RecordMetadata {
                client_record_id: client_id.to_string(),
                client_record_version: version,
                data_origin: origin.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_merge_keeps_highest_version() {
        let store = MemoryHealthStore::new();
        store.insert_records(vec![record("1_weight", 10, 70.0, "a")]).await.unwrap();
        store.insert_records(vec![record("1_weight", 5, 60.0, "a")]).await.unwrap();
        assert_eq!(store.records().await[0].value, 70.0);

        store.insert_records(vec![record("1_weight", 11, 71.0, "a")]).await.unwrap();
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 71.0);
    }

    #[tokio::test]
    async fn test_delete_is_origin_scoped() {
        let store = MemoryHealthStore::new();
        store
            .insert_records(vec![record("1_weight", 1, 70.0, "a"), record("1_weight", 1, 70.0, "b")])
            .await
            .unwrap();

        let instant = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();
        let range = TimeRange::around(instant, Duration::hours(1));
        store.delete_records(RecordKind::Weight, &range, "a").await.unwrap();

        let remaining = store.records().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].metadata.data_origin, "b");
    }

    #[tokio::test]
    async fn test_failed_insert_stores_nothing() {
        let store = MemoryHealthStore::new();
        store.set_fail_inserts(true);
        assert!(store.insert_records(vec![record("1_weight", 1, 70.0, "a")]).await.is_err());
        assert!(store.records().await.is_empty());
    }
}
