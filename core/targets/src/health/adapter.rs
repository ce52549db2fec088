//! Sync target writing typed records into a health-record store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use scalesync_common::{Error, Measurement, SyncFailure, SyncResult};

use super::records::{local_midnight, HealthRecord, RecordKind, RecordMetadata, TimeRange};
use super::store::{Availability, HealthStore};
use crate::control::TargetControl;
use crate::target::{sync_in_order, FullSyncContext, SyncTarget, TargetKind};

/// Origin written into record metadata unless configured otherwise.
pub const DEFAULT_ORIGIN: &str = "io.scalesync";

/// Health target settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Data origin owning every record this target writes.
    pub origin: String,
    /// Zone used for day boundaries and record offsets.
    pub utc_offset_minutes: i32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            utc_offset_minutes: 0,
        }
    }
}

/// Writes each measurement as a weight, body-water-mass and body-fat record.
pub struct HealthRecordAdapter {
    name: String,
    store: Arc<dyn HealthStore>,
    origin: String,
    zone: FixedOffset,
    control: TargetControl,
    connected: AtomicBool,
}

impl HealthRecordAdapter {
    /// Create an adapter over a host store.
    ///
    /// # Errors
    /// - `Config` if the UTC offset is out of range
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn HealthStore>,
        settings: &HealthSettings,
    ) -> scalesync_common::Result<Self> {
        Ok(Self {
            name: name.into(),
            store,
            origin: settings.origin.clone(),
            zone: crate::registry::utc_offset(settings.utc_offset_minutes)?,
            control: TargetControl::new(true),
            connected: AtomicBool::new(false),
        })
    }

    fn record(
        &self,
        kind: RecordKind,
        measurement: &Measurement,
        client_record_id: String,
        version: i64,
    ) -> HealthRecord {
        let value = match kind {
            RecordKind::Weight => measurement.weight,
            RecordKind::BodyWaterMass => measurement.water_mass_kg(),
            RecordKind::BodyFat => measurement.fat,
        };

        HealthRecord {
            kind,
            time: measurement.timestamp,
            zone_offset: self.zone,
            value,
            metadata: RecordMetadata {
                client_record_id,
                client_record_version: version,
                data_origin: self.origin.clone(),
            },
        }
    }

    /// The record triple for a measurement, versioned with the write time.
    fn records_for(&self, measurement: &Measurement) -> Vec<HealthRecord> {
        let version = Utc::now().timestamp_millis();
        RecordKind::ALL
            .iter()
            .map(|kind| {
                let client_id = format!("{}_{}", measurement.local_key(), kind.suffix());
                self.record(*kind, measurement, client_id, version)
            })
            .collect()
    }

    async fn write(&self, measurement: &Measurement) -> SyncResult<()> {
        let records = self.records_for(measurement);
        self.store.insert_records(records).await?;
        debug!(target_name = %self.name, "Wrote records for measurement {}", measurement.describe_id());
        Ok(())
    }

    async fn delete_range(&self, range: &TimeRange) -> SyncResult<()> {
        for kind in RecordKind::ALL {
            self.store.delete_records(kind, range, &self.origin).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SyncTarget for HealthRecordAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Health
    }

    fn control(&self) -> &TargetControl {
        &self.control
    }

    async fn connect(&self) -> SyncResult<()> {
        let availability = self.store.availability().await;
        if availability != Availability::Available {
            return Err(SyncFailure::api(format!(
                "health store is not available: {}",
                availability
            )));
        }

        let granted = self.store.granted_permissions().await?;
        let required: HashSet<RecordKind> = RecordKind::ALL.into_iter().collect();
        if !required.is_subset(&granted) {
            let mut granted: Vec<String> = granted.iter().map(|k| k.to_string()).collect();
            granted.sort();
            let required: Vec<String> = RecordKind::ALL.iter().map(|k| k.to_string()).collect();
            return Err(SyncFailure::api(format!(
                "Not all required health permissions are granted. Granted: [{}], Required: [{}]",
                granted.join(", "),
                required.join(", ")
            )));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(target_name = %self.name, "Health store connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn full_sync(
        &self,
        measurements: &[Measurement],
        context: &FullSyncContext,
    ) -> SyncResult<()> {
        self.prepare().await?;
        info!(target_name = %self.name, "Full sync of {} measurements", measurements.len());
        sync_in_order(&self.name, measurements, context, |m| self.write(m)).await
    }

    async fn insert(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;
        self.write(measurement).await
    }

    async fn update(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;

        let range = TimeRange::around(measurement.timestamp, Duration::seconds(1));
        let origins = vec![self.origin.clone()];
        let now = Utc::now().timestamp_millis();
        let mut rewritten = Vec::new();

        for kind in RecordKind::ALL {
            let found = self.store.read_records(kind, &range, &origins).await?;
            match found.into_iter().next() {
                Some(existing) => {
                    let version = now.max(existing.version() + 1);
                    rewritten.push(self.record(
                        kind,
                        measurement,
                        existing.metadata.client_record_id,
                        version,
                    ));
                }
                None => debug!(target_name = %self.name, "No {} record to update", kind),
            }
        }

        if rewritten.is_empty() {
            warn!(target_name = %self.name, "Nothing to update at {}", measurement.timestamp);
            return Err(SyncFailure::api(format!(
                "No records found to update for measurement: {}",
                measurement.describe_id()
            )));
        }

        self.store.insert_records(rewritten).await?;
        Ok(())
    }

    async fn delete(&self, timestamp: DateTime<Utc>) -> SyncResult<()> {
        self.prepare().await?;
        let date = timestamp.with_timezone(&self.zone).date_naive();
        let range = TimeRange::day(date, &self.zone)?;
        debug!(target_name = %self.name, "Deleting records on {}", date);
        self.delete_range(&range).await
    }

    async fn clear(&self) -> SyncResult<()> {
        self.prepare().await?;

        let today = Utc::now().with_timezone(&self.zone).date_naive();
        let midnight = local_midnight(today, &self.zone)?;
        let decade = Months::new(120);
        let start = midnight
            .checked_sub_months(decade)
            .ok_or_else(|| Error::InvalidInput("clear range start out of bounds".to_string()))?;
        let end = midnight
            .checked_add_months(decade)
            .ok_or_else(|| Error::InvalidInput("clear range end out of bounds".to_string()))?;

        info!(target_name = %self.name, "Clearing records from {} to {}", start, end);
        self.delete_range(&TimeRange::new(start, end)).await
    }
}
