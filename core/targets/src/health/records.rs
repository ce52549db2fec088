//! Typed health records and time ranges.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use scalesync_common::{Error, Result};

/// Record types written for every measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind {
    /// Body weight in kilograms.
    Weight,
    /// Absolute body water in kilograms.
    BodyWaterMass,
    /// Body fat in percent.
    BodyFat,
}

impl RecordKind {
    /// Every kind this integration writes, in write order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Weight, RecordKind::BodyWaterMass, RecordKind::BodyFat];

    /// Suffix used in client record ids.
    pub fn suffix(&self) -> &'static str {
        match self {
            RecordKind::Weight => "weight",
            RecordKind::BodyWaterMass => "water",
            RecordKind::BodyFat => "fat",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Weight => "Weight",
            RecordKind::BodyWaterMass => "BodyWaterMass",
            RecordKind::BodyFat => "BodyFat",
        };
        f.write_str(name)
    }
}

/// Ownership and versioning attached to every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// `<local-id>_<suffix>`, unique per origin.
    pub client_record_id: String,
    /// Write time in epoch milliseconds; higher wins on merge.
    pub client_record_version: i64,
    /// Package/origin that wrote the record.
    pub data_origin: String,
}

/// One typed record as stored by the health-record store.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    pub kind: RecordKind,
    pub time: DateTime<Utc>,
    pub zone_offset: FixedOffset,
    pub value: f64,
    pub metadata: RecordMetadata,
}

impl HealthRecord {
    pub fn client_record_id(&self) -> &str {
        &self.metadata.client_record_id
    }

    pub fn version(&self) -> i64 {
        self.metadata.client_record_version
    }
}

/// Half-open instant range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[instant - tolerance, instant + tolerance)`.
    pub fn around(instant: DateTime<Utc>, tolerance: Duration) -> Self {
        Self::new(instant - tolerance, instant + tolerance)
    }

    /// Local midnight of `date` to the next local midnight in `zone`.
    ///
    /// # Errors
    /// - `InvalidInput` if the date has no representable midnight
    pub fn day(date: NaiveDate, zone: &FixedOffset) -> Result<Self> {
        let start = local_midnight(date, zone)?;
        let next = date
            .succ_opt()
            .ok_or_else(|| Error::InvalidInput(format!("No day after {}", date)))?;
        Ok(Self::new(start, local_midnight(next, zone)?))
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Instant of local midnight on `date` in `zone`.
pub fn local_midnight(date: NaiveDate, zone: &FixedOffset) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| Error::InvalidInput(format!("No midnight on {}", date)))?;
    zone.from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidInput(format!("Ambiguous midnight on {}", date)))
}
