//! Health-record store abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use scalesync_common::Result;

use super::records::{HealthRecord, RecordKind, TimeRange};

/// Whether the host store can be used at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    NotInstalled,
    UpdateRequired,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Availability::Available => "available",
            Availability::NotInstalled => "not installed",
            Availability::UpdateRequired => "update required",
        };
        f.write_str(label)
    }
}

/// Host health-record store.
///
/// Records are merged by `(kind, client_record_id, data_origin)`; a write
/// replaces the stored record only if its version is not lower.
#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn availability(&self) -> Availability;

    /// Record kinds this integration may write.
    async fn granted_permissions(&self) -> Result<HashSet<RecordKind>>;

    /// Write records atomically: either all are stored or none.
    async fn insert_records(&self, records: Vec<HealthRecord>) -> Result<()>;

    /// Records of `kind` whose time lies in `range`, restricted to `origins`.
    async fn read_records(
        &self,
        kind: RecordKind,
        range: &TimeRange,
        origins: &[String],
    ) -> Result<Vec<HealthRecord>>;

    /// Delete records of `kind` in `range` written by `origin`.
    async fn delete_records(&self, kind: RecordKind, range: &TimeRange, origin: &str) -> Result<()>;
}
