//! Ledger backed by a JSON export file.
//!
//! The export declares its schema once:
//!
//! ```json
//! {
//!   "meta": { "apiVersion": "1", "versionCode": 43 },
//!   "selectedUserId": 1,
//!   "users": [{ "id": 1, "username": "alice" }],
//!   "schema": { "version": 1, "columns": ["_ID", "datetime", "weight", "fat", "water", "muscle"] },
//!   "measurements": { "1": [[1, 1704441600000, 70.0, 20.0, 55.0, 40.0]] }
//! }
//! ```
//!
//! Columns are bound when the file is opened; rows are decoded by position.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use scalesync_common::{Error, Measurement, MeasurementId, Result, User, UserId};

use super::schema::{ColumnMap, LedgerSchema};
use super::{require_version, LedgerGateway, MIN_VERSION_CODE};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerMeta {
    api_version: String,
    version_code: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaHeader {
    version: u32,
    columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerDocument {
    meta: LedgerMeta,
    #[serde(default)]
    selected_user_id: Option<UserId>,
    #[serde(default)]
    users: Vec<User>,
    schema: SchemaHeader,
    /// Rows keyed by user id.
    #[serde(default)]
    measurements: BTreeMap<String, Vec<Vec<Value>>>,
}

/// [`LedgerGateway`] over a JSON export, written back on every change.
pub struct JsonFileLedger {
    path: PathBuf,
    columns: ColumnMap,
    document: Mutex<LedgerDocument>,
}

impl JsonFileLedger {
    /// Open an existing export and validate its schema.
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `Serialization` if it is not a ledger document
    /// - `InvalidInput` if the schema version or columns do not match
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await?;
        let document: LedgerDocument = serde_json::from_slice(&bytes)?;

        let schema = LedgerSchema::from_version(document.schema.version)?;
        let columns = schema.bind(&document.schema.columns)?;
        debug!("Opened ledger {} (schema v{})", path.display(), schema.version());

        Ok(Self {
            path,
            columns,
            document: Mutex::new(document),
        })
    }

    /// Write an empty export with the given users.
    pub async fn create(path: impl AsRef<Path>, users: Vec<User>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let schema = LedgerSchema::V1;
        let document = LedgerDocument {
            meta: LedgerMeta {
                api_version: "1".to_string(),
                version_code: MIN_VERSION_CODE,
            },
            selected_user_id: None,
            users,
            schema: SchemaHeader {
                version: schema.version(),
                columns: schema.columns().iter().map(|c| c.to_string()).collect(),
            },
            measurements: BTreeMap::new(),
        };
        let columns = schema.bind(&document.schema.columns)?;

        Self::persist(&path, &document).await?;
        info!("Created ledger {}", path.display());

        Ok(Self {
            path,
            columns,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(path: &Path, document: &LedgerDocument) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    fn next_id(&self, document: &LedgerDocument) -> Result<i64> {
        let mut highest = 0i64;
        for rows in document.measurements.values() {
            for row in rows {
                highest = highest.max(self.columns.decode(row)?.id.map_or(0, |id| id.value()));
            }
        }
        Ok(highest + 1)
    }
}

#[async_trait]
impl LedgerGateway for JsonFileLedger {
    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.document.lock().await.users.clone())
    }

    async fn check_capability(&self) -> Result<()> {
        require_version(self.document.lock().await.meta.version_code)
    }

    async fn list_measurements(&self, user: UserId) -> Result<Vec<Measurement>> {
        let document = self.document.lock().await;
        match document.measurements.get(&user.to_string()) {
            Some(rows) => rows.iter().map(|row| self.columns.decode(row)).collect(),
            None => Ok(Vec::new()),
        }
    }

    async fn insert_measurement(
        &self,
        timestamp: DateTime<Utc>,
        weight: f64,
        user: UserId,
    ) -> Result<MeasurementId> {
        let mut document = self.document.lock().await;
        if !document.users.iter().any(|u| u.id == user) {
            return Err(Error::NotFound(format!("user {}", user)));
        }

        let id = MeasurementId::new(self.next_id(&document)?);
        let measurement = Measurement::new(timestamp, weight, 0.0, 0.0, 0.0).with_id(id);
        document
            .measurements
            .entry(user.to_string())
            .or_default()
            .push(self.columns.encode(&measurement));

        Self::persist(&self.path, &document).await?;
        Ok(id)
    }

    async fn selected_user_id(&self) -> Result<Option<UserId>> {
        Ok(self.document.lock().await.selected_user_id)
    }

    async fn set_selected_user_id(&self, user: Option<UserId>) -> Result<()> {
        let mut document = self.document.lock().await;
        document.selected_user_id = user;
        Self::persist(&self.path, &document).await
    }
}
