//! In-process ledger for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use scalesync_common::{Error, Measurement, MeasurementId, Result, User, UserId};

use super::{require_version, LedgerGateway, MIN_VERSION_CODE};

#[derive(Default)]
struct Contents {
    users: Vec<User>,
    measurements: HashMap<UserId, Vec<Measurement>>,
    selected: Option<UserId>,
    next_id: i64,
}

/// Ledger held entirely in memory.
pub struct MemoryLedger {
    version_code: u32,
    contents: RwLock<Contents>,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            version_code: MIN_VERSION_CODE,
            contents: RwLock::new(Contents::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_version_code(mut self, version_code: u32) -> Self {
        self.version_code = version_code;
        self
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.contents.get_mut().users.push(user);
        self
    }

    /// Add a measurement for `user`, assigning an id if it has none.
    pub fn with_measurement(mut self, user: UserId, measurement: Measurement) -> Self {
        let contents = self.contents.get_mut();
        let measurement = match measurement.id {
            Some(id) => {
                contents.next_id = contents.next_id.max(id.value());
                measurement
            }
            None => {
                contents.next_id += 1;
                measurement.with_id(MeasurementId::new(contents.next_id))
            }
        };
        contents.measurements.entry(user).or_default().push(measurement);
        self
    }

    /// Make every read fail, as when the ledger app is missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Unavailable("ledger is not reachable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for MemoryLedger {
    async fn list_users(&self) -> Result<Vec<User>> {
        self.ensure_available()?;
        Ok(self.contents.read().await.users.clone())
    }

    async fn check_capability(&self) -> Result<()> {
        self.ensure_available()?;
        require_version(self.version_code)
    }

    async fn list_measurements(&self, user: UserId) -> Result<Vec<Measurement>> {
        self.ensure_available()?;
        let contents = self.contents.read().await;
        Ok(contents.measurements.get(&user).cloned().unwrap_or_default())
    }

    async fn insert_measurement(
        &self,
        timestamp: DateTime<Utc>,
        weight: f64,
        user: UserId,
    ) -> Result<MeasurementId> {
        self.ensure_available()?;
        let mut contents = self.contents.write().await;
        if !contents.users.iter().any(|u| u.id == user) {
            return Err(Error::NotFound(format!("user {}", user)));
        }

        contents.next_id += 1;
        let id = MeasurementId::new(contents.next_id);
        let measurement = Measurement::new(timestamp, weight, 0.0, 0.0, 0.0).with_id(id);
        contents.measurements.entry(user).or_default().push(measurement);
        Ok(id)
    }

    async fn selected_user_id(&self) -> Result<Option<UserId>> {
        self.ensure_available()?;
        Ok(self.contents.read().await.selected)
    }

    async fn set_selected_user_id(&self, user: Option<UserId>) -> Result<()> {
        self.ensure_available()?;
        self.contents.write().await.selected = user;
        Ok(())
    }
}
