//! Ledger gateway: the authoritative source of measurements.
//!
//! The orchestrator never talks to the ledger's storage directly; it goes
//! through [`LedgerGateway`], which exposes users, measurements and the
//! selected-user preference.

mod file;
mod memory;
mod schema;

pub use file::JsonFileLedger;
pub use memory::MemoryLedger;
pub use schema::{ColumnMap, LedgerSchema};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use scalesync_common::{Error, Measurement, MeasurementId, Result, User, UserId};

/// Oldest ledger release exposing everything the gateway reads.
pub const MIN_VERSION_CODE: u32 = 43;

/// Read and write access to the ledger.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>>;

    /// Verify the ledger is recent enough to be synced from.
    ///
    /// # Errors
    /// - `Unavailable` if its version code is below [`MIN_VERSION_CODE`]
    async fn check_capability(&self) -> Result<()>;

    /// Every measurement of `user`, in storage order.
    async fn list_measurements(&self, user: UserId) -> Result<Vec<Measurement>>;

    /// Store a weight-only measurement and return its new id.
    async fn insert_measurement(
        &self,
        timestamp: DateTime<Utc>,
        weight: f64,
        user: UserId,
    ) -> Result<MeasurementId>;

    /// Saved user selection, if any.
    async fn selected_user_id(&self) -> Result<Option<UserId>>;

    async fn set_selected_user_id(&self, user: Option<UserId>) -> Result<()>;
}

/// Fail unless `version_code` meets [`MIN_VERSION_CODE`].
pub(crate) fn require_version(version_code: u32) -> Result<()> {
    if version_code >= MIN_VERSION_CODE {
        Ok(())
    } else {
        Err(Error::Unavailable(format!(
            "ledger version code {} is below the required {}",
            version_code, MIN_VERSION_CODE
        )))
    }
}

/// The user to sync: the saved selection if it still exists, else the first user.
///
/// # Errors
/// - `NotFound` if the ledger has no users
pub async fn resolve_user(ledger: &dyn LedgerGateway) -> Result<User> {
    let users = ledger.list_users().await?;
    let selected = ledger.selected_user_id().await?;

    if let Some(id) = selected {
        if let Some(user) = users.iter().find(|u| u.id == id) {
            return Ok(user.clone());
        }
        debug!("Selected user {} no longer exists, falling back", id);
    }

    users
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound("ledger has no users".to_string()))
}
