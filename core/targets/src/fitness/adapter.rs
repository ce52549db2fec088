//! Sync target keeping weight entries in the fitness service.
//!
//! The service keys entries by server-assigned ids and knows nothing of the
//! ledger, so update and delete resolve the entry by calendar date first.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use scalesync_common::{Error, Measurement, Secret, SyncFailure, SyncResult};

use super::api::{WeightEntryApi, WeightEntryForm, DATE_FORMAT};
use super::client::DEFAULT_BASE_URL;
use crate::control::TargetControl;
use crate::target::{sync_in_order, FullSyncContext, SyncTarget, TargetKind};

/// Fitness target settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessSettings {
    pub base_url: String,
    pub api_key: Secret,
    pub utc_offset_minutes: i32,
    pub request_timeout_secs: u64,
}

impl Default for FitnessSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: Secret::default(),
            utc_offset_minutes: 0,
            request_timeout_secs: 20,
        }
    }
}

/// Map a service error, naming the operation for rejections.
fn rejected(operation: &str, err: Error) -> SyncFailure {
    match err {
        Error::Api { status, body } => {
            SyncFailure::api(format!("{} response error {} {}", operation, status, body))
        }
        other => SyncFailure::from(other),
    }
}

/// Mirrors each measurement as one weight entry per calendar day.
pub struct FitnessApiAdapter {
    name: String,
    api: Arc<dyn WeightEntryApi>,
    zone: FixedOffset,
    control: TargetControl,
    connected: AtomicBool,
}

impl FitnessApiAdapter {
    /// # Errors
    /// - `Config` if the UTC offset is out of range
    pub fn new(
        name: impl Into<String>,
        api: Arc<dyn WeightEntryApi>,
        settings: &FitnessSettings,
    ) -> scalesync_common::Result<Self> {
        Ok(Self {
            name: name.into(),
            api,
            zone: crate::registry::utc_offset(settings.utc_offset_minutes)?,
            control: TargetControl::new(true),
            connected: AtomicBool::new(false),
        })
    }

    fn local_date(&self, timestamp: DateTime<Utc>) -> NaiveDate {
        timestamp.with_timezone(&self.zone).date_naive()
    }

    fn form(&self, measurement: &Measurement) -> WeightEntryForm {
        WeightEntryForm::new(self.local_date(measurement.timestamp), measurement.weight)
    }

    async fn create_entry(&self, measurement: &Measurement) -> SyncResult<()> {
        let form = self.form(measurement);
        self.api
            .create(&form)
            .await
            .map_err(|e| rejected("insert", e))?;
        debug!(target_name = %self.name, "Created weight entry for {}", form.date_field());
        Ok(())
    }

    /// Id of the first entry on `date`.
    async fn entry_on(&self, date: NaiveDate) -> SyncResult<u64> {
        let page = self
            .api
            .list(Some(date))
            .await
            .map_err(|e| rejected("lookup", e))?;

        page.results.first().map(|entry| entry.id).ok_or_else(|| {
            SyncFailure::api(format!(
                "no weight entry found for date: {}",
                date.format(DATE_FORMAT)
            ))
        })
    }
}

#[async_trait]
impl SyncTarget for FitnessApiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TargetKind {
        TargetKind::Fitness
    }

    fn control(&self) -> &TargetControl {
        &self.control
    }

    async fn connect(&self) -> SyncResult<()> {
        let page = self.api.list(None).await.map_err(|e| rejected("connect", e))?;
        if page.count < 0 {
            return Err(SyncFailure::api("listing response carried no entry count"));
        }

        self.connected.store(true, Ordering::SeqCst);
        info!(target_name = %self.name, "Fitness API reachable, {} entries", page.count);
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
        info!(target_name = %self.name, "Creating {} weight entries", measurements.len());
        sync_in_order(&self.name, measurements, context, |m| self.create_entry(m)).await
    }

    async fn insert(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;
        self.create_entry(measurement).await
    }

    async fn update(&self, measurement: &Measurement) -> SyncResult<()> {
        self.prepare().await?;
        let form = self.form(measurement);
        let id = self.entry_on(form.date).await?;
        self.api
            .patch(id, &form)
            .await
            .map_err(|e| rejected("update", e))?;
        debug!(target_name = %self.name, "Updated weight entry {}", id);
        Ok(())
    }

    async fn delete(&self, timestamp: DateTime<Utc>) -> SyncResult<()> {
        self.prepare().await?;
        let id = self.entry_on(self.local_date(timestamp)).await?;
        self.api.remove(id).await.map_err(|e| rejected("delete", e))?;
        debug!(target_name = %self.name, "Deleted weight entry {}", id);
        Ok(())
    }

    async fn clear(&self) -> SyncResult<()> {
        self.prepare().await?;
        let mut removed = 0usize;

        loop {
            let page = self.api.list(None).await.map_err(|e| rejected("clear", e))?;
            if page.count == 0 {
                break;
            }
            if page.results.is_empty() {
                if page.count > 0 {
                    warn!(target_name = %self.name, "Listing reports {} entries but returned none", page.count);
                    return Err(SyncFailure::api(format!(
                        "listing reports {} remaining entries but returned none",
                        page.count
                    )));
                }
                break;
            }

            for entry in &page.results {
                self.api
                    .remove(entry.id)
                    .await
                    .map_err(|e| rejected("clear", e))?;
                removed += 1;
            }
        }

        info!(target_name = %self.name, "Removed {} weight entries", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::MemoryWeightEntryApi;
    use chrono::TimeZone;
    use scalesync_common::ErrorKind;

    fn setup(page_size: usize) -> (Arc<MemoryWeightEntryApi>, FitnessApiAdapter) {
        let api = Arc::new(MemoryWeightEntryApi::with_page_size(page_size));
        let adapter =
            FitnessApiAdapter::new("wger", api.clone(), &FitnessSettings::default()).unwrap();
        (api, adapter)
    }

    fn jan5() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    fn measurement(day: u32, weight: f64) -> Measurement {
        Measurement::new(Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(), weight, 0.0, 0.0, 0.0)
    }

    #[tokio::test]
    async fn test_insert_creates_entry() {
        let (api, adapter) = setup(20);
        adapter.insert(&measurement(5, 70.0)).await.unwrap();

        let entries = api.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date.as_deref(), Some("2024-01-05"));
        assert_eq!(entries[0].weight, Some(70.0));
    }

    #[tokio::test]
    async fn test_delete_without_entry() {
        let (_api, adapter) = setup(20);
        let failure = adapter
            .delete(Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap())
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert_eq!(failure.message(), Some("no weight entry found for date: 2024-01-05"));
    }

    #[tokio::test]
    async fn test_update_patches_entry_of_the_day() {
        let (api, adapter) = setup(20);
        let id = api.seed(jan5(), 70.0).await;
        api.seed(NaiveDate::from_ymd_opt(2024, 1, 6).unwrap(), 75.0).await;

        adapter.update(&measurement(5, 69.5)).await.unwrap();

        let entries = api.entries().await;
        let patched = entries.iter().find(|e| e.id == id).unwrap();
        assert_eq!(patched.weight, Some(69.5));
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_update_without_entry_creates_nothing() {
        let (api, adapter) = setup(20);
        let failure = adapter.update(&measurement(5, 70.0)).await.unwrap_err();

        assert_eq!(failure.message(), Some("no weight entry found for date: 2024-01-05"));
        assert_eq!(api.create_calls(), 0);
        assert!(api.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_every_page() {
        let pages = 3;
        let page_size = 4;
        let (api, adapter) = setup(page_size);
        adapter.connect().await.unwrap();
        for _ in 0..pages * page_size {
            api.seed(jan5(), 70.0).await;
        }
        let lists_before = api.list_calls();

        adapter.clear().await.unwrap();

        assert_eq!(api.list_calls() - lists_before, pages + 1);
        assert_eq!(api.remove_calls(), pages * page_size);
        assert_eq!(api.list(None).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_clear_aborts_on_rejected_delete() {
        let (api, adapter) = setup(20);
        api.seed(jan5(), 70.0).await;
        api.seed(jan5(), 71.0).await;
        api.set_reject_removes(true);

        let failure = adapter.clear().await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert!(failure.message().unwrap().starts_with("clear response error 403"));
        assert_eq!(api.remove_calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_stops_on_phantom_listing() {
        let (api, adapter) = setup(20);
        adapter.connect().await.unwrap();
        api.set_phantom_count(true);

        let failure = adapter.clear().await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert_eq!(api.remove_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_insert_maps_to_api_error() {
        let (api, adapter) = setup(20);
        api.reject_date(jan5()).await;

        let failure = adapter.insert(&measurement(5, 70.0)).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert!(failure.message().unwrap().starts_with("insert response error 400"));
    }

    #[tokio::test]
    async fn test_full_sync_continues_after_rejection() {
        let (api, adapter) = setup(20);
        api.reject_date(jan5()).await;

        let measurements = vec![measurement(6, 71.0), measurement(5, 70.0), measurement(4, 69.0)];
        let failure = adapter
            .full_sync(&measurements, &FullSyncContext::default())
            .await
            .unwrap_err();

        assert_eq!(failure.message(), Some("1 of 3 measurements failed to sync"));
        let dates: Vec<String> = api.entries().await.into_iter().filter_map(|e| e.date).collect();
        assert_eq!(dates, vec!["2024-01-04", "2024-01-06"]);
    }

    #[tokio::test]
    async fn test_disabled_makes_no_requests() {
        let (api, adapter) = setup(20);
        adapter.control().set_enabled(false);

        assert_eq!(
            adapter.clear().await.unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(api.calls(), 0);
    }
}
