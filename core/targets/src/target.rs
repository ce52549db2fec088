//! Sync target trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scalesync_common::{ErrorKind, Measurement, SyncFailure, SyncResult};

use crate::control::TargetControl;

/// The kind of external system behind a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Health,
    Mqtt,
    Fitness,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Health => "health",
            TargetKind::Mqtt => "mqtt",
            TargetKind::Fitness => "fitness",
        };
        f.write_str(name)
    }
}

/// One external system mirroring ledger measurements.
///
/// Operations never panic or return errors other than [`SyncFailure`].
/// Implementations keep their own session handle; the orchestrator
/// serializes calls on a single target, so operations may assume exclusive
/// use of that handle.
#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// Configured name of the target (e.g., "health", "home-broker").
    fn name(&self) -> &str;

    /// Kind of external system.
    fn kind(&self) -> TargetKind;

    /// Enable/permission gate.
    fn control(&self) -> &TargetControl;

    /// Establish or verify the session with the external system.
    async fn connect(&self) -> SyncResult<()>;

    /// Whether a usable session currently exists.
    fn is_connected(&self) -> bool;

    /// Tear down the session. Safe to call when not connected.
    async fn close(&self) -> SyncResult<()>;

    /// Push the whole measurement set.
    ///
    /// # Postconditions
    /// - Measurements are processed oldest first
    /// - A failing measurement does not stop the remaining ones
    ///
    /// - A measurement exceeding the context's item timeout counts as failed
    ///
    /// # Errors
    /// - `ApiError` with "<n> of <total> measurements failed to sync"
    /// - `UnknownError` if cancelled between measurements
    async fn full_sync(
        &self,
        measurements: &[Measurement],
        context: &FullSyncContext,
    ) -> SyncResult<()>;

    /// Add one measurement.
    async fn insert(&self, measurement: &Measurement) -> SyncResult<()>;

    /// Make the target's record for this timestamp match the measurement.
    ///
    /// # Errors
    /// - `ApiError` if no matching record exists; nothing is inserted
    async fn update(&self, measurement: &Measurement) -> SyncResult<()>;

    /// Remove the record(s) for a timestamp.
    async fn delete(&self, timestamp: DateTime<Utc>) -> SyncResult<()>;

    /// Remove everything this integration ever wrote.
    async fn clear(&self) -> SyncResult<()>;

    /// Check the gate and connect on demand.
    ///
    /// # Errors
    /// - `PermissionDenied` without any I/O if the gate is closed
    /// - `ApiError` "not connected" if the implicit connect fails
    async fn prepare(&self) -> SyncResult<()> {
        self.control().check()?;

        if !self.is_connected() {
            debug!(target_name = self.name(), "No session, connecting on demand");
            if let Err(failure) = self.connect().await {
                warn!(target_name = self.name(), "Implicit connect failed: {}", failure);
                return Err(SyncFailure::api("not connected").with_cause(failure));
            }
        }

        Ok(())
    }
}

/// Cancellation and per-measurement bound of a full sync.
#[derive(Debug, Clone, Default)]
pub struct FullSyncContext {
    cancel: CancellationToken,
    item_timeout: Option<Duration>,
}

impl FullSyncContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            item_timeout: None,
        }
    }

    /// Bound each measurement's write by `limit`.
    pub fn with_item_timeout(mut self, limit: Duration) -> Self {
        self.item_timeout = Some(limit);
        self
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout
    }
}

/// Failure for a call that outlived its time bound.
pub fn operation_timed_out(limit: Duration) -> SyncFailure {
    SyncFailure::new(ErrorKind::UnknownError)
        .with_message(format!("operation timed out after {}s", limit.as_secs()))
}

/// Measurements sorted by ascending timestamp.
///
/// The sort is stable, so measurements sharing a timestamp keep their
/// relative order.
pub fn ordered_by_timestamp(measurements: &[Measurement]) -> Vec<&Measurement> {
    let mut ordered: Vec<&Measurement> = measurements.iter().collect();
    ordered.sort_by_key(|m| m.timestamp);
    ordered
}

/// Apply `operation` to every measurement, oldest first.
///
/// Failures are logged per measurement and reported as one aggregate count.
/// Cancellation is only observed between measurements. With an item timeout,
/// a measurement that takes longer fails on its own and the loop moves on.
pub async fn sync_in_order<'a, F, Fut>(
    target_name: &str,
    measurements: &'a [Measurement],
    context: &FullSyncContext,
    mut operation: F,
) -> SyncResult<()>
where
    F: FnMut(&'a Measurement) -> Fut,
    Fut: Future<Output = SyncResult<()>>,
{
    let ordered = ordered_by_timestamp(measurements);
    let total = ordered.len();
    let mut failed = 0usize;

    for (index, measurement) in ordered.into_iter().enumerate() {
        if context.cancel.is_cancelled() {
            warn!(target_name, "Full sync cancelled after {} of {}", index, total);
            return Err(SyncFailure::new(ErrorKind::UnknownError).with_message(format!(
                "full sync cancelled after {} of {} measurements",
                index, total
            )));
        }

        let result = match context.item_timeout {
            Some(limit) => tokio::time::timeout(limit, operation(measurement))
                .await
                .unwrap_or_else(|_| Err(operation_timed_out(limit))),
            None => operation(measurement).await,
        };

        match result {
            Ok(()) => debug!(target_name, "Synced measurement {}", measurement.timestamp),
            Err(failure) => {
                warn!(
                    target_name,
                    "Measurement {} ({}) failed to sync: {}",
                    measurement.describe_id(),
                    measurement.timestamp,
                    failure
                );
                failed += 1;
            }
        }
    }

    if failed > 0 {
        Err(SyncFailure::api(format!(
            "{} of {} measurements failed to sync",
            failed, total
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn at(secs: i64) -> Measurement {
        Measurement::new(Utc.timestamp_opt(secs, 0).unwrap(), 70.0, 20.0, 55.0, 40.0)
    }

    #[tokio::test]
    async fn test_sync_in_order_counts_failures() {
        let measurements = vec![at(30), at(10), at(20)];
        let context = FullSyncContext::default();

        let result = sync_in_order("test", &measurements, &context, |m| async move {
            if m.timestamp.timestamp() == 20 {
                Err(SyncFailure::api("rejected"))
            } else {
                Ok(())
            }
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::ApiError);
        assert_eq!(failure.message(), Some("1 of 3 measurements failed to sync"));
    }

    #[tokio::test]
    async fn test_sync_in_order_stops_when_cancelled() {
        let measurements = vec![at(1), at(2), at(3)];
        let context = FullSyncContext::new(CancellationToken::new());
        let seen = Mutex::new(Vec::new());

        let result = sync_in_order("test", &measurements, &context, |m| {
            seen.lock().unwrap().push(m.timestamp.timestamp());
            if m.timestamp.timestamp() == 2 {
                context.cancel().cancel();
            }
            async { Ok(()) }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(
            result.unwrap_err().message(),
            Some("full sync cancelled after 2 of 3 measurements")
        );
    }

    #[tokio::test]
    async fn test_sync_in_order_empty_is_success() {
        let context = FullSyncContext::default();
        let result = sync_in_order("test", &[], &context, |_| async { Ok(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_in_order_times_out_single_measurement() {
        let measurements = vec![at(1), at(2), at(3)];
        let context = FullSyncContext::default().with_item_timeout(Duration::from_secs(1));
        let seen = Mutex::new(Vec::new());

        let result = sync_in_order("test", &measurements, &context, |m| {
            seen.lock().unwrap().push(m.timestamp.timestamp());
            let stall = m.timestamp.timestamp() == 2;
            async move {
                if stall {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(())
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            result.unwrap_err().message(),
            Some("1 of 3 measurements failed to sync")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_timeout_does_not_bound_the_whole_sync() {
        let measurements: Vec<Measurement> = (0..300).map(|i| at(i * 3600)).collect();
        let context = FullSyncContext::default().with_item_timeout(Duration::from_secs(20));

        let result = sync_in_order("test", &measurements, &context, |_| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .await;

        assert!(result.is_ok());
    }

    proptest! {
        #[test]
        fn prop_ordered_by_timestamp_is_sorted(secs in proptest::collection::vec(0i64..2_000_000_000, 0..50)) {
            let measurements: Vec<Measurement> = secs.iter().map(|s| at(*s)).collect();
            let ordered = ordered_by_timestamp(&measurements);
            prop_assert_eq!(ordered.len(), measurements.len());
            prop_assert!(ordered.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }
    }
}
