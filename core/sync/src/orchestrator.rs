//! Multi-target orchestrator.
//!
//! Every operation fans out to all enabled targets at once, one task per
//! target. Within a target, operations are serialized by the target's
//! guard so that "ensure connected, then execute" never interleaves.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scalesync_common::{Error, ErrorKind, Measurement, Result, SyncFailure, SyncResult};
use scalesync_targets::{
    operation_timed_out, FullSyncContext, PermissionState, SyncTarget, TargetRegistry,
};

use crate::config::SyncConfig;
use crate::ledger::{resolve_user, LedgerGateway};
use crate::state::{ConnectionState, TargetState};

/// An operation applied to every enabled target.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Only establish sessions.
    Connect,
    Insert(Measurement),
    Update(Measurement),
    Delete(DateTime<Utc>),
    Clear,
    FullSync {
        measurements: Arc<Vec<Measurement>>,
        cancel: CancellationToken,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Insert(_) => "insert",
            Operation::Update(_) => "update",
            Operation::Delete(_) => "delete",
            Operation::Clear => "clear",
            Operation::FullSync { .. } => "full-sync",
        }
    }

    /// Payload with every value rounded to two decimals.
    fn rounded(self) -> Self {
        match self {
            Operation::Insert(m) => Operation::Insert(m.rounded()),
            Operation::Update(m) => Operation::Update(m.rounded()),
            Operation::FullSync {
                measurements,
                cancel,
            } => Operation::FullSync {
                measurements: Arc::new(measurements.iter().map(Measurement::rounded).collect()),
                cancel,
            },
            other => other,
        }
    }

    /// Run against one target. A full sync bounds each measurement by `limit`.
    async fn apply(&self, target: &dyn SyncTarget, limit: Duration) -> SyncResult<()> {
        match self {
            Operation::Connect => Ok(()),
            Operation::Insert(m) => target.insert(m).await,
            Operation::Update(m) => target.update(m).await,
            Operation::Delete(ts) => target.delete(*ts).await,
            Operation::Clear => target.clear().await,
            Operation::FullSync {
                measurements,
                cancel,
            } => {
                let context = FullSyncContext::new(cancel.clone()).with_item_timeout(limit);
                target.full_sync(measurements, &context).await
            }
        }
    }
}

/// Result of one operation on one target.
#[derive(Debug, Clone)]
pub enum TargetOutcome {
    /// Target disabled; nothing attempted.
    Skipped,
    Succeeded,
    Failed(SyncFailure),
}

impl TargetOutcome {
    pub fn is_attempted(&self) -> bool {
        !matches!(self, TargetOutcome::Skipped)
    }
}

/// Aggregate status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// No enabled target.
    NothingToDo,
    Succeeded,
    /// Some targets succeeded and some failed.
    PartialFailure,
    /// Every attempted target failed.
    Failed,
}

/// Per-target outcomes of one dispatched operation.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub id: Uuid,
    pub operation: &'static str,
    /// Outcomes in target configuration order.
    pub outcomes: Vec<(String, TargetOutcome)>,
}

impl BatchReport {
    pub fn status(&self) -> BatchStatus {
        let attempted = self.outcomes.iter().filter(|(_, o)| o.is_attempted()).count();
        let failed = self
            .outcomes
            .iter()
            .filter(|(_, o)| matches!(o, TargetOutcome::Failed(_)))
            .count();

        match (attempted, failed) {
            (0, _) => BatchStatus::NothingToDo,
            (_, 0) => BatchStatus::Succeeded,
            (a, f) if a == f => BatchStatus::Failed,
            _ => BatchStatus::PartialFailure,
        }
    }

    pub fn outcome(&self, target: &str) -> Option<&TargetOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, outcome)| outcome)
    }

    /// Failures by target name.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &SyncFailure)> {
        self.outcomes.iter().filter_map(|(name, outcome)| match outcome {
            TargetOutcome::Failed(failure) => Some((name.as_str(), failure)),
            _ => None,
        })
    }
}

/// A target with its guard and status.
struct TargetSlot {
    target: Arc<dyn SyncTarget>,
    guard: Mutex<()>,
    state: RwLock<TargetState>,
}

impl TargetSlot {
    fn new(target: Arc<dyn SyncTarget>) -> Self {
        let state = TargetState::new(target.name(), target.control().is_enabled());
        Self {
            target,
            guard: Mutex::new(()),
            state: RwLock::new(state),
        }
    }

    fn name(&self) -> &str {
        self.target.name()
    }

    async fn transition(&self, next: ConnectionState) {
        self.state.write().await.transition(next);
    }

    async fn fail(&self, failure: SyncFailure) -> TargetOutcome {
        warn!(target_name = self.name(), "{}", failure.user_message());
        let mut state = self.state.write().await;
        state.mark_failure(failure.user_message());
        if !self.target.is_connected() {
            state.transition(ConnectionState::Disconnected);
        }
        TargetOutcome::Failed(failure)
    }

    async fn close_session(&self) {
        if let Err(failure) = self.target.close().await {
            debug!(target_name = self.name(), "Closing session failed: {}", failure);
        }
        self.transition(ConnectionState::Disconnected).await;
    }

    /// Connect bounded by `limit`.
    async fn connect(&self, limit: Duration) -> SyncResult<()> {
        self.transition(ConnectionState::Connecting).await;
        match tokio::time::timeout(limit, self.target.connect()).await {
            Ok(Ok(())) => {
                self.transition(ConnectionState::Connected).await;
                info!(target_name = self.name(), "Connected");
                Ok(())
            }
            Ok(Err(failure)) => {
                self.transition(ConnectionState::Disconnected).await;
                Err(SyncFailure::api("not connected").with_cause(failure))
            }
            Err(_) => {
                self.close_session().await;
                Err(operation_timed_out(limit))
            }
        }
    }

    /// Run `operation` bounded by `limit`; the flag reports a timeout.
    ///
    /// A full sync is bounded per measurement instead, so its total
    /// duration grows with the measurement count.
    async fn run(&self, operation: &Operation, limit: Duration) -> (SyncResult<()>, bool) {
        let target = self.target.as_ref();
        if let Operation::FullSync { .. } = operation {
            return (operation.apply(target, limit).await, false);
        }

        match tokio::time::timeout(limit, operation.apply(target, limit)).await {
            Ok(result) => (result, false),
            Err(_) => {
                self.close_session().await;
                (Err(operation_timed_out(limit)), true)
            }
        }
    }

    async fn execute(&self, operation: &Operation, limit: Duration) -> TargetOutcome {
        if !self.target.control().is_enabled() {
            debug!(target_name = self.name(), "Disabled, skipping {}", operation.name());
            return TargetOutcome::Skipped;
        }

        let _guard = self.guard.lock().await;

        if let Err(failure) = self.target.control().check() {
            if !self.target.control().is_enabled() {
                return TargetOutcome::Skipped;
            }
            return self.fail(failure).await;
        }

        if !self.target.is_connected() {
            if let Err(failure) = self.connect(limit).await {
                return self.fail(failure).await;
            }
        }

        let (mut result, timed_out) = self.run(operation, limit).await;

        if let Err(failure) = &result {
            if !timed_out
                && failure.kind() == ErrorKind::UnknownError
                && !self.target.is_connected()
            {
                info!(
                    target_name = self.name(),
                    "Connection lost during {}, reconnecting once",
                    operation.name()
                );
                result = match self.connect(limit).await {
                    Ok(()) => self.run(operation, limit).await.0,
                    Err(reconnect) => Err(reconnect),
                };
            }
        }

        match result {
            Ok(()) => {
                let mut state = self.state.write().await;
                if let Operation::Connect = operation {
                    state.mark_connected();
                } else {
                    state.mark_success(Utc::now());
                    state.transition(ConnectionState::Connected);
                }
                debug!(target_name = self.name(), "{} succeeded", operation.name());
                TargetOutcome::Succeeded
            }
            Err(failure) => self.fail(failure).await,
        }
    }
}

/// Fatal failure reading the ledger for a full sync.
fn ledger_failure(context: &str, err: Error) -> SyncFailure {
    let message = format!("{}: {}", context, err);
    SyncFailure::unknown(err).with_message(message)
}

/// Dispatches operations to a fixed set of targets.
pub struct Orchestrator {
    slots: Vec<Arc<TargetSlot>>,
    operation_timeout: Duration,
    cancel: Mutex<CancellationToken>,
}

impl Orchestrator {
    /// Create an orchestrator over targets in dispatch order.
    ///
    /// # Errors
    /// - `Config` if two targets share a name
    pub fn new(targets: Vec<Arc<dyn SyncTarget>>, operation_timeout: Duration) -> Result<Self> {
        let mut slots: Vec<Arc<TargetSlot>> = Vec::with_capacity(targets.len());
        for target in targets {
            if slots.iter().any(|s| s.name() == target.name()) {
                return Err(Error::Config(format!("duplicate target name '{}'", target.name())));
            }
            slots.push(Arc::new(TargetSlot::new(target)));
        }

        Ok(Self {
            slots,
            operation_timeout,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Build every configured target through the registry.
    pub fn from_config(config: &SyncConfig, registry: &TargetRegistry) -> Result<Self> {
        config.validate()?;
        let targets = config
            .targets
            .iter()
            .map(|target| registry.resolve(target))
            .collect::<Result<Vec<_>>>()?;
        Self::new(targets, config.operation_timeout())
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn target_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name().to_string()).collect()
    }

    fn slot(&self, name: &str) -> Result<&Arc<TargetSlot>> {
        self.slots
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| Error::NotFound(format!("target '{}'", name)))
    }

    /// Snapshot of every target's status.
    pub async fn states(&self) -> Vec<TargetState> {
        let mut states = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            states.push(slot.state.read().await.clone());
        }
        states
    }

    /// Switch a target on or off. Disabling waits for a running operation
    /// on that target and then closes its session.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let slot = self.slot(name)?;
        slot.target.control().set_enabled(enabled);
        slot.state.write().await.set_enabled(enabled);
        info!(target_name = name, enabled, "Target toggled");

        if !enabled {
            let _guard = slot.guard.lock().await;
            if let Err(failure) = slot.target.close().await {
                debug!(target_name = name, "Closing session failed: {}", failure);
            }
        }
        Ok(())
    }

    /// Apply host authorization state before a batch. Unknown names are ignored.
    pub fn refresh_permissions(&self, permissions: &HashMap<String, PermissionState>) {
        for slot in &self.slots {
            if let Some(state) = permissions.get(slot.name()) {
                slot.target.control().set_permission(*state);
            }
        }
    }

    /// Apply an operation to every enabled target concurrently.
    pub async fn dispatch(&self, operation: Operation) -> BatchReport {
        let operation = Arc::new(operation.rounded());
        let id = Uuid::new_v4();
        let limit = self.operation_timeout;
        info!(batch_id = %id, "Dispatching {} to {} targets", operation.name(), self.slots.len());

        let tasks = self.slots.iter().map(|slot| {
            let slot = Arc::clone(slot);
            let operation = Arc::clone(&operation);
            tokio::spawn(async move { slot.execute(&operation, limit).await })
        });
        let joined = join_all(tasks).await;

        let outcomes = self
            .slots
            .iter()
            .zip(joined)
            .map(|(slot, joined)| {
                let outcome = joined.unwrap_or_else(|join_error| {
                    error!(target_name = slot.name(), "Target task aborted: {}", join_error);
                    TargetOutcome::Failed(SyncFailure::unknown(join_error))
                });
                (slot.name().to_string(), outcome)
            })
            .collect();

        let report = BatchReport {
            id,
            operation: operation.name(),
            outcomes,
        };
        info!(batch_id = %id, "{} finished: {:?}", report.operation, report.status());
        report
    }

    pub async fn connect_all(&self) -> BatchReport {
        self.dispatch(Operation::Connect).await
    }

    pub async fn insert(&self, measurement: Measurement) -> BatchReport {
        self.dispatch(Operation::Insert(measurement)).await
    }

    pub async fn update(&self, measurement: Measurement) -> BatchReport {
        self.dispatch(Operation::Update(measurement)).await
    }

    pub async fn delete(&self, timestamp: DateTime<Utc>) -> BatchReport {
        self.dispatch(Operation::Delete(timestamp)).await
    }

    pub async fn clear(&self) -> BatchReport {
        self.dispatch(Operation::Clear).await
    }

    /// Push a given measurement set to every enabled target.
    pub async fn full_sync_measurements(&self, measurements: Vec<Measurement>) -> BatchReport {
        let cancel = self.cancel.lock().await.clone();
        self.dispatch(Operation::FullSync {
            measurements: Arc::new(measurements),
            cancel,
        })
        .await
    }

    /// Push all measurements of the selected ledger user.
    ///
    /// # Errors
    /// - `UnknownError` if the ledger is too old, has no users or cannot be read
    pub async fn full_sync(&self, ledger: &dyn LedgerGateway) -> SyncResult<BatchReport> {
        ledger
            .check_capability()
            .await
            .map_err(|e| ledger_failure("ledger capability check failed", e))?;
        let user = resolve_user(ledger)
            .await
            .map_err(|e| ledger_failure("cannot resolve ledger user", e))?;
        let measurements = ledger
            .list_measurements(user.id)
            .await
            .map_err(|e| ledger_failure("cannot read measurements", e))?;

        info!(
            "Full sync of {} measurements for user {} ({})",
            measurements.len(),
            user.username,
            user.id
        );
        Ok(self.full_sync_measurements(measurements).await)
    }

    /// Stop in-flight full syncs at their next measurement boundary.
    pub async fn cancel_running(&self) {
        let mut cancel = self.cancel.lock().await;
        cancel.cancel();
        *cancel = CancellationToken::new();
        info!("Cancelled running full syncs");
    }

    /// Close every session.
    pub async fn close_all(&self) {
        for slot in &self.slots {
            let _guard = slot.guard.lock().await;
            slot.close_session().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use scalesync_common::{User, UserId};
    use scalesync_targets::fitness::{
        FitnessApiAdapter, FitnessSettings, MemoryWeightEntryApi, WeightEntryApi,
    };
    use scalesync_targets::health::{HealthRecordAdapter, HealthSettings, MemoryHealthStore, RecordKind};
    use scalesync_targets::{sync_in_order, TargetControl, TargetKind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::ledger::MemoryLedger;

    /// Target with scripted connection behaviour.
    struct ProbeTarget {
        name: String,
        control: TargetControl,
        connected: AtomicBool,
        connects: AtomicUsize,
        closes: AtomicUsize,
        inserts: AtomicUsize,
        drop_first_insert: bool,
        delay: Duration,
        stall_at: Option<DateTime<Utc>>,
    }

    impl ProbeTarget {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                control: TargetControl::new(true),
                connected: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                inserts: AtomicUsize::new(0),
                drop_first_insert: false,
                delay: Duration::ZERO,
                stall_at: None,
            }
        }
    }

    #[async_trait]
    impl SyncTarget for ProbeTarget {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> TargetKind {
            TargetKind::Mqtt
        }

        fn control(&self) -> &TargetControl {
            &self.control
        }

        async fn connect(&self) -> SyncResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn close(&self) -> SyncResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn full_sync(&self, measurements: &[Measurement], context: &FullSyncContext) -> SyncResult<()> {
            self.prepare().await?;
            sync_in_order(&self.name, measurements, context, |m| async move {
                if Some(m.timestamp) == self.stall_at {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                tokio::time::sleep(self.delay).await;
                Ok(())
            })
            .await
        }

        async fn insert(&self, _measurement: &Measurement) -> SyncResult<()> {
            self.prepare().await?;
            let attempt = self.inserts.fetch_add(1, Ordering::SeqCst);
            if self.drop_first_insert && attempt == 0 {
                self.connected.store(false, Ordering::SeqCst);
                return Err(SyncFailure::unknown(Error::Network("connection reset".to_string())));
            }
            tokio::time::sleep(self.delay).await;
            Ok(())
        }

        async fn update(&self, _measurement: &Measurement) -> SyncResult<()> {
            self.prepare().await
        }

        async fn delete(&self, _timestamp: DateTime<Utc>) -> SyncResult<()> {
            self.prepare().await
        }

        async fn clear(&self) -> SyncResult<()> {
            self.prepare().await
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryHealthStore>,
        api: Arc<MemoryWeightEntryApi>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryHealthStore::new());
        let api = Arc::new(MemoryWeightEntryApi::new());
        let health = HealthRecordAdapter::new("health", store.clone(), &HealthSettings::default()).unwrap();
        let fitness = FitnessApiAdapter::new("wger", api.clone(), &FitnessSettings::default()).unwrap();
        let orchestrator = Orchestrator::new(
            vec![Arc::new(health), Arc::new(fitness)],
            Duration::from_secs(20),
        )
        .unwrap();
        Fixture { store, api, orchestrator }
    }

    #[tokio::test]
    async fn test_insert_reaches_every_target_rounded() {
        let f = fixture();
        let report = f
            .orchestrator
            .insert(Measurement::new(at(5, 8), 70.005, 20.004, 55.0, 40.0))
            .await;

        assert_eq!(report.status(), BatchStatus::Succeeded);
        let records = f.store.records().await;
        let weight = records.iter().find(|r| r.kind == RecordKind::Weight).unwrap();
        assert_eq!(weight.value, 70.01);
        let fat = records.iter().find(|r| r.kind == RecordKind::BodyFat).unwrap();
        assert_eq!(fat.value, 20.0);
        assert_eq!(f.api.entries().await[0].weight, Some(70.01));

        for state in f.orchestrator.states().await {
            assert!(state.last_sync.is_some());
            assert_eq!(state.connection, ConnectionState::Connected);
        }
    }

    #[tokio::test]
    async fn test_partial_failure_records_last_error() {
        let f = fixture();
        f.orchestrator.insert(Measurement::new(at(5, 8), 70.0, 20.0, 55.0, 40.0)).await;
        f.api.remove(1).await.unwrap();

        let report = f
            .orchestrator
            .update(Measurement::new(at(5, 8), 71.0, 20.0, 55.0, 40.0))
            .await;

        assert_eq!(report.status(), BatchStatus::PartialFailure);
        assert!(matches!(report.outcome("health"), Some(TargetOutcome::Succeeded)));
        let states = f.orchestrator.states().await;
        assert_eq!(
            states[1].last_error.as_deref(),
            Some("api error (no weight entry found for date: 2024-01-05)")
        );
        assert!(states[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_disabled_targets_are_skipped() {
        let f = fixture();
        f.orchestrator.set_enabled("health", false).await.unwrap();
        f.orchestrator.set_enabled("wger", false).await.unwrap();

        let report = f.orchestrator.clear().await;
        assert_eq!(report.status(), BatchStatus::NothingToDo);
        assert!(report.failures().next().is_none());
        assert_eq!(f.store.calls(), 0);
        assert_eq!(f.api.calls(), 0);

        let states = f.orchestrator.states().await;
        assert!(states.iter().all(|s| s.connection == ConnectionState::Disabled));
        assert!(states.iter().all(|s| s.last_error.is_none()));
    }

    #[tokio::test]
    async fn test_revoked_permission_fails_without_io() {
        let f = fixture();
        let permissions = HashMap::from([("health".to_string(), PermissionState::Denied)]);
        f.orchestrator.refresh_permissions(&permissions);

        let report = f.orchestrator.delete(at(5, 8)).await;
        match report.outcome("health") {
            Some(TargetOutcome::Failed(failure)) => {
                assert_eq!(failure.kind(), ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(f.store.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let f = fixture();
        f.store.set_fail_inserts(true);
        f.api.reject_date(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()).await;

        let report = f.orchestrator.insert(Measurement::new(at(5, 8), 70.0, 0.0, 0.0, 0.0)).await;
        assert_eq!(report.status(), BatchStatus::Failed);
        assert_eq!(report.failures().count(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_operation() {
        let f = fixture();
        f.store.set_granted([RecordKind::Weight]);

        let report = f.orchestrator.connect_all().await;
        assert_eq!(report.status(), BatchStatus::PartialFailure);
        match report.outcome("health") {
            Some(TargetOutcome::Failed(failure)) => {
                assert_eq!(failure.message(), Some("not connected"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let states = f.orchestrator.states().await;
        assert_eq!(states[0].connection, ConnectionState::Disconnected);
        assert_eq!(states[1].connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_does_not_count_as_sync() {
        let f = fixture();
        f.store.set_granted([RecordKind::Weight]);
        f.orchestrator.connect_all().await;
        assert!(f.orchestrator.states().await[0].last_error.is_some());

        f.store.set_granted(RecordKind::ALL);
        let report = f.orchestrator.connect_all().await;

        assert_eq!(report.status(), BatchStatus::Succeeded);
        for state in f.orchestrator.states().await {
            assert_eq!(state.connection, ConnectionState::Connected);
            assert!(state.last_sync.is_none());
            assert!(state.last_error.is_none());
        }
    }

    #[tokio::test]
    async fn test_reconnects_once_after_lost_connection() {
        let mut probe = ProbeTarget::new("probe");
        probe.drop_first_insert = true;
        let probe = Arc::new(probe);
        let orchestrator = Orchestrator::new(vec![probe.clone()], Duration::from_secs(5)).unwrap();

        let report = orchestrator.insert(Measurement::new(at(5, 8), 70.0, 0.0, 0.0, 0.0)).await;

        assert_eq!(report.status(), BatchStatus::Succeeded);
        assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
        assert_eq!(probe.inserts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_timeout_disconnects() {
        let mut probe = ProbeTarget::new("slow");
        probe.delay = Duration::from_secs(60);
        let probe = Arc::new(probe);
        let orchestrator = Orchestrator::new(vec![probe.clone()], Duration::from_secs(2)).unwrap();

        let report = orchestrator.insert(Measurement::new(at(5, 8), 70.0, 0.0, 0.0, 0.0)).await;

        match report.outcome("slow") {
            Some(TargetOutcome::Failed(failure)) => {
                assert_eq!(failure.kind(), ErrorKind::UnknownError);
                assert_eq!(failure.message(), Some("operation timed out after 2s"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert_eq!(probe.inserts.load(Ordering::SeqCst), 1);
        let state = &orchestrator.states().await[0];
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert_eq!(
            state.last_error.as_deref(),
            Some("unknown error (operation timed out after 2s)")
        );
    }

    fn hourly(count: i64) -> Vec<Measurement> {
        let start = at(1, 0);
        (0..count)
            .map(|i| Measurement::new(start + chrono::Duration::hours(i), 70.0, 0.0, 0.0, 0.0))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_full_sync_outlasts_operation_timeout() {
        let mut probe = ProbeTarget::new("probe");
        probe.delay = Duration::from_millis(100);
        let orchestrator =
            Orchestrator::new(vec![Arc::new(probe)], Duration::from_secs(20)).unwrap();

        let report = orchestrator.full_sync_measurements(hourly(300)).await;

        assert_eq!(report.status(), BatchStatus::Succeeded);
        assert!(orchestrator.states().await[0].last_sync.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_measurement_fails_alone_in_full_sync() {
        let measurements = hourly(5);
        let mut probe = ProbeTarget::new("probe");
        probe.stall_at = Some(measurements[2].timestamp);
        let probe = Arc::new(probe);
        let orchestrator = Orchestrator::new(vec![probe.clone()], Duration::from_secs(2)).unwrap();

        let report = orchestrator.full_sync_measurements(measurements).await;

        match report.outcome("probe") {
            Some(TargetOutcome::Failed(failure)) => {
                assert_eq!(failure.kind(), ErrorKind::ApiError);
                assert_eq!(failure.message(), Some("1 of 5 measurements failed to sync"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(probe.is_connected());
        assert_eq!(probe.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_full_sync_between_measurements() {
        let mut probe = ProbeTarget::new("probe");
        probe.delay = Duration::from_millis(10);
        let orchestrator = Arc::new(
            Orchestrator::new(vec![Arc::new(probe)], Duration::from_secs(20)).unwrap(),
        );
        let measurements: Vec<Measurement> = (1..=5)
            .map(|day| Measurement::new(at(day, 8), 70.0, 0.0, 0.0, 0.0))
            .collect();

        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.full_sync_measurements(measurements).await })
        };
        tokio::time::sleep(Duration::from_millis(15)).await;
        orchestrator.cancel_running().await;

        let report = running.await.unwrap();
        match report.outcome("probe") {
            Some(TargetOutcome::Failed(failure)) => {
                assert_eq!(failure.message(), Some("full sync cancelled after 2 of 5 measurements"))
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let again = orchestrator.full_sync_measurements(Vec::new()).await;
        assert_eq!(again.status(), BatchStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_full_sync_from_ledger() {
        let f = fixture();
        let ledger = MemoryLedger::new()
            .with_user(User { id: UserId::new(1), username: "alice".into() })
            .with_user(User { id: UserId::new(2), username: "bob".into() })
            .with_measurement(UserId::new(1), Measurement::new(at(6, 8), 71.0, 20.0, 55.0, 40.0))
            .with_measurement(UserId::new(1), Measurement::new(at(5, 8), 70.0, 20.0, 55.0, 40.0))
            .with_measurement(UserId::new(2), Measurement::new(at(5, 9), 90.0, 25.0, 50.0, 35.0));

        let report = f.orchestrator.full_sync(&ledger).await.unwrap();
        assert_eq!(report.status(), BatchStatus::Succeeded);

        let dates: Vec<String> = f.api.entries().await.into_iter().filter_map(|e| e.date).collect();
        assert_eq!(dates, vec!["2024-01-05", "2024-01-06"]);
        assert_eq!(f.store.records().await.len(), 6);
    }

    #[tokio::test]
    async fn test_full_sync_fatal_ledger_errors() {
        let f = fixture();

        let old = MemoryLedger::new().with_version_code(40);
        let failure = f.orchestrator.full_sync(&old).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::UnknownError);
        assert!(failure.message().unwrap().starts_with("ledger capability check failed"));

        let empty = MemoryLedger::new();
        assert!(f.orchestrator.full_sync(&empty).await.is_err());

        let missing = MemoryLedger::new();
        missing.set_unavailable(true);
        assert!(f.orchestrator.full_sync(&missing).await.is_err());
        assert_eq!(f.api.calls(), 0);
    }

    #[tokio::test]
    async fn test_disable_closes_session() {
        let probe = Arc::new(ProbeTarget::new("probe"));
        let orchestrator = Orchestrator::new(vec![probe.clone()], Duration::from_secs(5)).unwrap();
        orchestrator.connect_all().await;
        assert!(probe.is_connected());

        orchestrator.set_enabled("probe", false).await.unwrap();
        assert!(!probe.is_connected());
        assert_eq!(orchestrator.states().await[0].connection, ConnectionState::Disabled);

        orchestrator.set_enabled("probe", true).await.unwrap();
        assert_eq!(orchestrator.states().await[0].connection, ConnectionState::Disconnected);
        assert!(orchestrator.set_enabled("missing", true).await.is_err());
    }

    #[test]
    fn test_duplicate_target_names_rejected() {
        let targets: Vec<Arc<dyn SyncTarget>> =
            vec![Arc::new(ProbeTarget::new("a")), Arc::new(ProbeTarget::new("a"))];
        assert!(Orchestrator::new(targets, Duration::from_secs(1)).is_err());
    }
}
