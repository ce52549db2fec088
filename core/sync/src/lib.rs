//! scalesync orchestration
//!
//! This crate drives every configured sync target from one place:
//! - Ledger gateway reading users and measurements
//! - Concurrent dispatch with one exclusive session per target
//! - Per-target connection state, last sync and last error
//! - Inbound command parsing and an ordered command worker
//! - JSON configuration file

pub mod command;
pub mod config;
pub mod dispatcher;
pub mod ledger;
pub mod orchestrator;
pub mod state;

pub use command::{CommandMode, InboundCommand};
pub use config::{SyncConfig, DEFAULT_OPERATION_TIMEOUT_SECS};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, DispatchRequest, DispatcherHandle};
pub use ledger::{resolve_user, JsonFileLedger, LedgerGateway, MemoryLedger, MIN_VERSION_CODE};
pub use orchestrator::{BatchReport, BatchStatus, Operation, Orchestrator, TargetOutcome};
pub use state::{ConnectionState, TargetState};
