//! Sync target abstraction for scalesync.
//!
//! This module provides the trait every sync target implements, the gate
//! that decides whether a target may perform I/O, a registry resolving
//! targets from configuration, and the three built-in targets:
//! - `health`: typed records in a health-record store
//! - `mqtt`: JSON documents published to an MQTT broker
//! - `fitness`: weight entries in a paginated fitness REST API
//!
//! # Design Principles
//! - Target isolation: no target-specific logic in the orchestrator
//! - Async operations: all I/O is async
//! - Unified result semantics: every operation returns `SyncResult`

pub mod control;
pub mod fitness;
pub mod health;
pub mod mqtt;
pub mod registry;
pub mod target;

pub use control::{PermissionState, TargetControl};
pub use registry::{create_default_registry, TargetConfig, TargetFactory, TargetRegistry};
pub use target::{
    operation_timed_out, ordered_by_timestamp, sync_in_order, FullSyncContext, SyncTarget,
    TargetKind,
};
