//! Common utilities and types shared across the scalesync crates.
//!
//! This module provides the measurement value object, the operation result
//! model used by every sync target, and the infrastructure error type.

pub mod error;
pub mod result;
pub mod types;

pub use error::{Error, Result};
pub use result::{ErrorKind, SyncFailure, SyncResult};
pub use types::{round_half_up, Measurement, MeasurementId, Secret, User, UserId};
