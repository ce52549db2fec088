//! Common types used throughout scalesync.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Local identifier of a measurement in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeasurementId(i64);

impl MeasurementId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ledger user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ledger user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

/// Round to two decimal places, half away from zero.
///
/// Rounding is done on the shortest decimal representation of the value,
/// so `1.005` becomes `1.01` even though the nearest binary double is
/// slightly below it. Non-finite values are returned unchanged.
pub fn round_half_up(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }

    match Decimal::from_str(&value.to_string()) {
        Ok(decimal) => decimal
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .to_f64()
            .unwrap_or(value),
        Err(_) => value,
    }
}

/// A body-composition measurement as recorded in the ledger.
///
/// The timestamp is the natural key used to find the same measurement in a
/// sync target. `id` is absent for measurements that have not been
/// persisted by the ledger yet (for example those arriving as commands).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Ledger identifier, if persisted.
    pub id: Option<MeasurementId>,
    /// Instant the measurement was taken.
    pub timestamp: DateTime<Utc>,
    /// Body weight in kilograms.
    pub weight: f64,
    /// Body fat in percent.
    pub fat: f64,
    /// Body water in percent.
    pub water: f64,
    /// Muscle mass in percent.
    pub muscle: f64,
}

impl Measurement {
    /// Create an unpersisted measurement.
    pub fn new(timestamp: DateTime<Utc>, weight: f64, fat: f64, water: f64, muscle: f64) -> Self {
        Self {
            id: None,
            timestamp,
            weight,
            fat,
            water,
            muscle,
        }
    }

    /// Set the ledger identifier.
    pub fn with_id(mut self, id: MeasurementId) -> Self {
        self.id = Some(id);
        self
    }

    /// Copy with all four values rounded to two decimals.
    pub fn rounded(&self) -> Self {
        Self {
            id: self.id,
            timestamp: self.timestamp,
            weight: round_half_up(self.weight),
            fat: round_half_up(self.fat),
            water: round_half_up(self.water),
            muscle: round_half_up(self.muscle),
        }
    }

    /// Absolute body water mass in kilograms.
    pub fn water_mass_kg(&self) -> f64 {
        self.weight * self.water / 100.0
    }

    /// Identifier used to key records owned by this integration.
    ///
    /// Falls back to the timestamp in epoch milliseconds for unpersisted
    /// measurements so that two different commands never share a key.
    pub fn local_key(&self) -> i64 {
        match self.id {
            Some(id) => id.value(),
            None => self.timestamp.timestamp_millis(),
        }
    }

    /// Human readable identifier for diagnostics.
    pub fn describe_id(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => format!("<unsaved {}>", self.timestamp.to_rfc3339()),
        }
    }
}

/// Sensitive string that is zeroized on drop and redacted in debug output.
#[derive(Clone, Default, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}
