//! Inbound commands announcing ledger changes.
//!
//! The ledger reports each change as a flat set of key/value extras
//! (`mode`, `userId`, `weight`, `fat`, `water`, `muscle`, `date`). Numeric
//! extras that are absent read as zero; `date` is epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use scalesync_common::{Error, Measurement, Result, UserId};

/// What the ledger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    Insert,
    Update,
    Delete,
    Clear,
}

impl FromStr for CommandMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(CommandMode::Insert),
            "update" => Ok(CommandMode::Update),
            "delete" => Ok(CommandMode::Delete),
            "clear" => Ok(CommandMode::Clear),
            other => Err(Error::InvalidInput(format!("unknown command mode '{}'", other))),
        }
    }
}

impl fmt::Display for CommandMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            CommandMode::Insert => "insert",
            CommandMode::Update => "update",
            CommandMode::Delete => "delete",
            CommandMode::Clear => "clear",
        };
        f.write_str(mode)
    }
}

/// A parsed inbound command.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCommand {
    pub mode: CommandMode,
    pub user_id: UserId,
    pub weight: f64,
    pub fat: f64,
    pub water: f64,
    pub muscle: f64,
    pub date: DateTime<Utc>,
}

/// JSON shape of a command, using the extras' key names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
    mode: CommandMode,
    #[serde(default)]
    user_id: i64,
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    fat: f64,
    #[serde(default)]
    water: f64,
    #[serde(default)]
    muscle: f64,
    #[serde(default)]
    date: i64,
}

impl InboundCommand {
    /// Parse key/value extras.
    ///
    /// # Errors
    /// - `InvalidInput` if `mode` is missing or unknown, or a value does not parse
    pub fn from_extras(extras: &HashMap<String, String>) -> Result<Self> {
        let mode: CommandMode = extras
            .get("mode")
            .ok_or_else(|| Error::InvalidInput("command has no mode".to_string()))?
            .parse()?;

        Self::build(
            mode,
            extra(extras, "userId")?.unwrap_or(0),
            extra(extras, "weight")?.unwrap_or(0.0),
            extra(extras, "fat")?.unwrap_or(0.0),
            extra(extras, "water")?.unwrap_or(0.0),
            extra(extras, "muscle")?.unwrap_or(0.0),
            extra(extras, "date")?.unwrap_or(0),
        )
    }

    /// Parse a JSON object with the same keys as the extras.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawCommand = serde_json::from_str(json)
            .map_err(|e| Error::InvalidInput(format!("malformed command: {}", e)))?;
        Self::build(
            raw.mode,
            raw.user_id,
            raw.weight,
            raw.fat,
            raw.water,
            raw.muscle,
            raw.date,
        )
    }

    fn build(
        mode: CommandMode,
        user_id: i64,
        weight: f64,
        fat: f64,
        water: f64,
        muscle: f64,
        date_millis: i64,
    ) -> Result<Self> {
        let date = DateTime::<Utc>::from_timestamp_millis(date_millis)
            .ok_or_else(|| Error::InvalidInput(format!("date out of range: {}", date_millis)))?;

        Ok(Self {
            mode,
            user_id: UserId::new(user_id),
            weight,
            fat,
            water,
            muscle,
            date,
        })
    }

    /// Whether the command is scoped to a user.
    pub fn is_user_scoped(&self) -> bool {
        matches!(self.mode, CommandMode::Insert | CommandMode::Update)
    }

    /// The unpersisted measurement carried by the command.
    pub fn measurement(&self) -> Measurement {
        Measurement::new(self.date, self.weight, self.fat, self.water, self.muscle)
    }
}

fn extra<T>(extras: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    extras
        .get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| Error::InvalidInput(format!("invalid {} '{}': {}", key, value, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn extras(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_insert_extras() {
        let command = InboundCommand::from_extras(&extras(&[
            ("mode", "insert"),
            ("userId", "1"),
            ("weight", "70.005"),
            ("fat", "20.1"),
            ("date", "1704441600000"),
        ]))
        .unwrap();

        assert_eq!(command.mode, CommandMode::Insert);
        assert_eq!(command.user_id, UserId::new(1));
        assert_eq!(command.weight, 70.005);
        assert_eq!(command.water, 0.0);
        assert_eq!(command.date, Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap());
        assert!(command.measurement().id.is_none());
    }

    #[test]
    fn test_missing_mode_is_rejected() {
        let result = InboundCommand::from_extras(&extras(&[("weight", "70")]));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_bad_number_is_rejected() {
        let result = InboundCommand::from_extras(&extras(&[("mode", "update"), ("weight", "heavy")]));
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("weight")));
    }

    #[test]
    fn test_parse_json() {
        let command =
            InboundCommand::from_json(r#"{ "mode": "delete", "date": 1704441600000 }"#).unwrap();
        assert_eq!(command.mode, CommandMode::Delete);
        assert!(!command.is_user_scoped());
    }
}
