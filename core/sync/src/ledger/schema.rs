//! Versioned column layout of exported measurement rows.

use chrono::{DateTime, Utc};
use serde_json::Value;

use scalesync_common::{Error, Measurement, MeasurementId, Result};

/// Known row layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerSchema {
    /// `_ID`, `datetime` (epoch millis), `weight`, `fat`, `water`, `muscle`.
    V1,
}

const V1_COLUMNS: [&str; 6] = ["_ID", "datetime", "weight", "fat", "water", "muscle"];

impl LedgerSchema {
    pub fn from_version(version: u32) -> Result<Self> {
        match version {
            1 => Ok(LedgerSchema::V1),
            other => Err(Error::InvalidInput(format!(
                "unsupported ledger schema version {}",
                other
            ))),
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            LedgerSchema::V1 => 1,
        }
    }

    /// Required column names.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            LedgerSchema::V1 => &V1_COLUMNS,
        }
    }

    /// Resolve column positions once for a declared column list.
    ///
    /// Extra columns are allowed and ignored.
    ///
    /// # Errors
    /// - `InvalidInput` naming the first required column that is missing
    pub fn bind(&self, declared: &[String]) -> Result<ColumnMap> {
        let position = |name: &str| {
            declared
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| Error::InvalidInput(format!("ledger export lacks column '{}'", name)))
        };

        Ok(ColumnMap {
            id: position("_ID")?,
            datetime: position("datetime")?,
            weight: position("weight")?,
            fat: position("fat")?,
            water: position("water")?,
            muscle: position("muscle")?,
            width: declared.len(),
        })
    }
}

/// Column positions bound to one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    id: usize,
    datetime: usize,
    weight: usize,
    fat: usize,
    water: usize,
    muscle: usize,
    width: usize,
}

impl ColumnMap {
    pub fn width(&self) -> usize {
        self.width
    }

    /// Decode one row positionally. Missing body values read as zero.
    pub fn decode(&self, row: &[Value]) -> Result<Measurement> {
        if row.len() < self.width {
            return Err(Error::Serialization(format!(
                "row has {} values, expected {}",
                row.len(),
                self.width
            )));
        }

        let id = row[self.id]
            .as_i64()
            .ok_or_else(|| Error::Serialization(format!("invalid _ID: {}", row[self.id])))?;
        let millis = row[self.datetime].as_i64().ok_or_else(|| {
            Error::Serialization(format!("invalid datetime: {}", row[self.datetime]))
        })?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| Error::Serialization(format!("datetime out of range: {}", millis)))?;

        Ok(Measurement {
            id: Some(MeasurementId::new(id)),
            timestamp,
            weight: number(&row[self.weight], "weight")?,
            fat: number(&row[self.fat], "fat")?,
            water: number(&row[self.water], "water")?,
            muscle: number(&row[self.muscle], "muscle")?,
        })
    }

    /// Encode a measurement into a row of this layout.
    pub fn encode(&self, measurement: &Measurement) -> Vec<Value> {
        let mut row = vec![Value::Null; self.width];
        row[self.id] = measurement.id.map(|id| Value::from(id.value())).unwrap_or(Value::Null);
        row[self.datetime] = Value::from(measurement.timestamp.timestamp_millis());
        row[self.weight] = Value::from(measurement.weight);
        row[self.fat] = Value::from(measurement.fat);
        row[self.water] = Value::from(measurement.water);
        row[self.muscle] = Value::from(measurement.muscle);
        row
    }
}

fn number(value: &Value, column: &str) -> Result<f64> {
    match value {
        Value::Null => Ok(0.0),
        other => other
            .as_f64()
            .ok_or_else(|| Error::Serialization(format!("invalid {}: {}", column, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_bind_reordered_columns() {
        let map = LedgerSchema::V1
            .bind(&columns(&["muscle", "water", "fat", "weight", "datetime", "_ID", "comment"]))
            .unwrap();

        let row = vec![json!(40.0), json!(55.0), json!(20.0), json!(70.5), json!(1704441600000i64), json!(3), json!("x")];
        let measurement = map.decode(&row).unwrap();
        assert_eq!(measurement.id, Some(MeasurementId::new(3)));
        assert_eq!(measurement.weight, 70.5);
        assert_eq!(measurement.muscle, 40.0);
        assert_eq!(measurement.timestamp.timestamp_millis(), 1704441600000);
    }

    #[test]
    fn test_bind_missing_column() {
        let result = LedgerSchema::V1.bind(&columns(&["_ID", "datetime", "weight"]));
        assert!(matches!(result, Err(Error::InvalidInput(msg)) if msg.contains("'fat'")));
    }

    #[test]
    fn test_decode_short_row() {
        let map = LedgerSchema::V1.bind(&columns(&V1_COLUMNS)).unwrap();
        assert!(map.decode(&[json!(1)]).is_err());
    }

    #[test]
    fn test_null_values_read_as_zero() {
        let map = LedgerSchema::V1.bind(&columns(&V1_COLUMNS)).unwrap();
        let row = vec![json!(1), json!(0), json!(70.0), Value::Null, Value::Null, Value::Null];
        let measurement = map.decode(&row).unwrap();
        assert_eq!(measurement.fat, 0.0);
    }

    #[test]
    fn test_unknown_version() {
        assert!(LedgerSchema::from_version(2).is_err());
        assert_eq!(LedgerSchema::from_version(1).unwrap().version(), 1);
    }
}
