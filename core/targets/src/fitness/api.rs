//! Weight entry resource of the fitness API.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use scalesync_common::Result;

/// Date layout of the `date` form field and filter.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A weight entry as listed by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub id: u64,
    #[serde(default)]
    pub date: Option<String>,
    /// The service renders decimals as strings; plain numbers are accepted too.
    #[serde(default, deserialize_with = "decimal_or_string")]
    pub weight: Option<f64>,
}

/// One page of a weight entry listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntryPage {
    /// Total matching entries across all pages; `-1` if the service omitted it.
    #[serde(default = "unknown_count")]
    pub count: i64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<WeightEntry>,
}

fn unknown_count() -> i64 {
    -1
}

fn decimal_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Decimal {
        Number(f64),
        Text(String),
    }

    match Option::<Decimal>::deserialize(deserializer)? {
        Some(Decimal::Number(value)) => Ok(Some(value)),
        Some(Decimal::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

/// Body of a create or patch request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightEntryForm {
    pub date: NaiveDate,
    pub weight: f64,
}

impl WeightEntryForm {
    pub fn new(date: NaiveDate, weight: f64) -> Self {
        Self { date, weight }
    }

    pub fn date_field(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn weight_field(&self) -> String {
        format!("{:.2}", self.weight)
    }

    /// URL-encoded form fields.
    pub fn fields(&self) -> [(&'static str, String); 2] {
        [("date", self.date_field()), ("weight", self.weight_field())]
    }
}

/// Weight entry endpoint of the fitness service.
///
/// Non-success responses surface as `Error::Api` carrying the status and
/// body; transport failures as `Error::Network`.
#[async_trait]
pub trait WeightEntryApi: Send + Sync {
    /// First page of entries, optionally restricted to one calendar date.
    async fn list(&self, date: Option<NaiveDate>) -> Result<WeightEntryPage>;

    async fn create(&self, form: &WeightEntryForm) -> Result<()>;

    async fn patch(&self, id: u64, form: &WeightEntryForm) -> Result<()>;

    async fn remove(&self, id: u64) -> Result<()>;
}
