// 📥 Source adapters - one per external dataset
//
// Every adapter turns its native format into `RawObservation`s and nothing
// more: no region resolution, no merging. Each one exposes a pure
// `parse_*` entry point so it can be tested without the network.

pub mod csv_series;
pub mod directory;
pub mod geometry;
pub mod html_table;
pub mod population;
pub mod timeseries_json;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Metric;

pub use csv_series::CsvSeriesSource;
pub use directory::{DirectoryEntry, RegionDirectory};
pub use geometry::{GeometryArchive, GeometryLevel};
pub use html_table::{HtmlTableSource, TableSpec};
pub use population::{PopulationQuery, PopulationRow};
pub use timeseries_json::LocationTimeSeries;

const USER_AGENT: &str = concat!("epi-reconcile/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// SOURCE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Per-location JSON time series (`featureId` + `dates`)
    LocationTimeSeries,
    /// Monthly tables scraped from an HTML page
    HtmlTable,
    /// Local CSV export
    CsvSeries,
}

impl SourceKind {
    pub fn code(&self) -> &'static str {
        match self {
            SourceKind::LocationTimeSeries => "timeseries-json",
            SourceKind::HtmlTable => "html-table",
            SourceKind::CsvSeries => "csv",
        }
    }
}

// ============================================================================
// RAW RECORDS
// ============================================================================

/// How a source names a place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Identifier that must carry a scheme prefix (`iso1:US`, `iso2:AU-NSW`).
    /// Anything else (county FIPS, facility ids) is rejected downstream.
    Feature(String),
    /// Free-text country or subdivision name (`"South Korea"`).
    Name(String),
}

impl Location {
    pub fn as_str(&self) -> &str {
        match self {
            Location::Feature(s) | Location::Name(s) => s,
        }
    }
}

/// A metric value exactly as the source wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    /// JSON scalar → raw value. `null`, `""` and non-scalars are "not reported".
    pub fn from_json(value: &serde_json::Value) -> Option<RawValue> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(RawValue::Integer(i)),
                None => n.as_f64().map(RawValue::Float),
            },
            serde_json::Value::String(s) if s.is_empty() => None,
            serde_json::Value::String(s) => Some(RawValue::Text(s.clone())),
            _ => None,
        }
    }

    /// Text cell → raw value; blank cells are "not reported".
    pub fn from_text(text: &str) -> Option<RawValue> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(RawValue::Text(trimmed.to_string()))
        }
    }

    /// Strict integer conversion.
    ///
    /// Floats are accepted only when integral; text must parse as `i64`
    /// after trimming, with no other cleanup.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RawValue::Integer(i) => Some(*i),
            RawValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                    Some(*f as i64)
                } else {
                    None
                }
            }
            RawValue::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            RawValue::Integer(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }
}

/// Normalized shape every adapter produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub source: SourceKind,
    pub location: Location,
    pub date: String,
    pub metrics: BTreeMap<Metric, RawValue>,
}

impl RawObservation {
    pub fn new(source: SourceKind, location: Location, date: impl Into<String>) -> Self {
        RawObservation {
            source,
            location,
            date: date.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Builder pattern: add one metric (ignored when not reported)
    pub fn with_metric(mut self, metric: Metric, value: Option<RawValue>) -> Self {
        if let Some(value) = value {
            self.metrics.insert(metric, value);
        }
        self
    }
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// Boxed lazy sequence of raw records.
pub type Observations<'a> = Box<dyn Iterator<Item = RawObservation> + 'a>;

/// A stats-bearing source.
pub trait SourceAdapter {
    fn kind(&self) -> SourceKind;

    /// Fetch the dataset and yield its records. Fetch and parse failures of
    /// the dataset as a whole are fatal; individual bad records are skipped.
    fn observations(&self, http: &HttpFetcher) -> Result<Observations<'_>>;
}

// ============================================================================
// FETCH TARGETS
// ============================================================================

/// Where a dataset lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Url(String),
    File(PathBuf),
}

impl FetchTarget {
    /// `http(s)://…` becomes a URL, anything else a local path.
    pub fn parse(target: &str) -> Self {
        if target.starts_with("http://") || target.starts_with("https://") {
            FetchTarget::Url(target.to_string())
        } else {
            FetchTarget::File(PathBuf::from(target))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            FetchTarget::Url(url) => url.clone(),
            FetchTarget::File(path) => path.display().to_string(),
        }
    }

    pub fn read_text(&self, http: &HttpFetcher) -> Result<String> {
        match self {
            FetchTarget::Url(url) => http.get_text(url),
            FetchTarget::File(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn read_bytes(&self, http: &HttpFetcher) -> Result<Vec<u8>> {
        match self {
            FetchTarget::Url(url) => http.get_bytes(url),
            FetchTarget::File(path) => {
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
            }
        }
    }
}

/// Blocking HTTP client shared by the adapters of one run.
///
/// No retry: a failed request is fatal for the run.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(HttpFetcher { client })
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::blocking::Response> {
        tracing::debug!(url, "GET");
        self.client
            .get(url)
            .query(query)
            .send()
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))
    }

    pub fn get_text(&self, url: &str) -> Result<String> {
        self.get(url, &[])?
            .text()
            .with_context(|| format!("Failed to read body of {}", url))
    }

    pub fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .get(url, &[])?
            .bytes()
            .with_context(|| format!("Failed to read body of {}", url))?;
        Ok(bytes.to_vec())
    }

    pub fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let body = self
            .get(url, query)?
            .text()
            .with_context(|| format!("Failed to read body of {}", url))?;
        decode_json(url, &body)
    }
}

fn decode_json(url: &str, body: &str) -> Result<serde_json::Value> {
    serde_json::from_str(body).with_context(|| format!("{} did not return JSON", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_value_from_json() {
        assert_eq!(RawValue::from_json(&json!(12)), Some(RawValue::Integer(12)));
        assert_eq!(RawValue::from_json(&json!(null)), None);
        assert_eq!(RawValue::from_json(&json!("")), None);
        assert_eq!(
            RawValue::from_json(&json!("7")),
            Some(RawValue::Text("7".to_string()))
        );
        assert_eq!(RawValue::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn test_decode_json_body() {
        let value = decode_json("https://query.example", r#"{"results":{"bindings":[]}}"#).unwrap();
        assert_eq!(value["results"]["bindings"], json!([]));

        let err = decode_json("https://query.example", "<html>busy</html>").unwrap_err();
        assert!(err.to_string().contains("did not return JSON"));
    }

    #[test]
    fn test_strict_integer_parse() {
        assert_eq!(RawValue::Integer(5).as_integer(), Some(5));
        assert_eq!(RawValue::Float(40.0).as_integer(), Some(40));
        assert_eq!(RawValue::Float(40.5).as_integer(), None);
        assert_eq!(RawValue::Text(" 12 ".to_string()).as_integer(), Some(12));
        assert_eq!(RawValue::Text("1,200".to_string()).as_integer(), None);
        assert_eq!(RawValue::Text("n/a".to_string()).as_integer(), None);
    }

    #[test]
    fn test_fetch_target_parse() {
        assert_eq!(
            FetchTarget::parse("https://example.com/a.json"),
            FetchTarget::Url("https://example.com/a.json".to_string())
        );
        assert_eq!(
            FetchTarget::parse("data/a.json"),
            FetchTarget::File(PathBuf::from("data/a.json"))
        );
    }

    #[test]
    fn test_with_metric_skips_unreported() {
        let obs = RawObservation::new(
            SourceKind::CsvSeries,
            Location::Feature("iso1:US".to_string()),
            "2020-03-01",
        )
        .with_metric(Metric::Cases, Some(RawValue::Integer(1)))
        .with_metric(Metric::Deaths, None);

        assert_eq!(obs.metrics.len(), 1);
        assert!(obs.metrics.contains_key(&Metric::Cases));
    }
}
