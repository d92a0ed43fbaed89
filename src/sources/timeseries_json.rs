// Per-location JSON time series
//
// Body shape:
//   { "<any key>": { "featureId": "iso1:US",
//                    "dates": { "2020-03-01": { "cases": 100, "deaths": 1, "recovered": 3 } } } }
//
// A top-level array of the same location objects is accepted too.

use anyhow::{Context, Result};
use serde_json::Value;

use super::{
    FetchTarget, HttpFetcher, Location, Observations, RawObservation, RawValue, SourceAdapter,
    SourceKind,
};
use crate::model::Metric;

pub const DEFAULT_URL: &str = "https://coronadatascraper.com/timeseries-byLocation.json";

/// Native field name → canonical metric.
const METRIC_FIELDS: [(&str, Metric); 3] = [
    ("cases", Metric::Cases),
    ("deaths", Metric::Deaths),
    ("recovered", Metric::Recoveries),
];

pub struct LocationTimeSeries {
    target: FetchTarget,
}

impl LocationTimeSeries {
    pub fn new(target: FetchTarget) -> Self {
        LocationTimeSeries { target }
    }

    /// Parse a full response body.
    pub fn parse_body(body: &str) -> Result<Vec<RawObservation>> {
        let data: Value =
            serde_json::from_str(body).context("Time series body is not valid JSON")?;
        Ok(Self::parse_value(data).collect())
    }

    /// Lazily flatten a parsed body into observations.
    pub fn parse_value(data: Value) -> impl Iterator<Item = RawObservation> {
        let locations: Vec<Value> = match data {
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            Value::Array(items) => items,
            _ => Vec::new(),
        };

        locations.into_iter().flat_map(location_observations)
    }
}

/// Observations of one location object. Locations without `featureId` or
/// `dates` produce nothing.
fn location_observations(location: Value) -> Vec<RawObservation> {
    let feature_id = match location.get("featureId").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => return Vec::new(),
    };
    let dates = match location.get("dates").and_then(Value::as_object) {
        Some(dates) => dates,
        None => return Vec::new(),
    };

    dates
        .iter()
        .map(|(date, values)| {
            METRIC_FIELDS.iter().fold(
                RawObservation::new(
                    SourceKind::LocationTimeSeries,
                    Location::Feature(feature_id.clone()),
                    date.clone(),
                ),
                |obs, (field, metric)| {
                    obs.with_metric(*metric, values.get(*field).and_then(RawValue::from_json))
                },
            )
        })
        .collect()
}

impl SourceAdapter for LocationTimeSeries {
    fn kind(&self) -> SourceKind {
        SourceKind::LocationTimeSeries
    }

    fn observations(&self, http: &HttpFetcher) -> Result<Observations<'_>> {
        let body = self.target.read_text(http)?;
        let data: Value = serde_json::from_str(&body)
            .with_context(|| format!("{} is not valid JSON", self.target.describe()))?;
        Ok(Box::new(Self::parse_value(data)))
    }
}
