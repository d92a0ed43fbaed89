// Local CSV time series
//
// Header: location,date,cases,deaths,recoveries
// `location` must be an `iso1:`/`iso2:` token; empty metric cells are
// "not reported".

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{
    HttpFetcher, Location, Observations, RawObservation, RawValue, SourceAdapter, SourceKind,
};
use crate::model::Metric;

#[derive(Debug, Deserialize)]
struct CsvRow {
    location: String,
    date: String,
    #[serde(default)]
    cases: Option<String>,
    #[serde(default)]
    deaths: Option<String>,
    #[serde(default)]
    recoveries: Option<String>,
}

impl CsvRow {
    fn into_observation(self) -> RawObservation {
        let cell = |v: Option<String>| v.as_deref().and_then(RawValue::from_text);

        RawObservation::new(
            SourceKind::CsvSeries,
            Location::Feature(self.location.trim().to_string()),
            self.date.trim(),
        )
        .with_metric(Metric::Cases, cell(self.cases))
        .with_metric(Metric::Deaths, cell(self.deaths))
        .with_metric(Metric::Recoveries, cell(self.recoveries))
    }
}

pub struct CsvSeriesSource {
    path: PathBuf,
}

impl CsvSeriesSource {
    pub fn new(path: &Path) -> Self {
        CsvSeriesSource {
            path: path.to_path_buf(),
        }
    }

    /// Parse CSV from any reader. Rows that don't deserialize are skipped.
    pub fn parse_reader<R: Read>(reader: R) -> Vec<RawObservation> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(reader);

        rdr.deserialize::<CsvRow>()
            .enumerate()
            .filter_map(|(idx, row)| match row {
                Ok(row) => Some(row.into_observation()),
                Err(e) => {
                    tracing::debug!(line = idx + 2, error = %e, "Skipping malformed CSV row");
                    None
                }
            })
            .collect()
    }
}

impl SourceAdapter for CsvSeriesSource {
    fn kind(&self) -> SourceKind {
        SourceKind::CsvSeries
    }

    fn observations(&self, _http: &HttpFetcher) -> Result<Observations<'_>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open CSV file {}", self.path.display()))?;
        Ok(Box::new(Self::parse_reader(file).into_iter()))
    }
}
