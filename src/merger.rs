// 🧩 Time-Series Merger - fold partial observations into one row per key
//
// region → date → {cases, deaths, recoveries}
//
// Merging an observation only touches the fields it reports. A field the
// observation doesn't carry is never reset, so sources that report cases and
// deaths separately end up in the same row. When two observations report
// the same field for the same key, the one merged last wins.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::RecordError;
use crate::model::{DiseaseStat, Metric, Metrics, RegionPopulation};
use crate::sources::RawValue;

// ============================================================================
// FIELD PARSING
// ============================================================================

/// Strict ISO date (`YYYY-MM-DD`).
pub fn parse_date(raw: &str) -> Result<NaiveDate, RecordError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| RecordError::InvalidDate(raw.to_string()))
}

/// Convert raw metric values field by field.
///
/// A value that isn't a clean integer becomes "absent" for that field only;
/// its error is returned alongside so the caller can count it.
pub fn parse_metrics(raw: &BTreeMap<Metric, RawValue>) -> (Metrics, Vec<RecordError>) {
    let mut metrics = Metrics::default();
    let mut errors = Vec::new();

    for (metric, value) in raw {
        match value.as_integer() {
            Some(v) => metrics.set(*metric, v),
            None => errors.push(RecordError::InvalidMetric {
                metric: *metric,
                raw: value.display(),
            }),
        }
    }

    (metrics, errors)
}

// ============================================================================
// MERGER
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimeSeriesMerger {
    series: BTreeMap<String, BTreeMap<NaiveDate, Metrics>>,
}

impl TimeSeriesMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one partial observation.
    ///
    /// Returns `Err(NoUsableMetrics)` without touching anything if the
    /// observation carries no known field.
    pub fn merge(
        &mut self,
        region: &str,
        date: NaiveDate,
        incoming: &Metrics,
    ) -> Result<(), RecordError> {
        if incoming.is_empty() {
            return Err(RecordError::NoUsableMetrics);
        }

        self.series
            .entry(region.to_string())
            .or_default()
            .entry(date)
            .or_default()
            .merge_from(incoming);

        Ok(())
    }

    pub fn get(&self, region: &str, date: NaiveDate) -> Option<&Metrics> {
        self.series.get(region)?.get(&date)
    }

    /// Number of (region, date) rows.
    pub fn len(&self) -> usize {
        self.series.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn region_count(&self) -> usize {
        self.series.len()
    }

    /// Rows for `disease`, ordered by region then date.
    pub fn stats(&self, disease: &str) -> Vec<DiseaseStat> {
        self.series
            .iter()
            .flat_map(|(region, dates)| {
                dates.iter().map(move |(date, metrics)| DiseaseStat {
                    disease: disease.to_string(),
                    region: region.clone(),
                    date: *date,
                    metrics: *metrics,
                })
            })
            .collect()
    }

    /// SHA-256 over the merged rows. Equal data gives equal digests,
    /// whatever order the observations arrived in.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (region, dates) in &self.series {
            for (date, m) in dates {
                hasher.update(format!(
                    "{}|{}|{:?}|{:?}|{:?}\n",
                    region, date, m.cases, m.deaths, m.recoveries
                ));
            }
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// POPULATION
// ============================================================================

/// (region, date) → population. Last write wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PopulationTable {
    rows: BTreeMap<(String, NaiveDate), i64>,
}

impl PopulationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: &str, date: NaiveDate, population: i64) {
        self.rows.insert((region.to_string(), date), population);
    }

    pub fn get(&self, region: &str, date: NaiveDate) -> Option<i64> {
        self.rows.get(&(region.to_string(), date)).copied()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> Vec<RegionPopulation> {
        self.rows
            .iter()
            .map(|((region, date), population)| RegionPopulation {
                region: region.clone(),
                date: *date,
                population: *population,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn m(cases: Option<i64>, deaths: Option<i64>, recoveries: Option<i64>) -> Metrics {
        Metrics {
            cases,
            deaths,
            recoveries,
        }
    }

    #[test]
    fn test_partial_merge_preserves_fields() {
        let mut merger = TimeSeriesMerger::new();
        let d = day("2020-03-01");

        merger.merge("US", d, &m(Some(10), None, None)).unwrap();
        merger.merge("US", d, &m(None, Some(2), None)).unwrap();

        assert_eq!(merger.get("US", d), Some(&m(Some(10), Some(2), None)));
        assert_eq!(merger.len(), 1);
    }

    #[test]
    fn test_merge_is_commutative_without_conflicts() {
        let d = day("2020-03-01");

        let mut ab = TimeSeriesMerger::new();
        ab.merge("US", d, &m(Some(5), None, None)).unwrap();
        ab.merge("US", d, &m(None, Some(1), None)).unwrap();

        let mut ba = TimeSeriesMerger::new();
        ba.merge("US", d, &m(None, Some(1), None)).unwrap();
        ba.merge("US", d, &m(Some(5), None, None)).unwrap();

        assert_eq!(ab, ba);
        assert_eq!(ab.get("US", d), Some(&m(Some(5), Some(1), None)));
        assert_eq!(ab.digest(), ba.digest());
    }

    #[test]
    fn test_conflict_last_merged_wins() {
        let d = day("2020-03-01");
        let mut merger = TimeSeriesMerger::new();
        merger.merge("US", d, &m(Some(5), None, None)).unwrap();
        merger.merge("US", d, &m(Some(7), None, None)).unwrap();

        assert_eq!(merger.get("US", d).unwrap().cases, Some(7));
    }

    #[test]
    fn test_empty_observation_is_discarded() {
        let mut merger = TimeSeriesMerger::new();
        let result = merger.merge("US", day("2020-03-01"), &Metrics::default());

        assert_eq!(result, Err(RecordError::NoUsableMetrics));
        assert!(merger.is_empty());
        assert_eq!(merger.region_count(), 0);
    }

    #[test]
    fn test_parse_metrics_drops_single_field() {
        let mut raw = BTreeMap::new();
        raw.insert(Metric::Cases, RawValue::Text("12".to_string()));
        raw.insert(Metric::Deaths, RawValue::Text("n/a".to_string()));

        let (metrics, errors) = parse_metrics(&raw);

        assert_eq!(metrics, m(Some(12), None, None));
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            RecordError::InvalidMetric {
                metric: Metric::Deaths,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_date_strict() {
        assert!(parse_date("2020-03-01").is_ok());
        assert!(parse_date("03/01/2020").is_err());
        assert!(parse_date("2020-02-30").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn test_stats_are_ordered() {
        let mut merger = TimeSeriesMerger::new();
        merger.merge("US", day("2020-03-02"), &m(Some(2), None, None)).unwrap();
        merger.merge("FR", day("2020-03-01"), &m(Some(1), None, None)).unwrap();
        merger.merge("US", day("2020-03-01"), &m(Some(1), None, None)).unwrap();

        let stats = merger.stats("COVID-19");
        let keys: Vec<_> = stats
            .iter()
            .map(|s| (s.region.as_str(), s.date.to_string()))
            .collect();

        assert_eq!(
            keys,
            vec![
                ("FR", "2020-03-01".to_string()),
                ("US", "2020-03-01".to_string()),
                ("US", "2020-03-02".to_string()),
            ]
        );
        assert!(stats.iter().all(|s| s.disease == "COVID-19"));
    }

    #[test]
    fn test_population_last_write_wins() {
        let mut table = PopulationTable::new();
        let d = day("2020-01-01");
        table.insert("FR", d, 1);
        table.insert("FR", d, 2);

        assert_eq!(table.get("FR", d), Some(2));
        assert_eq!(table.len(), 1);
    }
}
