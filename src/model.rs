// 🗺️ Canonical model - regions, diseases, per-day statistics
//
// Every source is reconciled into these types before it reaches the store.
// A `None` metric means "unknown" and is never coerced to zero.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// REGION
// ============================================================================

/// Whether a canonical code names a country or a subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    /// ISO 3166-1 alpha-2 (`US`)
    Country,
    /// ISO 3166-2 (`AU-NSW`)
    Subdivision,
}

impl RegionKind {
    /// Scheme prefix used by stats-bearing sources (`iso1:US`, `iso2:AU-NSW`).
    pub fn scheme_prefix(&self) -> &'static str {
        match self {
            RegionKind::Country => "iso1:",
            RegionKind::Subdivision => "iso2:",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Country => "country",
            RegionKind::Subdivision => "subdivision",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub name: String,
    pub kind: RegionKind,
    /// Serialized GeoJSON geometry, when a geometry source matched this code
    pub geometry: Option<String>,
}

impl Region {
    pub fn new(code: impl Into<String>, name: impl Into<String>, kind: RegionKind) -> Self {
        Region {
            code: code.into(),
            name: name.into(),
            kind,
            geometry: None,
        }
    }
}

// ============================================================================
// DISEASE
// ============================================================================

/// Reference link attached to a disease, optionally scoped to one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseLink {
    /// `None` = applies everywhere
    pub region: Option<String>,
    pub uri: String,
    pub description: String,
}

impl DiseaseLink {
    pub fn global(uri: &str, description: &str) -> Self {
        DiseaseLink {
            region: None,
            uri: uri.to_string(),
            description: description.to_string(),
        }
    }

    pub fn scoped(region: &str, uri: &str, description: &str) -> Self {
        // An empty scope is the same thing as no scope
        let region = if region.trim().is_empty() {
            None
        } else {
            Some(region.trim().to_string())
        };

        DiseaseLink {
            region,
            uri: uri.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disease {
    pub id: String,
    pub name: String,
    pub long_name: Option<String>,
    pub description: String,
    pub reinfectable: bool,
    pub popularity: i64,
    pub links: Vec<DiseaseLink>,
}

// ============================================================================
// METRICS
// ============================================================================

/// The three tracked metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Cases,
    Deaths,
    Recoveries,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Cases, Metric::Deaths, Metric::Recoveries];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cases => "cases",
            Metric::Deaths => "deaths",
            Metric::Recoveries => "recoveries",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-shape leaf of the merge structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metrics {
    pub cases: Option<i64>,
    pub deaths: Option<i64>,
    pub recoveries: Option<i64>,
}

impl Metrics {
    pub fn get(&self, metric: Metric) -> Option<i64> {
        match metric {
            Metric::Cases => self.cases,
            Metric::Deaths => self.deaths,
            Metric::Recoveries => self.recoveries,
        }
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        match metric {
            Metric::Cases => self.cases = Some(value),
            Metric::Deaths => self.deaths = Some(value),
            Metric::Recoveries => self.recoveries = Some(value),
        }
    }

    /// Field-level merge: only fields known in `incoming` overwrite.
    ///
    /// A field that `incoming` does not report is left exactly as it was.
    pub fn merge_from(&mut self, incoming: &Metrics) {
        for metric in Metric::ALL {
            if let Some(value) = incoming.get(metric) {
                self.set(metric, value);
            }
        }
    }

    pub fn known_count(&self) -> usize {
        Metric::ALL.iter().filter(|m| self.get(**m).is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.known_count() == 0
    }
}

// ============================================================================
// FACT ROWS
// ============================================================================

/// One merged row bound for `disease_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseStat {
    pub disease: String,
    pub region: String,
    pub date: NaiveDate,
    pub metrics: Metrics,
}

/// One row bound for `region_population`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPopulation {
    pub region: String,
    pub date: NaiveDate,
    pub population: i64,
}
