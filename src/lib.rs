// Epidemiological data reconciliation - Core Library
// Exposes all modules for use in the CLI and tests

pub mod catalog;
pub mod error;
pub mod merger;
pub mod model;
pub mod pipeline;
pub mod quality;
pub mod resolver;
pub mod sources;
pub mod store;

// Re-export commonly used types
pub use error::{DropReason, RecordError};
pub use merger::{parse_date, parse_metrics, PopulationTable, TimeSeriesMerger};
pub use model::{
    Disease, DiseaseLink, DiseaseStat, Metric, Metrics, Region, RegionKind, RegionPopulation,
};
pub use pipeline::{IngestStats, ReferenceRun, RunSummary, StatsRun};
pub use quality::{NamingIssue, NamingRule};
pub use resolver::{RegionResolver, EXCLUDED_REGIONS, NAME_OVERRIDES};
pub use sources::{
    FetchTarget, HttpFetcher, Location, RawObservation, RawValue, SourceAdapter, SourceKind,
};
pub use store::{
    get_all_regions, get_stat, insert_run, list_runs, open_store, setup_database, table_counts,
    upsert_disease, upsert_population, upsert_regions, upsert_stats, RunRecord, UpsertCounts,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
