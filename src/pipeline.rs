// ⚙️ Pipeline runs - adapter → resolver → merger → store
//
// A run object lives for exactly one invocation. It owns the merge
// structure; nothing survives `persist`. Recoverable record errors are
// counted here, at the step that raised them. I/O and SQL errors bubble up
// and abort the run before anything is committed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{DropReason, RecordError};
use crate::merger::{parse_date, parse_metrics, PopulationTable, TimeSeriesMerger};
use crate::model::Disease;
use crate::resolver::RegionResolver;
use crate::sources::{DirectoryEntry, HttpFetcher, PopulationRow, RawObservation, SourceAdapter};
use crate::store::{self, RunRecord, UpsertCounts};

// ============================================================================
// COUNTERS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Raw records seen
    pub observations: usize,
    /// Records that reached the merger
    pub merged: usize,
    /// Single fields dropped by the strict integer parse
    pub invalid_fields: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

impl IngestStats {
    fn drop(&mut self, error: &RecordError) {
        if let Some(reason) = error.drop_reason() {
            *self.dropped.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn dropped(&self, reason: DropReason) -> usize {
        self.dropped.get(&reason).copied().unwrap_or(0)
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped.values().sum()
    }

    pub fn summary(&self) -> String {
        let reasons: Vec<String> = self
            .dropped
            .iter()
            .map(|(reason, n)| format!("{}={}", reason.as_str(), n))
            .collect();

        format!(
            "{} observations, {} merged, {} dropped ({}), {} invalid fields",
            self.observations,
            self.merged,
            self.dropped_total(),
            reasons.join(", "),
            self.invalid_fields
        )
    }
}

/// What a committed run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub merged_rows: usize,
    pub counts: UpsertCounts,
    pub digest: String,
}

// ============================================================================
// STATS RUN
// ============================================================================

/// One batch of disease statistics from one or more sources.
pub struct StatsRun<'r> {
    run_id: String,
    started_at: DateTime<Utc>,
    disease: Disease,
    resolver: &'r RegionResolver,
    merger: TimeSeriesMerger,
    sources: Vec<String>,
    stats: IngestStats,
}

impl<'r> StatsRun<'r> {
    pub fn new(disease: Disease, resolver: &'r RegionResolver) -> Self {
        StatsRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            disease,
            resolver,
            merger: TimeSeriesMerger::new(),
            sources: Vec::new(),
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn merger(&self) -> &TimeSeriesMerger {
        &self.merger
    }

    /// Normalize and merge one raw record.
    ///
    /// Errors are recoverable and already counted; callers may ignore them.
    pub fn ingest(&mut self, obs: RawObservation) -> Result<(), RecordError> {
        self.stats.observations += 1;

        let region = match self.resolver.resolve(&obs.location) {
            Ok(code) => code,
            Err(e) => {
                debug!(location = obs.location.as_str(), error = %e, "Dropping record");
                self.stats.drop(&e);
                return Err(e);
            }
        };

        let date = match parse_date(&obs.date) {
            Ok(date) => date,
            Err(e) => {
                debug!(region = region.as_str(), error = %e, "Dropping record");
                self.stats.drop(&e);
                return Err(e);
            }
        };

        let (metrics, field_errors) = parse_metrics(&obs.metrics);
        for e in &field_errors {
            debug!(region = region.as_str(), %date, error = %e, "Ignoring field");
        }
        self.stats.invalid_fields += field_errors.len();

        if let Err(e) = self.merger.merge(&region, date, &metrics) {
            self.stats.drop(&e);
            return Err(e);
        }

        self.stats.merged += 1;
        Ok(())
    }

    /// Fetch one source and fold all of its records into this run.
    pub fn ingest_source(&mut self, source: &dyn SourceAdapter, http: &HttpFetcher) -> Result<()> {
        let kind = source.kind();
        let before = self.stats.clone();

        let observations = source
            .observations(http)
            .with_context(|| format!("Failed to fetch {} source", kind.code()))?;
        for obs in observations {
            // Recoverable: counted inside `ingest`
            let _ = self.ingest(obs);
        }

        info!(
            source = kind.code(),
            disease = self.disease.id.as_str(),
            observations = self.stats.observations - before.observations,
            merged = self.stats.merged - before.merged,
            dropped = self.stats.dropped_total() - before.dropped_total(),
            "Source ingested"
        );
        self.sources.push(kind.code().to_string());
        Ok(())
    }

    /// Write disease + merged rows + audit row in a single transaction.
    pub fn persist(self, conn: &mut Connection) -> Result<RunSummary> {
        let rows = self.merger.stats(&self.disease.id);
        let digest = self.merger.digest();

        let tx = conn.transaction()?;

        // Reference phase
        store::upsert_disease(&tx, &self.disease)?;

        // Fact phase
        let counts = store::upsert_stats(&tx, &rows)?;

        store::insert_run(
            &tx,
            &RunRecord {
                run_id: self.run_id.clone(),
                source: self.sources.join("+"),
                disease: Some(self.disease.id.clone()),
                started_at: self.started_at,
                finished_at: Utc::now(),
                observations: self.stats.observations,
                merged_rows: rows.len(),
                written_rows: counts.written,
                filtered_rows: counts.filtered,
                digest: digest.clone(),
            },
        )?;

        tx.commit().context("Failed to commit stats run")?;

        info!(
            run_id = self.run_id.as_str(),
            disease = self.disease.id.as_str(),
            rows = rows.len(),
            written = counts.written,
            filtered = counts.filtered,
            "Stats run committed: {}",
            self.stats.summary()
        );

        Ok(RunSummary {
            run_id: self.run_id,
            merged_rows: rows.len(),
            counts,
            digest,
        })
    }
}

// ============================================================================
// REFERENCE RUN
// ============================================================================

/// Regions (names + geometry) and their population figures.
pub struct ReferenceRun {
    run_id: String,
    started_at: DateTime<Utc>,
    resolver: RegionResolver,
    population: PopulationTable,
    skipped_population: usize,
}

impl ReferenceRun {
    pub fn from_directory(entries: &[DirectoryEntry]) -> Self {
        let resolver = RegionResolver::from_directory(entries);
        info!(
            regions = resolver.len(),
            naming_issues = resolver.issues().len(),
            "Region directory loaded"
        );

        ReferenceRun {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            resolver,
            population: PopulationTable::new(),
            skipped_population: 0,
        }
    }

    pub fn resolver(&self) -> &RegionResolver {
        &self.resolver
    }

    pub fn population(&self) -> &PopulationTable {
        &self.population
    }

    /// Attach geometries to known regions; returns how many matched.
    pub fn attach_geometries(&mut self, pairs: Vec<(String, String)>) -> usize {
        let total = pairs.len();
        let matched = pairs
            .into_iter()
            .filter(|(code, geometry)| self.resolver.attach_geometry(code, geometry.clone()))
            .count();

        info!(matched, ignored = total - matched, "Geometries attached");
        matched
    }

    /// Keep population rows for known regions with a valid date.
    pub fn add_population(&mut self, rows: Vec<PopulationRow>) -> usize {
        let mut kept = 0;
        for row in rows {
            if !self.resolver.contains(&row.region) {
                self.skipped_population += 1;
                continue;
            }
            match parse_date(&row.date) {
                Ok(date) => {
                    self.population.insert(&row.region, date, row.population);
                    kept += 1;
                }
                Err(e) => {
                    tracing::warn!(region = row.region.as_str(), error = %e, "Skipping population row");
                    self.skipped_population += 1;
                }
            }
        }
        kept
    }

    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for region in self.resolver.regions() {
            hasher.update(format!(
                "{}|{}|{}\n",
                region.code,
                region.name,
                region.geometry.as_deref().unwrap_or("")
            ));
        }
        for row in self.population.rows() {
            hasher.update(format!("{}|{}|{}\n", row.region, row.date, row.population));
        }
        format!("{:x}", hasher.finalize())
    }

    /// Regions first, then population, in one transaction.
    pub fn persist(self, conn: &mut Connection) -> Result<RunSummary> {
        let digest = self.digest();
        let regions: Vec<_> = self.resolver.regions().cloned().collect();
        let population = self.population.rows();

        let tx = conn.transaction()?;

        let written_regions = store::upsert_regions(&tx, &regions)?;
        let counts = store::upsert_population(&tx, &population)?;

        store::insert_run(
            &tx,
            &RunRecord {
                run_id: self.run_id.clone(),
                source: "reference".to_string(),
                disease: None,
                started_at: self.started_at,
                finished_at: Utc::now(),
                observations: regions.len() + population.len() + self.skipped_population,
                merged_rows: regions.len() + population.len(),
                written_rows: written_regions + counts.written,
                filtered_rows: counts.filtered,
                digest: digest.clone(),
            },
        )?;

        tx.commit().context("Failed to commit reference run")?;

        info!(
            run_id = self.run_id.as_str(),
            regions = written_regions,
            population = counts.written,
            "Reference run committed"
        );

        Ok(RunSummary {
            run_id: self.run_id,
            merged_rows: regions.len() + population.len(),
            counts: UpsertCounts {
                written: written_regions + counts.written,
                filtered: counts.filtered,
            },
            digest,
        })
    }
}
