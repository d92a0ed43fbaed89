// 🗄️ Upsert Engine - canonical SQLite store
//
// Conflict rules:
// - region: name replaced, geometry coalesced (a run without geometry keeps it)
// - disease: scalar columns replaced, links deleted then reinserted
// - disease_stats: each metric coalesced (unknown never overwrites known)
// - region_population: last write wins
// Fact rows for regions missing from `region` are skipped, not inserted.
//
// All writers take `&Connection` so callers can run them inside one
// `rusqlite::Transaction` per phase.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::model::{Disease, DiseaseLink, DiseaseStat, Metrics, Region, RegionKind, RegionPopulation};
use crate::resolver::is_excluded;

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// CONNECTION
// ============================================================================

/// Open the store named by a connection string (`sqlite://path`,
/// `sqlite:path`, a bare path, or `:memory:`) and create the schema.
pub fn open_store(database_url: &str) -> Result<Connection> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    let opened = if path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    };
    let conn = opened.with_context(|| format!("Failed to open database {}", path))?;

    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS region (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            geometry TEXT
        );

        CREATE TABLE IF NOT EXISTS disease (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            long_name TEXT,
            description TEXT NOT NULL,
            reinfectable INTEGER NOT NULL,
            popularity INTEGER NOT NULL
        );

        -- region is NULL for links that apply everywhere
        CREATE TABLE IF NOT EXISTS disease_link (
            region TEXT,
            disease TEXT NOT NULL REFERENCES disease(id),
            uri TEXT NOT NULL,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS disease_stats (
            disease TEXT NOT NULL REFERENCES disease(id),
            region TEXT NOT NULL REFERENCES region(id),
            date TEXT NOT NULL,
            cases INTEGER,
            deaths INTEGER,
            recoveries INTEGER,
            UNIQUE (disease, region, date)
        );

        CREATE TABLE IF NOT EXISTS region_population (
            region TEXT NOT NULL REFERENCES region(id),
            date TEXT NOT NULL,
            population INTEGER NOT NULL,
            UNIQUE (region, date)
        );

        -- audit trail: one row per committed run
        CREATE TABLE IF NOT EXISTS ingest_run (
            run_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            disease TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            observations INTEGER NOT NULL,
            merged_rows INTEGER NOT NULL,
            written_rows INTEGER NOT NULL,
            filtered_rows INTEGER NOT NULL,
            digest TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_disease_link_disease ON disease_link(disease);
        CREATE INDEX IF NOT EXISTS idx_disease_stats_region ON disease_stats(region, date);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

// ============================================================================
// REFERENCE PHASE
// ============================================================================

/// Insert or update regions. Excluded codes are never written.
pub fn upsert_regions(conn: &Connection, regions: &[Region]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO region (id, name, geometry) VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET
             name = excluded.name,
             geometry = COALESCE(excluded.geometry, region.geometry)",
    )?;

    let mut written = 0;
    for region in regions {
        if is_excluded(&region.code) {
            continue;
        }
        written += stmt
            .execute(params![region.code, region.name, region.geometry])
            .with_context(|| format!("Failed to upsert region {}", region.code))?;
    }

    Ok(written)
}

/// Insert or update a disease and replace its whole link set.
pub fn upsert_disease(conn: &Connection, disease: &Disease) -> Result<()> {
    conn.execute(
        "INSERT INTO disease (id, name, long_name, description, reinfectable, popularity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (id) DO UPDATE SET
             name = excluded.name,
             long_name = excluded.long_name,
             description = excluded.description,
             reinfectable = excluded.reinfectable,
             popularity = excluded.popularity",
        params![
            disease.id,
            disease.name,
            disease.long_name,
            disease.description,
            disease.reinfectable,
            disease.popularity,
        ],
    )
    .with_context(|| format!("Failed to upsert disease {}", disease.id))?;

    conn.execute(
        "DELETE FROM disease_link WHERE disease = ?1",
        params![disease.id],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO disease_link (region, disease, uri, description) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for link in &disease.links {
        stmt.execute(params![link.region, disease.id, link.uri, link.description])?;
    }

    Ok(())
}

// ============================================================================
// FACT PHASE
// ============================================================================

/// Outcome of a bulk fact upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    /// Rows inserted or updated
    pub written: usize,
    /// Rows skipped because their region is not in `region`
    pub filtered: usize,
}

pub fn upsert_stats(conn: &Connection, stats: &[DiseaseStat]) -> Result<UpsertCounts> {
    let mut stmt = conn.prepare(
        "INSERT INTO disease_stats (disease, region, date, cases, deaths, recoveries)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE EXISTS (SELECT 1 FROM region WHERE region.id = ?2)
         ON CONFLICT (disease, region, date) DO UPDATE SET
             cases = COALESCE(excluded.cases, disease_stats.cases),
             deaths = COALESCE(excluded.deaths, disease_stats.deaths),
             recoveries = COALESCE(excluded.recoveries, disease_stats.recoveries)",
    )?;

    let mut counts = UpsertCounts::default();
    for stat in stats {
        let changed = stmt
            .execute(params![
                stat.disease,
                stat.region,
                stat.date.format(DATE_FORMAT).to_string(),
                stat.metrics.cases,
                stat.metrics.deaths,
                stat.metrics.recoveries,
            ])
            .with_context(|| {
                format!(
                    "Failed to upsert {} stats for {} on {}",
                    stat.disease, stat.region, stat.date
                )
            })?;

        if changed == 0 {
            counts.filtered += 1;
        } else {
            counts.written += changed;
        }
    }

    Ok(counts)
}

pub fn upsert_population(conn: &Connection, rows: &[RegionPopulation]) -> Result<UpsertCounts> {
    let mut stmt = conn.prepare(
        "INSERT INTO region_population (region, date, population)
             SELECT ?1, ?2, ?3
             WHERE EXISTS (SELECT 1 FROM region WHERE region.id = ?1)
         ON CONFLICT (region, date) DO UPDATE SET
             population = excluded.population",
    )?;

    let mut counts = UpsertCounts::default();
    for row in rows {
        let changed = stmt.execute(params![
            row.region,
            row.date.format(DATE_FORMAT).to_string(),
            row.population,
        ])?;

        if changed == 0 {
            counts.filtered += 1;
        } else {
            counts.written += changed;
        }
    }

    Ok(counts)
}

// ============================================================================
// RUN AUDIT
// ============================================================================

/// One committed run (audit trail).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub source: String,
    pub disease: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub observations: usize,
    pub merged_rows: usize,
    pub written_rows: usize,
    pub filtered_rows: usize,
    /// SHA-256 of the merged batch
    pub digest: String,
}

pub fn insert_run(conn: &Connection, run: &RunRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO ingest_run (
            run_id, source, disease, started_at, finished_at,
            observations, merged_rows, written_rows, filtered_rows, digest
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.run_id,
            run.source,
            run.disease,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.observations as i64,
            run.merged_rows as i64,
            run.written_rows as i64,
            run.filtered_rows as i64,
            run.digest,
        ],
    )?;

    Ok(())
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Runs, newest first.
pub fn list_runs(conn: &Connection) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, source, disease, started_at, finished_at,
                observations, merged_rows, written_rows, filtered_rows, digest
         FROM ingest_run
         ORDER BY finished_at DESC",
    )?;

    let runs = stmt
        .query_map([], |row| {
            let started: String = row.get(3)?;
            let finished: String = row.get(4)?;
            Ok(RunRecord {
                run_id: row.get(0)?,
                source: row.get(1)?,
                disease: row.get(2)?,
                started_at: parse_timestamp(&started)?,
                finished_at: parse_timestamp(&finished)?,
                observations: row.get::<_, i64>(5)? as usize,
                merged_rows: row.get::<_, i64>(6)? as usize,
                written_rows: row.get::<_, i64>(7)? as usize,
                filtered_rows: row.get::<_, i64>(8)? as usize,
                digest: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

// ============================================================================
// READS
// ============================================================================

fn kind_of(code: &str) -> RegionKind {
    if code.contains('-') {
        RegionKind::Subdivision
    } else {
        RegionKind::Country
    }
}

pub fn get_all_regions(conn: &Connection) -> Result<Vec<Region>> {
    let mut stmt = conn.prepare("SELECT id, name, geometry FROM region ORDER BY id")?;

    let regions = stmt
        .query_map([], |row| {
            let code: String = row.get(0)?;
            Ok(Region {
                kind: kind_of(&code),
                code,
                name: row.get(1)?,
                geometry: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(regions)
}

pub fn get_region(conn: &Connection, code: &str) -> Result<Option<Region>> {
    let region = conn
        .query_row(
            "SELECT id, name, geometry FROM region WHERE id = ?1",
            params![code],
            |row| {
                let code: String = row.get(0)?;
                Ok(Region {
                    kind: kind_of(&code),
                    code,
                    name: row.get(1)?,
                    geometry: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(region)
}

pub fn get_stat(
    conn: &Connection,
    disease: &str,
    region: &str,
    date: NaiveDate,
) -> Result<Option<Metrics>> {
    let metrics = conn
        .query_row(
            "SELECT cases, deaths, recoveries FROM disease_stats
             WHERE disease = ?1 AND region = ?2 AND date = ?3",
            params![disease, region, date.format(DATE_FORMAT).to_string()],
            |row| {
                Ok(Metrics {
                    cases: row.get(0)?,
                    deaths: row.get(1)?,
                    recoveries: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(metrics)
}

pub fn get_population(conn: &Connection, region: &str, date: NaiveDate) -> Result<Option<i64>> {
    let population = conn
        .query_row(
            "SELECT population FROM region_population WHERE region = ?1 AND date = ?2",
            params![region, date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )
        .optional()?;

    Ok(population)
}

pub fn get_links(conn: &Connection, disease: &str) -> Result<Vec<DiseaseLink>> {
    let mut stmt = conn.prepare(
        "SELECT region, uri, description FROM disease_link
         WHERE disease = ?1
         ORDER BY region, uri",
    )?;

    let links = stmt
        .query_map(params![disease], |row| {
            Ok(DiseaseLink {
                region: row.get(0)?,
                uri: row.get(1)?,
                description: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(links)
}

/// Row counts per canonical table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub regions: i64,
    pub diseases: i64,
    pub links: i64,
    pub stats: i64,
    pub populations: i64,
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    let count = |table: &str| -> Result<i64> {
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    };

    Ok(TableCounts {
        regions: count("region")?,
        diseases: count("disease")?,
        links: count("disease_link")?,
        stats: count("disease_stats")?,
        populations: count("region_population")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_disease() -> Disease {
        Disease {
            id: "COVID-19".to_string(),
            name: "COVID-19".to_string(),
            long_name: None,
            description: "test".to_string(),
            reinfectable: false,
            popularity: 1,
            links: vec![
                DiseaseLink::global("https://example.com", "global"),
                DiseaseLink::scoped("AU", "https://example.com/au", "au"),
            ],
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn stat(region: &str, date: &str, cases: Option<i64>, deaths: Option<i64>) -> DiseaseStat {
        DiseaseStat {
            disease: "COVID-19".to_string(),
            region: region.to_string(),
            date: day(date),
            metrics: Metrics {
                cases,
                deaths,
                recoveries: None,
            },
        }
    }

    fn seeded() -> Connection {
        let conn = open_store(":memory:").unwrap();
        upsert_regions(
            &conn,
            &[
                Region::new("US", "United States", RegionKind::Country),
                Region::new("AU", "Australia", RegionKind::Country),
            ],
        )
        .unwrap();
        upsert_disease(&conn, &test_disease()).unwrap();
        conn
    }

    #[test]
    fn test_stat_upsert_never_nulls_known_fields() {
        let conn = seeded();

        upsert_stats(&conn, &[stat("US", "2020-03-01", Some(10), None)]).unwrap();
        upsert_stats(&conn, &[stat("US", "2020-03-01", None, Some(2))]).unwrap();

        let stored = get_stat(&conn, "COVID-19", "US", day("2020-03-01"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.cases, Some(10));
        assert_eq!(stored.deaths, Some(2));
        assert_eq!(stored.recoveries, None);

        assert_eq!(table_counts(&conn).unwrap().stats, 1);
    }

    #[test]
    fn test_stat_upsert_known_value_replaces_known_value() {
        let conn = seeded();

        upsert_stats(&conn, &[stat("US", "2020-03-01", Some(10), None)]).unwrap();
        upsert_stats(&conn, &[stat("US", "2020-03-01", Some(11), None)]).unwrap();

        let stored = get_stat(&conn, "COVID-19", "US", day("2020-03-01"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.cases, Some(11));
    }

    #[test]
    fn test_unknown_region_is_filtered() {
        let conn = seeded();

        let counts = upsert_stats(
            &conn,
            &[
                stat("US", "2020-03-01", Some(1), None),
                stat("ZZ", "2020-03-01", Some(1), None),
            ],
        )
        .unwrap();

        assert_eq!(counts, UpsertCounts { written: 1, filtered: 1 });
        assert!(get_stat(&conn, "COVID-19", "ZZ", day("2020-03-01"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_region_geometry_is_coalesced() {
        let conn = seeded();

        let mut with_geometry = Region::new("US", "United States", RegionKind::Country);
        with_geometry.geometry = Some("{\"type\":\"Point\"}".to_string());
        upsert_regions(&conn, &[with_geometry]).unwrap();

        // Later run renames without geometry
        upsert_regions(&conn, &[Region::new("US", "USA", RegionKind::Country)]).unwrap();

        let region = get_region(&conn, "US").unwrap().unwrap();
        assert_eq!(region.name, "USA");
        assert_eq!(region.geometry.as_deref(), Some("{\"type\":\"Point\"}"));
    }

    #[test]
    fn test_excluded_regions_never_written() {
        let conn = open_store(":memory:").unwrap();
        let written = upsert_regions(
            &conn,
            &[
                Region::new("CN-HK", "Hong Kong", RegionKind::Subdivision),
                Region::new("CN", "China", RegionKind::Country),
            ],
        )
        .unwrap();

        assert_eq!(written, 1);
        assert!(get_region(&conn, "CN-HK").unwrap().is_none());
    }

    #[test]
    fn test_links_are_replaced_not_merged() {
        let conn = seeded();
        assert_eq!(get_links(&conn, "COVID-19").unwrap().len(), 2);

        let mut disease = test_disease();
        disease.links = vec![DiseaseLink::global("https://who.int", "WHO")];
        disease.popularity = 3;
        upsert_disease(&conn, &disease).unwrap();

        let links = get_links(&conn, "COVID-19").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "https://who.int");
        assert_eq!(links[0].region, None);
        assert_eq!(table_counts(&conn).unwrap().diseases, 1);
    }

    #[test]
    fn test_population_last_write_wins_and_filters() {
        let conn = seeded();
        let row = |region: &str, population| RegionPopulation {
            region: region.to_string(),
            date: day("2020-01-01"),
            population,
        };

        upsert_population(&conn, &[row("US", 100)]).unwrap();
        let counts = upsert_population(&conn, &[row("US", 120), row("XX", 5)]).unwrap();

        assert_eq!(counts, UpsertCounts { written: 1, filtered: 1 });
        assert_eq!(
            get_population(&conn, "US", day("2020-01-01")).unwrap(),
            Some(120)
        );
    }

    #[test]
    fn test_rollback_leaves_nothing_visible() {
        let mut conn = seeded();

        {
            let tx = conn.transaction().unwrap();
            upsert_stats(&tx, &[stat("US", "2020-03-01", Some(1), None)]).unwrap();
            // dropped without commit
        }

        assert_eq!(table_counts(&conn).unwrap().stats, 0);
    }

    #[test]
    fn test_run_audit_roundtrip() {
        let conn = seeded();
        let now = Utc::now();
        let run = RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: "csv".to_string(),
            disease: Some("COVID-19".to_string()),
            started_at: now,
            finished_at: now,
            observations: 3,
            merged_rows: 2,
            written_rows: 2,
            filtered_rows: 0,
            digest: "abc".to_string(),
        };

        insert_run(&conn, &run).unwrap();
        let runs = list_runs(&conn).unwrap();

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run.run_id);
        assert_eq!(runs[0].merged_rows, 2);
    }
}
