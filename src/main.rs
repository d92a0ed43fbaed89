use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use epi_reconcile::sources::{
    directory::RegionDirectory, geometry::GeometryLevel, html_table, population, timeseries_json,
    CsvSeriesSource, GeometryArchive, HtmlTableSource, LocationTimeSeries, PopulationQuery,
};
use epi_reconcile::{
    catalog, get_all_regions, list_runs, open_store, table_counts, FetchTarget, HttpFetcher,
    ReferenceRun, RegionResolver, StatsRun,
};

/// Reconcile epidemiological sources into the canonical region/statistics store.
#[derive(Debug, Parser)]
#[command(name = "epi-reconcile", version)]
struct Cli {
    /// Store connection string (SQLite path, optionally `sqlite://`-prefixed)
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load regions, geometry and population figures
    Regions {
        /// Region directory CSV (path or URL)
        #[arg(long)]
        directory: String,

        /// Country geometry archive (zip with GeoJSON)
        #[arg(long)]
        country_geometry: Option<String>,

        /// Subdivision geometry archive (zip with GeoJSON)
        #[arg(long)]
        province_geometry: Option<String>,

        #[arg(long, default_value = population::WIKIDATA_URL)]
        population_endpoint: String,

        #[arg(long)]
        skip_population: bool,
    },

    /// COVID-19 per-location JSON time series
    Covid {
        #[arg(long, default_value = timeseries_json::DEFAULT_URL)]
        source: String,
    },

    /// 2009 H1N1 monthly tables
    SwineFlu {
        #[arg(long, default_value = html_table::SWINE_FLU_URL)]
        source: String,

        /// Region directory CSV for name lookups (defaults to stored region names)
        #[arg(long)]
        directory: Option<String>,
    },

    /// Local CSV time series (location,date,cases,deaths,recoveries)
    ImportCsv {
        #[arg(long)]
        disease: String,

        #[arg(long)]
        file: PathBuf,
    },

    /// Show table sizes and recent runs
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("epi_reconcile=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut conn = open_store(&cli.database_url)?;
    let http = HttpFetcher::new()?;

    match cli.command {
        Command::Regions {
            directory,
            country_geometry,
            province_geometry,
            population_endpoint,
            skip_population,
        } => {
            let entries = RegionDirectory::new(FetchTarget::parse(&directory)).load(&http)?;
            let mut run = ReferenceRun::from_directory(&entries);

            for (target, level) in [
                (country_geometry, GeometryLevel::Country),
                (province_geometry, GeometryLevel::Subdivision),
            ] {
                if let Some(target) = target {
                    let pairs = GeometryArchive::new(FetchTarget::parse(&target), level).load(&http)?;
                    run.attach_geometries(pairs);
                }
            }

            if !skip_population {
                let rows = PopulationQuery::new(&population_endpoint).fetch(&http)?;
                let kept = run.add_population(rows);
                info!(kept, "Population rows loaded");
            }

            run.persist(&mut conn)?;
        }

        Command::Covid { source } => {
            let resolver = RegionResolver::new();
            let mut run = StatsRun::new(catalog::covid_19(), &resolver);
            run.ingest_source(
                &LocationTimeSeries::new(FetchTarget::parse(&source)),
                &http,
            )?;
            run.persist(&mut conn)?;
        }

        Command::SwineFlu { source, directory } => {
            let resolver = match directory {
                Some(directory) => {
                    let entries =
                        RegionDirectory::new(FetchTarget::parse(&directory)).load(&http)?;
                    RegionResolver::from_directory(&entries)
                }
                None => RegionResolver::from_regions(get_all_regions(&conn)?),
            };
            if resolver.is_empty() {
                bail!("No regions to resolve names against; run `regions` first or pass --directory");
            }

            let mut run = StatsRun::new(catalog::h1n1(), &resolver);
            run.ingest_source(&HtmlTableSource::swine_flu(FetchTarget::parse(&source)), &http)?;
            run.persist(&mut conn)?;
        }

        Command::ImportCsv { disease, file } => {
            let Some(disease) = catalog::find(&disease) else {
                bail!("Unknown disease {:?}", disease);
            };

            let resolver = RegionResolver::new();
            let mut run = StatsRun::new(disease, &resolver);
            run.ingest_source(&CsvSeriesSource::new(&file), &http)?;
            run.persist(&mut conn)?;
        }

        Command::Status => {
            let counts = table_counts(&conn)?;
            println!(
                "regions={} diseases={} links={} stats={} populations={}",
                counts.regions, counts.diseases, counts.links, counts.stats, counts.populations
            );
            for run in list_runs(&conn)?.iter().take(10) {
                println!(
                    "{}  {:<24} {:<9} rows={} written={} filtered={} digest={}",
                    run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    run.source,
                    run.disease.as_deref().unwrap_or("-"),
                    run.merged_rows,
                    run.written_rows,
                    run.filtered_rows,
                    &run.digest[..12.min(run.digest.len())]
                );
            }
        }
    }

    Ok(())
}
