#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the air-quality ingestion tool.

use std::time::Instant;

use airviz_cli_utils::IndicatifProgress;
use airviz_database::aggregate::aggregate_regions;
use airviz_database::queries;
use airviz_database_models::AggregationLevel;
use airviz_ingest::{connect_and_migrate, ingest_from_env, load_configured_tiles, pipeline};
use airviz_ingest_models::IngestConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "airviz_ingest", about = "Air-quality ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch current conditions for every tile and store them
    Ingest {
        /// Tiles fetched and persisted per outer batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Concurrent lookups per window
        #[arg(long)]
        concurrency: Option<usize>,
        /// Only process the first N tiles (for testing)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run database migrations
    Migrate,
    /// Load the tile CSV into the `tiles` table
    SeedTiles {
        /// Only seed the first N tiles
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Roll the latest measurements up to regional averages
    Aggregate {
        /// Region level to aggregate
        #[arg(long, default_value = "borough")]
        level: AggregationLevel,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = airviz_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            batch_size,
            concurrency,
            limit,
        } => {
            let defaults = IngestConfig::default();
            let config = IngestConfig {
                batch_size: batch_size.unwrap_or(defaults.batch_size),
                concurrency: concurrency.unwrap_or(defaults.concurrency),
                limit,
                ..defaults
            };

            let progress = IndicatifProgress::tiles_bar(&multi, "Fetching air quality");
            let report = pipeline::report(ingest_from_env(&config, &progress).await);

            println!("{}", serde_json::to_string_pretty(&report)?);

            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Migrate => {
            log::info!("Running database migrations...");
            connect_and_migrate().await?;
            log::info!("Migrations complete.");
        }
        Commands::SeedTiles { limit } => {
            let start = Instant::now();
            let tiles = load_configured_tiles(limit).await?;
            let db = connect_and_migrate().await?;

            let inserted = queries::insert_tiles(db.as_ref(), &tiles).await?;

            log::info!(
                "Seeded {inserted} new tile(s) of {} in {:.1}s",
                tiles.len(),
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Aggregate { level } => {
            let db = connect_and_migrate().await?;
            let result = aggregate_regions(db.as_ref(), level).await?;

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}
