#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Batch ingestion of air-quality conditions into Postgres.
//!
//! Tiles are processed in outer batches. Each batch is fetched window by
//! window through the [`scheduler`], transformed into row-sets by
//! [`transform`], and bulk-inserted before the next batch starts
//! ([`pipeline`]).

pub mod pipeline;
pub mod scheduler;
pub mod secrets;
pub mod tiles;
pub mod transform;

use std::sync::Arc;

use airviz_air_quality::AirQualityError;
use airviz_air_quality::google::GoogleAirQualityClient;
use airviz_air_quality::progress::ProgressCallback;
use airviz_air_quality_models::Tile;
use airviz_database::{DbError, PostgresStore, db, run_migrations};
use airviz_ingest_models::{IngestConfig, IngestSummary};
use secrecy::ExposeSecret as _;
use switchy_database::Database;

use crate::tiles::TileSource;

/// Errors that can abort an ingestion run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Required configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// A secret could not be interpreted.
    #[error("Secret error: {message}")]
    Secret {
        /// Description of what went wrong.
        message: String,
    },

    /// The tile list could not be loaded or was empty.
    #[error("Tile source error: {message}")]
    TileSource {
        /// Description of what went wrong.
        message: String,
    },

    /// The tile CSV could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// S3 `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error reading a local file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database connection could not be opened.
    #[error("Database connection error: {message}")]
    Connection {
        /// Description of what went wrong.
        message: String,
    },

    /// A database statement failed.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The API client could not be built.
    #[error(transparent)]
    AirQuality(#[from] AirQualityError),
}

/// Opens the configured database and applies pending migrations.
///
/// # Errors
///
/// Returns [`IngestError`] if credentials are missing, the connection fails,
/// or a migration fails.
pub async fn connect_and_migrate() -> Result<Box<dyn Database>, IngestError> {
    let url = secrets::database_url_from_env()?;
    let database = db::connect(url.expose_secret())
        .await
        .map_err(|e| IngestError::Connection {
            message: e.to_string(),
        })?;
    run_migrations(database.as_ref()).await?;
    Ok(database)
}

/// Loads the configured tile list, truncated to `limit` tiles.
///
/// # Errors
///
/// Returns [`IngestError`] if no tile source is configured, it cannot be
/// read, or it holds no tiles.
pub async fn load_configured_tiles(limit: Option<usize>) -> Result<Vec<Tile>, IngestError> {
    let source = TileSource::from_env()?;
    let mut tiles = tiles::load_tiles(&source).await?;
    if let Some(limit) = limit {
        tiles.truncate(limit);
    }
    Ok(tiles)
}

/// Runs one complete ingestion from environment configuration.
///
/// Resolves tiles and credentials before any lookup is issued, so a missing
/// input aborts the run without touching the API. The connection is owned
/// by the store and closed when this function returns, on every path.
///
/// # Errors
///
/// Returns [`IngestError`] for fatal input and setup errors. Per-tile and
/// per-batch failures are reported in the returned summary instead.
pub async fn ingest_from_env(
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IngestSummary, IngestError> {
    let tiles = load_configured_tiles(config.limit).await?;
    let api_key = secrets::api_key_from_env()?;

    let client = match std::env::var("AIR_QUALITY_API_URL") {
        Ok(url) => GoogleAirQualityClient::with_base_url(api_key, &url)?,
        Err(_) => GoogleAirQualityClient::new(api_key)?,
    };

    let store = PostgresStore::new(connect_and_migrate().await?);

    pipeline::ingest(&client, &store, &tiles, config, progress).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use airviz_air_quality::AirQualityError;
    use airviz_air_quality_models::AirQualityResponse;

    pub fn response_from(value: &serde_json::Value) -> AirQualityResponse {
        serde_json::from_value(value.clone()).unwrap()
    }

    /// A response reporting all six tracked pollutants and two indexes.
    pub fn sample_response() -> AirQualityResponse {
        response_from(&serde_json::json!({
            "dateTime": "2025-03-01T10:00:00Z",
            "regionCode": "gb",
            "indexes": [
                {
                    "code": "uaqi",
                    "aqi": 71,
                    "color": { "red": 0.3, "green": 0.8, "blue": 0.2 },
                    "category": "Good air quality",
                    "dominantPollutant": "o3"
                },
                {
                    "code": "gbr_defra",
                    "aqi": 2,
                    "color": { "green": 1.0 },
                    "category": "Low air pollution",
                    "dominantPollutant": "pm25"
                }
            ],
            "pollutants": [
                { "code": "co", "concentration": { "value": 210.3 } },
                { "code": "no2", "concentration": { "value": 11.4 } },
                { "code": "o3", "concentration": { "value": 33.9 } },
                { "code": "pm10", "concentration": { "value": 9.8 } },
                { "code": "pm25", "concentration": { "value": 4.1 } },
                { "code": "so2", "concentration": { "value": 0.7 } }
            ],
            "healthRecommendations": {
                "generalPopulation": "Enjoy your usual outdoor activities.",
                "elderly": ""
            }
        }))
    }

    pub fn api_error(status: u16, body: &str) -> AirQualityError {
        AirQualityError::Api {
            status,
            body: body.to_string(),
        }
    }
}
