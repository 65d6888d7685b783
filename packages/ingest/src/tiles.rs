//! Loading the tile coordinate list.
//!
//! The list is a CSV with an `id,latitude,longitude[,boroughId]` header,
//! read either from a local file or from an S3 object.

use std::path::PathBuf;

use airviz_air_quality_models::Tile;
use serde::Deserialize;

use crate::IngestError;

/// Where the tile CSV lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileSource {
    /// A file on the local filesystem.
    Local(PathBuf),
    /// An object in S3.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
}

impl TileSource {
    /// Resolves the source from `TILE_COORDS_PATH`, or from
    /// `TILE_COORDS_BUCKET` and `TILE_COORDS_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] if neither is set.
    pub fn from_env() -> Result<Self, IngestError> {
        if let Ok(path) = std::env::var("TILE_COORDS_PATH") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        match (
            std::env::var("TILE_COORDS_BUCKET"),
            std::env::var("TILE_COORDS_KEY"),
        ) {
            (Ok(bucket), Ok(key)) => Ok(Self::S3 { bucket, key }),
            _ => Err(IngestError::Config {
                message: "Set TILE_COORDS_PATH, or TILE_COORDS_BUCKET and TILE_COORDS_KEY"
                    .to_string(),
            }),
        }
    }

    /// Reads the raw CSV text.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] for local read failures and
    /// [`IngestError::S3`] for download failures.
    pub async fn read(&self) -> Result<String, IngestError> {
        match self {
            Self::Local(path) => {
                log::info!("Reading tiles from {}", path.display());
                Ok(tokio::fs::read_to_string(path).await?)
            }
            Self::S3 { bucket, key } => {
                log::info!("Reading tiles from s3://{bucket}/{key}");
                download(bucket, key).await
            }
        }
    }
}

async fn download(bucket: &str, key: &str) -> Result<String, IngestError> {
    let s3_error = |source: Box<dyn std::error::Error + Send + Sync>| IngestError::S3 {
        bucket: bucket.to_string(),
        key: key.to_string(),
        source,
    };

    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = aws_sdk_s3::Client::new(&config);

    let output = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| s3_error(Box::new(e)))?;

    let bytes = output
        .body
        .collect()
        .await
        .map_err(|e| s3_error(Box::new(e)))?;

    String::from_utf8(bytes.into_bytes().to_vec()).map_err(|e| s3_error(Box::new(e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TileRow {
    id: i32,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    borough_id: Option<i32>,
}

/// Parses tile CSV text. A borough id of `0` means the tile has no borough.
///
/// # Errors
///
/// Returns [`IngestError::Csv`] for the first row that fails to parse.
pub fn parse_tiles(csv_text: &str) -> Result<Vec<Tile>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    reader
        .deserialize::<TileRow>()
        .map(|row| {
            let row = row?;
            Ok(Tile {
                id: row.id,
                latitude: row.latitude,
                longitude: row.longitude,
                borough_id: row.borough_id.filter(|&b| b != 0),
            })
        })
        .collect()
}

/// Loads and parses the tile list.
///
/// # Errors
///
/// Returns [`IngestError`] if the source cannot be read or parsed, or
/// [`IngestError::TileSource`] if it holds no tiles.
pub async fn load_tiles(source: &TileSource) -> Result<Vec<Tile>, IngestError> {
    let tiles = parse_tiles(&source.read().await?)?;

    if tiles.is_empty() {
        return Err(IngestError::TileSource {
            message: "Tile list is empty".to_string(),
        });
    }

    log::info!("Loaded {} tiles", tiles.len());
    Ok(tiles)
}
