#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion configuration, fetch results, and run summaries.

use std::time::Duration;

use airviz_air_quality_models::{AirQualityResponse, Tile};
use serde::{Deserialize, Serialize};

/// Default number of tiles fetched and persisted per outer batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of concurrent lookups per window.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default pause after every window.
pub const DEFAULT_WINDOW_PAUSE: Duration = Duration::from_millis(500);

/// Default attempts per tile, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Tunables for one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IngestConfig {
    /// Tiles per outer batch. Each outer batch is fetched and persisted
    /// before the next one starts.
    pub batch_size: usize,
    /// Lookups issued concurrently within a window.
    pub concurrency: usize,
    /// Pause applied after every window, whatever its outcome.
    pub window_pause: Duration,
    /// Attempts per tile before it is dropped.
    pub max_attempts: u32,
    /// Backoff after the first retryable failure; doubles per attempt.
    pub base_backoff: Duration,
    /// Only process the first `limit` tiles.
    pub limit: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            window_pause: DEFAULT_WINDOW_PAUSE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            limit: None,
        }
    }
}

/// A tile whose lookup succeeded, paired with the API response.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedTile {
    /// The tile that was looked up.
    pub tile: Tile,
    /// Conditions reported for it.
    pub response: AirQualityResponse,
}

/// Counts accumulated over one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    /// Tiles considered for this run (after `limit`).
    pub tiles_total: u64,
    /// Tiles whose lookup succeeded.
    pub tiles_fetched: u64,
    /// Tiles dropped after a fatal or exhausted lookup.
    pub tiles_failed: u64,
    /// Fetched tiles whose child rows were skipped because their
    /// measurement row already existed.
    pub tiles_skipped: u64,
    /// Outer batches processed.
    pub batches: u64,
    /// Outer batches aborted by a persistence error.
    pub batches_failed: u64,
    /// Rows inserted into `aq_records`.
    pub measurements_inserted: u64,
    /// Rows inserted into `pollutant_concentration`.
    pub pollutants_inserted: u64,
    /// Rows inserted into `air_quality_index`.
    pub aqi_entries_inserted: u64,
    /// Rows inserted into `health_recommendation`.
    pub health_recommendations_inserted: u64,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl IngestSummary {
    /// Returns `true` if at least one outer batch failed to persist.
    #[must_use]
    pub const fn is_partial_failure(&self) -> bool {
        self.batches_failed > 0
    }

    /// Folds the counts of one outer batch into the run totals.
    pub const fn absorb(&mut self, batch: &Self) {
        self.tiles_fetched += batch.tiles_fetched;
        self.tiles_failed += batch.tiles_failed;
        self.tiles_skipped += batch.tiles_skipped;
        self.measurements_inserted += batch.measurements_inserted;
        self.pollutants_inserted += batch.pollutants_inserted;
        self.aqi_entries_inserted += batch.aqi_entries_inserted;
        self.health_recommendations_inserted += batch.health_recommendations_inserted;
    }
}

/// What a run reports to whoever invoked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestReport {
    /// The run completed. Individual outer batches may still have failed;
    /// see [`IngestSummary::batches_failed`].
    Success(IngestSummary),
    /// The run aborted before or during processing.
    Failure {
        /// Human-readable cause.
        error: String,
    },
}

impl IngestReport {
    /// Returns `true` for [`IngestReport::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_pipeline_defaults() {
        let config = IngestConfig::default();

        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.window_pause, Duration::from_millis(500));
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.base_backoff, Duration::from_millis(500));
        assert_eq!(config.limit, None);
    }

    #[test]
    fn partial_failure_tracks_failed_batches() {
        let mut summary = IngestSummary::default();
        assert!(!summary.is_partial_failure());

        summary.batches_failed = 1;
        assert!(summary.is_partial_failure());
    }

    #[test]
    fn absorb_adds_batch_counts() {
        let mut total = IngestSummary {
            tiles_total: 20,
            ..IngestSummary::default()
        };
        let batch = IngestSummary {
            tiles_fetched: 9,
            tiles_failed: 1,
            measurements_inserted: 9,
            pollutants_inserted: 9,
            aqi_entries_inserted: 18,
            health_recommendations_inserted: 9,
            ..IngestSummary::default()
        };

        total.absorb(&batch);
        total.absorb(&batch);

        assert_eq!(total.tiles_total, 20);
        assert_eq!(total.tiles_fetched, 18);
        assert_eq!(total.tiles_failed, 2);
        assert_eq!(total.aqi_entries_inserted, 36);
    }

    #[test]
    fn report_is_tagged_by_status() {
        let failure = IngestReport::Failure {
            error: "no tiles".to_string(),
        };
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"], "no tiles");

        let success = IngestReport::Success(IngestSummary {
            measurements_inserted: 3,
            ..IngestSummary::default()
        });
        let json = serde_json::to_value(&success).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["measurementsInserted"], 3);
        assert!(success.is_success());
    }
}
