//! The outer-batch driver.
//!
//! Tiles are split into outer batches of [`IngestConfig::batch_size`]. Each
//! batch is fetched and persisted before the next one starts, which bounds
//! memory to one batch of responses. A persistence error aborts only the
//! batch it happened in; the run carries on with the next batch and the
//! failure is counted in the summary.

use std::sync::Arc;
use std::time::Instant;

use airviz_air_quality::AirQualityLookup;
use airviz_air_quality::progress::ProgressCallback;
use airviz_air_quality_models::Tile;
use airviz_database::{BatchWriter, DbError, MeasurementStore};
use airviz_ingest_models::{FetchedTile, IngestConfig, IngestReport, IngestSummary};
use chrono::{DateTime, Utc};

use crate::{IngestError, scheduler, transform};

/// Writes the four row-sets of one outer batch as a single unit of work.
///
/// Measurements go first; their returned ids decide which tiles get child
/// rows. On any error the batch is rolled back, so no parent row is left
/// without its children. The returned summary only carries insert and skip
/// counts.
///
/// # Errors
///
/// Returns the first [`DbError`]; row-sets after the failing one are not
/// written.
pub async fn persist_batch<S>(
    store: &S,
    fetched: &[FetchedTile],
    ingested_at: DateTime<Utc>,
) -> Result<IngestSummary, DbError>
where
    S: MeasurementStore + ?Sized,
{
    if fetched.is_empty() {
        return Ok(IngestSummary::default());
    }

    let batch = store.begin_batch().await?;

    match write_rows(batch.as_ref(), fetched, ingested_at).await {
        Ok(written) => {
            batch.commit().await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(rollback) = batch.rollback().await {
                log::warn!("Failed to roll back batch: {rollback}");
            }
            Err(e)
        }
    }
}

async fn write_rows(
    batch: &dyn BatchWriter,
    fetched: &[FetchedTile],
    ingested_at: DateTime<Utc>,
) -> Result<IngestSummary, DbError> {
    let measurements = transform::to_measurements(fetched, ingested_at);
    let inserted = batch.insert_measurements(&measurements).await?;

    let record_ids = transform::record_ids(&inserted);
    let children = transform::to_child_rows(fetched, &record_ids, ingested_at);

    let pollutants = batch.insert_pollutants(&children.pollutants).await?;
    let aqi_entries = batch.insert_aqi_entries(&children.aqi_entries).await?;
    let health = batch
        .insert_health_recommendations(&children.health_recommendations)
        .await?;

    Ok(IngestSummary {
        tiles_skipped: children.skipped.len() as u64,
        measurements_inserted: inserted.len() as u64,
        pollutants_inserted: pollutants,
        aqi_entries_inserted: aqi_entries,
        health_recommendations_inserted: health,
        ..IngestSummary::default()
    })
}

/// Fetches and persists `tiles` in outer batches.
///
/// Never fails as a whole: dropped tiles and failed batches are counted in
/// the returned summary.
pub async fn ingest_tiles<L, S>(
    lookup: &L,
    store: &S,
    tiles: &[Tile],
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> IngestSummary
where
    L: AirQualityLookup + ?Sized,
    S: MeasurementStore + ?Sized,
{
    let start = Instant::now();
    let tiles = &tiles[..config.limit.map_or(tiles.len(), |l| l.min(tiles.len()))];
    let ingested_at = Utc::now();
    let batch_size = config.batch_size.max(1);
    let batch_count = tiles.len().div_ceil(batch_size);

    let mut summary = IngestSummary {
        tiles_total: tiles.len() as u64,
        ..IngestSummary::default()
    };

    progress.set_total(tiles.len() as u64);

    for (index, batch) in tiles.chunks(batch_size).enumerate() {
        let number = index + 1;
        log::info!(
            "Batch {number}/{batch_count}: fetching {} tiles",
            batch.len()
        );
        progress.set_message(format!("Batch {number}/{batch_count}"));

        let fetched = scheduler::run_batch(lookup, batch, config, progress).await;
        summary.batches += 1;
        summary.tiles_fetched += fetched.len() as u64;
        summary.tiles_failed += (batch.len() - fetched.len()) as u64;

        match persist_batch(store, &fetched, ingested_at).await {
            Ok(written) => {
                log::info!(
                    "Batch {number}/{batch_count}: {}/{} tiles fetched, {} measurements, \
                     {} pollutant rows, {} index rows, {} health rows inserted",
                    fetched.len(),
                    batch.len(),
                    written.measurements_inserted,
                    written.pollutants_inserted,
                    written.aqi_entries_inserted,
                    written.health_recommendations_inserted,
                );
                summary.absorb(&written);
            }
            Err(e) => {
                log::error!("Batch {number}/{batch_count}: failed to persist: {e}");
                summary.batches_failed += 1;
            }
        }
    }

    summary.duration = start.elapsed();

    log::info!(
        "Ingestion finished in {:.1}s: {}/{} tiles fetched, {} failed, {} skipped, \
         {} measurements inserted, {}/{} batches failed",
        summary.duration.as_secs_f64(),
        summary.tiles_fetched,
        summary.tiles_total,
        summary.tiles_failed,
        summary.tiles_skipped,
        summary.measurements_inserted,
        summary.batches_failed,
        summary.batches,
    );

    progress.finish(format!(
        "{} tiles fetched, {} measurements inserted",
        summary.tiles_fetched, summary.measurements_inserted
    ));

    summary
}

/// Runs one ingestion over injected collaborators.
///
/// # Errors
///
/// Returns [`IngestError::TileSource`] if there is nothing to ingest.
pub async fn ingest<L, S>(
    lookup: &L,
    store: &S,
    tiles: &[Tile],
    config: &IngestConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<IngestSummary, IngestError>
where
    L: AirQualityLookup + ?Sized,
    S: MeasurementStore + ?Sized,
{
    if tiles.is_empty() || config.limit == Some(0) {
        return Err(IngestError::TileSource {
            message: "No tiles to ingest".to_string(),
        });
    }

    Ok(ingest_tiles(lookup, store, tiles, config, progress).await)
}

/// Converts the outcome of a run into the report handed to its invoker.
#[must_use]
pub fn report(result: Result<IngestSummary, IngestError>) -> IngestReport {
    match result {
        Ok(summary) => {
            if summary.is_partial_failure() {
                log::warn!(
                    "{} of {} batches failed to persist",
                    summary.batches_failed,
                    summary.batches
                );
            }
            IngestReport::Success(summary)
        }
        Err(e) => {
            log::error!("Ingestion failed: {e}");
            IngestReport::Failure {
                error: e.to_string(),
            }
        }
    }
}
