//! Turns fetched tiles into the row-sets persisted per outer batch.
//!
//! Measurement rows are produced first. Child rows can only be built once
//! the measurement insert has returned the generated record ids, because
//! every child row references its parent through `record_id`.

use std::collections::BTreeMap;

use airviz_air_quality_models::{AirQualityResponse, PollutantCode};
use airviz_database_models::{
    AirQualityIndexEntry, HealthRecommendation, InsertedMeasurement, MeasurementRecord,
    PollutantConcentration,
};
use airviz_ingest_models::FetchedTile;
use chrono::{DateTime, Utc};
use strum::IntoEnumIterator as _;

/// Child rows for one outer batch.
#[derive(Debug, Default)]
pub struct ChildRows {
    /// One row per mapped tile.
    pub pollutants: Vec<PollutantConcentration>,
    /// One row per index reported for a mapped tile.
    pub aqi_entries: Vec<AirQualityIndexEntry>,
    /// One row per mapped tile, even when no recommendation survived
    /// filtering.
    pub health_recommendations: Vec<HealthRecommendation>,
    /// Tiles skipped because no record id was returned for them.
    pub skipped: Vec<i32>,
}

/// Builds one measurement row per fetched tile, stamped with the hour the
/// API reported and `ingested_at`.
#[must_use]
pub fn to_measurements(
    fetched: &[FetchedTile],
    ingested_at: DateTime<Utc>,
) -> Vec<MeasurementRecord> {
    fetched
        .iter()
        .map(|f| MeasurementRecord {
            tile_id: f.tile.id,
            timestamp: f.response.date_time,
            ingestion_timestamp: ingested_at,
        })
        .collect()
}

/// Maps tile id to the record id returned by the measurement insert.
///
/// If a tile appears more than once, the last returned id wins.
#[must_use]
pub fn record_ids(inserted: &[InsertedMeasurement]) -> BTreeMap<i32, i32> {
    inserted.iter().map(|m| (m.tile_id, m.id)).collect()
}

/// Builds the pollutant row for one response; absent codes stay `None`.
#[must_use]
pub fn pollutant_row(
    record_id: i32,
    tile_id: i32,
    response: &AirQualityResponse,
    ingested_at: DateTime<Utc>,
) -> PollutantConcentration {
    let mut row = PollutantConcentration::empty(record_id, tile_id, response.date_time, ingested_at);
    for code in PollutantCode::iter() {
        row.set(code, response.concentration(code));
    }
    row
}

/// Builds one index row per index entry of `response`.
#[must_use]
pub fn aqi_rows(
    record_id: i32,
    tile_id: i32,
    response: &AirQualityResponse,
    ingested_at: DateTime<Utc>,
) -> Vec<AirQualityIndexEntry> {
    response
        .indexes
        .iter()
        .map(|index| AirQualityIndexEntry {
            record_id,
            tile_id,
            index_type: index.code.clone(),
            category: index.category.clone(),
            colour_code: index.color,
            dominant_pollutant: index.dominant_pollutant.clone(),
            timestamp: response.date_time,
            ingestion_timestamp: ingested_at,
            value: index.aqi,
        })
        .collect()
}

/// Builds the child rows of every fetched tile that has a record id.
///
/// Tiles without one (their measurement already existed, so the insert
/// skipped it) are logged and left out.
#[must_use]
pub fn to_child_rows(
    fetched: &[FetchedTile],
    record_ids: &BTreeMap<i32, i32>,
    ingested_at: DateTime<Utc>,
) -> ChildRows {
    let mut rows = ChildRows::default();

    for FetchedTile { tile, response } in fetched {
        let Some(&record_id) = record_ids.get(&tile.id) else {
            log::warn!(
                "No record id for tile {} at {}; skipping child rows",
                tile.id,
                response.date_time
            );
            rows.skipped.push(tile.id);
            continue;
        };

        rows.pollutants
            .push(pollutant_row(record_id, tile.id, response, ingested_at));
        rows.aqi_entries
            .extend(aqi_rows(record_id, tile.id, response, ingested_at));
        rows.health_recommendations.push(HealthRecommendation {
            record_id,
            tile_id: tile.id,
            timestamp: response.date_time,
            ingestion_timestamp: ingested_at,
            recommendations: response.text_recommendations(),
        });
    }

    rows
}
