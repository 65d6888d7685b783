#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Row types persisted by the ingestion pipeline.
//!
//! A [`MeasurementRecord`] is the parent row for one tile and one measured
//! hour. The three child row kinds reference it through the `record_id`
//! returned when the parent is inserted. These types are distinct from the
//! API response types in `airviz_air_quality_models`.

use std::collections::BTreeMap;

use airviz_air_quality_models::{IndexColor, PollutantCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Parent row in `aq_records`. Unique on `(tile_id, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    /// Tile the measurement belongs to.
    pub tile_id: i32,
    /// Hour the API reported the conditions for.
    pub timestamp: DateTime<Utc>,
    /// When this run ingested the measurement.
    pub ingestion_timestamp: DateTime<Utc>,
}

/// Identifier assigned to a newly inserted [`MeasurementRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertedMeasurement {
    /// Generated `aq_records.id`.
    pub id: i32,
    /// Tile of the inserted record.
    pub tile_id: i32,
}

/// Row in `pollutant_concentration`. Unique on `(record_id, tile_id)`.
///
/// A pollutant the API did not report stays `None` (stored as `NULL`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollutantConcentration {
    /// Parent `aq_records.id`.
    pub record_id: i32,
    /// Tile the measurement belongs to.
    pub tile_id: i32,
    /// Measured hour.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub ingestion_timestamp: DateTime<Utc>,
    /// PM2.5 concentration.
    pub pm25_value: Option<f64>,
    /// PM10 concentration.
    pub pm10_value: Option<f64>,
    /// NO2 concentration.
    pub no2_value: Option<f64>,
    /// SO2 concentration.
    pub so2_value: Option<f64>,
    /// O3 concentration.
    pub o3_value: Option<f64>,
    /// CO concentration.
    pub co_value: Option<f64>,
}

impl PollutantConcentration {
    /// Creates a row with every pollutant column empty.
    #[must_use]
    pub const fn empty(
        record_id: i32,
        tile_id: i32,
        timestamp: DateTime<Utc>,
        ingestion_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id,
            tile_id,
            timestamp,
            ingestion_timestamp,
            pm25_value: None,
            pm10_value: None,
            no2_value: None,
            so2_value: None,
            o3_value: None,
            co_value: None,
        }
    }

    /// Returns the column holding `code`.
    #[must_use]
    pub const fn value(&self, code: PollutantCode) -> Option<f64> {
        match code {
            PollutantCode::Pm25 => self.pm25_value,
            PollutantCode::Pm10 => self.pm10_value,
            PollutantCode::No2 => self.no2_value,
            PollutantCode::So2 => self.so2_value,
            PollutantCode::O3 => self.o3_value,
            PollutantCode::Co => self.co_value,
        }
    }

    /// Sets the column holding `code`.
    pub const fn set(&mut self, code: PollutantCode, value: Option<f64>) {
        match code {
            PollutantCode::Pm25 => self.pm25_value = value,
            PollutantCode::Pm10 => self.pm10_value = value,
            PollutantCode::No2 => self.no2_value = value,
            PollutantCode::So2 => self.so2_value = value,
            PollutantCode::O3 => self.o3_value = value,
            PollutantCode::Co => self.co_value = value,
        }
    }
}

/// Row in `air_quality_index`. Unique on `(record_id, tile_id, index_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityIndexEntry {
    /// Parent `aq_records.id`.
    pub record_id: i32,
    /// Tile the measurement belongs to.
    pub tile_id: i32,
    /// Index scale code (e.g. `"uaqi"`, `"gbr_defra"`).
    pub index_type: String,
    /// Category label.
    pub category: String,
    /// Category colour, stored as JSONB.
    pub colour_code: IndexColor,
    /// Pollutant driving the index.
    pub dominant_pollutant: String,
    /// Measured hour.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub ingestion_timestamp: DateTime<Utc>,
    /// Numeric index value.
    pub value: Option<i32>,
}

/// Row in `health_recommendation`. Unique on `(record_id, tile_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecommendation {
    /// Parent `aq_records.id`.
    pub record_id: i32,
    /// Tile the measurement belongs to.
    pub tile_id: i32,
    /// Measured hour.
    pub timestamp: DateTime<Utc>,
    /// Ingestion time.
    pub ingestion_timestamp: DateTime<Utc>,
    /// Population group to recommendation text, stored as JSONB.
    pub recommendations: BTreeMap<String, String>,
}

/// Geographic level that measurements are rolled up to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AggregationLevel {
    /// London borough
    #[default]
    Borough,
}

/// Outcome of one regional aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    /// Level that was aggregated.
    pub level: AggregationLevel,
    /// Number of regions written to `regional_aggregates`.
    pub regions: u64,
    /// New watermark, if any region was aggregated.
    pub processed_until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pollutant_columns_round_trip_through_set_and_value() {
        let now = Utc::now();
        let mut row = PollutantConcentration::empty(1, 2, now, now);
        row.set(PollutantCode::O3, Some(33.0));

        assert_eq!(row.value(PollutantCode::O3), Some(33.0));
        assert_eq!(row.o3_value, Some(33.0));
        assert_eq!(row.value(PollutantCode::Co), None);
    }

    #[test]
    fn parses_aggregation_level() {
        assert_eq!(
            "borough".parse::<AggregationLevel>().unwrap(),
            AggregationLevel::Borough
        );
        assert_eq!(AggregationLevel::Borough.as_ref(), "borough");
    }
}
