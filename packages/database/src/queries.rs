//! Multi-row insert statements for the ingestion row-sets.
//!
//! Each row-set is written with one `INSERT … VALUES (…), (…), …` per
//! chunk, positionally parameterized. Chunks are sized so no statement
//! exceeds [`PG_MAX_PARAMS`]; a default outer batch of 1000 tiles always
//! fits in a single statement per table. Every insert ends in
//! `ON CONFLICT … DO NOTHING` on the table's uniqueness constraint, so
//! re-ingesting the same hour leaves existing rows untouched.
//!
//! JSONB columns are bound as text and cast with `::text::jsonb` so the
//! driver sends a plain string parameter.

use std::fmt::Write as _;

use airviz_air_quality_models::Tile;
use airviz_database_models::{
    AirQualityIndexEntry, HealthRecommendation, InsertedMeasurement, MeasurementRecord,
    PollutantConcentration,
};
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// Maximum number of parameters `PostgreSQL` allows per statement.
pub const PG_MAX_PARAMS: usize = 65_535;

/// A SQL statement and its positional parameters.
#[derive(Debug)]
pub struct Statement {
    /// SQL text with `$n` placeholders.
    pub sql: String,
    /// Values bound to `$1..$n`.
    pub params: Vec<DatabaseValue>,
}

/// Shape of a bulk insert: target table, columns, and conflict clause.
struct BulkInsert<'a> {
    table: &'a str,
    columns: &'a [&'a str],
    /// Per-column suffix appended to the placeholder (e.g. `::text::jsonb`).
    casts: &'a [&'a str],
    tail: &'a str,
}

impl BulkInsert<'_> {
    /// Builds one statement per chunk of `rows`. Each row must hold exactly
    /// `columns.len()` values. Returns no statements for an empty row-set.
    fn build(&self, rows: Vec<Vec<DatabaseValue>>) -> Vec<Statement> {
        let width = self.columns.len();
        let chunk_rows = (PG_MAX_PARAMS / width).max(1);
        let mut statements = Vec::new();
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            let chunk: Vec<Vec<DatabaseValue>> = rows.by_ref().take(chunk_rows).collect();
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES ",
                self.table,
                self.columns.join(", ")
            );
            let mut params = Vec::with_capacity(chunk.len() * width);
            let mut idx = 1usize;

            for (i, row) in chunk.into_iter().enumerate() {
                debug_assert_eq!(row.len(), width, "row width mismatch for {}", self.table);
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push('(');
                for col in 0..width {
                    if col > 0 {
                        sql.push_str(", ");
                    }
                    let cast = self.casts.get(col).copied().unwrap_or("");
                    write!(sql, "${idx}{cast}").unwrap();
                    idx += 1;
                }
                sql.push(')');
                params.extend(row);
            }

            sql.push(' ');
            sql.push_str(self.tail);
            statements.push(Statement { sql, params });
        }

        statements
    }
}

const MEASUREMENTS: BulkInsert<'static> = BulkInsert {
    table: "aq_records",
    columns: &["tile_id", "timestamp", "ingestion_timestamp"],
    casts: &[],
    tail: "ON CONFLICT (tile_id, timestamp) DO NOTHING RETURNING id, tile_id",
};

const POLLUTANTS: BulkInsert<'static> = BulkInsert {
    table: "pollutant_concentration",
    columns: &[
        "record_id",
        "tile_id",
        "timestamp",
        "ingestion_timestamp",
        "pm25_value",
        "pm10_value",
        "no2_value",
        "so2_value",
        "o3_value",
        "co_value",
    ],
    casts: &[],
    tail: "ON CONFLICT (record_id, tile_id) DO NOTHING",
};

const AQI_ENTRIES: BulkInsert<'static> = BulkInsert {
    table: "air_quality_index",
    columns: &[
        "record_id",
        "tile_id",
        "index_type",
        "category",
        "colour_code",
        "dominant_pollutant",
        "timestamp",
        "ingestion_timestamp",
        "value",
    ],
    casts: &["", "", "", "", "::text::jsonb"],
    tail: "ON CONFLICT (record_id, tile_id, index_type) DO NOTHING",
};

const HEALTH_RECOMMENDATIONS: BulkInsert<'static> = BulkInsert {
    table: "health_recommendation",
    columns: &[
        "record_id",
        "tile_id",
        "timestamp",
        "ingestion_timestamp",
        "recommendations",
    ],
    casts: &["", "", "", "", "::text::jsonb"],
    tail: "ON CONFLICT (record_id, tile_id) DO NOTHING",
};

const TILES: BulkInsert<'static> = BulkInsert {
    table: "tiles",
    columns: &[
        "id",
        "borough_id",
        "name",
        "latitude",
        "longitude",
        "inserted_at",
        "updated_at",
    ],
    casts: &[],
    tail: "ON CONFLICT (id) DO NOTHING",
};

fn timestamp(dt: &DateTime<Utc>) -> DatabaseValue {
    DatabaseValue::DateTime(dt.naive_utc())
}

fn real(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

/// Builds the `aq_records` insert, returning `id, tile_id` of new rows.
#[must_use]
pub fn measurement_statements(rows: &[MeasurementRecord]) -> Vec<Statement> {
    MEASUREMENTS.build(
        rows.iter()
            .map(|r| {
                vec![
                    DatabaseValue::Int32(r.tile_id),
                    timestamp(&r.timestamp),
                    timestamp(&r.ingestion_timestamp),
                ]
            })
            .collect(),
    )
}

/// Builds the `pollutant_concentration` insert.
#[must_use]
pub fn pollutant_statements(rows: &[PollutantConcentration]) -> Vec<Statement> {
    POLLUTANTS.build(
        rows.iter()
            .map(|r| {
                vec![
                    DatabaseValue::Int32(r.record_id),
                    DatabaseValue::Int32(r.tile_id),
                    timestamp(&r.timestamp),
                    timestamp(&r.ingestion_timestamp),
                    real(r.pm25_value),
                    real(r.pm10_value),
                    real(r.no2_value),
                    real(r.so2_value),
                    real(r.o3_value),
                    real(r.co_value),
                ]
            })
            .collect(),
    )
}

/// Builds the `air_quality_index` insert.
///
/// # Errors
///
/// Returns [`DbError::Json`] if a colour cannot be encoded.
pub fn aqi_statements(rows: &[AirQualityIndexEntry]) -> Result<Vec<Statement>, DbError> {
    let values = rows
        .iter()
        .map(|r| {
            Ok(vec![
                DatabaseValue::Int32(r.record_id),
                DatabaseValue::Int32(r.tile_id),
                DatabaseValue::String(r.index_type.clone()),
                DatabaseValue::String(r.category.clone()),
                DatabaseValue::String(serde_json::to_string(&r.colour_code)?),
                DatabaseValue::String(r.dominant_pollutant.clone()),
                timestamp(&r.timestamp),
                timestamp(&r.ingestion_timestamp),
                r.value.map_or(DatabaseValue::Null, DatabaseValue::Int32),
            ])
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    Ok(AQI_ENTRIES.build(values))
}

/// Builds the `health_recommendation` insert.
///
/// # Errors
///
/// Returns [`DbError::Json`] if a recommendation map cannot be encoded.
pub fn health_statements(rows: &[HealthRecommendation]) -> Result<Vec<Statement>, DbError> {
    let values = rows
        .iter()
        .map(|r| {
            Ok(vec![
                DatabaseValue::Int32(r.record_id),
                DatabaseValue::Int32(r.tile_id),
                timestamp(&r.timestamp),
                timestamp(&r.ingestion_timestamp),
                DatabaseValue::String(serde_json::to_string(&r.recommendations)?),
            ])
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    Ok(HEALTH_RECOMMENDATIONS.build(values))
}

/// Builds the `tiles` insert used to seed tile metadata.
#[must_use]
pub fn tile_statements(tiles: &[Tile], now: &DateTime<Utc>) -> Vec<Statement> {
    TILES.build(
        tiles
            .iter()
            .map(|t| {
                vec![
                    DatabaseValue::Int32(t.id),
                    t.borough_id.map_or(DatabaseValue::Null, DatabaseValue::Int32),
                    DatabaseValue::String(format!("Tile {}", t.id)),
                    DatabaseValue::Real64(t.latitude),
                    DatabaseValue::Real64(t.longitude),
                    timestamp(now),
                    timestamp(now),
                ]
            })
            .collect(),
    )
}

/// Executes `statements` and returns the total number of affected rows.
async fn exec_all(db: &dyn Database, statements: Vec<Statement>) -> Result<u64, DbError> {
    let mut affected = 0u64;
    for statement in statements {
        affected += db.exec_raw_params(&statement.sql, &statement.params).await?;
    }
    Ok(affected)
}

/// Inserts measurement records and returns the ids assigned to rows that
/// were actually inserted. Rows skipped by the conflict clause are absent
/// from the result.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails or a returned row cannot be read.
pub async fn insert_measurements(
    db: &dyn Database,
    rows: &[MeasurementRecord],
) -> Result<Vec<InsertedMeasurement>, DbError> {
    let mut inserted = Vec::with_capacity(rows.len());

    for statement in measurement_statements(rows) {
        let returned = db
            .query_raw_params(&statement.sql, &statement.params)
            .await?;

        for row in &returned {
            let id: i32 = row.to_value("id").map_err(|e| DbError::Conversion {
                message: format!("Failed to parse aq_records id: {e}"),
            })?;
            let tile_id: i32 = row.to_value("tile_id").map_err(|e| DbError::Conversion {
                message: format!("Failed to parse aq_records tile_id: {e}"),
            })?;
            inserted.push(InsertedMeasurement { id, tile_id });
        }
    }

    Ok(inserted)
}

/// Inserts pollutant concentration rows.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_pollutants(
    db: &dyn Database,
    rows: &[PollutantConcentration],
) -> Result<u64, DbError> {
    exec_all(db, pollutant_statements(rows)).await
}

/// Inserts air-quality index rows.
///
/// # Errors
///
/// Returns [`DbError`] if encoding or the insert fails.
pub async fn insert_aqi_entries(
    db: &dyn Database,
    rows: &[AirQualityIndexEntry],
) -> Result<u64, DbError> {
    exec_all(db, aqi_statements(rows)?).await
}

/// Inserts health recommendation rows.
///
/// # Errors
///
/// Returns [`DbError`] if encoding or the insert fails.
pub async fn insert_health_recommendations(
    db: &dyn Database,
    rows: &[HealthRecommendation],
) -> Result<u64, DbError> {
    exec_all(db, health_statements(rows)?).await
}

/// Inserts tile metadata, skipping tiles that already exist.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert_tiles(db: &dyn Database, tiles: &[Tile]) -> Result<u64, DbError> {
    exec_all(db, tile_statements(tiles, &Utc::now())).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use airviz_air_quality_models::IndexColor;

    use super::*;

    fn hour() -> DateTime<Utc> {
        "2025-03-01T10:00:00Z".parse().unwrap()
    }

    fn measurement(tile_id: i32) -> MeasurementRecord {
        MeasurementRecord {
            tile_id,
            timestamp: hour(),
            ingestion_timestamp: hour(),
        }
    }

    #[test]
    fn empty_row_set_builds_no_statement() {
        assert!(measurement_statements(&[]).is_empty());
        assert!(pollutant_statements(&[]).is_empty());
        assert!(aqi_statements(&[]).unwrap().is_empty());
        assert!(health_statements(&[]).unwrap().is_empty());
    }

    #[test]
    fn measurement_insert_is_one_positional_statement() {
        let statements = measurement_statements(&[measurement(1), measurement(2)]);
        assert_eq!(statements.len(), 1);

        let statement = &statements[0];
        assert_eq!(
            statement.sql,
            "INSERT INTO aq_records (tile_id, timestamp, ingestion_timestamp) \
             VALUES ($1, $2, $3), ($4, $5, $6) \
             ON CONFLICT (tile_id, timestamp) DO NOTHING RETURNING id, tile_id"
        );
        assert_eq!(statement.params.len(), 6);
        assert!(matches!(statement.params[3], DatabaseValue::Int32(2)));
    }

    #[test]
    fn missing_pollutants_bind_null() {
        let mut row = PollutantConcentration::empty(7, 1, hour(), hour());
        row.pm25_value = Some(4.5);

        let statements = pollutant_statements(&[row]);
        let params = &statements[0].params;

        assert_eq!(params.len(), 10);
        assert!(matches!(params[4], DatabaseValue::Real64(v) if (v - 4.5).abs() < f64::EPSILON));
        assert!(params[5..].iter().all(|p| matches!(p, DatabaseValue::Null)));
        assert!(
            statements[0]
                .sql
                .ends_with("ON CONFLICT (record_id, tile_id) DO NOTHING")
        );
    }

    #[test]
    fn jsonb_columns_are_cast_from_text() {
        let entry = AirQualityIndexEntry {
            record_id: 7,
            tile_id: 1,
            index_type: "uaqi".to_string(),
            category: "Good air quality".to_string(),
            colour_code: IndexColor {
                green: Some(0.8),
                ..IndexColor::default()
            },
            dominant_pollutant: "o3".to_string(),
            timestamp: hour(),
            ingestion_timestamp: hour(),
            value: Some(71),
        };

        let statements = aqi_statements(&[entry]).unwrap();
        let statement = &statements[0];

        assert!(statement.sql.contains("$5::text::jsonb"));
        assert!(
            statement
                .sql
                .ends_with("ON CONFLICT (record_id, tile_id, index_type) DO NOTHING")
        );
        assert!(matches!(&statement.params[4], DatabaseValue::String(s) if s == r#"{"green":0.8}"#));
    }

    #[test]
    fn empty_recommendations_encode_as_empty_object() {
        let row = HealthRecommendation {
            record_id: 7,
            tile_id: 1,
            timestamp: hour(),
            ingestion_timestamp: hour(),
            recommendations: BTreeMap::new(),
        };

        let statements = health_statements(&[row]).unwrap();

        assert_eq!(statements.len(), 1);
        assert!(matches!(&statements[0].params[4], DatabaseValue::String(s) if s == "{}"));
    }

    #[test]
    fn splits_statements_at_parameter_limit() {
        let per_statement = PG_MAX_PARAMS / 3;
        let rows: Vec<MeasurementRecord> = (0..=i32::try_from(per_statement).unwrap())
            .map(measurement)
            .collect();

        let statements = measurement_statements(&rows);

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].params.len(), per_statement * 3);
        assert_eq!(statements[1].params.len(), 3);
        assert!(statements[1].sql.contains("VALUES ($1, $2, $3) "));
    }

    #[test]
    fn seeds_tiles_with_generated_names() {
        let mut tile = Tile::new(12, 51.5, -0.1);
        tile.borough_id = Some(3);

        let statements = tile_statements(&[tile], &hour());
        let params = &statements[0].params;

        assert!(matches!(params[1], DatabaseValue::Int32(3)));
        assert!(matches!(&params[2], DatabaseValue::String(s) if s == "Tile 12"));
    }
}
