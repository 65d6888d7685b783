//! Regional roll-up of the latest measurements.
//!
//! Each pass reads a per-level watermark from `aggregate_state`, averages the
//! most recent record of every tile newer than that watermark into one row
//! per region, upserts those rows into `regional_aggregates`, and then moves
//! the watermark forward to the newest timestamp it aggregated.

use airviz_database_models::{AggregationLevel, AggregationResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// Ensures a watermark row exists for `$1`, starting at the Unix epoch.
const ENSURE_STATE_SQL: &str = "INSERT INTO aggregate_state (level, last_processed_timestamp) \
     VALUES ($1, TIMESTAMP '1970-01-01 00:00:00') \
     ON CONFLICT (level) DO NOTHING";

const READ_STATE_SQL: &str =
    "SELECT last_processed_timestamp FROM aggregate_state WHERE level = $1";

const ADVANCE_STATE_SQL: &str = "UPDATE aggregate_state \
     SET last_processed_timestamp = $1 \
     WHERE level = $2 AND last_processed_timestamp < $1";

/// Upserts one borough row per region from records newer than `$2`.
///
/// `$1` is the aggregation level label.
const BOROUGH_UPSERT_SQL: &str = r"
WITH latest_records AS (
    SELECT DISTINCT ON (t.id)
        t.borough_id AS region_id,
        ar.id AS record_id,
        ar.timestamp
    FROM tiles t
    JOIN aq_records ar ON ar.tile_id = t.id
    WHERE ar.timestamp > $2
      AND t.borough_id IS NOT NULL
    ORDER BY t.id, ar.timestamp DESC
),
index_values AS (
    SELECT lr.region_id, aqi.index_type, ROUND(AVG(aqi.value))::INTEGER AS value
    FROM latest_records lr
    JOIN air_quality_index aqi ON aqi.record_id = lr.record_id
    GROUP BY lr.region_id, aqi.index_type
),
index_summary AS (
    SELECT
        lr.region_id,
        mode() WITHIN GROUP (ORDER BY aqi.category) AS category,
        mode() WITHIN GROUP (ORDER BY aqi.dominant_pollutant) AS dominant_pollutant,
        jsonb_build_object(
            'red', AVG((aqi.colour_code->>'red')::numeric),
            'green', AVG((aqi.colour_code->>'green')::numeric),
            'blue', AVG((aqi.colour_code->>'blue')::numeric)
        ) AS colour_code
    FROM latest_records lr
    JOIN air_quality_index aqi ON aqi.record_id = lr.record_id
    GROUP BY lr.region_id
),
pollutant_values AS (
    SELECT
        lr.region_id,
        AVG(p.pm25_value) AS pm25_value,
        AVG(p.pm10_value) AS pm10_value,
        AVG(p.no2_value) AS no2_value,
        AVG(p.so2_value) AS so2_value,
        AVG(p.o3_value) AS o3_value,
        AVG(p.co_value) AS co_value,
        MAX(lr.timestamp) AS timestamp
    FROM latest_records lr
    JOIN pollutant_concentration p ON p.record_id = lr.record_id
    GROUP BY lr.region_id
)
INSERT INTO regional_aggregates (
    level, region_id, aqi, category, dominant_pollutant, colour_code,
    pm25_value, pm10_value, no2_value, so2_value, o3_value, co_value,
    timestamp, update_timestamp
)
SELECT
    $1,
    pv.region_id,
    COALESCE(
        (SELECT jsonb_object_agg(iv.index_type, iv.value)
         FROM index_values iv
         WHERE iv.region_id = pv.region_id),
        '{}'::jsonb
    ),
    s.category,
    s.dominant_pollutant,
    COALESCE(s.colour_code, '{}'::jsonb),
    pv.pm25_value,
    pv.pm10_value,
    pv.no2_value,
    pv.so2_value,
    pv.o3_value,
    pv.co_value,
    pv.timestamp,
    NOW()
FROM pollutant_values pv
LEFT JOIN index_summary s ON s.region_id = pv.region_id
ON CONFLICT (level, region_id) DO UPDATE SET
    aqi = EXCLUDED.aqi,
    category = EXCLUDED.category,
    dominant_pollutant = EXCLUDED.dominant_pollutant,
    colour_code = EXCLUDED.colour_code,
    pm25_value = EXCLUDED.pm25_value,
    pm10_value = EXCLUDED.pm10_value,
    no2_value = EXCLUDED.no2_value,
    so2_value = EXCLUDED.so2_value,
    o3_value = EXCLUDED.o3_value,
    co_value = EXCLUDED.co_value,
    timestamp = EXCLUDED.timestamp,
    update_timestamp = NOW()
RETURNING region_id, timestamp
";

/// Returns the upsert statement for `level`.
#[must_use]
pub const fn upsert_sql(level: AggregationLevel) -> &'static str {
    match level {
        AggregationLevel::Borough => BOROUGH_UPSERT_SQL,
    }
}

/// Reads the watermark for `level`, creating it at the epoch if missing.
///
/// # Errors
///
/// Returns [`DbError`] if the state table cannot be read or written.
pub async fn watermark(
    db: &dyn Database,
    level: AggregationLevel,
) -> Result<NaiveDateTime, DbError> {
    let params = [DatabaseValue::String(level.to_string())];

    db.exec_raw_params(ENSURE_STATE_SQL, &params).await?;

    let rows = db.query_raw_params(READ_STATE_SQL, &params).await?;
    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: format!("No aggregate_state row for level '{level}'"),
    })?;

    row.to_value("last_processed_timestamp")
        .map_err(|e| DbError::Conversion {
            message: format!("Failed to parse last_processed_timestamp: {e}"),
        })
}

/// Aggregates every record newer than the level's watermark.
///
/// Safe to re-run: regions are upserted on `(level, region_id)` and the
/// watermark only ever moves forward.
///
/// # Errors
///
/// Returns [`DbError`] if any statement fails or a returned row cannot be
/// read.
pub async fn aggregate_regions(
    db: &dyn Database,
    level: AggregationLevel,
) -> Result<AggregationResult, DbError> {
    let since = watermark(db, level).await?;
    log::info!("Aggregating {level} regions newer than {since}");

    let rows = db
        .query_raw_params(
            upsert_sql(level),
            &[
                DatabaseValue::String(level.to_string()),
                DatabaseValue::DateTime(since),
            ],
        )
        .await?;

    let mut newest: Option<NaiveDateTime> = None;
    for row in &rows {
        let ts: NaiveDateTime = row.to_value("timestamp").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse aggregate timestamp: {e}"),
        })?;
        newest = newest.max(Some(ts));
    }

    if let Some(ts) = newest {
        db.exec_raw_params(
            ADVANCE_STATE_SQL,
            &[
                DatabaseValue::DateTime(ts),
                DatabaseValue::String(level.to_string()),
            ],
        )
        .await?;
    }

    let result = AggregationResult {
        level,
        regions: rows.len() as u64,
        processed_until: newest.map(|ts| DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc)),
    };

    log::info!(
        "Aggregated {} {level} region(s), watermark now {:?}",
        result.regions,
        result.processed_until
    );

    Ok(result)
}
