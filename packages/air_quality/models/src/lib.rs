#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tile coordinates and the request/response shapes of the Google Air
//! Quality `currentConditions:lookup` endpoint.
//!
//! Only the fields the ingestion pipeline persists are modelled; anything
//! else in the response body is ignored during deserialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// A fixed geographic grid cell whose air quality is measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    /// Tile identifier (primary key of the `tiles` table).
    pub id: i32,
    /// Latitude (WGS84) of the tile centroid.
    pub latitude: f64,
    /// Longitude (WGS84) of the tile centroid.
    pub longitude: f64,
    /// Borough the tile belongs to, when known.
    #[serde(default)]
    pub borough_id: Option<i32>,
}

impl Tile {
    /// Creates a tile without a borough assignment.
    #[must_use]
    pub const fn new(id: i32, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            latitude,
            longitude,
            borough_id: None,
        }
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tile {} ({}, {})", self.id, self.latitude, self.longitude)
    }
}

/// Pollutants with a dedicated column in `pollutant_concentration`.
///
/// Parsed from the API's lowercase pollutant `code`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PollutantCode {
    /// Fine particulate matter (< 2.5 µm)
    Pm25,
    /// Inhalable particulate matter (< 10 µm)
    Pm10,
    /// Nitrogen dioxide
    No2,
    /// Sulfur dioxide
    So2,
    /// Ozone
    O3,
    /// Carbon monoxide
    Co,
}

/// Extra computations requested on every lookup.
pub const EXTRA_COMPUTATIONS: &[&str] = &[
    "HEALTH_RECOMMENDATIONS",
    "DOMINANT_POLLUTANT_CONCENTRATION",
    "POLLUTANT_CONCENTRATION",
    "LOCAL_AQI",
    "POLLUTANT_ADDITIONAL_INFO",
];

/// A latitude/longitude pair in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude (WGS84).
    pub latitude: f64,
    /// Longitude (WGS84).
    pub longitude: f64,
}

/// Request body for `currentConditions:lookup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    /// Whether to include the universal AQI alongside the local index.
    pub universal_aqi: bool,
    /// Coordinate to look up.
    pub location: LatLng,
    /// Additional computations to include in the response.
    pub extra_computations: Vec<String>,
    /// Language for category labels and health recommendations.
    pub language_code: String,
}

impl LookupRequest {
    /// Builds the standard request for a coordinate, asking for health
    /// recommendations, dominant pollutant, pollutant concentrations, and
    /// the local index.
    #[must_use]
    pub fn for_location(latitude: f64, longitude: f64) -> Self {
        Self {
            universal_aqi: true,
            location: LatLng {
                latitude,
                longitude,
            },
            extra_computations: EXTRA_COMPUTATIONS.iter().map(ToString::to_string).collect(),
            language_code: "en".to_string(),
        }
    }
}

/// Measured concentration of a single pollutant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Concentration {
    /// Concentration value in `units`.
    pub value: f64,
}

/// A pollutant entry in the lookup response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pollutant {
    /// Lowercase pollutant code (e.g. `"pm25"`, `"no2"`).
    pub code: String,
    /// Concentration, absent when the API has no reading.
    #[serde(default)]
    pub concentration: Option<Concentration>,
}

/// RGBA colour of an index category. The API omits zero components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexColor {
    /// Red channel (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub red: Option<f64>,
    /// Green channel (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub green: Option<f64>,
    /// Blue channel (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blue: Option<f64>,
    /// Alpha channel (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
}

/// An air-quality index entry (universal or local scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityIndex {
    /// Index code (e.g. `"uaqi"`, `"gbr_defra"`).
    pub code: String,
    /// Category label (e.g. `"Good air quality"`).
    #[serde(default)]
    pub category: String,
    /// Display colour for the category.
    #[serde(default)]
    pub color: IndexColor,
    /// Code of the pollutant driving the index.
    #[serde(default)]
    pub dominant_pollutant: String,
    /// Numeric index value.
    #[serde(default)]
    pub aqi: Option<i32>,
}

/// Response body of `currentConditions:lookup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirQualityResponse {
    /// Hour the conditions were measured for.
    pub date_time: DateTime<Utc>,
    /// Pollutant concentrations.
    #[serde(default)]
    pub pollutants: Vec<Pollutant>,
    /// Universal and local index values.
    #[serde(default)]
    pub indexes: Vec<AirQualityIndex>,
    /// Population group to recommendation text. Values are kept as raw JSON
    /// so non-string entries can be filtered out downstream.
    #[serde(default)]
    pub health_recommendations: BTreeMap<String, serde_json::Value>,
}

impl AirQualityResponse {
    /// Returns the concentration reported for `code`, if present. When a code
    /// appears more than once the last entry wins.
    #[must_use]
    pub fn concentration(&self, code: PollutantCode) -> Option<f64> {
        self.pollutants
            .iter()
            .rev()
            .filter(|p| p.code.parse::<PollutantCode>().is_ok_and(|c| c == code))
            .find_map(|p| p.concentration.map(|c| c.value))
    }

    /// Returns the health recommendations whose value is a non-blank string.
    #[must_use]
    pub fn text_recommendations(&self) -> BTreeMap<String, String> {
        self.health_recommendations
            .iter()
            .filter_map(|(group, value)| {
                value
                    .as_str()
                    .filter(|text| !text.trim().is_empty())
                    .map(|text| (group.clone(), text.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AirQualityResponse {
        serde_json::from_value(serde_json::json!({
            "dateTime": "2025-03-01T10:00:00Z",
            "regionCode": "gb",
            "indexes": [
                {
                    "code": "uaqi",
                    "displayName": "Universal AQI",
                    "aqi": 71,
                    "aqiDisplay": "71",
                    "color": {"red": 0.3, "green": 0.8, "blue": 0.2},
                    "category": "Good air quality",
                    "dominantPollutant": "o3"
                },
                {
                    "code": "gbr_defra",
                    "aqi": 2,
                    "color": {"green": 1.0},
                    "category": "Low air pollution",
                    "dominantPollutant": "no2"
                }
            ],
            "pollutants": [
                {"code": "pm25", "concentration": {"value": 4.12, "units": "MICROGRAMS_PER_CUBIC_METER"}},
                {"code": "no2", "concentration": {"value": 11.4, "units": "PARTS_PER_BILLION"}},
                {"code": "nh3", "concentration": {"value": 1.0, "units": "PARTS_PER_BILLION"}}
            ],
            "healthRecommendations": {
                "generalPopulation": "Enjoy outdoor activities.",
                "elderly": "   ",
                "athletes": 42
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_lookup_response() {
        let response = sample();
        assert_eq!(response.date_time.to_rfc3339(), "2025-03-01T10:00:00+00:00");
        assert_eq!(response.indexes.len(), 2);
        assert_eq!(response.indexes[0].aqi, Some(71));
        assert_eq!(response.indexes[1].color.red, None);
        assert_eq!(response.indexes[1].dominant_pollutant, "no2");
    }

    #[test]
    fn looks_up_known_concentrations_only() {
        let response = sample();
        assert_eq!(response.concentration(PollutantCode::Pm25), Some(4.12));
        assert_eq!(response.concentration(PollutantCode::No2), Some(11.4));
        assert_eq!(response.concentration(PollutantCode::Co), None);
    }

    #[test]
    fn keeps_only_non_blank_string_recommendations() {
        let recs = sample().text_recommendations();
        assert_eq!(recs.len(), 1);
        assert_eq!(
            recs.get("generalPopulation").map(String::as_str),
            Some("Enjoy outdoor activities.")
        );
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let response: AirQualityResponse =
            serde_json::from_str(r#"{"dateTime": "2025-03-01T10:00:00Z"}"#).unwrap();
        assert!(response.pollutants.is_empty());
        assert!(response.indexes.is_empty());
        assert!(response.text_recommendations().is_empty());
    }

    #[test]
    fn serializes_lookup_request_in_camel_case() {
        let body = serde_json::to_value(LookupRequest::for_location(51.5, -0.12)).unwrap();
        assert_eq!(body["universalAqi"], true);
        assert_eq!(body["location"]["latitude"], 51.5);
        assert_eq!(body["languageCode"], "en");
        assert_eq!(body["extraComputations"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn parses_pollutant_codes() {
        assert_eq!("pm25".parse::<PollutantCode>().unwrap(), PollutantCode::Pm25);
        assert_eq!(PollutantCode::So2.as_ref(), "so2");
        assert!("nh3".parse::<PollutantCode>().is_err());
    }
}
