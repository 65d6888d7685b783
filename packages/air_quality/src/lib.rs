#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Air Quality API client.
//!
//! The ingestion pipeline talks to the external lookup service only through
//! the [`AirQualityLookup`] trait, so the HTTP client in [`google`] can be
//! swapped for an in-memory fake in tests. [`retry`] wraps a single lookup
//! with bounded, rate-limit aware exponential backoff.

pub mod google;
pub mod progress;
pub mod retry;

use airviz_air_quality_models::AirQualityResponse;
use async_trait::async_trait;

/// Errors that can occur while looking up air-quality conditions.
#[derive(Debug, thiserror::Error)]
pub enum AirQualityError {
    /// HTTP transport failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("Air Quality API error (HTTP {status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body, which usually carries the API's error message.
        body: String,
    },

    /// The response body was not the expected JSON shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AirQualityError {
    /// Returns `true` for rate-limit responses and socket-level transport
    /// failures. Everything else (bad request, auth failure, malformed body)
    /// is fatal and must not be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => is_socket_error(e),
            Self::Api { status, body } => *status == 429 || mentions_rate_limit(body),
            Self::Json(_) => false,
        }
    }
}

fn mentions_rate_limit(body: &str) -> bool {
    body.to_ascii_lowercase().contains("rate limit") || body.contains("429")
}

fn is_socket_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
}

/// A source of current air-quality conditions for a coordinate.
#[async_trait]
pub trait AirQualityLookup: Send + Sync {
    /// Looks up current conditions at `(latitude, longitude)`.
    ///
    /// # Errors
    ///
    /// Returns [`AirQualityError`] if the request fails, the API returns a
    /// non-2xx status, or the body cannot be decoded.
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQualityResponse, AirQualityError>;
}
