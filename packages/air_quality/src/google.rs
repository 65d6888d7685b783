//! Google Air Quality `currentConditions:lookup` client.
//!
//! See <https://developers.google.com/maps/documentation/air-quality/current-conditions>

use airviz_air_quality_models::{AirQualityResponse, LookupRequest};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::{AirQualityError, AirQualityLookup};

/// Production endpoint of the Air Quality API.
pub const DEFAULT_BASE_URL: &str = "https://airquality.googleapis.com/v1";

/// Header carrying the API key. The key never goes in the URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// HTTP client for the Google Air Quality API.
pub struct GoogleAirQualityClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl GoogleAirQualityClient {
    /// Creates a client for the production endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AirQualityError::Http`] if the HTTP client cannot be built.
    pub fn new(api_key: SecretString) -> Result<Self, AirQualityError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom endpoint (e.g. a local mock).
    ///
    /// # Errors
    ///
    /// Returns [`AirQualityError::Http`] if the HTTP client cannot be built.
    pub fn with_base_url(api_key: SecretString, base_url: &str) -> Result<Self, AirQualityError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("airviz/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn lookup_url(&self) -> String {
        format!("{}/currentConditions:lookup", self.base_url)
    }
}

#[async_trait]
impl AirQualityLookup for GoogleAirQualityClient {
    async fn lookup(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQualityResponse, AirQualityError> {
        let response = self
            .client
            .post(self.lookup_url())
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&LookupRequest::for_location(latitude, longitude))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log::debug!(
                "Air Quality API returned {status} for ({latitude}, {longitude}): {}",
                preview(&body)
            );
            return Err(AirQualityError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn preview(body: &str) -> &str {
    if body.len() <= BODY_PREVIEW_LEN {
        return body;
    }
    let mut end = BODY_PREVIEW_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
