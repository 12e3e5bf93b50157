#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Client for the external field-profile time-series service.
//!
//! One polygon ring goes out as a single-feature `FeatureCollection`;
//! an ordered array of `[timestamp_ms, raw_value]` pairs comes back and
//! is converted into [`IndexObservation`]s. Failures are per-polygon
//! soft failures — the caller logs and moves on, no retries.

use std::time::Duration;

use ndvi_profile_models::IndexObservation;
use serde::Serialize;
use thiserror::Error;

/// Default request timeout for one profile call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Default dataset identifier requested from the service.
pub const DEFAULT_DATASET: &str = "NDVI_10D_S2_GUJ";

/// Default endpoint URL of the field-profile service.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:55567/run_field_profile";

/// Errors that can occur during a profile call. All of them are soft
/// from the pipeline's perspective: the affected polygon is skipped.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Transport failure (connect, TLS, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("Profile service returned status {status}")]
    Status {
        /// HTTP status code of the response.
        status: u16,
    },

    /// The response body was not the expected array of pairs.
    #[error("Invalid profile response: {message}")]
    InvalidResponse {
        /// Description of what went wrong.
        message: String,
    },
}

/// Configuration for the profile client, passed in at construction
/// time.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// URL of the field-profile endpoint.
    pub endpoint: String,
    /// Dataset identifier sent with every request.
    pub dataset: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Skip TLS certificate verification. Off by default.
    pub accept_invalid_certs: bool,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            timeout: DEFAULT_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

impl ProfileConfig {
    /// Builds a config from `PROFILE_ENDPOINT`, `PROFILE_DATASET`,
    /// `PROFILE_TIMEOUT_SECS`, and `PROFILE_ACCEPT_INVALID_CERTS`,
    /// falling back to the defaults above.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            endpoint: std::env::var("PROFILE_ENDPOINT").unwrap_or(defaults.endpoint),
            dataset: std::env::var("PROFILE_DATASET").unwrap_or(defaults.dataset),
            timeout: std::env::var("PROFILE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map_or(defaults.timeout, Duration::from_secs),
            accept_invalid_certs: std::env::var("PROFILE_ACCEPT_INVALID_CERTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.accept_invalid_certs),
        }
    }
}

/// Request body for one profile call.
#[derive(Debug, Serialize)]
struct ProfileRequest<'a> {
    dataset: &'a str,
    geometry: serde_json::Value,
    #[serde(rename = "attributeColumn", skip_serializing_if = "Option::is_none")]
    attribute_column: Option<&'a str>,
}

/// Client for the field-profile service.
#[derive(Debug, Clone)]
pub struct ProfileClient {
    client: reqwest::Client,
    config: ProfileConfig,
}

impl ProfileClient {
    /// Builds a client from the given config.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: ProfileConfig) -> Result<Self, ProfileError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if config.accept_invalid_certs {
            log::warn!("TLS certificate verification is disabled for profile calls");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    /// Returns the configured dataset identifier.
    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.config.dataset
    }

    /// Fetches the index time series for one polygon ring.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] on transport failure, non-success
    /// status, or a body that is not an array of pairs.
    pub async fn fetch_profile(
        &self,
        ring: &[(f64, f64)],
        attribute_column: Option<&str>,
    ) -> Result<Vec<IndexObservation>, ProfileError> {
        let request = ProfileRequest {
            dataset: &self.config.dataset,
            geometry: ring_to_feature_collection(ring),
            attribute_column,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProfileError::Status {
                status: status.as_u16(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        parse_observations(&body)
    }
}

/// Wraps a polygon ring as a single-feature `FeatureCollection`, the
/// geometry shape the service expects.
#[must_use]
pub fn ring_to_feature_collection(ring: &[(f64, f64)]) -> serde_json::Value {
    let coordinates: Vec<[f64; 2]> = ring.iter().map(|&(lon, lat)| [lon, lat]).collect();

    serde_json::json!({
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [coordinates]
                },
                "properties": null
            }
        ]
    })
}

/// Parses the service's array-of-pairs body into observations.
/// Malformed entries are skipped with a warning; a non-array body is
/// an error.
///
/// # Errors
///
/// Returns [`ProfileError::InvalidResponse`] if the body is not an
/// array.
pub fn parse_observations(body: &serde_json::Value) -> Result<Vec<IndexObservation>, ProfileError> {
    let entries = body.as_array().ok_or_else(|| ProfileError::InvalidResponse {
        message: format!("expected an array, got: {body}"),
    })?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let timestamp_ms = pair.first()?.as_i64()?;
            let raw = pair.get(1)?.as_f64()?;
            IndexObservation::from_entry(timestamp_ms, raw)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_wraps_ring_as_feature_collection() {
        let request = ProfileRequest {
            dataset: "NDVI_10D_S2_GUJ",
            geometry: ring_to_feature_collection(&[(70.1, 22.3), (70.2, 22.3), (70.1, 22.4)]),
            attribute_column: Some("FieldID"),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["dataset"], "NDVI_10D_S2_GUJ");
        assert_eq!(value["attributeColumn"], "FieldID");
        assert_eq!(value["geometry"]["type"], "FeatureCollection");
        assert_eq!(
            value["geometry"]["features"][0]["geometry"]["coordinates"][0][0],
            serde_json::json!([70.1, 22.3])
        );
    }

    #[test]
    fn payload_omits_absent_attribute_column() {
        let request = ProfileRequest {
            dataset: "NDVI_10D_S2_GUJ",
            geometry: ring_to_feature_collection(&[(0.0, 0.0)]),
            attribute_column: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("attributeColumn").is_none());
    }

    #[test]
    fn parses_epoch_entry() {
        let body = serde_json::json!([[0, 250]]);
        let observations = parse_observations(&body).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].date_label(), "01-01-1970");
        assert!((observations[0].value - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn skips_malformed_entries() {
        let body = serde_json::json!([[0, 250], "noise", [1], [86_400_000, 125]]);
        let observations = parse_observations(&body).unwrap();
        assert_eq!(observations.len(), 2);
        assert!((observations[1].value - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_array_body_is_invalid() {
        let body = serde_json::json!({"error": "no data"});
        let err = parse_observations(&body).unwrap_err();
        assert!(matches!(err, ProfileError::InvalidResponse { .. }));
    }

    #[test]
    fn default_config_keeps_tls_verification() {
        let config = ProfileConfig::default();
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.timeout, Duration::from_secs(90));
    }
}
