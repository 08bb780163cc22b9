// API models and data fetching for the MBTA (Massachusetts Bay Transportation Authority) V3 API
// MBTA developer portal: https://www.mbta.com/developers/v3-api
//
// MBTA API Endpoints:
// - Predictions: https://api-v3.mbta.com/predictions
//   filter[stop], filter[route], sort=departure_time, header x-api-key

use chrono::{TimeZone, Utc};
use chrono_tz::America::New_York;
use reqwest::StatusCode;
use reqwest::blocking;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionsResponse {
    /// Kept untyped so one malformed element does not sink the whole batch.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPrediction {
    pub attributes: PredictionAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionAttributes {
    /// ISO 8601 with offset, e.g. `2025-03-01T14:05:00-05:00`. Absent or null
    /// for stops where the vehicle terminates.
    #[serde(default)]
    pub departure_time: Option<String>,
    /// An absent key reads as direction 0. Null or anything that is not an
    /// integer stays `None`.
    #[serde(default = "default_direction_id", deserialize_with = "lenient_direction_id")]
    pub direction_id: Option<i64>,
}

fn default_direction_id() -> Option<i64> {
    Some(0)
}

fn lenient_direction_id<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_i64())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Error, Debug)]
pub enum MbtaError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API returned status {status} for stop {stop_id:?} route {route_id:?}")]
    StatusError {
        status: u16,
        stop_id: String,
        route_id: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("State error: {0}")]
    StateError(String),
}

pub type Result<T> = std::result::Result<T, MbtaError>;

// ============================================================================
// Prediction Fetching
// ============================================================================

/// Anything that can answer "which predictions exist for this stop on this route".
pub trait PredictionSource {
    fn get_predictions(&self, stop_id: &str, route_id: &str) -> Result<Vec<RawPrediction>>;
}

pub struct MbtaClient {
    client: blocking::Client,
    api_url: String,
    api_key: Option<String>,
}

impl MbtaClient {
    pub const DEFAULT_API_URL: &'static str = "https://api-v3.mbta.com/predictions";

    /// Builds a blocking client with the library's default timeout. Must be
    /// called from a thread that is allowed to block.
    pub fn new(api_url: &str, api_key: Option<&str>) -> Result<Self> {
        let client = blocking::Client::builder()
            .build()
            .map_err(|e| MbtaError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(MbtaClient {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.map(String::from),
        })
    }

    fn prediction_request(&self, stop_id: &str, route_id: &str) -> Result<blocking::Request> {
        let mut request = self.client.get(&self.api_url).query(&[
            ("filter[stop]", stop_id),
            ("filter[route]", route_id),
            ("sort", "departure_time"),
        ]);

        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        request
            .build()
            .map_err(|e| MbtaError::NetworkError(format!("Failed to build request: {}", e)))
    }
}

impl PredictionSource for MbtaClient {
    fn get_predictions(&self, stop_id: &str, route_id: &str) -> Result<Vec<RawPrediction>> {
        let request = self.prediction_request(stop_id, route_id)?;
        log::debug!("GET {}", request.url());

        let response = self.client.execute(request).map_err(|e| {
            MbtaError::NetworkError(format!(
                "Failed to fetch predictions for {}/{}: {}",
                stop_id, route_id, e
            ))
        })?;

        if response.status() != StatusCode::OK {
            return Err(MbtaError::StatusError {
                status: response.status().as_u16(),
                stop_id: stop_id.to_string(),
                route_id: route_id.to_string(),
            });
        }

        let body = response
            .text()
            .map_err(|e| MbtaError::NetworkError(format!("Failed to read response: {}", e)))?;

        decode_predictions(&body)
    }
}

/// Fails only when the body itself is not a JSON object; elements that do not
/// look like predictions are skipped one by one.
pub fn decode_predictions(body: &str) -> Result<Vec<RawPrediction>> {
    let parsed: PredictionsResponse = serde_json::from_str(body)
        .map_err(|e| MbtaError::ParseError(format!("Invalid JSON response: {}", e)))?;

    let predictions = parsed
        .data
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawPrediction>(item) {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                log::debug!("Skipping malformed prediction: {}", e);
                None
            }
        })
        .collect();

    Ok(predictions)
}

// ============================================================================
// Time helpers
// ============================================================================

pub fn format_timestamp_full(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(dt) => {
            let boston_time = dt.with_timezone(&New_York);
            boston_time.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => format!("Invalid timestamp: {}", timestamp),
    }
}

pub fn get_current_timestamp() -> i64 {
    Utc::now().timestamp()
}
