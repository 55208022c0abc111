//! Client for the NASA POWER climatology endpoint.
//!
//! See <https://power.larc.nasa.gov/docs/services/api/temporal/climatology/>
//! for the response format.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{config::ApiSettings, error::FetchError};

pub const PARAMETER: &str = "ALLSKY_SFC_SW_DWN";
pub const COMMUNITY: &str = "RE";

/// Monthly values at or above this magnitude are treated as garbage.
const SANITY_LIMIT: f64 = 1e6;
/// POWER's "no data" marker.
const FILL_VALUE: f64 = -999.0;
/// Fewest valid monthly values an annual mean is computed from.
pub const MIN_MONTHS: usize = 10;

/// Anything that can produce a peak sun hours value for a location.
#[async_trait]
pub trait IrradianceSource {
    async fn annual_hsp(&self, lat: f64, lon: f64) -> Result<f64, FetchError>;
}

pub struct PowerClient {
    client: reqwest::Client,
    endpoint: String,
}

impl PowerClient {
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()
            .context("Could not build HTTP client")?;

        Ok(PowerClient {
            client,
            endpoint: settings.endpoint.clone(),
        })
    }

    async fn climatology(&self, lat: f64, lon: f64) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("parameters", PARAMETER.to_string()),
                ("community", COMMUNITY.to_string()),
                ("longitude", lon.to_string()),
                ("latitude", lat.to_string()),
                ("format", "JSON".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IrradianceSource for PowerClient {
    async fn annual_hsp(&self, lat: f64, lon: f64) -> Result<f64, FetchError> {
        let body = self.climatology(lat, lon).await?;

        annual_mean(monthly_values(&body)?)
    }
}

/// The `month -> value` mapping nested under `properties.parameter`.
pub fn monthly_values(body: &Value) -> Result<&Map<String, Value>, FetchError> {
    body.pointer(&format!("/properties/parameter/{PARAMETER}"))
        .and_then(Value::as_object)
        .filter(|values| !values.is_empty())
        .ok_or(FetchError::MissingParameter(PARAMETER))
}

/// Mean of the valid entries, in kWh/m²/day.
pub fn annual_mean(values: &Map<String, Value>) -> Result<f64, FetchError> {
    let valid: Vec<f64> = values
        .values()
        .filter_map(Value::as_f64)
        .filter(|v| v.is_finite() && v.abs() < SANITY_LIMIT && *v != FILL_VALUE)
        .collect();

    if valid.len() < MIN_MONTHS {
        return Err(FetchError::InsufficientData {
            found: valid.len(),
            required: MIN_MONTHS,
        });
    }

    Ok(valid.iter().sum::<f64>() / valid.len() as f64)
}

// -- Tests -------------------------------------------------------------------
