//! Tunables for both jobs, optionally read from a TOML file.
//!
//! Every field has a default, so a file only needs the values it changes:
//!
//! ```toml
//! [enrich]
//! checkpoint_every = 50
//! ```

use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub enrich: EnrichSettings,
    pub matcher: MatcherSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            endpoint: "https://power.larc.nasa.gov/api/temporal/climatology/point".to_string(),
            timeout_secs: 25,
            user_agent: "Colombia-HSP-Builder/1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichSettings {
    pub max_attempts: u32,
    pub base_sleep_ms: u64,
    pub jitter_sleep_ms: u64,
    pub backoff_exponent: f64,
    pub checkpoint_every: usize,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        EnrichSettings {
            max_attempts: 5,
            base_sleep_ms: 350,
            jitter_sleep_ms: 250,
            backoff_exponent: 1.3,
            checkpoint_every: 25,
        }
    }
}

impl EnrichSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_millis(self.base_sleep_ms),
            jitter: Duration::from_millis(self.jitter_sleep_ms),
            exponent: self.backoff_exponent,
        }
    }

    /// Pause applied after every record that reached the network.
    pub fn throttle(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.base_sleep_ms),
            Duration::from_millis(self.jitter_sleep_ms),
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatcherSettings {
    pub fuzzy_threshold: Option<f64>,
}

impl Settings {
    /// Defaults, overlaid with the file at `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file `{}`", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("Invalid config file `{}`", path.display()))?
            }
            None => Settings::default(),
        };

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.enrich.max_attempts == 0 {
            bail!("enrich.max_attempts must be at least 1");
        }
        if self.enrich.checkpoint_every == 0 {
            bail!("enrich.checkpoint_every must be at least 1");
        }
        if !(self.enrich.backoff_exponent.is_finite() && self.enrich.backoff_exponent >= 0.0) {
            bail!("enrich.backoff_exponent must be a non-negative number");
        }
        if self.api.timeout_secs == 0 {
            bail!("api.timeout_secs must be at least 1");
        }
        validate_threshold(self.matcher.fuzzy_threshold)?;

        Ok(())
    }
}

pub fn validate_threshold(threshold: Option<f64>) -> Result<()> {
    match threshold {
        Some(t) if !(t > 0.0 && t <= 1.0) => bail!("fuzzy threshold must be in (0, 1], got {t}"),
        _ => Ok(()),
    }
}

// -- Tests -------------------------------------------------------------------
