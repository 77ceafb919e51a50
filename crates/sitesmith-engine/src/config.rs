use std::env;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::retry::RetryPolicy;

pub const DEFAULT_PLACEHOLDER_IMAGE: &str =
    "https://placehold.co/1200x800/png?text=Image+unavailable";
pub const DEFAULT_CATEGORY: &str = "uncategorized";
pub const DEFAULT_OWNER_ID: &str = "local";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Stored for any slot whose generation failed.
    pub placeholder_image: String,
    pub retry: RetryPolicy,
    /// Category used for generated products when no known category exists.
    pub default_category: String,
    /// Catalog owner that generated products are created under.
    pub owner_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholder_image: DEFAULT_PLACEHOLDER_IMAGE.to_string(),
            retry: RetryPolicy::default(),
            default_category: DEFAULT_CATEGORY.to_string(),
            owner_id: DEFAULT_OWNER_ID.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn with_placeholder(mut self, placeholder_image: impl Into<String>) -> Self {
        self.placeholder_image = placeholder_image.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides from a JSON options map: `placeholder_image`,
    /// `load_attempts`, `retry_backoff` (seconds), `default_category`,
    /// `owner_id`. Numbers may be given as strings.
    pub fn from_options(options: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        if let Some(value) = option_text(options.get("placeholder_image")) {
            config.placeholder_image = value;
        }
        if let Some(value) = option_text(options.get("default_category")) {
            config.default_category = value;
        }
        if let Some(value) = option_text(options.get("owner_id")) {
            config.owner_id = value;
        }
        config.retry = RetryPolicy {
            max_attempts: value_as_f64(
                options.get("load_attempts"),
                config.retry.max_attempts as f64,
                1.0,
                10.0,
            )
            .round() as usize,
            base_delay: Duration::from_secs_f64(value_as_f64(
                options.get("retry_backoff"),
                config.retry.base_delay.as_secs_f64(),
                0.0,
                30.0,
            )),
        };
        config
    }

    /// Same keys as [`EngineConfig::from_options`], read from
    /// `SITESMITH_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Map::new();
        for (key, var) in [
            ("placeholder_image", "SITESMITH_PLACEHOLDER_IMAGE"),
            ("load_attempts", "SITESMITH_LOAD_ATTEMPTS"),
            ("retry_backoff", "SITESMITH_RETRY_BACKOFF"),
            ("default_category", "SITESMITH_DEFAULT_CATEGORY"),
            ("owner_id", "SITESMITH_OWNER_ID"),
        ] {
            if let Some(value) = non_empty_env(var) {
                options.insert(key.to_string(), Value::String(value));
            }
        }
        Self::from_options(&options)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn value_as_f64(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

fn option_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
