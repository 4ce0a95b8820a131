//! Typed configuration from environment variables.
//!
//! Loads once at startup. Command-line flags override what is read here.

use crate::error::{Error, Result};

/// Endpoint the producer serves its event stream on by default.
pub const DEFAULT_EVENTS_URL: &str = "http://localhost:8000/events";

#[derive(Debug, Clone)]
pub struct Config {
    pub events_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let events_url = std::env::var("FLOWWATCH_EVENTS_URL")
            .unwrap_or_else(|_| DEFAULT_EVENTS_URL.to_string());
        if events_url.trim().is_empty() {
            return Err(Error::Config("FLOWWATCH_EVENTS_URL is set but empty".to_string()));
        }

        Ok(Self {
            events_url,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
