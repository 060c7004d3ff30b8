use std::env;
use std::path::PathBuf;

use chrono::{Datelike, Local};
use thiserror::Error;

pub const DEFAULT_HISTORY_ACTOR: &str = "Dr. Roberto Sánchez";
pub const DEFAULT_PREVIEW_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub log_filter: String,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Workspace opened at start-up, before any `workspace.select`.
    pub workspace: Option<PathBuf>,
    pub history_actor: String,
    /// Fallback semester year; the current calendar year when unset.
    pub default_year: Option<i64>,
    pub preview_limit: usize,
    pub telemetry: TelemetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace: None,
            history_actor: DEFAULT_HISTORY_ACTOR.to_string(),
            default_year: None,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            telemetry: TelemetrySettings {
                log_filter: "info".to_string(),
                json: false,
            },
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let default_year = match get("ROSTERD_DEFAULT_YEAR") {
            Some(value) => Some(parse_year("ROSTERD_DEFAULT_YEAR", value)?),
            None => None,
        };
        let preview_limit = match get("ROSTERD_PREVIEW_LIMIT") {
            Some(value) => parse_limit("ROSTERD_PREVIEW_LIMIT", value)?,
            None => DEFAULT_PREVIEW_LIMIT,
        };
        let log_filter = get("ROSTERD_LOG")
            .or_else(|| get("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());
        let json = get("ROSTERD_LOG_JSON")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        Ok(Self {
            workspace: get("ROSTERD_WORKSPACE").map(PathBuf::from),
            history_actor: get("ROSTERD_HISTORY_ACTOR")
                .unwrap_or_else(|| DEFAULT_HISTORY_ACTOR.to_string()),
            default_year,
            preview_limit,
            telemetry: TelemetrySettings { log_filter, json },
        })
    }

    pub fn default_year(&self) -> i64 {
        self.default_year
            .unwrap_or_else(|| i64::from(Local::now().year()))
    }
}

fn parse_year(field: &'static str, value: String) -> Result<i64, ConfigError> {
    match value.parse::<i64>() {
        Ok(year) if (1900..=9999).contains(&year) => Ok(year),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_limit(field: &'static str, value: String) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}
