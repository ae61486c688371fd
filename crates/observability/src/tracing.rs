//! Tracing/logging initialization.
//!
//! `RUST_LOG` drives the filter (default `info`); `PRODLINE_LOG_FORMAT` picks
//! the output format.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_VAR: &str = "PRODLINE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(ObservabilityError::UnknownFormat(raw.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservabilityError {
    #[error("unknown log format {0:?} (expected json, pretty or compact)")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub format: LogFormat,
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ObservabilityError> {
        let format = match lookup(LOG_FORMAT_VAR) {
            Some(raw) => raw.parse()?,
            None => LogFormat::default(),
        };
        Ok(Self { format })
    }
}

/// Install the global subscriber.
///
/// Returns `false` when one was already installed.
pub fn init(config: ObservabilityConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let installed = match config.format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        let config = ObservabilityConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn format_is_parsed_case_insensitively() {
        let config = ObservabilityConfig::from_lookup(|_| Some(" Pretty ".to_string())).unwrap();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
    }

    #[test]
    fn unknown_format_is_an_error() {
        let err = ObservabilityConfig::from_lookup(|_| Some("xml".to_string())).unwrap_err();
        assert_eq!(err, ObservabilityError::UnknownFormat("xml".to_string()));
    }

    #[test]
    fn second_init_is_a_no_op() {
        init(ObservabilityConfig::default());
        assert!(!init(ObservabilityConfig { format: LogFormat::Compact }));
        ::tracing::info!("still logging");
    }
}
