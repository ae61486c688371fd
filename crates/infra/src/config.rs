//! Engine configuration loaded from the environment.

use thiserror::Error;

pub const MAX_BATCH_SIZE_VAR: &str = "PRODLINE_MAX_BATCH_SIZE";
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer (got {value:?})")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on members of one batch command (remove/restore/reorder/replace).
    pub max_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl EngineConfig {
    /// Read `PRODLINE_MAX_BATCH_SIZE`, falling back to defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(MAX_BATCH_SIZE_VAR) {
            config.max_batch_size = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        var: MAX_BATCH_SIZE_VAR,
                        value: raw,
                    });
                }
            };
        }
        Ok(config)
    }
}
