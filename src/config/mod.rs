//! Application configuration.
//!
//! Only the debug switch lives here for now. It is read once at startup and
//! handed to whatever needs it; nothing re-reads it while the process runs.

use serde::Deserialize;
use thiserror::Error;

/// Environment variable consulted by [`Config::from_env`].
pub const DEBUG_ENV: &str = "APP_DEBUG";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {name} is not valid unicode")]
    Env { name: &'static str },

    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Application configuration.
///
/// # Examples
///
/// ```
/// use querylog::config::Config;
///
/// let config = Config::from_json(r#"{ "debug": true }"#).unwrap();
/// assert!(config.debug);
///
/// assert!(!Config::from_json("{}").unwrap().debug);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Debug mode. Enables diagnostic add-ons such as the query log.
    pub debug: bool,
}

impl Config {
    /// Reads [`DEBUG_ENV`]. `true` and `1` (any case) enable debug mode; anything
    /// else, including an unset variable, disables it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if the variable holds non-unicode data.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(DEBUG_ENV) {
            Ok(value) => Ok(Self {
                debug: parse_flag(&value),
            }),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::Env { name: DEBUG_ENV }),
        }
    }

    /// Parses a JSON document. Missing fields take their defaults; a `debug`
    /// value that is not a JSON boolean is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed JSON or mistyped fields.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value.eq_ignore_ascii_case("true") || value == "1"
}
