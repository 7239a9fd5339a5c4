//! Provisioning configuration.
//!
//! # Responsibility
//! - Hold the tunables of the provisioning pipeline with sane defaults.
//! - Parse and validate operator-supplied JSON overrides.
//!
//! # Invariants
//! - A `ProvisioningConfig` handed to the provisioner has passed `validate()`.

use crate::model::naming::{DEFAULT_MAX_NAME_LEN, RESERVED_PREFIX};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Priority of generated view fragments.
pub const DEFAULT_FRAGMENT_PRIORITY: i64 = 100;

static CONTEXT_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid context key regex"));

/// Tunables of the provisioning pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Upper bound on derived physical names, prefix included.
    pub max_name_len: usize,
    /// Priority stamped on every generated fragment.
    pub fragment_priority: i64,
    /// `created_by` used when a request names no actor.
    pub default_actor: String,
    /// View context key compared against an attribute's scope.
    pub scope_context_key: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            fragment_priority: DEFAULT_FRAGMENT_PRIORITY,
            default_actor: "system".to_string(),
            scope_context_key: "default_scope_id".to_string(),
        }
    }
}

impl ProvisioningConfig {
    /// Parses a JSON document; missing keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Prefix plus at least one body character.
        let min_len = RESERVED_PREFIX.len() + 1;
        if self.max_name_len < min_len {
            return Err(ConfigError::Invalid(format!(
                "max_name_len must be at least {min_len}, got {}",
                self.max_name_len
            )));
        }
        if self.fragment_priority < 0 {
            return Err(ConfigError::Invalid(format!(
                "fragment_priority must not be negative, got {}",
                self.fragment_priority
            )));
        }
        if self.default_actor.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_actor must not be blank".to_string(),
            ));
        }
        if !CONTEXT_KEY_RE.is_match(&self.scope_context_key) {
            return Err(ConfigError::Invalid(format!(
                "scope_context_key `{}` must match [a-z][a-z0-9_]*",
                self.scope_context_key
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "failed to parse provisioning config: {message}"),
            Self::Invalid(message) => write!(f, "invalid provisioning config: {message}"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ProvisioningConfig};

    #[test]
    fn defaults_are_valid() {
        let config = ProvisioningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fragment_priority, 100);
        assert_eq!(config.max_name_len, 63);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ProvisioningConfig::from_json_str(r#"{"fragment_priority": 40}"#).unwrap();
        assert_eq!(config.fragment_priority, 40);
        assert_eq!(config.default_actor, "system");
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(
            ProvisioningConfig::from_json_str(r#"{"prefix": "y_"}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ProvisioningConfig::from_json_str(r#"{"max_name_len": 2}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ProvisioningConfig::from_json_str(r#"{"scope_context_key": "Bad Key"}"#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
