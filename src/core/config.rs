//! Configuration system for blocks and models
//!
//! This module defines the config keys a block type declares, the resolution
//! of passed-in values against those declarations, and the engine-wide
//! [`Settings`] that decide how strictly mistakes are treated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::signal::Value;

/// Resolved configuration of a block instance
pub type ConfigMap = BTreeMap<String, Value>;

/// A config key declared by a block type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigDecl {
    /// Key name
    pub name: String,
    /// Default value; `None` means the key is required
    pub default: Option<Value>,
    /// Human-readable description
    pub description: String,
    /// Optional type hint (documentation only)
    pub type_hint: Option<String>,
}

impl ConfigDecl {
    /// Declare a required key
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            description: description.into(),
            type_hint: None,
        }
    }

    /// Declare a key with a default value
    pub fn with_default(
        name: impl Into<String>,
        default: impl Into<Value>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
            description: description.into(),
            type_hint: None,
        }
    }

    /// Attach a type hint
    pub fn hint(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Problems found while resolving a config map
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A key that the block type does not declare
    #[error("unknown config key {key:?}; known keys: {}", known.join(", "))]
    UnknownKey { key: String, known: Vec<String> },

    /// A required key with no value
    #[error("missing required config {key:?}")]
    MissingKey { key: String },
}

/// Resolve passed values against declarations
///
/// Passed values win over defaults. Undeclared keys are an error when
/// `strict`; otherwise they are dropped with a warning.
pub fn resolve_config(
    decls: &[ConfigDecl],
    passed: &ConfigMap,
    strict: bool,
) -> Result<ConfigMap, ConfigError> {
    for key in passed.keys() {
        if !decls.iter().any(|d| &d.name == key) {
            let known: Vec<String> = decls.iter().map(|d| d.name.clone()).collect();
            if strict {
                return Err(ConfigError::UnknownKey {
                    key: key.clone(),
                    known,
                });
            }
            tracing::warn!(key = %key, known = ?known, "ignoring undeclared config key");
        }
    }

    let mut resolved = ConfigMap::new();
    for decl in decls {
        match passed.get(&decl.name).or(decl.default.as_ref()) {
            Some(value) => {
                resolved.insert(decl.name.clone(), value.clone());
            }
            None => {
                return Err(ConfigError::MissingKey {
                    key: decl.name.clone(),
                })
            }
        }
    }
    Ok(resolved)
}

/// Engine-wide policy flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Unknown or unused config is an error (otherwise a warning)
    pub strict_config: bool,
    /// Ports used without an `input`/`output` declaration are an error
    pub strict_io: bool,
    /// Record per-block and per-edge statistics
    pub stats: bool,
    /// Number of samples kept per block and per edge
    pub stats_window: usize,
    /// Use the parse cache next to model files
    pub cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strict_config: true,
            strict_io: false,
            stats: false,
            stats_window: 256,
            cache: true,
        }
    }
}

impl Settings {
    /// Defaults overlaid with `PROCFLOW_STRICT`, `PROCFLOW_STATS` and `PROCFLOW_CACHE`
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(flag) = env_flag("PROCFLOW_STRICT") {
            settings.strict_config = flag;
        }
        if let Some(flag) = env_flag("PROCFLOW_STATS") {
            settings.stats = flag;
        }
        if let Some(flag) = env_flag("PROCFLOW_CACHE") {
            settings.cache = flag;
        }
        settings
    }

    /// Lenient variant of these settings
    pub fn lenient(mut self) -> Self {
        self.strict_config = false;
        self
    }

    /// Same settings with stats enabled
    pub fn with_stats(mut self) -> Self {
        self.stats = true;
        self
    }
}

fn env_flag(var: &str) -> Option<bool> {
    let raw = std::env::var(var).ok()?;
    parse_flag(&raw)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
