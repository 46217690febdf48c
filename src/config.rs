//! Workspace configuration stored in `.verifier/config.yaml`.
//!
//! Values come from three layers, later ones winning: built-in defaults, the
//! YAML file, and environment variables (optionally seeded from
//! `.verifier/.env`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory holding all verifier state, relative to the working tree root
pub const VERIFIER_DIR: &str = ".verifier";
const CONFIG_FILE: &str = "config.yaml";
const ENV_FILE: &str = ".env";
const ARTIFACTS_DIR: &str = "artifacts";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "verifier.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: Models,
    pub providers: Providers,
    pub budgets: Budgets,
    pub thresholds: Thresholds,
    /// Hook name to the ordered agent ids it runs
    pub hooks: BTreeMap<String, Vec<String>>,
    /// Working tree root the configuration was loaded from
    #[serde(skip)]
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Models {
    pub primary: String,
    pub fallback: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Providers {
    pub openai: ProviderApiKey,
    pub anthropic: ProviderApiKey,
    /// Request timeout applied to provider HTTP calls
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderApiKey {
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Budgets {
    pub daily_tokens: u64,
    pub per_commit_tokens: u64,
    pub monthly_cost: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub drift_score: i64,
    pub security_risk: i64,
    pub coverage_delta: i64,
}

impl Default for Config {
    fn default() -> Self {
        let mut hooks = BTreeMap::new();
        hooks.insert(
            "pre-commit".to_string(),
            vec!["lint".to_string(), "security-scan".to_string()],
        );
        Self {
            models: Models::default(),
            providers: Providers::default(),
            budgets: Budgets::default(),
            thresholds: Thresholds::default(),
            hooks,
            root: PathBuf::from("."),
        }
    }
}

impl Default for Models {
    fn default() -> Self {
        Self {
            primary: "claude-3-5-sonnet-20240620".to_string(),
            fallback: "claude-3-haiku-20240307".to_string(),
        }
    }
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            openai: ProviderApiKey::default(),
            anthropic: ProviderApiKey::default(),
            timeout_secs: 120,
        }
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            daily_tokens: 100_000,
            per_commit_tokens: 5_000,
            monthly_cost: 100,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            drift_score: 30,
            security_risk: 5,
            coverage_delta: -5,
        }
    }
}

impl Config {
    /// Load configuration for the working tree at `root`.
    ///
    /// A missing config file yields the defaults; a malformed one is an error.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        // `.env` is optional and never overrides variables already set.
        let _ = dotenvy::from_path(Self::env_path(root));

        let path = Self::config_path(root);
        let mut config = match fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Config::default(),
            Ok(content) => serde_yaml::from_str(&content)
                .map_err(|source| ConfigError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Config::default(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        config.root = root.to_path_buf();
        config.apply_env(|key| env::var(key).ok())?;

        tracing::debug!(
            root = %root.display(),
            daily_tokens = config.budgets.daily_tokens,
            model = %config.models.primary,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Writes the configuration to `.verifier/config.yaml` under `root`
    pub fn save(&self, root: &Path) -> Result<(), ConfigError> {
        let dir = root.join(VERIFIER_DIR);
        fs::create_dir_all(&dir).map_err(|source| ConfigError::Io {
            path: dir.clone(),
            source,
        })?;

        let content = serde_yaml::to_string(self).map_err(ConfigError::Serialize)?;
        let path = Self::config_path(root);
        fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
    }

    /// Applies environment overrides using `lookup` to read variables
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("VERIFIER_MODELS_PRIMARY") {
            self.models.primary = model;
        }
        if let Some(raw) = lookup("VERIFIER_BUDGETS_DAILY_TOKENS") {
            self.budgets.daily_tokens = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "VERIFIER_BUDGETS_DAILY_TOKENS".to_string(),
                value: raw.clone(),
            })?;
        }
        if let Some(key) = lookup("VERIFIER_PROVIDERS_OPENAI_API_KEY") {
            self.providers.openai.api_key = key;
        }
        if let Some(key) = lookup("VERIFIER_PROVIDERS_ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = key;
        }

        if self.providers.openai.api_key.is_empty() {
            self.providers.openai.api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        }
        if self.providers.anthropic.api_key.is_empty() {
            self.providers.anthropic.api_key = lookup("ANTHROPIC_API_KEY").unwrap_or_default();
        }
        Ok(())
    }

    pub fn has_provider_key(&self) -> bool {
        !self.providers.openai.api_key.is_empty() || !self.providers.anthropic.api_key.is_empty()
    }

    pub fn verifier_dir(&self) -> PathBuf {
        self.root.join(VERIFIER_DIR)
    }

    /// Directory agents write their reports into
    pub fn artifacts_dir(&self) -> PathBuf {
        self.verifier_dir().join(ARTIFACTS_DIR)
    }

    pub fn log_path(&self) -> PathBuf {
        Self::log_path_in(&self.root)
    }

    pub fn log_path_in(root: &Path) -> PathBuf {
        root.join(VERIFIER_DIR).join(LOGS_DIR).join(LOG_FILE)
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(VERIFIER_DIR).join(CONFIG_FILE)
    }

    pub fn env_path(root: &Path) -> PathBuf {
        root.join(VERIFIER_DIR).join(ENV_FILE)
    }
}
