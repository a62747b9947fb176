//! Runtime configuration.
//!
//! Read from `<config dir>/socratic/config.json` when present, then
//! overridden by `SOCRATIC_*` environment variables. Everything has a
//! default, so no file is needed to get started.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agents::AgentSettings;
use crate::db::PoolSettings;
use crate::lifecycle::default_settle_delay;
use crate::provider::{ModelProvider, OpenAiCompatibleProvider, DEFAULT_URL};

const APP_NAME: &str = "socratic";
const CONFIG_FILE: &str = "config.json";
const DEFAULT_MODEL: &str = "llama3";

/// One model provider endpoint. Providers are tried in list order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    /// Knowledge index database. Defaults to the project database itself.
    pub index_path: Option<PathBuf>,
    pub pool: PoolSettings,
    pub agents: AgentSettings,
    /// Wait after closing handles. Platform default when unset.
    pub settle_delay_ms: Option<u64>,
    pub providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            index_path: None,
            pool: PoolSettings::default(),
            agents: AgentSettings::default(),
            settle_delay_ms: None,
            providers: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the default location and the process environment.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        Self::load_from(&path)
    }

    /// Load from `path` (defaults if it does not exist), then apply the
    /// process environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Write the configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `SOCRATIC_*` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = var("SOCRATIC_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(max) = parse_var::<usize>(&var, "SOCRATIC_POOL_MAX")? {
            self.pool.max_size = max;
        }
        if let Some(min) = parse_var::<usize>(&var, "SOCRATIC_POOL_MIN")? {
            self.pool.min_idle = min;
        }
        if let Some(ms) = parse_var::<u64>(&var, "SOCRATIC_ACQUIRE_TIMEOUT_MS")? {
            self.pool.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&var, "SOCRATIC_SETTLE_DELAY_MS")? {
            self.settle_delay_ms = Some(ms);
        }

        let api_key = var("SOCRATIC_MODEL_API_KEY");
        match var("SOCRATIC_MODEL_URL") {
            // An explicit endpoint replaces the configured provider list.
            Some(url) => {
                self.providers = vec![ProviderConfig {
                    name: "env".to_string(),
                    url,
                    model: var("SOCRATIC_MODEL_NAME").unwrap_or_else(default_model),
                    api_key,
                }];
            }
            None => {
                if let Some(first) = self.providers.first_mut() {
                    if let Some(model) = var("SOCRATIC_MODEL_NAME") {
                        first.model = model;
                    }
                    if api_key.is_some() {
                        first.api_key = api_key;
                    }
                }
            }
        }

        if self.pool.max_size == 0 {
            anyhow::bail!("pool max_size must be at least 1");
        }
        Ok(())
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.database_path.clone())
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(default_settle_delay)
    }

    /// Instantiate the configured providers, in order.
    pub fn providers(&self) -> Vec<Arc<dyn ModelProvider>> {
        self.providers
            .iter()
            .map(|p| {
                Arc::new(OpenAiCompatibleProvider::new(
                    p.name.clone(),
                    p.url.clone(),
                    p.model.clone(),
                    p.api_key.clone(),
                )) as Arc<dyn ModelProvider>
            })
            .collect()
    }
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{key} has invalid value {raw:?}"))
        })
        .transpose()
}

/// `<config dir>/socratic/config.json`.
pub fn config_path() -> Result<PathBuf> {
    let mut path =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}

/// Platform data directory, or the working directory if there is none.
fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.data_dir().join("socratic.db"))
        .unwrap_or_else(|| PathBuf::from("socratic.db"))
}
