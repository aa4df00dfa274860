use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::backend::push::derive_push_url;
use crate::engine::EngineSettings;

const CANDIDATES: [&str; 4] = [
    "pipepulse.toml",
    "pipepulse.json",
    "pipepulse.yaml",
    "pipepulse.yml",
];

/// Configuration file structure for PipePulse.
///
/// Every section is optional; missing keys fall back to the defaults below
/// and CLI flags override whatever the file sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendConfig {
    /// Dashboard backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Push channel endpoint; derived from `base-url` when absent
    pub push_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Builds fetched per pipeline each cycle
    #[serde(default = "default_build_limit")]
    pub build_limit: usize,

    #[serde(default = "default_interval_secs")]
    pub node_health_interval_secs: u64,

    /// How long an error banner stays visible
    #[serde(default = "default_banner_ttl_secs")]
    pub banner_ttl_secs: u64,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AlertsConfig {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            push_url: None,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            build_limit: default_build_limit(),
            node_health_interval_secs: default_interval_secs(),
            banner_ttl_secs: default_banner_ttl_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_build_limit() -> usize {
    50
}

fn default_banner_ttl_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    1
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_max_active() -> usize {
    10
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipepulse.toml, ./pipepulse.json, ./pipepulse.yaml, ./pipepulse.yml
    /// 3. `<user config dir>/pipepulse/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        if let Some(found) = Self::find_in(Path::new(".")) {
            return Self::load_from_path(&found);
        }

        if let Some(user_config) = Self::user_config_path().filter(|p| p.exists()) {
            return Self::load_from_path(&user_config);
        }

        Ok(Self::default())
    }

    fn find_in(dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.exists())
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pipepulse").join("config.toml"))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Push endpoint, explicit or derived from the backend base URL.
    pub fn push_url(&self) -> Result<Url> {
        match &self.backend.push_url {
            Some(explicit) => Url::parse(explicit)
                .with_context(|| format!("Invalid push URL: {explicit}")),
            None => {
                let mut base = Url::parse(&self.backend.base_url)
                    .with_context(|| format!("Invalid backend URL: {}", self.backend.base_url))?;
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                Ok(derive_push_url(&base)?)
            }
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            build_limit: self.refresh.build_limit,
            banner_ttl: Duration::from_secs(self.refresh.banner_ttl_secs),
            max_active_alerts: self.alerts.max_active,
        }
    }
}
