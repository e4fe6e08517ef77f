//! Configuration for the two backend services.
//!
//! Read from a TOML file (default `./config/crop.toml`). Every section is
//! optional and falls back to local development addresses:
//!
//! ```toml
//! [crop]
//! base_url = "http://localhost:8000"
//! timeout_secs = 30
//!
//! [expert]
//! base_url = "http://localhost:8000/api"
//! stream_framing = "event_stream"
//!
//! [auth]
//! token_env = "CROP_ADVISOR_TOKEN"
//! ```
//!
//! After parsing, `CROP_API_URL` and `MESA_API_URL` (or the older
//! `NEXT_PUBLIC_MESA_API_URL`) override the base addresses.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::stream::StreamFraming;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub crop: CropServiceConfig,
    #[serde(default)]
    pub expert: ExpertServiceConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CropServiceConfig {
    #[serde(default = "default_crop_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub requires_auth: bool,
}

impl Default for CropServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_crop_url(),
            timeout_secs: default_timeout_secs(),
            requires_auth: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpertServiceConfig {
    #[serde(default = "default_expert_url")]
    pub base_url: String,
    #[serde(default = "default_expert_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub stream_framing: StreamFraming,
}

impl Default for ExpertServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_expert_url(),
            timeout_secs: default_expert_timeout_secs(),
            requires_auth: false,
            stream_framing: StreamFraming::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
        }
    }
}

fn default_crop_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_expert_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
// Chat replies are generated by a language model and can take a while.
fn default_expert_timeout_secs() -> u64 {
    120
}
fn default_token_env() -> String {
    "CROP_ADVISOR_TOKEN".to_string()
}

/// Load and validate the configuration file, then apply environment
/// overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }
    tracing::debug!(path = %path.display(), "config file not found, using defaults");
    let mut config = Config::default();
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Replace base addresses from the environment. `lookup` resolves a
/// variable name to its value.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("CROP_API_URL") {
        config.crop.base_url = url;
    }
    if let Some(url) = non_empty("MESA_API_URL").or_else(|| non_empty("NEXT_PUBLIC_MESA_API_URL")) {
        config.expert.base_url = url;
    }
}

pub fn validate(config: &Config) -> Result<()> {
    check_base_url("crop.base_url", &config.crop.base_url)?;
    check_base_url("expert.base_url", &config.expert.base_url)?;

    if config.crop.timeout_secs == 0 {
        bail!("crop.timeout_secs must be > 0");
    }
    if config.expert.timeout_secs == 0 {
        bail!("expert.timeout_secs must be > 0");
    }
    if config.auth.token_env.trim().is_empty() {
        bail!("auth.token_env must not be empty");
    }
    Ok(())
}

fn check_base_url(key: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .with_context(|| format!("{} is not a valid URL: '{}'", key, value))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => bail!("{} must use http or https, got '{}'", key, other),
    }
}
