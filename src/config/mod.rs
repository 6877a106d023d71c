//! TOML configuration with environment overrides for signing secrets.
//!
//! Lookup order for the file: `--config`, then `$KEYTURN_CONFIG`, then
//! `<config dir>/keyturn/config.toml`.

use crate::auth::Secret;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "KEYTURN_CONFIG";
pub const ACCESS_SECRET_ENV: &str = "KEYTURN_ACCESS_SECRET";
pub const REFRESH_SECRET_ENV: &str = "KEYTURN_REFRESH_SECRET";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub env: Environment,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
}

/// `[jwt]` section as written in the file. Secrets are optional here
/// because the environment may supply them.
#[derive(Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,
    pub access_token_lifetime_secs: u64,
    pub refresh_token_lifetime_secs: u64,
    #[serde(default)]
    pub access_secret: Option<String>,
    #[serde(default)]
    pub refresh_secret: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("access_token_lifetime_secs", &self.access_token_lifetime_secs)
            .field("refresh_token_lifetime_secs", &self.refresh_token_lifetime_secs)
            .field("access_secret", &self.access_secret.as_ref().map(|_| "***"))
            .field("refresh_secret", &self.refresh_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

/// Fully resolved signing configuration handed to the session service.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub access_secret: Secret,
    pub refresh_secret: Secret,
    pub access_lifetime: Duration,
    pub refresh_lifetime: Duration,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_delay_ms() -> u64 {
    1_000
}

fn default_issuer() -> String {
    "keyturn".into()
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_operation_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Resolve the config path and parse it.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_path(explicit)?;
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml(&raw)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        if config.database.pool_size == 0 {
            bail!("database.pool_size must be at least 1");
        }
        if config.gateway.operation_timeout_secs == 0 {
            bail!("gateway.operation_timeout_secs must be greater than zero");
        }
        Ok(config)
    }

    /// Signing settings with secrets taken from the process environment.
    pub fn token_settings(&self) -> Result<TokenSettings> {
        self.jwt.resolve(|key| std::env::var(key).ok())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.operation_timeout_secs)
    }
}

impl JwtConfig {
    /// Merge secrets (environment first, then file) and validate.
    pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<TokenSettings> {
        let pick = |key: &str, file: &Option<String>| {
            env(key)
                .or_else(|| file.clone())
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let Some(access) = pick(ACCESS_SECRET_ENV, &self.access_secret) else {
            bail!("Missing access token secret: set {ACCESS_SECRET_ENV} or jwt.access_secret");
        };
        let Some(refresh) = pick(REFRESH_SECRET_ENV, &self.refresh_secret) else {
            bail!("Missing refresh token secret: set {REFRESH_SECRET_ENV} or jwt.refresh_secret");
        };
        if access == refresh {
            bail!("Access and refresh secrets must differ");
        }
        if self.access_token_lifetime_secs == 0 || self.refresh_token_lifetime_secs == 0 {
            bail!("Token lifetimes must be greater than zero");
        }

        Ok(TokenSettings {
            issuer: self.issuer.clone(),
            access_secret: Secret::new(access),
            refresh_secret: Secret::new(refresh),
            access_lifetime: Duration::from_secs(self.access_token_lifetime_secs),
            refresh_lifetime: Duration::from_secs(self.refresh_token_lifetime_secs),
        })
    }
}

fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    directories::ProjectDirs::from("", "", "keyturn")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .context("Could not determine a config directory; pass --config")
}
