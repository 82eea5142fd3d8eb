use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::security::oidc::OidcConfig;
use crate::transport::RetryPolicy;

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Static client configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API base URL; request paths are joined onto it.
    pub api_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default)]
    pub cache_enabled: bool,
    /// Bounds the response cache; unbounded when absent.
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Hex SHA-256 of the role the UI requires.
    pub required_role_hash_hex: String,
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
}

impl ClientConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("reading config file")?;
        let mut cfg: ClientConfig = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Builds the config from the environment alone.
    ///
    /// Environment variables:
    /// - `API_URL`: API base URL (required)
    /// - `ROLE_HASH`: required role hash (required)
    /// - `MAX_RETRIES`, `BASE_DELAY_MS`, `CACHE_ENABLED`: optional tuning
    /// - `AUTH_AUTHORITY`, `AUTH_CLIENT_ID`, `AUTH_REDIRECT_URI`: OIDC client
    pub fn from_env() -> Result<Self> {
        let api_url = std::env::var("API_URL").context("API_URL is not set")?;
        let required_role_hash_hex = std::env::var("ROLE_HASH").context("ROLE_HASH is not set")?;
        let mut cfg = Self {
            api_url,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            cache_enabled: false,
            cache_capacity: None,
            request_timeout_secs: default_request_timeout_secs(),
            required_role_hash_hex,
            oidc: None,
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("API_URL") {
            self.api_url = url;
        }
        if let Ok(hash) = std::env::var("ROLE_HASH") {
            self.required_role_hash_hex = hash;
        }
        if let Some(n) = env_parse::<u32>("MAX_RETRIES") {
            self.max_retries = n;
        }
        if let Some(ms) = env_parse::<u64>("BASE_DELAY_MS") {
            self.base_delay_ms = ms;
        }
        if let Some(enabled) = env_parse::<bool>("CACHE_ENABLED") {
            self.cache_enabled = enabled;
        }

        let authority = std::env::var("AUTH_AUTHORITY").ok();
        let client_id = std::env::var("AUTH_CLIENT_ID").ok();
        let redirect_uri = std::env::var("AUTH_REDIRECT_URI").ok();
        match (authority, client_id, redirect_uri, self.oidc.as_mut()) {
            (Some(authority), Some(client_id), Some(redirect_uri), _) => {
                self.oidc = Some(OidcConfig {
                    authority,
                    client_id,
                    redirect_uri,
                });
            }
            (authority, client_id, redirect_uri, Some(oidc)) => {
                if let Some(v) = authority {
                    oidc.authority = v;
                }
                if let Some(v) = client_id {
                    oidc.client_id = v;
                }
                if let Some(v) = redirect_uri {
                    oidc.redirect_uri = v;
                }
            }
            _ => {}
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `api_url` joined with `path`, tolerating slashes on either side.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
