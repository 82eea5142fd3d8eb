use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// OpenID Connect client settings (Keycloak-style realm URLs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Realm base, e.g. `https://idp.example.com/realms/weather`.
    pub authority: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl OidcConfig {
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/protocol/openid-connect/{}",
            self.authority.trim_end_matches('/'),
            path
        )
    }

    pub fn token_endpoint(&self) -> String {
        self.endpoint("token")
    }

    /// Authorization-code login URL used for interactive redirects.
    pub fn authorize_url(&self) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.endpoint("auth"),
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid profile"),
            ],
        )
        .context("building authorize url")?;
        Ok(url.to_string())
    }

    pub fn end_session_url(&self) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.endpoint("logout"),
            &[
                ("client_id", self.client_id.as_str()),
                ("post_logout_redirect_uri", self.redirect_uri.as_str()),
            ],
        )
        .context("building end-session url")?;
        Ok(url.to_string())
    }
}

/// Token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Non-interactive token renewal.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet>;
}

/// `refresh_token` grant against the realm's token endpoint.
#[derive(Debug, Clone)]
pub struct OidcRefresher {
    config: OidcConfig,
    http_client: Client,
}

impl OidcRefresher {
    pub fn new(config: OidcConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("creating HTTP client")?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl TokenRefresher for OidcRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let url = self.config.token_endpoint();
        debug!(url = %url, client_id = %self.config.client_id, "refreshing access token");

        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .context("sending token refresh request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "token refresh failed with status {}: {}",
                status,
                body
            ));
        }

        response
            .json::<TokenSet>()
            .await
            .context("parsing token response")
    }
}
