use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, warn};

use crate::security::audit_log::AuditLogger;
use crate::security::oidc::{OidcConfig, TokenRefresher, TokenSet};

/// Snapshot of who is signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

impl Identity {
    /// Builds an identity from a token response, reading expiry, username
    /// and roles out of the access token payload. `expires_in` wins over
    /// the `exp` claim when both are present.
    pub fn from_tokens(tokens: &TokenSet, now: DateTime<Utc>) -> Self {
        let claims = decode_claims(&tokens.access_token).unwrap_or(Value::Null);

        let expires_at = tokens
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .or_else(|| {
                claims
                    .get("exp")
                    .and_then(Value::as_i64)
                    .and_then(|exp| DateTime::from_timestamp(exp, 0))
            });

        Self {
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            expires_at,
            username: claims
                .get("preferred_username")
                .and_then(Value::as_str)
                .map(String::from),
            roles: role_claims(&claims),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Decodes the (unverified) JWT payload. Signature checks belong to the API.
pub fn decode_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Role claims in token order: the `role` claim first (string or array),
/// then `realm_access.roles`. Duplicates keep their first position.
fn role_claims(claims: &Value) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    let mut push = |v: &Value| {
        if let Some(role) = v.as_str() {
            if !roles.iter().any(|r| r == role) {
                roles.push(role.to_string());
            }
        }
    };

    match claims.get("role") {
        Some(Value::Array(items)) => items.iter().for_each(&mut push),
        Some(single @ Value::String(_)) => push(single),
        _ => {}
    }
    if let Some(Value::Array(items)) = claims.pointer("/realm_access/roles") {
        items.iter().for_each(&mut push);
    }
    roles
}

/// Navigation requested by the session. The embedding app is expected to
/// act on it (open a browser, print the URL, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Login { url: Option<String> },
    Logout { url: Option<String> },
}

/// The identity session consumed by the fetch layer. Controllers only read
/// it and request actions; mutation stays inside the implementation.
#[async_trait]
pub trait AuthSession: Send + Sync {
    fn is_authenticated(&self) -> bool;
    fn access_token(&self) -> Option<String>;
    fn is_expired(&self) -> bool;
    fn role_claims(&self) -> Vec<String>;

    /// Identity change notifications.
    fn subscribe(&self) -> watch::Receiver<Identity>;

    /// Non-interactive token renewal. `true` on success.
    async fn signin_silent(&self) -> bool;
    async fn signin_redirect(&self);
    async fn signout_redirect(&self);
}

/// In-process session holding the current tokens.
pub struct MemorySession {
    identity: watch::Sender<Identity>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    oidc: Option<OidcConfig>,
    navigation: broadcast::Sender<Navigation>,
    last_rotated: RwLock<Option<DateTime<Utc>>>,
    refresh_gate: Mutex<()>,
    audit: AuditLogger,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(Identity::default());
        let (navigation, _) = broadcast::channel(16);
        Self {
            identity,
            refresher: None,
            oidc: None,
            navigation,
            last_rotated: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            audit: AuditLogger::new(),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_oidc(mut self, oidc: OidcConfig) -> Self {
        self.oidc = Some(oidc);
        self
    }

    /// Installs tokens obtained out of band (login callback, CLI flag).
    pub fn sign_in(&self, tokens: &TokenSet) {
        self.set_identity(Identity::from_tokens(tokens, Utc::now()));
    }

    pub fn set_identity(&self, identity: Identity) {
        let rotated = self.identity.send_if_modified(|current| {
            if *current == identity {
                return false;
            }
            *current = identity;
            true
        });
        if rotated {
            let mut last = self.last_rotated.write();
            *last = Some(Utc::now());
            debug!("Identity rotated at {:?}", *last);
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity.borrow().clone()
    }

    pub fn navigation(&self) -> broadcast::Receiver<Navigation> {
        self.navigation.subscribe()
    }

    pub fn last_rotated(&self) -> Option<DateTime<Utc>> {
        *self.last_rotated.read()
    }

    /// Seconds since the identity last changed.
    pub fn age_seconds(&self) -> u64 {
        self.last_rotated()
            .map(|rotated| (Utc::now() - rotated).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    fn navigate(&self, to: Navigation) {
        if self.navigation.send(to).is_err() {
            debug!("navigation requested with no listener attached");
        }
    }
}

#[async_trait]
impl AuthSession for MemorySession {
    fn is_authenticated(&self) -> bool {
        self.identity.borrow().is_authenticated()
    }

    fn access_token(&self) -> Option<String> {
        self.identity.borrow().access_token.clone()
    }

    fn is_expired(&self) -> bool {
        self.identity.borrow().is_expired_at(Utc::now())
    }

    fn role_claims(&self) -> Vec<String> {
        self.identity.borrow().roles.clone()
    }

    fn subscribe(&self) -> watch::Receiver<Identity> {
        self.identity.subscribe()
    }

    async fn signin_silent(&self) -> bool {
        let seen = self.access_token();
        let _gate = self.refresh_gate.lock().await;

        // Another controller may have refreshed while we waited.
        if self.access_token() != seen && self.is_authenticated() && !self.is_expired() {
            debug!("token already refreshed by a concurrent request");
            return true;
        }

        let Some(refresher) = self.refresher.as_ref() else {
            debug!("no token refresher configured");
            return false;
        };
        let Some(refresh_token) = self.identity().refresh_token else {
            debug!("no refresh token available");
            return false;
        };

        match refresher.refresh(&refresh_token).await {
            Ok(tokens) => {
                let mut identity = Identity::from_tokens(&tokens, Utc::now());
                if identity.refresh_token.is_none() {
                    identity.refresh_token = Some(refresh_token);
                }
                self.audit.refresh_succeeded(identity.username.as_deref());
                self.set_identity(identity);
                true
            }
            Err(err) => {
                warn!(error = %err, "silent token refresh failed");
                false
            }
        }
    }

    async fn signin_redirect(&self) {
        let url = self.oidc.as_ref().and_then(|o| o.authorize_url().ok());
        self.audit.login_redirect(url.as_deref().unwrap_or(""));
        self.navigate(Navigation::Login { url });
    }

    async fn signout_redirect(&self) {
        let username = self.identity().username;
        self.audit.logout_redirect(username.as_deref());
        self.set_identity(Identity::default());
        let url = self.oidc.as_ref().and_then(|o| o.end_session_url().ok());
        self.navigate(Navigation::Logout { url });
    }
}
