use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::security::audit_log::AuditLogger;
use crate::security::session::AuthSession;
use crate::transport::{RequestDescriptor, RequestMiddleware};

pub const UNAUTHORIZED: u16 = 401;

/// What the auth-recovery stage decided about a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRecovery {
    /// Not an auth failure this stage handles; pass the response on.
    NotApplicable,
    /// Silent refresh succeeded; reissue the same request once.
    Reissue,
    /// Refresh failed and a login redirect was requested; end the cycle.
    Redirected,
    /// The cycle was cancelled around the refresh; nothing was requested.
    Cancelled,
}

/// Attaches bearer tokens and drives 401 -> refresh -> reissue -> redirect.
#[derive(Clone)]
pub struct AuthInterceptor {
    session: Arc<dyn AuthSession>,
    audit: AuditLogger,
}

impl AuthInterceptor {
    pub fn new(session: Arc<dyn AuthSession>) -> Self {
        Self {
            session,
            audit: AuditLogger::new(),
        }
    }

    /// A 401 is recoverable only when the session is signed out, or holds a
    /// token that has expired.
    fn session_needs_refresh(&self) -> bool {
        !self.session.is_authenticated()
            || (self.session.access_token().is_some() && self.session.is_expired())
    }

    /// Response phase. Runs at most one silent refresh per call. A cycle
    /// cancelled before or during the refresh never triggers a redirect.
    pub async fn recover(
        &self,
        descriptor: &RequestDescriptor,
        status: u16,
        cancel: &CancellationToken,
    ) -> AuthRecovery {
        if status != UNAUTHORIZED {
            return AuthRecovery::NotApplicable;
        }
        if !self.session_needs_refresh() {
            self.audit.unauthorized_not_recoverable(descriptor.url());
            return AuthRecovery::NotApplicable;
        }
        if cancel.is_cancelled() {
            return AuthRecovery::Cancelled;
        }

        self.audit.refresh_attempted(descriptor.url());
        let refreshed = self.session.signin_silent().await;
        if cancel.is_cancelled() {
            debug!(url = %descriptor.url(), refreshed, "cycle cancelled during token refresh");
            return AuthRecovery::Cancelled;
        }
        if refreshed {
            debug!(url = %descriptor.url(), "token refreshed, reissuing request");
            return AuthRecovery::Reissue;
        }

        self.audit.refresh_failed("silent sign-in unsuccessful");
        self.session.signin_redirect().await;
        AuthRecovery::Redirected
    }
}

#[async_trait]
impl RequestMiddleware for AuthInterceptor {
    async fn on_request(
        &self,
        descriptor: &RequestDescriptor,
        headers: &mut HeaderMap,
    ) -> Result<(), FetchError> {
        match self.session.access_token() {
            Some(token) => {
                let bearer = format!("Bearer {}", token);
                let value = HeaderValue::from_str(&bearer)
                    .map_err(|_| FetchError::InvalidRequest("access token is not a valid header value".into()))?;
                headers.insert(AUTHORIZATION, value);
                self.audit.bearer_attached(descriptor.url());
            }
            None => {
                headers.remove(AUTHORIZATION);
                self.audit.unauthenticated_request(descriptor.url());
            }
        }
        Ok(())
    }
}
