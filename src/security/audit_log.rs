use tracing::{debug, info, warn};

/// Security events for the session and fetch layer, emitted on the `audit`
/// target. Token values are never logged.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn bearer_attached(&self, url: &str) {
        debug!(target: "audit", event = "bearer_attached", url);
    }

    pub fn unauthenticated_request(&self, url: &str) {
        debug!(target: "audit", event = "unauthenticated_request", url);
    }

    pub fn refresh_attempted(&self, url: &str) {
        warn!(target: "audit", event = "refresh_attempted", url, "unauthorized, attempting token refresh");
    }

    pub fn refresh_succeeded(&self, username: Option<&str>) {
        info!(target: "audit", event = "refresh_succeeded", username = username.unwrap_or(""));
    }

    pub fn refresh_failed(&self, reason: &str) {
        warn!(target: "audit", event = "refresh_failed", reason, "token refresh failed, redirecting to login");
    }

    pub fn unauthorized_not_recoverable(&self, url: &str) {
        warn!(target: "audit", event = "unauthorized", url, "401 with a live session; not refreshing");
    }

    pub fn login_redirect(&self, url: &str) {
        info!(target: "audit", event = "login_redirect", url);
    }

    pub fn logout_redirect(&self, username: Option<&str>) {
        info!(target: "audit", event = "logout_redirect", username = username.unwrap_or(""));
    }

    pub fn authorization_evaluated(&self, claims: usize, authorized: bool) {
        info!(target: "audit", event = "authorization_evaluated", claims, authorized);
    }
}
