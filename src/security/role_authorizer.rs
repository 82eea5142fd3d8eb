//! Hashed role check.
//!
//! The client is configured with the SHA-256 of the required role, never the
//! role name itself. This only hides the policy from casual inspection; the
//! API enforces the real role requirement.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::security::audit_log::AuditLogger;
use crate::security::session::AuthSession;

/// Lowercase hex SHA-256 of the role's UTF-8 bytes.
pub fn role_digest_hex(role: &str) -> String {
    format!("{:x}", Sha256::digest(role.as_bytes()))
}

fn digest_matches(candidate_hex: &str, expected_lower: &str) -> bool {
    candidate_hex.len() == expected_lower.len()
        && bool::from(candidate_hex.as_bytes().ct_eq(expected_lower.as_bytes()))
}

/// `true` on the first claim whose digest matches `expected_hex`
/// (case-insensitive). An empty claim list is never authorized.
pub fn is_authorized(claims: &[String], expected_hex: &str) -> bool {
    let expected = expected_hex.trim().to_ascii_lowercase();
    if expected.is_empty() {
        return false;
    }
    claims
        .iter()
        .any(|role| digest_matches(&role_digest_hex(role), &expected))
}

/// Keeps `is_authorized` current by watching the session's identity.
pub struct RoleAuthorizer {
    authorized: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl RoleAuthorizer {
    /// Evaluates the session's role claims right away, then again on every
    /// identity change whose role list differs from the last one seen. The
    /// identity feed only signals; claims always come from `role_claims()`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; the watcher is a spawned
    /// task.
    pub fn spawn(session: Arc<dyn AuthSession>, required_role_hash_hex: impl Into<String>) -> Self {
        let expected = required_role_hash_hex.into();
        let audit = AuditLogger::new();
        let mut identity = session.subscribe();
        identity.borrow_and_update();

        let mut claims = session.role_claims();
        let initial = is_authorized(&claims, &expected);
        audit.authorization_evaluated(claims.len(), initial);
        let (tx, authorized) = watch::channel(initial);

        let task = tokio::spawn(async move {
            while identity.changed().await.is_ok() {
                let next = session.role_claims();
                if next == claims {
                    continue;
                }
                claims = next;
                let result = is_authorized(&claims, &expected);
                audit.authorization_evaluated(claims.len(), result);
                tx.send_if_modified(|current| {
                    let changed = *current != result;
                    *current = result;
                    changed
                });
            }
            debug!("identity channel closed, role watcher stopping");
        });

        Self { authorized, task }
    }

    pub fn is_authorized(&self) -> bool {
        *self.authorized.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.authorized.clone()
    }
}

impl Drop for RoleAuthorizer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
