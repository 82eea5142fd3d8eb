pub mod audit_log;
pub mod interceptor;
pub mod oidc;
pub mod role_authorizer;
pub mod session;

pub use interceptor::{AuthInterceptor, AuthRecovery};
pub use oidc::{OidcConfig, OidcRefresher, TokenRefresher, TokenSet};
pub use role_authorizer::{is_authorized, role_digest_hex, RoleAuthorizer};
pub use session::{AuthSession, Identity, MemorySession, Navigation};
