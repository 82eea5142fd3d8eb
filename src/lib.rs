pub mod cache;
pub mod client;
pub mod error;
pub mod security;
pub mod transport;
pub mod utils;

pub use cache::{CacheStore, MemoryStore, ResponseCache};
pub use client::{ClientConfig, FetchClient, FetchController, FetchOptions, FetchPhase, FetchState};
pub use error::{CacheError, FetchError};
pub use security::{AuthSession, Identity, MemorySession, RoleAuthorizer};
pub use transport::{HttpResponse, Params, RequestDescriptor, RetryPolicy, Transport};

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
