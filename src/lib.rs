#![doc = include_str!("../README.md")]

pub mod activation;
pub mod bounce;
#[cfg(feature = "client")]
pub mod config;
pub mod error;
pub mod exchange;
#[cfg(feature = "axum")]
pub mod middleware;
pub mod orchestrator;
pub mod store;
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use activation::{ActivationGuard, SessionContext, with_session};
pub use bounce::{BounceContext, BounceRedirectBuilder, BounceResponse};
#[cfg(feature = "client")]
pub use config::SessionConfig;
pub use error::{ExchangeError, SessionError, TokenError};
#[cfg(feature = "client")]
pub use exchange::{ExchangeClient, ExchangeConfig};
pub use exchange::{ExchangeRequest, TokenExchange};
pub use orchestrator::{
    Handled, ResolutionState, SessionOrchestrator, SessionOutcome, SessionSettings,
};
pub use store::{MemorySessionStore, SessionStore, StoreError};
pub use token::{Identity, IdentityClaims, IdentityTokenDecoder, extract_bearer_token};
pub use types::{
    AccessTokenKind, AssociatedUser, Session, SessionId, StoreOutcome, TenantId, UserId,
};
