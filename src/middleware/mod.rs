//! Token-exchange session middleware for Axum.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use shopify_token_exchange::middleware::{CurrentSession, protect};
//!
//! // 1. Implement SessionStore for your database (or use MemorySessionStore)
//! // 2. Build the orchestrator from environment
//! let orchestrator = SessionOrchestrator::from_config(SessionConfig::from_env()?, store);
//!
//! // 3. Wrap the routes that need an installed shop
//! let app = protect(Router::new().route("/orders", get(orders)), orchestrator);
//!
//! // 4. Read the session in handlers
//! async fn orders(session: CurrentSession) -> String {
//!     session.tenant().to_string()
//! }
//! ```

mod error;
mod extractor;
mod routes;

pub use extractor::CurrentSession;
pub use routes::{X_REQUESTED_WITH, protect, require_session};
