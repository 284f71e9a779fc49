use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use crate::activation::SessionContext;
use crate::error::SessionError;
use crate::types::{Session, TenantId};

/// Session activated by [`require_session`](super::require_session).
///
/// Use as an Axum extractor in protected route handlers. Returns
/// `401 Unauthorized` on routes the middleware does not cover.
///
/// # Example
///
/// ```rust,ignore
/// async fn orders(session: CurrentSession) -> impl IntoResponse {
///     format!("Orders for {}", session.tenant())
/// }
///
/// // Optional: routes shared between protected and public routers
/// async fn banner(session: Option<CurrentSession>) -> impl IntoResponse {
///     match session {
///         Some(s) => format!("Installed on {}", s.tenant()),
///         None => "Not installed".to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

impl CurrentSession {
    /// Shop the session belongs to.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.0.tenant
    }

    #[must_use]
    pub fn into_inner(self) -> Session {
        self.0
    }
}

impl std::ops::Deref for CurrentSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

fn current(parts: &Parts) -> Option<CurrentSession> {
    parts
        .extensions
        .get::<SessionContext>()
        .and_then(SessionContext::current)
        .map(CurrentSession)
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = SessionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        current(parts).ok_or(SessionError::Inactive)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(current(parts))
    }
}
