//! Session resolution state machine.
//!
//! ```text
//! NoSession -> Resolving -> ExchangingOffline -> ExchangingOnline? -> Active
//!     |            |               |                   |
//!     +------------+---------------+-------------------+--> Bounced | Failed
//! ```
//!
//! Concurrent requests are not coordinated: two requests racing on the same
//! expired session both exchange tokens and both store the result. The
//! store's unique session id keeps one record; the loser sees
//! [`StoreOutcome::AlreadyExists`] and carries on with its own (equivalent)
//! session.

use std::future::Future;
use std::sync::Arc;

use derive_more::Display;
use time::Duration;
use url::Url;

use crate::activation::{SessionContext, with_session};
use crate::bounce::{BounceContext, BounceRedirectBuilder, BounceResponse};
use crate::error::{ExchangeError, SessionError, TokenError};
use crate::exchange::{ExchangeRequest, TokenExchange};
use crate::store::SessionStore;
use crate::token::{DEFAULT_LEEWAY, IdentityTokenDecoder, extract_bearer_token};
use crate::types::{AccessTokenKind, Session, SessionId, StoreOutcome, TenantId};

/// Deployment settings consumed by the orchestrator.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SessionSettings {
    pub(crate) app_host: Url,
    pub(crate) online_tokens: bool,
    pub(crate) check_session_expiry: bool,
    pub(crate) audience: Option<String>,
    pub(crate) leeway: Duration,
}

impl SessionSettings {
    /// Settings for an app served from `app_host`.
    ///
    /// Defaults: offline tokens only, session expiry checked, no audience
    /// check, 10 second clock leeway.
    #[must_use]
    pub fn new(app_host: Url) -> Self {
        Self {
            app_host,
            online_tokens: false,
            check_session_expiry: true,
            audience: None,
            leeway: DEFAULT_LEEWAY,
        }
    }

    /// Also exchange for a user-scoped online token on every new session.
    #[must_use]
    pub fn with_online_tokens(mut self, enabled: bool) -> Self {
        self.online_tokens = enabled;
        self
    }

    /// Re-exchange stored sessions whose `expires_at` has passed.
    #[must_use]
    pub fn with_check_session_expiry(mut self, enabled: bool) -> Self {
        self.check_session_expiry = enabled;
        self
    }

    /// Require identity tokens to be issued for this API key.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    #[must_use]
    pub fn app_host(&self) -> &Url {
        &self.app_host
    }

    #[must_use]
    pub fn online_tokens(&self) -> bool {
        self.online_tokens
    }

    #[must_use]
    pub fn check_session_expiry(&self) -> bool {
        self.check_session_expiry
    }

    fn decoder(&self) -> IdentityTokenDecoder {
        let decoder = IdentityTokenDecoder::new().with_leeway(self.leeway);
        match &self.audience {
            Some(audience) => decoder.with_audience(audience.clone()),
            None => decoder,
        }
    }
}

/// Resolution states, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResolutionState {
    #[display("no_session")]
    NoSession,
    #[display("resolving")]
    Resolving,
    #[display("exchanging_offline")]
    ExchangingOffline,
    #[display("exchanging_online")]
    ExchangingOnline,
    #[display("active")]
    Active,
    #[display("bounced")]
    Bounced,
    #[display("failed")]
    Failed,
}

/// Terminal result of a successful resolution. Fatal failures are
/// returned as [`SessionError`] instead.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Session to activate. With online tokens enabled this is the online session.
    Active(Session),
    /// No usable identity token; send this to the client.
    Bounced(BounceResponse),
}

impl SessionOutcome {
    #[must_use]
    pub fn state(&self) -> ResolutionState {
        match self {
            Self::Active(_) => ResolutionState::Active,
            Self::Bounced(_) => ResolutionState::Bounced,
        }
    }
}

/// Result of [`SessionOrchestrator::run`].
#[derive(Debug)]
pub enum Handled<T> {
    /// The protected handler ran and returned this.
    Completed(T),
    /// The handler did not run.
    Bounced(BounceResponse),
}

enum Exchanged {
    Session(Session),
    Rejected(ExchangeError),
}

/// Turns identity tokens into active sessions.
pub struct SessionOrchestrator<S, X> {
    store: Arc<S>,
    exchange: Arc<X>,
    decoder: IdentityTokenDecoder,
    bounce: BounceRedirectBuilder,
    settings: SessionSettings,
}

// Manual Clone: avoid derive adding `S: Clone, X: Clone` bounds.
impl<S, X> Clone for SessionOrchestrator<S, X> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            exchange: self.exchange.clone(),
            decoder: self.decoder.clone(),
            bounce: self.bounce.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[cfg(feature = "client")]
impl<S: SessionStore> SessionOrchestrator<S, crate::exchange::ExchangeClient> {
    /// Orchestrator using the HTTP exchange client described by `config`.
    #[must_use]
    pub fn from_config(config: crate::config::SessionConfig, store: S) -> Self {
        Self::new(
            store,
            crate::exchange::ExchangeClient::new(config.exchange),
            config.settings,
        )
    }
}

impl<S: SessionStore, X: TokenExchange> SessionOrchestrator<S, X> {
    #[must_use]
    pub fn new(store: S, exchange: X, settings: SessionSettings) -> Self {
        Self {
            store: Arc::new(store),
            exchange: Arc::new(exchange),
            decoder: settings.decoder(),
            bounce: BounceRedirectBuilder::new(&settings.app_host),
            settings,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Resolve the session for a request and, when one is established, run
    /// `handler` with it activated.
    ///
    /// # Errors
    ///
    /// Fatal exchange or store failures. The handler does not run.
    pub async fn run<F, Fut, T>(
        &self,
        authorization: Option<&str>,
        bounce: &BounceContext,
        handler: F,
    ) -> Result<Handled<T>, SessionError>
    where
        F: FnOnce(SessionContext) -> Fut,
        Fut: Future<Output = T>,
    {
        match self.resolve(authorization, bounce).await? {
            SessionOutcome::Active(session) => {
                Ok(Handled::Completed(with_session(session, handler).await))
            }
            SessionOutcome::Bounced(response) => Ok(Handled::Bounced(response)),
        }
    }

    /// Resolve the session for a request carrying `authorization`.
    ///
    /// Missing and invalid identity tokens, locally or as judged by the
    /// exchange endpoint, produce [`SessionOutcome::Bounced`].
    ///
    /// # Errors
    ///
    /// [`SessionError::Exchange`] when the exchange endpoint fails for any
    /// other reason, [`SessionError::Store`] when the store fails.
    pub async fn resolve(
        &self,
        authorization: Option<&str>,
        bounce: &BounceContext,
    ) -> Result<SessionOutcome, SessionError> {
        tracing::debug!(state = %ResolutionState::NoSession, path = %bounce.path, "Resolving session");

        let token = extract_bearer_token(authorization).unwrap_or_default();
        let identity = match self.decoder.decode(token) {
            Ok(identity) => identity,
            Err(TokenError::Missing) => {
                tracing::info!("No identity token presented");
                return Ok(self.bounced(bounce));
            }
            Err(TokenError::Invalid(reason)) => {
                tracing::warn!(reason = %reason, "Invalid identity token");
                return Ok(self.bounced(bounce));
            }
        };

        let session_id = if self.settings.online_tokens {
            let Some(user) = &identity.user else {
                tracing::warn!(tenant = %identity.tenant, "Identity token has no subject for an online session");
                return Ok(self.bounced(bounce));
            };
            SessionId::online(&identity.tenant, user)
        } else {
            SessionId::offline(&identity.tenant)
        };

        tracing::debug!(state = %ResolutionState::Resolving, session_id = %session_id, "Loading session");
        let existing = self
            .store
            .load(&session_id)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;

        if let Some(session) = existing {
            if !(self.settings.check_session_expiry && session.is_expired()) {
                tracing::debug!(state = %ResolutionState::Active, session_id = %session.id, "Using stored session");
                return Ok(SessionOutcome::Active(session));
            }
            tracing::debug!(session_id = %session.id, "Stored session expired");
        }

        let offline = match self
            .exchange_and_store(&identity.tenant, token, AccessTokenKind::Offline)
            .await?
        {
            Exchanged::Session(session) => session,
            Exchanged::Rejected(err) => {
                tracing::warn!(tenant = %identity.tenant, error = %err, "Offline token exchange rejected the identity token");
                return Ok(self.bounced(bounce));
            }
        };

        if !self.settings.online_tokens {
            tracing::debug!(state = %ResolutionState::Active, session_id = %offline.id, "Offline session established");
            return Ok(SessionOutcome::Active(offline));
        }

        match self
            .exchange_and_store(&identity.tenant, token, AccessTokenKind::Online)
            .await
        {
            Ok(Exchanged::Session(online)) => {
                tracing::debug!(state = %ResolutionState::Active, session_id = %online.id, "Online session established");
                Ok(SessionOutcome::Active(online))
            }
            Ok(Exchanged::Rejected(err)) => {
                tracing::warn!(
                    tenant = %identity.tenant,
                    offline_session = %offline.id,
                    error = %err,
                    "Online token exchange rejected the identity token"
                );
                Ok(self.bounced(bounce))
            }
            Err(err) => {
                tracing::error!(
                    tenant = %identity.tenant,
                    offline_session = %offline.id,
                    error = %err,
                    "Online token exchange failed; offline session remains stored"
                );
                Err(err)
            }
        }
    }

    async fn exchange_and_store(
        &self,
        tenant: &TenantId,
        token: &str,
        kind: AccessTokenKind,
    ) -> Result<Exchanged, SessionError> {
        let state = match kind {
            AccessTokenKind::Offline => ResolutionState::ExchangingOffline,
            AccessTokenKind::Online => ResolutionState::ExchangingOnline,
        };
        tracing::info!(state = %state, tenant = %tenant, kind = %kind, "Performing token exchange");

        let request = ExchangeRequest::new(tenant.clone(), token, kind);
        let session = match self.exchange.exchange(&request).await {
            Ok(session) => session,
            Err(err) if err.is_recoverable() => return Ok(Exchanged::Rejected(err)),
            Err(err) => {
                log_exchange_failure(tenant, kind, &err);
                return Err(err.into());
            }
        };

        let outcome = self
            .store
            .store(&session)
            .await
            .map_err(|e| SessionError::Store(e.to_string()))?;
        match outcome {
            StoreOutcome::Stored => {
                tracing::debug!(session_id = %session.id, "Session stored");
            }
            StoreOutcome::AlreadyExists => {
                tracing::debug!(
                    session_id = %session.id,
                    "Session not stored due to concurrent token exchange calls"
                );
            }
        }

        Ok(Exchanged::Session(session))
    }

    fn bounced(&self, context: &BounceContext) -> SessionOutcome {
        tracing::debug!(
            state = %ResolutionState::Bounced,
            background = context.background,
            "Bouncing request for a fresh identity token"
        );
        SessionOutcome::Bounced(self.bounce.build(context))
    }
}

fn log_exchange_failure(tenant: &TenantId, kind: AccessTokenKind, err: &ExchangeError) {
    match err {
        ExchangeError::Http { status, body } => tracing::info!(
            state = %ResolutionState::Failed,
            tenant = %tenant,
            kind = %kind,
            status = *status,
            body = %body,
            "A {status} error occurred during the token exchange"
        ),
        other => tracing::info!(
            state = %ResolutionState::Failed,
            tenant = %tenant,
            kind = %kind,
            error = %other,
            "An error occurred during the token exchange"
        ),
    }
}
