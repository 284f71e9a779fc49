use std::future::Future;

use secrecy::SecretString;

use crate::error::ExchangeError;
use crate::types::{AccessTokenKind, Session, TenantId};

#[cfg(feature = "client")]
pub use client::{ExchangeClient, ExchangeConfig};

/// One token exchange: trade `identity_token` for an access token of `kind`
/// on `tenant`.
#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub tenant: TenantId,
    pub identity_token: SecretString,
    pub kind: AccessTokenKind,
}

impl ExchangeRequest {
    #[must_use]
    pub fn new(tenant: TenantId, identity_token: impl Into<String>, kind: AccessTokenKind) -> Self {
        Self {
            tenant,
            identity_token: SecretString::from(identity_token.into()),
            kind,
        }
    }
}

/// Trades identity tokens for backend sessions.
///
/// Implementations must return [`ExchangeError::MissingToken`] for an empty
/// identity token without contacting the remote endpoint, and
/// [`ExchangeError::InvalidToken`] when the endpoint rejects the token.
/// Timeouts belong to the implementation's transport and surface as errors.
pub trait TokenExchange: Send + Sync + 'static {
    fn exchange(
        &self,
        request: &ExchangeRequest,
    ) -> impl Future<Output = Result<Session, ExchangeError>> + Send;
}

#[cfg(feature = "client")]
mod client {
    use std::time::Duration;

    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Serialize};
    use time::OffsetDateTime;
    use url::Url;

    use super::{ExchangeRequest, TokenExchange};
    use crate::error::ExchangeError;
    use crate::types::{AccessTokenKind, AssociatedUser, Session, TenantId};

    const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
    const ID_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
    const INVALID_SUBJECT_TOKEN: &str = "invalid_subject_token";
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Credentials and endpoint for the token exchange client.
    ///
    /// ```rust,ignore
    /// let config = ExchangeConfig::new("api-key", "api-secret")
    ///     .with_timeout(Duration::from_secs(5));
    /// ```
    #[derive(Debug, Clone)]
    #[non_exhaustive]
    pub struct ExchangeConfig {
        pub(crate) api_key: String,
        pub(crate) api_secret: SecretString,
        pub(crate) endpoint: Option<Url>,
        pub(crate) timeout: Duration,
    }

    impl ExchangeConfig {
        #[must_use]
        pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
            Self {
                api_key: api_key.into(),
                api_secret: SecretString::from(api_secret.into()),
                endpoint: None,
                timeout: DEFAULT_TIMEOUT,
            }
        }

        /// Send every exchange to `endpoint` instead of the tenant's
        /// `https://<shop>/admin/oauth/access_token`.
        #[must_use]
        pub fn with_endpoint(mut self, endpoint: Url) -> Self {
            self.endpoint = Some(endpoint);
            self
        }

        /// Per-request timeout (default 10s).
        #[must_use]
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        /// App API key (`client_id`).
        #[must_use]
        pub fn api_key(&self) -> &str {
            &self.api_key
        }

        #[must_use]
        pub fn timeout(&self) -> Duration {
            self.timeout
        }

        /// Exchange endpoint for `tenant`.
        ///
        /// # Errors
        ///
        /// Returns [`ExchangeError::Endpoint`] if the tenant is not a valid host.
        pub fn endpoint_for(&self, tenant: &TenantId) -> Result<Url, ExchangeError> {
            if let Some(endpoint) = &self.endpoint {
                return Ok(endpoint.clone());
            }
            let url = Url::parse(&format!("https://{tenant}/admin/oauth/access_token"))
                .map_err(|e| ExchangeError::Endpoint(format!("{tenant}: {e}")))?;
            if url.host_str() != Some(tenant.as_str()) {
                return Err(ExchangeError::Endpoint(format!("{tenant}: not a host name")));
            }
            Ok(url)
        }
    }

    #[derive(Serialize)]
    struct ExchangeBody<'a> {
        client_id: &'a str,
        client_secret: &'a str,
        grant_type: &'static str,
        subject_token: &'a str,
        subject_token_type: &'static str,
        requested_token_type: &'static str,
    }

    #[derive(Deserialize)]
    struct AccessTokenResponse {
        access_token: String,
        #[serde(default)]
        scope: String,
        #[serde(default)]
        expires_in: Option<i64>,
        #[serde(default)]
        associated_user: Option<AssociatedUser>,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    impl AccessTokenResponse {
        fn into_session(
            self,
            tenant: TenantId,
            kind: AccessTokenKind,
        ) -> Result<Session, ExchangeError> {
            let session = match kind {
                AccessTokenKind::Offline => Session::offline(tenant, self.access_token),
                AccessTokenKind::Online => {
                    let user = self.associated_user.ok_or_else(|| {
                        ExchangeError::Response("online token without associated_user".into())
                    })?;
                    Session::online(tenant, user, self.access_token)
                }
            };
            let session = session.with_scope(self.scope);
            match self.expires_in {
                Some(secs) => {
                    let expires_at = OffsetDateTime::now_utc()
                        .checked_add(time::Duration::seconds(secs))
                        .ok_or_else(|| ExchangeError::Response("expires_in out of range".into()))?;
                    Ok(session.with_expires_at(expires_at))
                }
                None => Ok(session),
            }
        }
    }

    /// `reqwest`-based [`TokenExchange`] against the Shopify token endpoint.
    pub struct ExchangeClient {
        config: ExchangeConfig,
        http: reqwest::Client,
    }

    impl ExchangeClient {
        #[must_use]
        pub fn new(config: ExchangeConfig) -> Self {
            Self {
                config,
                http: reqwest::Client::new(),
            }
        }

        /// Use a custom HTTP client (for connection pool reuse or testing).
        #[must_use]
        pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
            self.http = client;
            self
        }

        #[must_use]
        pub fn config(&self) -> &ExchangeConfig {
            &self.config
        }

        /// Exchange an identity token for an access token.
        ///
        /// # Errors
        ///
        /// - [`ExchangeError::MissingToken`] for an empty token (no request is sent)
        /// - [`ExchangeError::InvalidToken`] when the endpoint answers
        ///   `400 invalid_subject_token`
        /// - [`ExchangeError::Http`] for any other non-2xx response
        /// - [`ExchangeError::Transport`] on network failure or timeout
        pub async fn exchange_token(
            &self,
            request: &ExchangeRequest,
        ) -> Result<Session, ExchangeError> {
            let subject_token = request.identity_token.expose_secret();
            if subject_token.is_empty() {
                return Err(ExchangeError::MissingToken);
            }

            let url = self.config.endpoint_for(&request.tenant)?;
            let body = ExchangeBody {
                client_id: &self.config.api_key,
                client_secret: self.config.api_secret.expose_secret(),
                grant_type: GRANT_TYPE,
                subject_token,
                subject_token_type: ID_TOKEN_TYPE,
                requested_token_type: request.kind.requested_token_type(),
            };

            let response = self
                .http
                .post(url)
                .timeout(self.config.timeout)
                .json(&body)
                .send()
                .await?;

            let response = Self::ensure_success(response).await?;
            let token = response
                .json::<AccessTokenResponse>()
                .await
                .map_err(|e| ExchangeError::Response(e.to_string()))?;

            token.into_session(request.tenant.clone(), request.kind)
        }

        /// Checks HTTP response status; returns the response on success or a classified error.
        async fn ensure_success(
            response: reqwest::Response,
        ) -> Result<reqwest::Response, ExchangeError> {
            if response.status().is_success() {
                return Ok(response);
            }
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            if status == 400 && is_invalid_subject_token(&body) {
                return Err(ExchangeError::InvalidToken);
            }
            Err(ExchangeError::Http { status, body })
        }
    }

    fn is_invalid_subject_token(body: &str) -> bool {
        serde_json::from_str::<ErrorBody>(body)
            .is_ok_and(|parsed| parsed.error == INVALID_SUBJECT_TOKEN)
    }

    impl TokenExchange for ExchangeClient {
        async fn exchange(&self, request: &ExchangeRequest) -> Result<Session, ExchangeError> {
            self.exchange_token(request).await
        }
    }

}
