use std::time::Duration;

use url::Url;

use crate::error::SessionError;
use crate::exchange::ExchangeConfig;
use crate::orchestrator::SessionSettings;

/// Complete configuration for a [`SessionOrchestrator`](crate::SessionOrchestrator)
/// backed by the HTTP [`ExchangeClient`](crate::ExchangeClient).
///
/// Use [`from_env()`](SessionConfig::from_env) for convention-based setup,
/// or [`new()`](SessionConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) exchange: ExchangeConfig,
    pub(crate) settings: SessionSettings,
}

impl SessionConfig {
    /// Identity tokens must be issued for the exchange config's API key.
    #[must_use]
    pub fn new(exchange: ExchangeConfig, app_host: Url) -> Self {
        let settings = SessionSettings::new(app_host).with_audience(exchange.api_key());
        Self { exchange, settings }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `SHOPIFY_API_KEY`: app API key (the `client_id` and token audience)
    /// - `SHOPIFY_API_SECRET`: app API secret
    /// - `SHOPIFY_APP_HOST`: public URL of the app (must be a valid URL)
    ///
    /// # Optional env vars
    /// - `SHOPIFY_TOKEN_EXCHANGE_URL`: send all exchanges to this URL
    /// - `SHOPIFY_ONLINE_TOKENS`: `"1"` or `"true"` to also exchange for online tokens
    /// - `SHOPIFY_CHECK_SESSION_EXPIRY`: `"0"` or `"false"` to reuse expired sessions
    /// - `SHOPIFY_EXCHANGE_TIMEOUT_SECS`: exchange request timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if required env vars are missing or
    /// values do not parse.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SessionError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SessionError::Config(format!("{name} is required")))
        };

        let api_key = required("SHOPIFY_API_KEY")?;
        let api_secret = required("SHOPIFY_API_SECRET")?;
        let app_host: Url = required("SHOPIFY_APP_HOST")?
            .parse()
            .map_err(|e| SessionError::Config(format!("SHOPIFY_APP_HOST: {e}")))?;

        let mut exchange = ExchangeConfig::new(api_key, api_secret);

        if let Some(url_str) = lookup("SHOPIFY_TOKEN_EXCHANGE_URL") {
            let url: Url = url_str
                .parse()
                .map_err(|e| SessionError::Config(format!("SHOPIFY_TOKEN_EXCHANGE_URL: {e}")))?;
            exchange = exchange.with_endpoint(url);
        }
        if let Some(secs) = lookup("SHOPIFY_EXCHANGE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| SessionError::Config(format!("SHOPIFY_EXCHANGE_TIMEOUT_SECS: {e}")))?;
            exchange = exchange.with_timeout(Duration::from_secs(secs));
        }

        let online_tokens = lookup("SHOPIFY_ONLINE_TOKENS")
            .map(|v| parse_flag("SHOPIFY_ONLINE_TOKENS", &v))
            .transpose()?
            .unwrap_or(false);
        let check_session_expiry = lookup("SHOPIFY_CHECK_SESSION_EXPIRY")
            .map(|v| parse_flag("SHOPIFY_CHECK_SESSION_EXPIRY", &v))
            .transpose()?
            .unwrap_or(true);

        Ok(Self::new(exchange, app_host)
            .with_online_tokens(online_tokens)
            .with_check_session_expiry(check_session_expiry))
    }

    #[must_use]
    pub fn with_online_tokens(mut self, enabled: bool) -> Self {
        self.settings = self.settings.with_online_tokens(enabled);
        self
    }

    #[must_use]
    pub fn with_check_session_expiry(mut self, enabled: bool) -> Self {
        self.settings = self.settings.with_check_session_expiry(enabled);
        self
    }

    #[must_use]
    pub fn with_leeway(mut self, leeway: time::Duration) -> Self {
        self.settings = self.settings.with_leeway(leeway);
        self
    }

    #[must_use]
    pub fn exchange(&self) -> &ExchangeConfig {
        &self.exchange
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, SessionError> {
    match value.trim() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(SessionError::Config(format!(
            "{name}: expected 1/0/true/false, got {other:?}"
        ))),
    }
}
