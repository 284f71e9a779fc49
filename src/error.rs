/// Identity token problems. Both variants are recoverable: the client is
/// bounced to fetch a fresh token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("missing identity token")]
    Missing,
    #[error("invalid identity token: {0}")]
    Invalid(String),
}

/// Token exchange failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// Empty identity token; no request was sent.
    #[error("missing identity token")]
    MissingToken,
    /// The exchange endpoint rejected the identity token.
    #[error("identity token rejected by the exchange endpoint")]
    InvalidToken,
    /// Non-2xx response from the exchange endpoint.
    #[error("token exchange failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[cfg(feature = "client")]
    #[error("token exchange transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Exchange endpoint URL could not be built for the tenant.
    #[error("invalid exchange endpoint: {0}")]
    Endpoint(String),
    /// 2xx response whose body is unusable.
    #[error("unexpected token exchange response: {0}")]
    Response(String),
}

impl ExchangeError {
    /// Whether the client can recover by presenting a fresh identity token.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MissingToken | Self::InvalidToken)
    }
}

/// Fatal errors of session resolution. Recoverable token problems never
/// surface here; they produce a bounce instead.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Session store operation failed.
    #[error("session store error: {0}")]
    Store(String),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A handler asked for the current session outside an activated scope.
    #[error("no active session")]
    Inactive,
}
