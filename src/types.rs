use derive_more::{Display, From, Into};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Shop domain identifying a tenant (e.g. `my-store.myshopify.com`).
///
/// Always derived from the `dest` claim of the identity token; never taken
/// from query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Platform user identifier (the identity token `sub` claim).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Persisted session identifier.
///
/// Derived deterministically from tenant, token kind and user, so two
/// requests exchanging tokens for the same logical session always agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// `offline_<shop>`
    #[must_use]
    pub fn offline(tenant: &TenantId) -> Self {
        Self(format!("offline_{tenant}"))
    }

    /// `<shop>_<user id>`
    #[must_use]
    pub fn online(tenant: &TenantId, user: &UserId) -> Self {
        Self(format!("{tenant}_{user}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Kind of backend access token requested from the exchange endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum AccessTokenKind {
    /// Shop-scoped, long-lived.
    #[display("offline")]
    Offline,
    /// User-scoped, expires with the user's admin login.
    #[display("online")]
    Online,
}

impl AccessTokenKind {
    /// `requested_token_type` value understood by the exchange endpoint.
    #[must_use]
    pub fn requested_token_type(self) -> &'static str {
        match self {
            Self::Offline => "urn:shopify:params:oauth:token-type:offline-access-token",
            Self::Online => "urn:shopify:params:oauth:token-type:online-access-token",
        }
    }
}

/// Staff member an online access token is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AssociatedUser {
    pub id: u64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub account_owner: Option<bool>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl AssociatedUser {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
            email: None,
            email_verified: None,
            account_owner: None,
            locale: None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        UserId(self.id.to_string())
    }
}

/// Backend session produced by a successful token exchange.
///
/// Sessions are immutable: an expired session is replaced wholesale by the
/// next exchange, never patched in place.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Session {
    pub id: SessionId,
    pub tenant: TenantId,
    pub kind: AccessTokenKind,
    /// Backend access token. `Debug` output is redacted.
    pub access_token: SecretString,
    /// Comma-separated granted scopes.
    pub scope: String,
    /// `None` for offline tokens, which do not expire.
    pub expires_at: Option<OffsetDateTime>,
    /// Present for online sessions only.
    pub associated_user: Option<AssociatedUser>,
}

impl Session {
    /// Build an offline session for `tenant`.
    #[must_use]
    pub fn offline(tenant: TenantId, access_token: impl Into<String>) -> Self {
        Self {
            id: SessionId::offline(&tenant),
            tenant,
            kind: AccessTokenKind::Offline,
            access_token: SecretString::from(access_token.into()),
            scope: String::new(),
            expires_at: None,
            associated_user: None,
        }
    }

    /// Build an online session for `tenant`, bound to `user`.
    #[must_use]
    pub fn online(tenant: TenantId, user: AssociatedUser, access_token: impl Into<String>) -> Self {
        Self {
            id: SessionId::online(&tenant, &user.user_id()),
            tenant,
            kind: AccessTokenKind::Online,
            access_token: SecretString::from(access_token.into()),
            scope: String::new(),
            expires_at: None,
            associated_user: Some(user),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the session had expired at `now`. Sessions without an expiry never expire.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

/// Result of [`SessionStore::store`](crate::SessionStore::store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// This write persisted the session.
    Stored,
    /// A concurrent writer already persisted an equivalent session.
    AlreadyExists,
}
