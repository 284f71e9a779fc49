use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use url::Url;

use crate::error::TokenError;
use crate::types::{TenantId, UserId};

/// Default tolerance for `exp`/`nbf` clock skew.
pub const DEFAULT_LEEWAY: Duration = Duration::seconds(10);

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
///
/// Returns `None` when the header is absent, has another scheme, or carries
/// an empty token.
#[must_use]
pub fn extract_bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

/// Claims carried by an App Bridge session token.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct IdentityClaims {
    /// Shop admin URL, e.g. `https://shop.myshopify.com/admin`.
    #[serde(default)]
    pub iss: Option<String>,
    /// Shop URL the token was issued for.
    pub dest: String,
    /// App API key.
    #[serde(default)]
    pub aud: Option<String>,
    /// Staff user id.
    #[serde(default)]
    pub sub: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub sid: Option<String>,
}

/// Decoded identity token: the tenant and user it speaks for.
#[derive(Debug, Clone)]
pub struct Identity {
    pub tenant: TenantId,
    pub user: Option<UserId>,
    pub claims: IdentityClaims,
}

/// Decodes identity tokens without verifying their signature.
///
/// The exchange endpoint verifies the signature on every exchange; locally
/// the token is only trusted to pick which stored session to load, and a
/// forged token can at most select a session id it cannot use to exchange.
/// Structure, `exp`/`nbf` and (when configured) `aud` are still checked.
#[derive(Debug, Clone)]
pub struct IdentityTokenDecoder {
    audience: Option<String>,
    leeway: Duration,
}

impl Default for IdentityTokenDecoder {
    fn default() -> Self {
        Self {
            audience: None,
            leeway: DEFAULT_LEEWAY,
        }
    }
}

impl IdentityTokenDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `aud` to equal the app's API key.
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

    /// Decodes `token` as of now.
    ///
    /// # Errors
    ///
    /// [`TokenError::Missing`] for an empty token, [`TokenError::Invalid`]
    /// for anything that does not decode into usable claims.
    pub fn decode(&self, token: &str) -> Result<Identity, TokenError> {
        self.decode_at(token, OffsetDateTime::now_utc())
    }

    /// Decodes `token` as of `now`.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_at(&self, token: &str, now: OffsetDateTime) -> Result<Identity, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Missing);
        }

        let claims = decode_claims(token)?;
        let now = now.unix_timestamp();
        let leeway = self.leeway.whole_seconds();

        if claims.exp.saturating_add(leeway) <= now {
            return Err(TokenError::Invalid("token expired".into()));
        }
        if let Some(nbf) = claims.nbf
            && nbf.saturating_sub(leeway) > now
        {
            return Err(TokenError::Invalid("token not yet valid".into()));
        }
        if let Some(expected) = &self.audience
            && claims.aud.as_deref() != Some(expected.as_str())
        {
            return Err(TokenError::Invalid("audience mismatch".into()));
        }

        let tenant = tenant_from_dest(&claims.dest)?;
        let user = claims
            .sub
            .as_deref()
            .filter(|sub| !sub.is_empty())
            .map(|sub| UserId(sub.to_owned()));

        Ok(Identity {
            tenant,
            user,
            claims,
        })
    }
}

/// Splits a compact JWT and parses its payload segment.
fn decode_claims(token: &str) -> Result<IdentityClaims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
        return Err(TokenError::Invalid("invalid token format".into()));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| TokenError::Invalid("invalid payload encoding".into()))?;

    serde_json::from_slice(&payload)
        .map_err(|e| TokenError::Invalid(format!("invalid payload: {e}")))
}

fn tenant_from_dest(dest: &str) -> Result<TenantId, TokenError> {
    let url = Url::parse(dest).map_err(|e| TokenError::Invalid(format!("dest: {e}")))?;
    url.host_str()
        .map(|host| TenantId(host.to_owned()))
        .ok_or_else(|| TokenError::Invalid("dest has no host".into()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn encode(claims: &serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    fn claims(exp_offset: i64) -> serde_json::Value {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        json!({
            "iss": "https://shop-1.example/admin",
            "dest": "https://shop-1.example",
            "aud": "api-key",
            "sub": "42",
            "exp": now + exp_offset,
            "nbf": now - 5,
            "iat": now - 5,
            "jti": "f8912129-1af6-4cad-9ca3-76b0f7621087",
            "sid": "aaea182f2732d44c23057c0fea584021a4485b2bd25d3eb7fd349313ad24c685"
        })
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(extract_bearer_token(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
        assert_eq!(extract_bearer_token(Some("bearer abc")), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    #[test]
    fn decodes_tenant_and_user() {
        let identity = IdentityTokenDecoder::new()
            .with_audience("api-key")
            .decode(&encode(&claims(60)))
            .unwrap();

        assert_eq!(identity.tenant.as_str(), "shop-1.example");
        assert_eq!(identity.user, Some(UserId("42".into())));
        assert_eq!(identity.claims.aud.as_deref(), Some("api-key"));
    }

    #[test]
    fn empty_token_is_missing() {
        let decoder = IdentityTokenDecoder::new();
        assert_eq!(decoder.decode("").unwrap_err(), TokenError::Missing);
        assert_eq!(decoder.decode("   ").unwrap_err(), TokenError::Missing);
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let decoder = IdentityTokenDecoder::new();
        for token in ["abc.def.ghi", "not-a-jwt", "a.b", "a..c", "a.b.c.d"] {
            assert!(
                matches!(decoder.decode(token), Err(TokenError::Invalid(_))),
                "{token} should be invalid"
            );
        }
    }

    #[test]
    fn payload_without_dest_is_invalid() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let token = encode(&json!({ "exp": now + 60 }));
        assert!(matches!(
            IdentityTokenDecoder::new().decode(&token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn expired_token_is_invalid() {
        let token = encode(&claims(-60));
        assert_eq!(
            IdentityTokenDecoder::new().decode(&token).unwrap_err(),
            TokenError::Invalid("token expired".into())
        );
    }

    #[test]
    fn leeway_tolerates_small_skew() {
        let token = encode(&claims(-5));
        assert!(IdentityTokenDecoder::new().decode(&token).is_ok());
        assert!(
            IdentityTokenDecoder::new()
                .with_leeway(Duration::ZERO)
                .decode(&token)
                .is_err()
        );
    }

    #[test]
    fn audience_mismatch_is_invalid() {
        let token = encode(&claims(60));
        assert_eq!(
            IdentityTokenDecoder::new()
                .with_audience("other-app")
                .decode(&token)
                .unwrap_err(),
            TokenError::Invalid("audience mismatch".into())
        );
    }

    #[test]
    fn not_yet_valid_token_is_invalid() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut value = claims(600);
        value["nbf"] = json!(now + 300);
        assert!(matches!(
            IdentityTokenDecoder::new().decode(&encode(&value)),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let decoder = IdentityTokenDecoder::new();
        let token = |exp: i64, nbf: i64| {
            encode(&json!({ "dest": "https://shop-1.example", "exp": exp, "nbf": nbf }))
        };

        assert!(decoder.decode(&token(i64::MAX, i64::MIN)).is_ok());
        assert_eq!(
            decoder.decode(&token(i64::MIN, i64::MIN)).unwrap_err(),
            TokenError::Invalid("token expired".into())
        );
        assert_eq!(
            decoder.decode(&token(i64::MAX, i64::MAX)).unwrap_err(),
            TokenError::Invalid("token not yet valid".into())
        );
        assert!(
            decoder
                .with_leeway(Duration::MAX)
                .decode(&token(0, i64::MAX))
                .is_ok()
        );
    }
}
