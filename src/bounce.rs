//! Recovery responses for requests without a usable identity token.
//!
//! Background (XHR) requests get a `401` with a retry header; App Bridge
//! refetches them with a fresh token. Navigations are redirected to the
//! app's `/patch_session_token` page, which obtains a fresh token and then
//! reloads the `shopify-reload` URL.

use serde::Serialize;
use url::Url;
use url::form_urlencoded;

/// Header telling App Bridge to retry the request with a new session token.
pub const RETRY_INVALID_SESSION_HEADER: &str = "X-Shopify-Retry-Invalid-Session-Request";

/// Path of the page that fetches a fresh session token.
pub const PATCH_SESSION_TOKEN_PATH: &str = "/patch_session_token";

/// Query parameter carrying the bounce-back URL.
pub const RELOAD_PARAM: &str = "shopify-reload";

/// Query parameter carrying a stale identity token; never echoed back.
pub const ID_TOKEN_PARAM: &str = "id_token";

/// What the orchestrator knows about the failed request.
#[derive(Debug, Clone, Default)]
pub struct BounceContext {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub background: bool,
}

impl BounceContext {
    /// Build from a request path and raw (undecoded) query string.
    #[must_use]
    pub fn new(path: impl Into<String>, raw_query: Option<&str>, background: bool) -> Self {
        let query = raw_query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self {
            path: path.into(),
            query,
            background,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// JSON body of a background bounce: `{"errors":[{"message":"unauthorized"}]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnauthorizedBody {
    pub errors: Vec<ErrorMessage>,
}

impl UnauthorizedBody {
    fn unauthorized() -> Self {
        Self {
            errors: vec![ErrorMessage {
                message: "unauthorized".into(),
            }],
        }
    }
}

/// Transport-agnostic bounce response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BounceResponse {
    /// `401` with [`RETRY_INVALID_SESSION_HEADER`] set to `1`.
    Unauthorized { body: UnauthorizedBody },
    /// `302` to `location`; the target may be on another host.
    Redirect {
        location: String,
        allow_other_host: bool,
    },
}

/// Builds [`BounceResponse`]s relative to the app's public host.
#[derive(Debug, Clone)]
pub struct BounceRedirectBuilder {
    host: String,
}

impl BounceRedirectBuilder {
    #[must_use]
    pub fn new(app_host: &Url) -> Self {
        Self {
            host: app_host.as_str().trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn build(&self, context: &BounceContext) -> BounceResponse {
        if context.background {
            return BounceResponse::Unauthorized {
                body: UnauthorizedBody::unauthorized(),
            };
        }

        let mut params: Vec<(String, String)> = context
            .query
            .iter()
            .filter(|(key, _)| key != ID_TOKEN_PARAM)
            .cloned()
            .collect();
        params.sort();

        let bounce_url = match to_query(&params) {
            query if query.is_empty() => format!("{}{}", self.host, context.path),
            query => format!("{}{}?{query}", self.host, context.path),
        };

        params.retain(|(key, _)| key != RELOAD_PARAM);
        params.push((RELOAD_PARAM.to_owned(), bounce_url));
        params.sort();

        BounceResponse::Redirect {
            location: format!(
                "{}{PATCH_SESSION_TOKEN_PATH}?{}",
                self.host,
                to_query(&params)
            ),
            allow_other_host: true,
        }
    }
}

fn to_query(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}
