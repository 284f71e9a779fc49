use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

use crate::bounce::BounceContext;
use crate::exchange::TokenExchange;
use crate::orchestrator::{Handled, SessionOrchestrator};
use crate::store::SessionStore;

/// Header App Bridge sets on `fetch` requests it authenticates.
pub const X_REQUESTED_WITH: &str = "x-requested-with";

/// Wrap every route of `router` in [`require_session`].
pub fn protect<R, S, X>(router: Router<R>, orchestrator: SessionOrchestrator<S, X>) -> Router<R>
where
    R: Clone + Send + Sync + 'static,
    S: SessionStore,
    X: TokenExchange,
{
    router.layer(middleware::from_fn_with_state(
        orchestrator,
        require_session::<S, X>,
    ))
}

/// Resolve the request's session and run the rest of the stack with it
/// activated.
///
/// Missing or invalid identity tokens are answered with a bounce: `401`
/// plus the retry header for background requests, a `302` to
/// `/patch_session_token` otherwise. Fatal errors become `500`.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/orders", get(orders))
///     .layer(axum::middleware::from_fn_with_state(orchestrator, require_session));
/// ```
pub async fn require_session<S: SessionStore, X: TokenExchange>(
    State(orchestrator): State<SessionOrchestrator<S, X>>,
    req: Request,
    next: Next,
) -> Response {
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bounce = bounce_context(&req);

    let handled = orchestrator
        .run(authorization.as_deref(), &bounce, move |ctx| async move {
            let mut req = req;
            req.extensions_mut().insert(ctx);
            next.run(req).await
        })
        .await;

    match handled {
        Ok(Handled::Completed(response)) => response,
        Ok(Handled::Bounced(response)) => response.into_response(),
        Err(err) => err.into_response(),
    }
}

fn bounce_context(req: &Request) -> BounceContext {
    let background = req
        .headers()
        .get(X_REQUESTED_WITH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    BounceContext::new(req.uri().path(), req.uri().query(), background)
}
