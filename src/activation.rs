//! Request-scoped "current session".
//!
//! Each request gets its own [`SessionContext`]; nothing is shared between
//! concurrent requests. Activation returns an [`ActivationGuard`] whose
//! `Drop` deactivates the session, so deactivation happens exactly once on
//! every exit path: normal return, error, panic, or the request future
//! being dropped.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Session;

/// Handle to the session active for one request.
///
/// Cheap to clone; clones observe the same activation state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    current: Arc<Mutex<Option<Session>>>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` current until the returned guard is dropped.
    #[must_use = "the session is deactivated as soon as the guard is dropped"]
    pub fn activate(&self, session: Session) -> ActivationGuard {
        tracing::debug!(session_id = %session.id, "Activating session");
        *self.current.lock() = Some(session);
        ActivationGuard {
            context: self.clone(),
        }
    }

    /// The active session, if any.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.current.lock().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.lock().is_some()
    }
}

/// Deactivates its session on drop.
#[derive(Debug)]
pub struct ActivationGuard {
    context: SessionContext,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        tracing::debug!("Deactivating session");
        self.context.current.lock().take();
    }
}

/// Run `handler` with `session` active in a fresh [`SessionContext`].
pub async fn with_session<F, Fut, T>(session: Session, handler: F) -> T
where
    F: FnOnce(SessionContext) -> Fut,
    Fut: Future<Output = T>,
{
    let context = SessionContext::new();
    let _guard = context.activate(session);
    handler(context.clone()).await
}
