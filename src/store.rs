//! Session persistence.
//!
//! [`SessionStore`] is implemented by the consuming app on top of its own
//! database. [`MemorySessionStore`] is a process-local implementation for
//! development and tests.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::types::{Session, SessionId, StoreOutcome};

/// Boxed error returned by consumer store implementations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer-provided session persistence.
///
/// The backing table must enforce uniqueness on the session id. Concurrent
/// requests racing on the same expired session all exchange tokens and all
/// call [`store`](Self::store); exactly one write wins and the others must
/// get [`StoreOutcome::AlreadyExists`] rather than an error.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStore for PgSessions {
///     async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
///         Ok(self.repo.find(id.as_str()).await?.map(Into::into))
///     }
///
///     async fn store(&self, session: &Session) -> Result<StoreOutcome, StoreError> {
///         match self.repo.upsert(session).await {
///             Ok(()) => Ok(StoreOutcome::Stored),
///             Err(e) if e.is_unique_violation() => Ok(StoreOutcome::AlreadyExists),
///             Err(e) => Err(e.into()),
///         }
///     }
/// }
/// ```
pub trait SessionStore: Send + Sync + 'static {
    /// Look up a session by id.
    fn load(
        &self,
        id: &SessionId,
    ) -> impl Future<Output = Result<Option<Session>, StoreError>> + Send;

    /// Persist a freshly exchanged session, replacing an expired record with
    /// the same id.
    fn store(
        &self,
        session: &Session,
    ) -> impl Future<Output = Result<StoreOutcome, StoreError>> + Send;
}

/// In-memory [`SessionStore`].
///
/// A write lands when the slot is empty or holds an expired session; a live
/// record in the slot means another request won the race.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn store(&self, session: &Session) -> Result<StoreOutcome, StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(StoreOutcome::Stored)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().is_expired_at(OffsetDateTime::now_utc()) {
                    slot.insert(session.clone());
                    Ok(StoreOutcome::Stored)
                } else {
                    Ok(StoreOutcome::AlreadyExists)
                }
            }
        }
    }
}
