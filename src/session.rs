//! Query Session Manager
//!
//! Brackets one query's adapter usage. A permit from a semaphore bounds how
//! many sessions run at once (one by default; callers beyond that wait), then
//! the adapter opens its own session. Either step failing fails the query
//! before it does any work.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::model::{AssetModel, SessionId};
use crate::query::{QueryError, QueryResult};

/// Hands out query sessions
#[derive(Debug)]
pub struct SessionManager {
    permits: Arc<Semaphore>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        let max_sessions = max_sessions.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
        }
    }

    /// Open a session against `model`
    pub async fn open(&self, model: &Arc<dyn AssetModel>) -> QueryResult<QuerySession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueryError::SessionUnavailable("engine is closed".to_string()))?;

        let id = model
            .open_session()
            .await
            .map_err(|e| QueryError::SessionUnavailable(e.to_string()))?;

        tracing::debug!(session = %id, adapter = model.name(), "session opened");
        Ok(QuerySession {
            id,
            model: model.clone(),
            closed: false,
            _permit: permit,
        })
    }

    /// Refuse further sessions; sessions already open run to completion
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Sessions currently open
    pub fn active(&self) -> usize {
        if self.permits.is_closed() {
            return 0;
        }
        self.max_sessions
            .saturating_sub(self.permits.available_permits())
    }
}

/// An open adapter session
///
/// Close it with [`QuerySession::close`]; a session dropped without closing
/// is closed in the background.
pub struct QuerySession {
    id: SessionId,
    model: Arc<dyn AssetModel>,
    closed: bool,
    _permit: OwnedSemaphorePermit,
}

impl QuerySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn close(mut self) -> QueryResult<()> {
        self.closed = true;
        let result = self.model.close_session(self.id).await;
        tracing::debug!(session = %self.id, "session closed");
        result.map_err(QueryError::from)
    }
}

impl Drop for QuerySession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let model = self.model.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = model.close_session(id).await {
                        tracing::warn!(session = %id, "failed to close dropped session: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!(session = %id, "session dropped outside a runtime, left open"),
        }
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession").field("id", &self.id).finish()
    }
}
