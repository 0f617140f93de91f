use crate::session::{SessionManager, SessionStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,

    /// Live sessions (session_id → status feed). Read-only views; each
    /// session's own control task is the only writer of its state.
    pub sessions: Arc<RwLock<HashMap<Uuid, watch::Receiver<SessionStatus>>>>,
}

impl AppState {
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn snapshot(&self) -> Vec<SessionStatus> {
        let sessions = self.sessions.read().await;
        let mut statuses: Vec<SessionStatus> =
            sessions.values().map(|rx| rx.borrow().clone()).collect();
        statuses.sort_by_key(|s| s.started_at);
        statuses
    }
}
