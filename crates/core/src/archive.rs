use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::session::{Session, SessionId};
use crate::domain::turn::Turn;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive storage failure: {0}")]
    Storage(String),
    #[error("archive encode failure: {0}")]
    Encode(String),
}

/// Downstream consumer of committed conversation state. The in-memory session store stays
/// authoritative; archive writes happen after commit while the session is still locked.
#[async_trait]
pub trait ConversationArchive: Send + Sync {
    async fn record_session(&self, session: &Session) -> Result<(), ArchiveError>;
    async fn record_turn(&self, session_id: &SessionId, turn: &Turn) -> Result<(), ArchiveError>;
}

#[derive(Clone, Default)]
pub struct InMemoryConversationArchive {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    turns: Arc<RwLock<HashMap<SessionId, Vec<Turn>>>>,
}

impl InMemoryConversationArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn turns(&self, id: &SessionId) -> Vec<Turn> {
        self.turns.read().await.get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ConversationArchive for InMemoryConversationArchive {
    async fn record_session(&self, session: &Session) -> Result<(), ArchiveError> {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&session.id).is_some_and(Session::is_closed) {
            return Ok(());
        }
        let mut summary = session.clone();
        summary.turns.clear();
        sessions.insert(session.id.clone(), summary);
        Ok(())
    }

    async fn record_turn(&self, session_id: &SessionId, turn: &Turn) -> Result<(), ArchiveError> {
        let mut turns = self.turns.write().await;
        let entries = turns.entry(session_id.clone()).or_default();
        if entries.iter().any(|existing| existing.number == turn.number) {
            return Ok(());
        }
        let mut stored = turn.clone();
        stored.private_original = None;
        entries.push(stored);
        Ok(())
    }
}
