use super::models::ConversationTurn;
use crate::core::errors::ContextError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// What an archive hands back for a session it has seen before.
#[derive(Debug, Clone, Default)]
pub struct ArchivedSession {
    /// Oldest first.
    pub turns: Vec<ConversationTurn>,
    pub entities: HashMap<String, String>,
}

impl ArchivedSession {
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.entities.is_empty()
    }
}

/// Optional persistence behind the context store.
///
/// Without one, sessions live only as long as the process.
#[async_trait]
pub trait TurnArchive: Send + Sync {
    /// Stores `turn` and drops all but the newest `max_turns` for the session.
    async fn append_turn(
        &self,
        session_id: &str,
        turn: &ConversationTurn,
        max_turns: usize,
    ) -> Result<(), ContextError>;

    async fn save_entity(&self, session_id: &str, key: &str, value: &str)
        -> Result<(), ContextError>;

    /// Loads at most `max_turns` of the newest turns plus all entities.
    ///
    /// A session idle for longer than `ttl` is forgotten and comes back
    /// empty. Loading counts as activity.
    async fn load(
        &self,
        session_id: &str,
        max_turns: usize,
        ttl: Option<Duration>,
    ) -> Result<ArchivedSession, ContextError>;

    async fn forget(&self, session_id: &str) -> Result<(), ContextError>;
}
