// Per-session conversation state.
//
// Sessions live in a DashMap keyed by session id. Each value is its own
// tokio Mutex, so a turn holds exactly one session locked while unrelated
// sessions keep moving. DashMap shard guards are never held across an await.

use super::models::{ConversationTurn, Session};
use super::turn_archive::TurnArchive;
use crate::core::errors::ContextError;
use dashmap::DashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct ContextStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
    max_turns: usize,
    ttl: Option<Duration>,
    archive: Option<Arc<dyn TurnArchive>>,
}

impl ContextStore {
    pub fn new(max_turns: usize, ttl: Option<Duration>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns: max_turns.max(1),
            ttl,
            archive: None,
        }
    }

    /// Writes turns and entities through to `archive` and hydrates sessions
    /// from it on first use.
    pub fn with_archive(mut self, archive: Arc<dyn TurnArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Locks the session for `session_id`, creating it if needed.
    ///
    /// The returned handle keeps the session locked until dropped, so a whole
    /// turn (resolve, dispatch, record) runs without interleaving.
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionHandle, ContextError> {
        self.sweep_expired().await;

        let mut guard = loop {
            let slot = {
                let entry = self
                    .sessions
                    .entry(session_id.to_string())
                    .or_insert_with(|| {
                        tracing::debug!(session_id, "Creating session");
                        Arc::new(Mutex::new(Session::new(session_id)))
                    });
                Arc::clone(entry.value())
            };

            let guard = Arc::clone(&slot).lock_owned().await;
            // A clear or sweep may have removed the slot while we waited.
            let current = self
                .sessions
                .get(session_id)
                .map(|entry| Arc::ptr_eq(entry.value(), &slot))
                .unwrap_or(false);
            if current {
                break guard;
            }
            tracing::debug!(session_id, "Session was replaced while waiting, retrying");
        };
        guard.touch();

        if !guard.hydrated {
            if let Some(archive) = &self.archive {
                let archived = archive.load(session_id, self.max_turns, self.ttl).await?;
                if !archived.is_empty() {
                    tracing::info!(
                        session_id,
                        turns = archived.turns.len(),
                        entities = archived.entities.len(),
                        "Hydrated session from archive"
                    );
                }
                for turn in archived.turns {
                    guard.push_turn(turn, self.max_turns);
                }
                guard.entities.extend(archived.entities);
            }
            guard.hydrated = true;
        }

        Ok(SessionHandle {
            guard,
            max_turns: self.max_turns,
            archive: self.archive.clone(),
        })
    }

    pub async fn append(&self, session_id: &str, turn: ConversationTurn) -> Result<(), ContextError> {
        let mut session = self.get_or_create(session_id).await?;
        session.append(turn).await;
        Ok(())
    }

    pub async fn remember(
        &self,
        session_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ContextError> {
        let mut session = self.get_or_create(session_id).await?;
        session.remember(key, value).await;
        Ok(())
    }

    /// Looks up a remembered entity without creating the session.
    pub async fn recall(&self, session_id: &str, key: &str) -> Option<String> {
        let slot = self.sessions.get(session_id).map(|s| Arc::clone(s.value()))?;
        let session = slot.lock().await;
        session.recall(key).map(str::to_string)
    }

    /// Drops the session and anything archived for it.
    pub async fn clear(&self, session_id: &str) -> Result<(), ContextError> {
        let removed = self.sessions.remove(session_id).is_some();
        if let Some(archive) = &self.archive {
            archive.forget(session_id).await?;
        }
        tracing::info!(session_id, removed, "Cleared session");
        Ok(())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drops sessions idle for longer than the TTL.
    ///
    /// Runs opportunistically from `get_or_create`. Sessions that are locked
    /// right now are in use and therefore not idle, so they are skipped.
    async fn sweep_expired(&self) {
        let Some(ttl) = self.ttl else {
            return;
        };

        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map(|session| session.last_active.elapsed() > ttl)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for session_id in expired {
            self.sessions.remove(&session_id);
            tracing::debug!(session_id = %session_id, "Session expired");
            if let Some(archive) = &self.archive {
                if let Err(e) = archive.forget(&session_id).await {
                    tracing::warn!(session_id = %session_id, "Failed to forget expired session: {}", e);
                }
            }
        }
    }
}

/// Exclusive access to one session for the length of a turn.
///
/// Reads go through `Deref`; writes go through [`append`](Self::append) and
/// [`remember`](Self::remember) so they reach the archive too.
pub struct SessionHandle {
    guard: OwnedMutexGuard<Session>,
    max_turns: usize,
    archive: Option<Arc<dyn TurnArchive>>,
}

impl SessionHandle {
    pub async fn append(&mut self, turn: ConversationTurn) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.append_turn(&self.guard.id, &turn, self.max_turns).await {
                tracing::warn!(session_id = %self.guard.id, "Failed to archive turn: {}", e);
            }
        }

        let evicted = self.guard.push_turn(turn, self.max_turns);
        if evicted > 0 {
            tracing::debug!(session_id = %self.guard.id, evicted, "Evicted old turns");
        }
    }

    pub async fn remember(&mut self, key: &str, value: &str) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.save_entity(&self.guard.id, key, value).await {
                tracing::warn!(session_id = %self.guard.id, key, "Failed to archive entity: {}", e);
            }
        }
        self.guard.remember(key, value);
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::turn_archive::ArchivedSession;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn turn(text: &str) -> ConversationTurn {
        ConversationTurn::clarification(text, "which one?")
    }

    #[derive(Default)]
    struct MemoryArchive {
        turns: DashMap<String, Vec<ConversationTurn>>,
        entities: DashMap<String, HashMap<String, String>>,
    }

    #[async_trait]
    impl TurnArchive for MemoryArchive {
        async fn append_turn(
            &self,
            session_id: &str,
            turn: &ConversationTurn,
            max_turns: usize,
        ) -> Result<(), ContextError> {
            let mut turns = self.turns.entry(session_id.to_string()).or_default();
            turns.push(turn.clone());
            let excess = turns.len().saturating_sub(max_turns);
            turns.drain(..excess);
            Ok(())
        }

        async fn save_entity(
            &self,
            session_id: &str,
            key: &str,
            value: &str,
        ) -> Result<(), ContextError> {
            self.entities
                .entry(session_id.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn load(
            &self,
            session_id: &str,
            max_turns: usize,
            _ttl: Option<Duration>,
        ) -> Result<ArchivedSession, ContextError> {
            let turns = self
                .turns
                .get(session_id)
                .map(|t| {
                    let skip = t.len().saturating_sub(max_turns);
                    t.iter().skip(skip).cloned().collect()
                })
                .unwrap_or_default();
            let entities = self
                .entities
                .get(session_id)
                .map(|e| e.value().clone())
                .unwrap_or_default();
            Ok(ArchivedSession { turns, entities })
        }

        async fn forget(&self, session_id: &str) -> Result<(), ContextError> {
            self.turns.remove(session_id);
            self.entities.remove(session_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn remember_then_recall_returns_value() {
        let store = ContextStore::new(10, None);
        store.append("a", turn("hello")).await.unwrap();
        store.remember("a", "document.last_id", "doc-1").await.unwrap();
        assert_eq!(
            store.recall("a", "document.last_id").await,
            Some("doc-1".to_string())
        );
    }

    #[tokio::test]
    async fn sessions_never_see_each_others_entities() {
        let store = ContextStore::new(10, None);
        store.remember("a", "mail.last_recipient", "a@x.com").await.unwrap();
        store.remember("b", "mail.last_recipient", "b@x.com").await.unwrap();

        assert_eq!(
            store.recall("a", "mail.last_recipient").await.as_deref(),
            Some("a@x.com")
        );
        assert_eq!(
            store.recall("b", "mail.last_recipient").await.as_deref(),
            Some("b@x.com")
        );

        store.remember("a", "document.last_id", "doc-a").await.unwrap();
        assert_eq!(store.recall("b", "document.last_id").await, None);
    }

    #[tokio::test]
    async fn recall_does_not_create_sessions() {
        let store = ContextStore::new(10, None);
        assert_eq!(store.recall("ghost", "x").await, None);
        assert_eq!(store.session_count(), 0);
    }

    #[tokio::test]
    async fn append_evicts_past_cap() {
        let store = ContextStore::new(2, None);
        for i in 0..4 {
            store.append("s", turn(&i.to_string())).await.unwrap();
        }
        let session = store.get_or_create("s").await.unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[0].request_text, "2");
    }

    #[tokio::test]
    async fn clear_drops_turns_and_entities() {
        let store = ContextStore::new(10, None);
        store.append("s", turn("one")).await.unwrap();
        store.remember("s", "k", "v").await.unwrap();
        store.clear("s").await.unwrap();

        assert_eq!(store.recall("s", "k").await, None);
        let session = store.get_or_create("s").await.unwrap();
        assert!(session.turns.is_empty());
    }

    #[tokio::test]
    async fn idle_sessions_expire_on_next_access() {
        let store = ContextStore::new(10, Some(Duration::from_millis(20)));
        store.remember("old", "k", "v").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _fresh = store.get_or_create("new").await.unwrap();
        assert_eq!(store.recall("old", "k").await, None);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn same_session_is_serialized() {
        let store = Arc::new(ContextStore::new(10, None));
        let held = store.get_or_create("s").await.unwrap();

        let other = Arc::clone(&store);
        let waiter = tokio::spawn(async move { other.get_or_create("s").await.map(|_| ()) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different session is not blocked.
        let _b = store.get_or_create("other").await.unwrap();

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn archive_round_trip_hydrates_new_store() {
        let archive = Arc::new(MemoryArchive::default());

        let first = ContextStore::new(10, None).with_archive(archive.clone());
        first.append("s", turn("create the plan")).await.unwrap();
        first.remember("s", "document.last_id", "doc-9").await.unwrap();

        let second = ContextStore::new(10, None).with_archive(archive.clone());
        let session = second.get_or_create("s").await.unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.recall("document.last_id"), Some("doc-9"));
        drop(session);

        second.clear("s").await.unwrap();
        assert!(archive.turns.get("s").is_none());
    }

    #[tokio::test]
    async fn archive_keeps_only_the_turn_cap() {
        let archive = Arc::new(MemoryArchive::default());
        let store = ContextStore::new(2, None).with_archive(archive.clone());
        for i in 0..7 {
            store.append("s", turn(&i.to_string())).await.unwrap();
        }
        let archived = archive.turns.get("s").unwrap().value().clone();
        let texts: Vec<&str> = archived.iter().map(|t| t.request_text.as_str()).collect();
        assert_eq!(texts, vec!["5", "6"]);
    }

    #[tokio::test]
    async fn turn_waiting_on_a_cleared_session_lands_in_the_live_one() {
        let store = Arc::new(ContextStore::new(10, None));
        let held = store.get_or_create("s").await.unwrap();

        let other = Arc::clone(&store);
        let waiter = tokio::spawn(async move {
            let mut session = other.get_or_create("s").await.unwrap();
            session.remember("document.last_id", "doc-1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.clear("s").await.unwrap();
        drop(held);
        waiter.await.unwrap();

        assert_eq!(
            store.recall("s", "document.last_id").await.as_deref(),
            Some("doc-1")
        );
    }
}
