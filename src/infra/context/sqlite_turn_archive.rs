use crate::core::context::{ArchivedSession, ConversationTurn, TurnArchive};
use crate::core::errors::ContextError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Session history in SQLite, so conversations survive a restart.
///
/// Turns are stored as JSON; entities as plain key/value rows. Each session
/// also keeps a `last_active` timestamp so idle sessions expire across
/// restarts.
pub struct SqliteTurnArchive {
    pool: Pool<Sqlite>,
}

impl SqliteTurnArchive {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let in_memory = database_url.contains(":memory:");
        if !in_memory && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        // Every in-memory connection is its own database.
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&conn_str)
            .await?;

        let archive = Self { pool };
        archive.migrate().await?;
        Ok(archive)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                turn TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_session_turns_session ON session_turns (session_id, id);",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_entities (
                session_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (session_id, key)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_activity (
                session_id TEXT PRIMARY KEY,
                last_active TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, session_id: &str, at: DateTime<Utc>) -> Result<(), ContextError> {
        sqlx::query(
            r#"
            INSERT INTO session_activity (session_id, last_active)
            VALUES (?, ?)
            ON CONFLICT(session_id) DO UPDATE SET last_active = excluded.last_active
            "#,
        )
        .bind(session_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn last_active(&self, session_id: &str) -> Result<Option<DateTime<Utc>>, ContextError> {
        let row = sqlx::query("SELECT last_active FROM session_activity WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.map(|r| r.get::<DateTime<Utc>, _>("last_active")))
    }
}

fn storage_error(error: impl std::fmt::Display) -> ContextError {
    ContextError::Archive(error.to_string())
}

#[async_trait]
impl TurnArchive for SqliteTurnArchive {
    async fn append_turn(
        &self,
        session_id: &str,
        turn: &ConversationTurn,
        max_turns: usize,
    ) -> Result<(), ContextError> {
        let json = serde_json::to_string(turn).map_err(storage_error)?;
        sqlx::query("INSERT INTO session_turns (session_id, turn, created_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(json)
            .bind(turn.timestamp)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        sqlx::query(
            r#"
            DELETE FROM session_turns
            WHERE session_id = ?
              AND id NOT IN (
                SELECT id FROM session_turns WHERE session_id = ? ORDER BY id DESC LIMIT ?
              )
            "#,
        )
        .bind(session_id)
        .bind(session_id)
        .bind(max_turns as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        self.touch(session_id, Utc::now()).await
    }

    async fn save_entity(
        &self,
        session_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), ContextError> {
        sqlx::query(
            r#"
            INSERT INTO session_entities (session_id, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(session_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        self.touch(session_id, Utc::now()).await
    }

    async fn load(
        &self,
        session_id: &str,
        max_turns: usize,
        ttl: Option<Duration>,
    ) -> Result<ArchivedSession, ContextError> {
        if let (Some(ttl), Some(last_active)) = (ttl, self.last_active(session_id).await?) {
            let idle = (Utc::now() - last_active).to_std().unwrap_or_default();
            if idle > ttl {
                tracing::info!(session_id, idle_secs = idle.as_secs(), "Archived session expired");
                self.forget(session_id).await?;
                return Ok(ArchivedSession::default());
            }
        }

        // Newest first so LIMIT keeps the tail, then flipped back.
        let rows = sqlx::query(
            "SELECT turn FROM session_turns WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(max_turns as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let raw: String = row.get("turn");
            match serde_json::from_str::<ConversationTurn>(&raw) {
                Ok(turn) => turns.push(turn),
                Err(e) => {
                    tracing::warn!(session_id, "Skipping unreadable archived turn: {}", e)
                }
            }
        }

        let entities: HashMap<String, String> = sqlx::query("SELECT key, value FROM session_entities WHERE session_id = ?")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?
            .iter()
            .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
            .collect();

        if !turns.is_empty() || !entities.is_empty() {
            self.touch(session_id, Utc::now()).await?;
        }
        Ok(ArchivedSession { turns, entities })
    }

    async fn forget(&self, session_id: &str) -> Result<(), ContextError> {
        sqlx::query("DELETE FROM session_turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        sqlx::query("DELETE FROM session_entities WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        sqlx::query("DELETE FROM session_activity WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ContextStore;
    use crate::core::testing::intent;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    async fn archive_at(path: &Path) -> SqliteTurnArchive {
        SqliteTurnArchive::new(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn turns_and_entities_survive_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_owned();
        drop(tmp);

        let archive = archive_at(&path).await;
        let create = intent("document", "create_item", json!({"title": "Q1 Plan"}));
        archive
            .append_turn(
                "s1",
                &ConversationTurn::succeeded("create Q1 Plan", &create, "Created".into(), 1),
                10,
            )
            .await
            .unwrap();
        archive.save_entity("s1", "document.last_id", "doc-1").await.unwrap();
        archive.save_entity("s1", "document.last_id", "doc-2").await.unwrap();
        drop(archive);

        let reopened = archive_at(&path).await;
        let loaded = reopened.load("s1", 10, None).await.unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.turns[0].request_text, "create Q1 Plan");
        assert_eq!(loaded.turns[0].resolved_intent.as_ref(), Some(&create));
        assert_eq!(loaded.entities.get("document.last_id").map(String::as_str), Some("doc-2"));
    }

    #[tokio::test]
    async fn load_keeps_newest_turns_in_order() {
        let archive = SqliteTurnArchive::new("sqlite::memory:").await.unwrap();
        let list = intent("mail", "list_items", json!({}));
        for n in 0..5 {
            archive
                .append_turn(
                    "s1",
                    &ConversationTurn::succeeded(&format!("request {}", n), &list, "ok".into(), 1),
                    10,
                )
                .await
                .unwrap();
        }

        let loaded = archive.load("s1", 3, None).await.unwrap();
        let texts: Vec<&str> = loaded.turns.iter().map(|t| t.request_text.as_str()).collect();
        assert_eq!(texts, vec!["request 2", "request 3", "request 4"]);
    }

    #[tokio::test]
    async fn sessions_are_isolated_and_forgettable() {
        let archive = SqliteTurnArchive::new("sqlite::memory:").await.unwrap();
        archive.save_entity("a", "mail.last_id", "m1").await.unwrap();
        archive.save_entity("b", "mail.last_id", "m2").await.unwrap();

        archive.forget("a").await.unwrap();

        assert!(archive.load("a", 10, None).await.unwrap().is_empty());
        let b = archive.load("b", 10, None).await.unwrap();
        assert_eq!(b.entities.get("mail.last_id").map(String::as_str), Some("m2"));
    }

    #[tokio::test]
    async fn context_store_hydrates_from_archive() {
        let archive: Arc<dyn TurnArchive> =
            Arc::new(SqliteTurnArchive::new("sqlite::memory:").await.unwrap());
        archive.save_entity("s1", "calendar.last_id", "evt-9").await.unwrap();

        let store = ContextStore::new(10, None).with_archive(Arc::clone(&archive));
        let session = store.get_or_create("s1").await.unwrap();
        assert_eq!(session.recall("calendar.last_id"), Some("evt-9"));
    }

    async fn row_count(archive: &SqliteTurnArchive, session_id: &str) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM session_turns WHERE session_id = ?")
            .bind(session_id)
            .fetch_one(&archive.pool)
            .await
            .unwrap()
            .get("n")
    }

    #[tokio::test]
    async fn archive_rows_follow_the_turn_cap() {
        let archive: Arc<dyn TurnArchive> =
            Arc::new(SqliteTurnArchive::new("sqlite::memory:").await.unwrap());
        let store = ContextStore::new(2, None).with_archive(Arc::clone(&archive));
        let list = intent("mail", "list_items", json!({}));
        for n in 0..7 {
            let mut session = store.get_or_create("s1").await.unwrap();
            session
                .append(ConversationTurn::succeeded(&format!("request {}", n), &list, "ok".into(), 1))
                .await;
        }

        let loaded = archive.load("s1", 10, None).await.unwrap();
        let texts: Vec<&str> = loaded.turns.iter().map(|t| t.request_text.as_str()).collect();
        assert_eq!(texts, vec!["request 5", "request 6"]);
    }

    #[tokio::test]
    async fn append_prunes_old_rows() {
        let archive = SqliteTurnArchive::new("sqlite::memory:").await.unwrap();
        let list = intent("mail", "list_items", json!({}));
        for n in 0..7 {
            archive
                .append_turn(
                    "s1",
                    &ConversationTurn::succeeded(&format!("request {}", n), &list, "ok".into(), 1),
                    3,
                )
                .await
                .unwrap();
        }
        assert_eq!(row_count(&archive, "s1").await, 3);
    }

    #[tokio::test]
    async fn idle_archived_session_is_forgotten_on_load() {
        let archive = SqliteTurnArchive::new("sqlite::memory:").await.unwrap();
        archive.save_entity("s1", "mail.last_id", "m1").await.unwrap();
        archive
            .touch("s1", Utc::now() - chrono::Duration::hours(2))
            .await
            .unwrap();

        let loaded = archive
            .load("s1", 10, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(loaded.is_empty());
        assert!(archive.load("s1", 10, None).await.unwrap().is_empty());
        assert_eq!(archive.last_active("s1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn recent_archived_session_survives_ttl() {
        let archive = SqliteTurnArchive::new("sqlite::memory:").await.unwrap();
        archive.save_entity("s1", "mail.last_id", "m1").await.unwrap();

        let loaded = archive
            .load("s1", 10, Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(loaded.entities.get("mail.last_id").map(String::as_str), Some("m1"));
    }
}
