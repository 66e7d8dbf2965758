use std::sync::Arc;

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{Result, TutorError};
use crate::message::ChatExchange;

/// Persistence contract for chat exchanges.
///
/// `recent` and `history` return rows newest first. A `session_id` of `None`
/// spans every session of the user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, exchange: &ChatExchange) -> Result<()>;
    async fn recent(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatExchange>>;
    async fn history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatExchange>> {
        self.recent(user_id, session_id, limit).await
    }
    /// Returns the number of exchanges removed.
    async fn clear(&self, user_id: &str, session_id: Option<&str>) -> Result<u64>;
}

fn matches_scope(exchange: &ChatExchange, user_id: &str, session_id: Option<&str>) -> bool {
    exchange.user_id == user_id
        && session_id.map_or(true, |session| exchange.session_id.as_deref() == Some(session))
}

pub async fn open_store(cfg: &StorageConfig) -> Result<Arc<dyn ConversationStore>> {
    let store: Arc<dyn ConversationStore> = match cfg.backend {
        StorageBackend::File => Arc::new(FileConversationStore::new(cfg.file_path.clone())),
        #[cfg(feature = "persistence")]
        StorageBackend::Sqlite => {
            let url = cfg.database_url.as_deref().ok_or_else(|| {
                TutorError::Config("sqlite backend requires `database_url`".into())
            })?;
            Arc::new(SqlConversationStore::connect(url).await?)
        }
        #[cfg(not(feature = "persistence"))]
        StorageBackend::Sqlite => {
            return Err(TutorError::Config(
                "sqlite backend requires the `persistence` feature".into(),
            ))
        }
    };
    Ok(store)
}

/// A JSONL-based store, one exchange per line.
pub struct FileConversationStore {
    path: String,
    lock: Mutex<()>,
}

impl FileConversationStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<ChatExchange>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(TutorError::Storage(format!(
                    "failed to read transcript `{}`: {err}",
                    self.path
                )))
            }
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|err| {
                    TutorError::Storage(format!("invalid exchange in `{}`: {err}", self.path))
                })
            })
            .collect()
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn append(&self, exchange: &ChatExchange) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut serialized = serde_json::to_string(exchange)?;
        serialized.push('\n');
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| TutorError::Storage(format!("failed to open `{}`: {err}", self.path)))?
            .write_all(serialized.as_bytes())
            .await
            .map_err(|err| TutorError::Storage(format!("failed to persist exchange: {err}")))
    }

    async fn recent(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatExchange>> {
        let _guard = self.lock.lock().await;
        let mut rows: Vec<ChatExchange> = self
            .load()
            .await?
            .into_iter()
            .filter(|exchange| matches_scope(exchange, user_id, session_id))
            .collect();
        // file order is append order; reverse first so ties keep newest-first
        rows.reverse();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn clear(&self, user_id: &str, session_id: Option<&str>) -> Result<u64> {
        let _guard = self.lock.lock().await;
        let rows = self.load().await?;
        let before = rows.len();
        let kept: Vec<ChatExchange> = rows
            .into_iter()
            .filter(|exchange| !matches_scope(exchange, user_id, session_id))
            .collect();
        let removed = (before - kept.len()) as u64;
        if removed == 0 {
            return Ok(0);
        }

        let mut serialized = String::new();
        for exchange in &kept {
            serialized.push_str(&serde_json::to_string(exchange)?);
            serialized.push('\n');
        }
        // the transcript is only ever replaced whole
        let staging = format!("{}.tmp", self.path);
        fs::write(&staging, serialized)
            .await
            .map_err(|err| TutorError::Storage(format!("failed writing `{staging}`: {err}")))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|err| TutorError::Storage(format!("failed clearing `{}`: {err}", self.path)))?;
        Ok(removed)
    }
}

#[cfg(feature = "persistence")]
pub use sql::SqlConversationStore;

#[cfg(feature = "persistence")]
mod sql {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::{sqlite::SqlitePoolOptions, sqlite::SqliteRow, Row, SqlitePool};
    use uuid::Uuid;

    use super::ConversationStore;
    use crate::error::{Result, TutorError};
    use crate::message::ChatExchange;

    /// SQLite-backed store. Timestamps are kept as epoch milliseconds.
    pub struct SqlConversationStore {
        pool: SqlitePool,
    }

    impl SqlConversationStore {
        const INIT_STATEMENT: &'static str = r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                session_id TEXT,
                message TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            )
        "#;

        pub async fn connect(connection_url: impl AsRef<str>) -> Result<Self> {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(connection_url.as_ref())
                .await
                .map_err(|err| {
                    TutorError::Storage(format!(
                        "failed connecting to SQL backend `{}`: {err}",
                        connection_url.as_ref()
                    ))
                })?;

            sqlx::query(Self::INIT_STATEMENT)
                .execute(&pool)
                .await
                .map_err(|err| TutorError::Storage(format!("failed initializing schema: {err}")))?;

            Ok(Self { pool })
        }

        fn decode(row: SqliteRow) -> Result<ChatExchange> {
            let column = |err: sqlx::Error| {
                TutorError::Storage(format!("failed decoding exchange row: {err}"))
            };
            let id: String = row.try_get("id").map_err(column)?;
            let created_at_ms: i64 = row.try_get("created_at_ms").map_err(column)?;
            Ok(ChatExchange {
                id: Uuid::parse_str(&id)
                    .map_err(|err| TutorError::Storage(format!("invalid exchange id `{id}`: {err}")))?,
                user_id: row.try_get("user_id").map_err(column)?,
                session_id: row.try_get("session_id").map_err(column)?,
                message: row.try_get("message").map_err(column)?,
                response: row.try_get("response").map_err(column)?,
                created_at: DateTime::<Utc>::from_timestamp_millis(created_at_ms).ok_or_else(|| {
                    TutorError::Storage(format!("invalid timestamp {created_at_ms}"))
                })?,
            })
        }
    }

    #[async_trait]
    impl ConversationStore for SqlConversationStore {
        async fn append(&self, exchange: &ChatExchange) -> Result<()> {
            sqlx::query(
                "INSERT INTO chat_messages (id, user_id, session_id, message, response, created_at_ms) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(exchange.id.to_string())
            .bind(&exchange.user_id)
            .bind(exchange.session_id.as_deref())
            .bind(&exchange.message)
            .bind(&exchange.response)
            .bind(exchange.created_at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| TutorError::Storage(format!("failed writing exchange: {err}")))
        }

        async fn recent(
            &self,
            user_id: &str,
            session_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<ChatExchange>> {
            let rows = sqlx::query(
                "SELECT id, user_id, session_id, message, response, created_at_ms \
                 FROM chat_messages \
                 WHERE user_id = ? AND (? IS NULL OR session_id = ?) \
                 ORDER BY created_at_ms DESC, seq DESC \
                 LIMIT ?",
            )
            .bind(user_id)
            .bind(session_id)
            .bind(session_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|err| TutorError::Storage(format!("failed loading exchanges: {err}")))?;

            rows.into_iter().map(Self::decode).collect()
        }

        async fn clear(&self, user_id: &str, session_id: Option<&str>) -> Result<u64> {
            sqlx::query("DELETE FROM chat_messages WHERE user_id = ? AND (? IS NULL OR session_id = ?)")
                .bind(user_id)
                .bind(session_id)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .map(|done| done.rows_affected())
                .map_err(|err| TutorError::Storage(format!("failed clearing exchanges: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn exchange(user: &str, session: Option<&str>, i: i64) -> ChatExchange {
        let base = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        ChatExchange::new(user, session.map(str::to_string), format!("q{i}"), format!("a{i}"))
            .at(base + Duration::minutes(i))
    }

    async fn exercise(store: &dyn ConversationStore) {
        for i in 0..4 {
            store.append(&exchange("stu-1", Some("s1"), i)).await.unwrap();
        }
        store.append(&exchange("stu-1", Some("s2"), 10)).await.unwrap();
        store.append(&exchange("stu-2", None, 11)).await.unwrap();

        let recent = store.recent("stu-1", None, 3).await.unwrap();
        let messages: Vec<&str> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["q10", "q3", "q2"]);

        let scoped = store.history("stu-1", Some("s1"), 20).await.unwrap();
        assert_eq!(scoped.len(), 4);
        assert_eq!(scoped[0].message, "q3");
        assert_eq!(scoped[0].session_id.as_deref(), Some("s1"));

        assert_eq!(store.clear("stu-1", Some("s2")).await.unwrap(), 1);
        assert_eq!(store.recent("stu-1", None, 20).await.unwrap().len(), 4);
        assert_eq!(store.clear("stu-1", None).await.unwrap(), 4);
        assert!(store.recent("stu-1", None, 20).await.unwrap().is_empty());
        assert_eq!(store.recent("stu-2", None, 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_scopes_and_orders() {
        let file = NamedTempFile::new().unwrap();
        let store = FileConversationStore::new(file.path().to_str().unwrap());
        exercise(&store).await;
    }

    #[tokio::test]
    async fn file_store_clear_replaces_transcript_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.jsonl");
        let store = FileConversationStore::new(path.to_str().unwrap());
        store.append(&exchange("stu-1", None, 0)).await.unwrap();
        store.append(&exchange("stu-2", None, 1)).await.unwrap();
        store.append(&exchange("stu-1", None, 2)).await.unwrap();

        assert_eq!(store.clear("stu-1", None).await.unwrap(), 2);

        let survivors = store.recent("stu-2", None, 10).await.unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].message, "q1");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("chat.jsonl")]);
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConversationStore::new(dir.path().join("absent.jsonl").to_str().unwrap());
        assert!(store.recent("stu-1", None, 5).await.unwrap().is_empty());
        assert_eq!(store.clear("stu-1", None).await.unwrap(), 0);
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn sqlite_store_scopes_and_orders() {
        let store = SqlConversationStore::connect("sqlite::memory:").await.unwrap();
        exercise(&store).await;
    }

    #[cfg(feature = "persistence")]
    #[tokio::test]
    async fn sqlite_round_trips_fields() {
        let store = SqlConversationStore::connect("sqlite::memory:").await.unwrap();
        let stored = exchange("stu-9", Some("s9"), 3);
        store.append(&stored).await.unwrap();

        let loaded = store.recent("stu-9", Some("s9"), 1).await.unwrap();
        assert_eq!(loaded, vec![stored]);
    }

    #[tokio::test]
    async fn open_store_requires_database_url_for_sqlite() {
        let cfg = StorageConfig {
            backend: StorageBackend::Sqlite,
            ..StorageConfig::default()
        };
        assert!(matches!(open_store(&cfg).await, Err(TutorError::Config(_))));
    }
}
