//! Chat history, persisted to SQLite. Auxiliary store: the schema is
//! private to this crate and recreated on open.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS chat_history (
                 chat_id    TEXT NOT NULL,
                 user_id    TEXT NOT NULL,
                 message    TEXT NOT NULL,
                 response   TEXT NOT NULL,
                 timestamp  TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_history_chat ON chat_history(chat_id, timestamp);
             CREATE TABLE IF NOT EXISTS user_stats (
                 user_id       TEXT PRIMARY KEY,
                 message_count INTEGER NOT NULL DEFAULT 0,
                 last_seen     TEXT NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn record(
        &self,
        chat_id: &str,
        user_id: &str,
        message: &str,
        response: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chat_history (chat_id, user_id, message, response, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chat_id, user_id, message, response, now],
        )?;
        conn.execute(
            "INSERT INTO user_stats (user_id, message_count, last_seen)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                 message_count = message_count + 1,
                 last_seen = ?2",
            params![user_id, now],
        )?;
        Ok(())
    }

    /// Chronological `(message, response)` pairs for one chat.
    pub async fn history(&self, chat_id: &str, limit: usize) -> anyhow::Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT message, response FROM chat_history
             WHERE chat_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let mut rows: Vec<(String, String)> = stmt
            .query_map(params![chat_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn message_count(&self, user_id: &str) -> anyhow::Result<u64> {
        let conn = self.conn.lock().await;
        let count = conn
            .query_row(
                "SELECT message_count FROM user_stats WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }
}
