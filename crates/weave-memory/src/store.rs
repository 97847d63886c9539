use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use weave_core::error::{Result, WeaveError};
use weave_core::traits::AuditSink;
use weave_core::types::{AuditRecord, Role, StepKind, StepOutcome};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        meta TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tool_outputs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        step_id TEXT NOT NULL,
        tool_name TEXT NOT NULL,
        output TEXT NOT NULL,
        is_error INTEGER NOT NULL,
        timestamp TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tool_outputs_name
        ON tool_outputs(tool_name, id);";

/// A persisted conversation message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub meta: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// A persisted tool step output.
#[derive(Debug, Clone)]
pub struct StoredToolOutput {
    pub step_id: String,
    pub tool_name: String,
    pub output: String,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed store of conversation messages and tool outputs.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeaveError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| WeaveError::Database(e.to_string()))?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WeaveError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeaveError::Database(e.to_string()))?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| WeaveError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeaveError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WeaveError::Database(e.to_string()))
    }

    /// Save a conversation message.
    pub fn save_message(&self, role: Role, content: &str, meta: &serde_json::Value) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO messages (role, content, meta, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![role.as_str(), content, meta.to_string(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| WeaveError::Database(e.to_string()))?;
        Ok(())
    }

    /// Save the output of a tool step.
    pub fn save_tool_output(
        &self,
        step_id: &str,
        tool_name: &str,
        outcome: &StepOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tool_outputs (step_id, tool_name, output, is_error, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                step_id,
                tool_name,
                outcome.render(),
                !outcome.is_success(),
                timestamp.to_rfc3339()
            ],
        )
        .map_err(|e| WeaveError::Database(e.to_string()))?;
        Ok(())
    }

    /// Most recent messages, oldest first.
    pub fn recent_messages(&self, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT role, content, meta, timestamp FROM messages
                 ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| WeaveError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| WeaveError::Database(e.to_string()))?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, meta, ts) = row.map_err(|e| WeaveError::Database(e.to_string()))?;
            messages.push(StoredMessage {
                role,
                content,
                meta: serde_json::from_str(&meta).unwrap_or(serde_json::Value::Null),
                timestamp: parse_ts(&ts),
            });
        }
        messages.reverse();
        Ok(messages)
    }

    /// Most recent outputs of a tool, oldest first.
    pub fn tool_outputs(&self, tool_name: &str, limit: usize) -> Result<Vec<StoredToolOutput>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT step_id, tool_name, output, is_error, timestamp FROM tool_outputs
                 WHERE tool_name = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| WeaveError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![tool_name, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| WeaveError::Database(e.to_string()))?;

        let mut outputs = Vec::new();
        for row in rows {
            let (step_id, tool_name, output, is_error, ts) =
                row.map_err(|e| WeaveError::Database(e.to_string()))?;
            outputs.push(StoredToolOutput {
                step_id,
                tool_name,
                output,
                is_error,
                timestamp: parse_ts(&ts),
            });
        }
        outputs.reverse();
        Ok(outputs)
    }
}

fn parse_ts(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl AuditSink for SqliteStore {
    fn record(&self, record: AuditRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match record {
                AuditRecord::Message {
                    role,
                    content,
                    meta,
                } => self.save_message(role, &content, &meta),
                AuditRecord::StepOutput {
                    step_id,
                    kind: StepKind::Tool,
                    name,
                    outcome,
                    timestamp,
                } => self.save_tool_output(&step_id, &name, &outcome, timestamp),
                AuditRecord::StepOutput {
                    step_id,
                    kind: StepKind::Agent,
                    name,
                    outcome,
                    ..
                } => {
                    let meta = serde_json::json!({
                        "agent": name,
                        "step_id": step_id,
                        "is_error": !outcome.is_success(),
                    });
                    self.save_message(Role::Assistant, &outcome.render(), &meta)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load_messages() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .save_message(Role::User, "What is my IP?", &json!({"source": "cli"}))
            .unwrap();
        store
            .save_message(Role::Assistant, "192.168.1.5", &json!({}))
            .unwrap();

        let messages = store.recent_messages(10).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].meta["source"], "cli");
        assert_eq!(messages[1].content, "192.168.1.5");

        let last = store.recent_messages(1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].role, "assistant");
    }

    #[tokio::test]
    async fn test_record_tool_step() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .record(AuditRecord::StepOutput {
                step_id: "s1".into(),
                kind: StepKind::Tool,
                name: "get_ip_address".into(),
                outcome: StepOutcome::text("10.0.0.5"),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        store
            .record(AuditRecord::StepOutput {
                step_id: "s2".into(),
                kind: StepKind::Tool,
                name: "get_ip_address".into(),
                outcome: StepOutcome::Failure("Tool get_ip_address error: boom".into()),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let outputs = store.tool_outputs("get_ip_address", 10).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].output, "10.0.0.5");
        assert!(!outputs[0].is_error);
        assert!(outputs[1].is_error);
        assert!(store.recent_messages(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_agent_step_as_message() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .record(AuditRecord::StepOutput {
                step_id: "s2".into(),
                kind: StepKind::Agent,
                name: "NetAgent".into(),
                outcome: StepOutcome::text("Your IP is private."),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let messages = store.recent_messages(10).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[0].meta["agent"], "NetAgent");
        assert_eq!(messages[0].meta["step_id"], "s2");
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let store = SqliteStore::open(&path).unwrap();
        store.save_message(Role::User, "hi", &json!({})).unwrap();
        assert!(path.exists());
    }
}
