//! libSQL backend: async `ChatDatabase` implementation.
//!
//! Opens the chat application's SQLite file read-mostly; the gateway never
//! migrates or writes its schema.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use libsql::{Connection, Database as LibSqlDatabase, params::Params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::traits::{ChatDatabase, Row};

/// libSQL chat database.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlChatDatabase {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlChatDatabase {
    /// Open an existing local database file.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if !path.exists() {
            return Err(DatabaseError::Connection(format!(
                "chat database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        info!(path = %path.display(), "Chat database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Run a statement batch. Used to seed fixtures in tests.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(sql)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Convert a JSON bind parameter to a libsql Value.
fn json_to_value(v: &serde_json::Value) -> libsql::Value {
    match v {
        serde_json::Value::Null => libsql::Value::Null,
        serde_json::Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => libsql::Value::Integer(i),
            None => libsql::Value::Real(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => libsql::Value::Text(s.clone()),
        // Nested structures are bound as their JSON text.
        other => libsql::Value::Text(other.to_string()),
    }
}

/// Convert a column value to JSON. Blobs become base64 strings.
fn value_to_json(v: libsql::Value) -> serde_json::Value {
    match v {
        libsql::Value::Null => serde_json::Value::Null,
        libsql::Value::Integer(i) => serde_json::Value::from(i),
        libsql::Value::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        libsql::Value::Text(s) => serde_json::Value::String(s),
        libsql::Value::Blob(b) => serde_json::Value::String(STANDARD.encode(b)),
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl ChatDatabase for LibSqlChatDatabase {
    async fn query(&self, sql: &str, bind: &[serde_json::Value]) -> Result<Vec<Row>, DatabaseError> {
        let params = Params::Positional(bind.iter().map(json_to_value).collect());
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let columns: Vec<String> = (0..rows.column_count())
            .map(|i| rows.column_name(i).unwrap_or_default().to_string())
            .collect();

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                let value = row
                    .get_value(i as i32)
                    .map_err(|e| DatabaseError::Query(e.to_string()))?;
                record.insert(name.clone(), value_to_json(value));
            }
            out.push(record);
        }

        debug!(rows = out.len(), "Chat query executed");
        Ok(out)
    }
}
