//! `ChatDatabase` trait: read access to the chat application's database.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Backend-agnostic query interface used by `/query` and the chat log poller.
#[async_trait]
pub trait ChatDatabase: Send + Sync {
    /// Run `sql` with positional `bind` parameters (`?1`, `?2`, …) and return every row.
    ///
    /// Bind values map JSON strings to TEXT, integers to INTEGER, other numbers
    /// to REAL, booleans to 0/1 and `null` to NULL.
    async fn query(&self, sql: &str, bind: &[serde_json::Value]) -> Result<Vec<Row>, DatabaseError>;
}
