//! Chat database access.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlChatDatabase;
pub use traits::{ChatDatabase, Row};
