//! Persistence layer — libSQL-backed storage for users, conversations,
//! and the short-lived per-user routing records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ConversationRecord, ConversationStatus, Database, PendingConfirmationRecord,
    SuggestionContextRecord, UserRecord,
};
