//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. JSON-typed columns
//! (phase completion, insight, payload snapshots) round-trip through
//! serde.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    ConversationRecord, ConversationStatus, Database, PendingConfirmationRecord,
    SuggestionContextRecord, UserRecord,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async
/// use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and local runs).
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

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Map a row to a ConversationRecord.
///
/// Column order: 0:id, 1:user_id, 2:kind, 3:current_phase, 4:status,
/// 5:phase_completion, 6:insight, 7:created_at, 8:updated_at
fn row_to_conversation(row: &libsql::Row) -> Result<ConversationRecord, DatabaseError> {
    let id_str: String = row.get(0).map_err(query_err)?;
    let user_id: String = row.get(1).map_err(query_err)?;
    let kind: String = row.get(2).map_err(query_err)?;
    let current_phase: i64 = row.get(3).map_err(query_err)?;
    let status_str: String = row.get(4).map_err(query_err)?;
    let completion_str: String = row.get(5).map_err(query_err)?;
    let insight_str: String = row.get(6).map_err(query_err)?;
    let created_str: String = row.get(7).map_err(query_err)?;
    let updated_str: String = row.get(8).map_err(query_err)?;

    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("bad conversation id: {e}")))?;
    let phase_completion: BTreeMap<String, bool> = from_json(&completion_str)?;

    Ok(ConversationRecord {
        id,
        user_id,
        kind,
        current_phase: current_phase.max(0) as usize,
        status: ConversationStatus::parse(&status_str),
        phase_completion,
        insight: from_json(&insight_str)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const CONVERSATION_COLUMNS: &str =
    "id, user_id, kind, current_phase, status, phase_completion, insight, created_at, updated_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, display_name, timezone, created_at FROM users WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let user_id: String = row.get(0).map_err(query_err)?;
        let display_name: Option<String> = row.get::<String>(1).ok();
        let timezone: String = row.get(2).map_err(query_err)?;
        let created_str: String = row.get(3).map_err(query_err)?;

        Ok(Some(UserRecord {
            user_id,
            display_name,
            timezone,
            created_at: parse_datetime(&created_str),
        }))
    }

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), DatabaseError> {
        let display_name = match &user.display_name {
            Some(name) => libsql::Value::from(name.clone()),
            None => libsql::Value::Null,
        };
        self.conn()
            .execute(
                "INSERT INTO users (user_id, display_name, timezone, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                     display_name = excluded.display_name,
                     timezone = excluded.timezone",
                params![
                    user.user_id.as_str(),
                    display_name,
                    user.timezone.as_str(),
                    user.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE users SET display_name = ?2 WHERE user_id = ?1",
                params![user_id, name],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "user".into(),
                id: user_id.into(),
            });
        }
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn active_conversation(
        &self,
        user_id: &str,
        kind: &str,
    ) -> Result<Option<ConversationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE user_id = ?1 AND kind = ?2 AND status = 'active'
                     LIMIT 1"
                ),
                params![user_id, kind],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_conversation(&row)?)),
            None => Ok(None),
        }
    }

    async fn has_completed_conversation(
        &self,
        user_id: &str,
        kind: &str,
    ) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM conversations
                 WHERE user_id = ?1 AND kind = ?2 AND status = 'completed'",
                params![user_id, kind],
            )
            .await
            .map_err(query_err)?;

        let row = rows
            .next()
            .await
            .map_err(query_err)?
            .ok_or_else(|| DatabaseError::Query("COUNT returned no row".into()))?;
        let count: i64 = row.get(0).map_err(query_err)?;
        Ok(count > 0)
    }

    async fn insert_conversation(
        &self,
        conversation: &ConversationRecord,
    ) -> Result<(), DatabaseError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO conversations
                     (id, user_id, kind, current_phase, status, phase_completion, insight,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    conversation.id.to_string(),
                    conversation.user_id.as_str(),
                    conversation.kind.as_str(),
                    conversation.current_phase as i64,
                    conversation.status.as_str(),
                    to_json(&conversation.phase_completion)?,
                    to_json(&conversation.insight)?,
                    conversation.created_at.to_rfc3339(),
                    conversation.updated_at.to_rfc3339()
                ],
            )
            .await;

        result.map_err(|e| {
            let text = e.to_string();
            if text.contains("UNIQUE") {
                DatabaseError::Constraint(format!(
                    "active conversation already exists for ({}, {})",
                    conversation.user_id, conversation.kind
                ))
            } else {
                DatabaseError::Query(text)
            }
        })?;
        Ok(())
    }

    async fn update_conversation(
        &self,
        conversation: &ConversationRecord,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE conversations SET
                     current_phase = ?2,
                     status = ?3,
                     phase_completion = ?4,
                     insight = ?5,
                     updated_at = ?6
                 WHERE id = ?1",
                params![
                    conversation.id.to_string(),
                    conversation.current_phase as i64,
                    conversation.status.as_str(),
                    to_json(&conversation.phase_completion)?,
                    to_json(&conversation.insight)?,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "conversation".into(),
                id: conversation.id.to_string(),
            });
        }
        Ok(())
    }

    // ── Pending confirmations ───────────────────────────────────────

    async fn get_pending_confirmation(
        &self,
        user_id: &str,
    ) -> Result<Option<PendingConfirmationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, payload, source_text, ambiguous_turns, created_at
                 FROM pending_confirmations WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let user_id: String = row.get(0).map_err(query_err)?;
        let payload: String = row.get(1).map_err(query_err)?;
        let source_text: String = row.get(2).map_err(query_err)?;
        let ambiguous_turns: i64 = row.get(3).map_err(query_err)?;
        let created_str: String = row.get(4).map_err(query_err)?;

        Ok(Some(PendingConfirmationRecord {
            user_id,
            buffered: from_json(&payload)?,
            source_text,
            ambiguous_turns: ambiguous_turns.max(0) as u32,
            created_at: parse_datetime(&created_str),
        }))
    }

    async fn upsert_pending_confirmation(
        &self,
        record: &PendingConfirmationRecord,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO pending_confirmations
                     (user_id, payload, source_text, ambiguous_turns, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     payload = excluded.payload,
                     source_text = excluded.source_text,
                     ambiguous_turns = excluded.ambiguous_turns,
                     created_at = excluded.created_at",
                params![
                    record.user_id.as_str(),
                    to_json(&record.buffered)?,
                    record.source_text.as_str(),
                    record.ambiguous_turns as i64,
                    record.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_pending_confirmation(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM pending_confirmations WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Suggestion contexts ─────────────────────────────────────────

    async fn get_suggestion_context(
        &self,
        user_id: &str,
    ) -> Result<Option<SuggestionContextRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, payload, created_at FROM suggestion_contexts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let user_id: String = row.get(0).map_err(query_err)?;
        let payload: String = row.get(1).map_err(query_err)?;
        let created_str: String = row.get(2).map_err(query_err)?;

        Ok(Some(SuggestionContextRecord {
            user_id,
            set: from_json(&payload)?,
            created_at: parse_datetime(&created_str),
        }))
    }

    async fn upsert_suggestion_context(
        &self,
        record: &SuggestionContextRecord,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO suggestion_contexts (user_id, payload, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     payload = excluded.payload,
                     created_at = excluded.created_at",
                params![
                    record.user_id.as_str(),
                    to_json(&record.set)?,
                    record.created_at.to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete_suggestion_context(&self, user_id: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "DELETE FROM suggestion_contexts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Idempotency ─────────────────────────────────────────────────

    async fn recent_reply(
        &self,
        user_id: &str,
        content: &str,
        window: Duration,
    ) -> Result<Option<String>, DatabaseError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(2));

        let mut rows = self
            .conn()
            .query(
                "SELECT reply FROM processed_messages
                 WHERE user_id = ?1 AND content = ?2 AND processed_at >= ?3
                 ORDER BY processed_at DESC LIMIT 1",
                params![user_id, content, cutoff.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn record_processed(
        &self,
        user_id: &str,
        content: &str,
        reply: &str,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO processed_messages (id, user_id, content, reply, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    content,
                    reply,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn prune_processed(&self, older_than: Duration) -> Result<usize, DatabaseError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::hours(1));

        let deleted = self
            .conn()
            .execute(
                "DELETE FROM processed_messages WHERE processed_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        Ok(deleted as usize)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::Tz;

    use crate::onboarding::phases::KIND_ONBOARDING;
    use crate::parser::EventCandidate;
    use crate::scheduler::BufferedEvent;

    use super::*;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn buffered_fixture() -> BufferedEvent {
        let tz: Tz = "America/New_York".parse().unwrap();
        let start = tz.with_ymd_and_hms(2026, 3, 3, 15, 0, 0).unwrap();
        BufferedEvent {
            candidate: EventCandidate {
                title: "meeting with John".into(),
                start: start.with_timezone(&Utc),
                duration_minutes: 60,
                confidence: 0.85,
                source_text: "meeting with John tomorrow at 3pm".into(),
                timezone: tz,
            },
            pre_minutes: 15,
            post_minutes: 15,
            conflicts: vec![],
            buffer_applied: true,
        }
    }

    #[tokio::test]
    async fn user_roundtrip_and_rename() {
        let db = backend().await;
        assert!(db.get_user("u1").await.unwrap().is_none());

        let user = UserRecord::new("u1", "America/New_York");
        db.upsert_user(&user).await.unwrap();

        let loaded = db.get_user("u1").await.unwrap().unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.timezone, "America/New_York");
        assert!(loaded.display_name.is_none());

        db.set_display_name("u1", "Dana").await.unwrap();
        let renamed = db.get_user("u1").await.unwrap().unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("Dana"));
    }

    #[tokio::test]
    async fn set_display_name_for_missing_user_fails() {
        let db = backend().await;
        let result = db.set_display_name("ghost", "Nobody").await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn conversation_lifecycle() {
        let db = backend().await;
        db.upsert_user(&UserRecord::new("u1", "UTC")).await.unwrap();

        assert!(
            db.active_conversation("u1", KIND_ONBOARDING)
                .await
                .unwrap()
                .is_none()
        );

        let mut conversation = ConversationRecord::new("u1", KIND_ONBOARDING);
        conversation
            .phase_completion
            .insert("welcome".into(), false);
        db.insert_conversation(&conversation).await.unwrap();

        let loaded = db
            .active_conversation("u1", KIND_ONBOARDING)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, conversation.id);
        assert_eq!(loaded.current_phase, 0);
        assert_eq!(loaded.phase_completion.get("welcome"), Some(&false));

        // Advance a phase and complete the conversation.
        conversation.current_phase = 1;
        conversation.phase_completion.insert("welcome".into(), true);
        conversation.insight.priorities.push("health".into());
        conversation.status = ConversationStatus::Completed;
        db.update_conversation(&conversation).await.unwrap();

        assert!(
            db.active_conversation("u1", KIND_ONBOARDING)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            db.has_completed_conversation("u1", KIND_ONBOARDING)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn second_active_conversation_is_a_constraint_violation() {
        let db = backend().await;
        db.insert_conversation(&ConversationRecord::new("u1", KIND_ONBOARDING))
            .await
            .unwrap();

        let result = db
            .insert_conversation(&ConversationRecord::new("u1", KIND_ONBOARDING))
            .await;
        assert!(matches!(result, Err(DatabaseError::Constraint(_))));
    }

    #[tokio::test]
    async fn update_missing_conversation_fails() {
        let db = backend().await;
        let conversation = ConversationRecord::new("u1", KIND_ONBOARDING);
        let result = db.update_conversation(&conversation).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn pending_confirmation_roundtrip() {
        let db = backend().await;
        let record = PendingConfirmationRecord {
            user_id: "u1".into(),
            buffered: buffered_fixture(),
            source_text: "meeting with John tomorrow at 3pm".into(),
            ambiguous_turns: 0,
            created_at: Utc::now(),
        };
        db.upsert_pending_confirmation(&record).await.unwrap();

        let loaded = db.get_pending_confirmation("u1").await.unwrap().unwrap();
        assert_eq!(loaded.buffered.candidate.title, "meeting with John");
        assert_eq!(loaded.buffered.pre_minutes, 15);

        // Superseding updates in place; still at most one per user.
        let mut superseded = record.clone();
        superseded.ambiguous_turns = 2;
        db.upsert_pending_confirmation(&superseded).await.unwrap();
        let loaded = db.get_pending_confirmation("u1").await.unwrap().unwrap();
        assert_eq!(loaded.ambiguous_turns, 2);

        db.delete_pending_confirmation("u1").await.unwrap();
        assert!(db.get_pending_confirmation("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suggestion_context_roundtrip() {
        use crate::suggest::SuggestionSet;

        let db = backend().await;
        let record = SuggestionContextRecord {
            user_id: "u1".into(),
            set: SuggestionSet {
                suggestions: vec![],
                generated_at: Utc::now(),
            },
            created_at: Utc::now(),
        };
        db.upsert_suggestion_context(&record).await.unwrap();
        assert!(db.get_suggestion_context("u1").await.unwrap().is_some());

        db.delete_suggestion_context("u1").await.unwrap();
        assert!(db.get_suggestion_context("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dedupe_window_returns_recorded_reply() {
        let db = backend().await;
        db.record_processed("u1", "hello", "hi there").await.unwrap();

        let hit = db
            .recent_reply("u1", "hello", Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some("hi there"));

        // Different content or user misses.
        assert!(
            db.recent_reply("u1", "other", Duration::from_secs(120))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            db.recent_reply("u2", "hello", Duration::from_secs(120))
                .await
                .unwrap()
                .is_none()
        );

        // A zero-width window misses its own record.
        assert!(
            db.recent_reply("u1", "hello", Duration::ZERO)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn prune_removes_old_records() {
        let db = backend().await;
        db.record_processed("u1", "hello", "hi").await.unwrap();

        // Nothing is older than an hour yet.
        assert_eq!(db.prune_processed(Duration::from_secs(3600)).await.unwrap(), 0);
        // Everything is older than zero seconds.
        assert_eq!(db.prune_processed(Duration::ZERO).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn file_backed_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assist.db");

        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.upsert_user(&UserRecord::new("u1", "UTC")).await.unwrap();
        }

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_user("u1").await.unwrap().is_some());
    }
}
