//! Unified `Database` trait — single async interface for all
//! persistence.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::onboarding::insight::InsightSnapshot;
use crate::scheduler::BufferedEvent;
use crate::suggest::SuggestionSet;

/// A user, created on first inbound message. Identity is immutable;
/// name and timezone are not.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Stable sender handle, e.g. a phone identifier.
    pub user_id: String,
    pub display_name: Option<String>,
    /// IANA timezone name.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(user_id: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            timezone: timezone.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of a conversation. Rows are never deleted, only
/// transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    Completed,
    Abandoned,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "abandoned" => Self::Abandoned,
            _ => Self::Active,
        }
    }
}

/// A multi-phase conversation. At most one `active` row per
/// (user, kind), enforced by a partial unique index.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub user_id: String,
    pub kind: String,
    /// Index into the configured phase list.
    pub current_phase: usize,
    pub status: ConversationStatus,
    /// Phase key → completed. A key present with `false` marks a phase
    /// that has been announced but not finished, which is how a resumed
    /// conversation is told apart from a fresh one.
    pub phase_completion: BTreeMap<String, bool>,
    pub insight: InsightSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(user_id: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind: kind.into(),
            current_phase: 0,
            status: ConversationStatus::Active,
            phase_completion: BTreeMap::new(),
            insight: InsightSnapshot::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The single in-flight proposed event awaiting a reply. One per user.
#[derive(Debug, Clone)]
pub struct PendingConfirmationRecord {
    pub user_id: String,
    pub buffered: BufferedEvent,
    pub source_text: String,
    /// Ambiguous replies burned so far.
    pub ambiguous_turns: u32,
    pub created_at: DateTime<Utc>,
}

/// A generated suggestion set held as follow-up context. One per user.
#[derive(Debug, Clone)]
pub struct SuggestionContextRecord {
    pub user_id: String,
    pub set: SuggestionSet,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering users, conversations, and
/// the per-user routing records.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError>;

    async fn upsert_user(&self, user: &UserRecord) -> Result<(), DatabaseError>;

    async fn set_display_name(&self, user_id: &str, name: &str) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// The active conversation of this kind, if any.
    async fn active_conversation(
        &self,
        user_id: &str,
        kind: &str,
    ) -> Result<Option<ConversationRecord>, DatabaseError>;

    /// Whether the user ever completed a conversation of this kind.
    async fn has_completed_conversation(
        &self,
        user_id: &str,
        kind: &str,
    ) -> Result<bool, DatabaseError>;

    async fn insert_conversation(
        &self,
        conversation: &ConversationRecord,
    ) -> Result<(), DatabaseError>;

    /// Persist phase index, completion map, insight, and status. The
    /// caller returns its reply only after this commit succeeds.
    async fn update_conversation(
        &self,
        conversation: &ConversationRecord,
    ) -> Result<(), DatabaseError>;

    // ── Pending confirmations ───────────────────────────────────────

    async fn get_pending_confirmation(
        &self,
        user_id: &str,
    ) -> Result<Option<PendingConfirmationRecord>, DatabaseError>;

    async fn upsert_pending_confirmation(
        &self,
        record: &PendingConfirmationRecord,
    ) -> Result<(), DatabaseError>;

    async fn delete_pending_confirmation(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Suggestion contexts ─────────────────────────────────────────

    async fn get_suggestion_context(
        &self,
        user_id: &str,
    ) -> Result<Option<SuggestionContextRecord>, DatabaseError>;

    async fn upsert_suggestion_context(
        &self,
        record: &SuggestionContextRecord,
    ) -> Result<(), DatabaseError>;

    async fn delete_suggestion_context(&self, user_id: &str) -> Result<(), DatabaseError>;

    // ── Idempotency ─────────────────────────────────────────────────

    /// The recorded reply for an identical message from this user inside
    /// `window`, if one exists.
    async fn recent_reply(
        &self,
        user_id: &str,
        content: &str,
        window: Duration,
    ) -> Result<Option<String>, DatabaseError>;

    /// Record a processed (message, reply) pair for the dedupe window.
    async fn record_processed(
        &self,
        user_id: &str,
        content: &str,
        reply: &str,
    ) -> Result<(), DatabaseError>;

    /// Remove processed-message records older than `older_than`.
    /// Returns the number deleted.
    async fn prune_processed(&self, older_than: Duration) -> Result<usize, DatabaseError>;
}
