//! Calendar collaborator interface.
//!
//! The scheduler treats the calendar as the sole source of truth for
//! conflict detection: events are re-listed on every scheduling attempt,
//! never cached across attempts. Credentials are a per-user record passed
//! through the call, never process-wide state.

pub mod memory;

pub use memory::InMemoryCalendar;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

/// A calendar event, either existing (with id) or about to be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Handle returned by a successful event creation.
#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub id: String,
    /// Human-readable reference for the reply message.
    pub reference: String,
}

/// Half-open instant range used for event listing.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Per-user calendar credentials, passed explicitly through every call.
#[derive(Clone)]
pub struct CalendarCredentials {
    pub user_id: String,
    pub token: Option<secrecy::SecretString>,
}

impl CalendarCredentials {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: None,
        }
    }
}

/// Calendar collaborator: listing for conflict detection, creation on
/// confirmed proposals.
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// List the user's events intersecting `range`.
    async fn list_events(
        &self,
        credentials: &CalendarCredentials,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;

    /// Create an event on the user's calendar.
    async fn create_event(
        &self,
        credentials: &CalendarCredentials,
        event: &CalendarEvent,
    ) -> Result<CreatedEvent, CalendarError>;
}
