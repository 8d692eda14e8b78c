//! In-memory calendar backend, used in tests and local runs without a
//! connected calendar account.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::calendar::{
    CalendarCredentials, CalendarEvent, CalendarService, CreatedEvent, TimeRange,
};
use crate::error::CalendarError;

/// Per-user event lists behind an async lock.
#[derive(Default)]
pub struct InMemoryCalendar {
    events: RwLock<HashMap<String, Vec<CalendarEvent>>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed events for a user, bypassing `create_event`.
    pub async fn seed(&self, user_id: &str, events: Vec<CalendarEvent>) {
        self.events
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .extend(events);
    }

    /// Number of events held for a user.
    pub async fn count(&self, user_id: &str) -> usize {
        self.events
            .read()
            .await
            .get(user_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CalendarService for InMemoryCalendar {
    async fn list_events(
        &self,
        credentials: &CalendarCredentials,
        range: TimeRange,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let events = self.events.read().await;
        let user_events = events
            .get(&credentials.user_id)
            .cloned()
            .unwrap_or_default();
        Ok(user_events
            .into_iter()
            .filter(|e| e.start < range.end && range.start < e.end)
            .collect())
    }

    async fn create_event(
        &self,
        credentials: &CalendarCredentials,
        event: &CalendarEvent,
    ) -> Result<CreatedEvent, CalendarError> {
        if event.end <= event.start {
            return Err(CalendarError::EventRejected {
                reason: "event ends before it starts".into(),
            });
        }
        let id = Uuid::new_v4().to_string();
        let mut stored = event.clone();
        stored.id = Some(id.clone());
        self.events
            .write()
            .await
            .entry(credentials.user_id.clone())
            .or_default()
            .push(stored);
        Ok(CreatedEvent {
            reference: event.title.clone(),
            id,
        })
    }
}
