//! Message interpreter and intent router.
//!
//! The entry point for every inbound message. Routing follows a strict
//! priority order, and exactly one branch runs per message:
//!
//! 1. live pending confirmation → confirmation dialogue
//! 2. live suggestion follow-up context → suggestion follow-up
//! 3. active conversation → state machine
//! 4. calendar-intent text → parse, buffer, propose
//! 5. otherwise → onboarding bootstrap for new users, generic fallback
//!    for everyone else
//!
//! The router also owns per-user turn serialization and the idempotency
//! window for gateway redeliveries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use crate::calendar::{CalendarCredentials, CalendarService, TimeRange};
use crate::config::AssistantConfig;
use crate::confirm::{self, ConfirmationController};
use crate::error::{ChannelError, Error, ParseError, Result, ScheduleError};
use crate::llm::CompletionProvider;
use crate::onboarding::{ConversationEngine, KIND_ONBOARDING};
use crate::parser::{self, EventCandidate};
use crate::scheduler;
use crate::store::{
    Database, PendingConfirmationRecord, SuggestionContextRecord, UserRecord,
};
use crate::suggest::{self, FollowUpAction};

/// Per-user turn serialization: two concurrently delivered messages for
/// the same user execute one after the other.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    async fn acquire(&self, user_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(map.entry(user_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Routes each inbound message to exactly one handler and returns a
/// single reply.
pub struct MessageRouter {
    db: Arc<dyn Database>,
    calendar: Arc<dyn CalendarService>,
    engine: ConversationEngine,
    confirmations: ConfirmationController,
    config: AssistantConfig,
    user_locks: UserLocks,
}

impl MessageRouter {
    pub fn new(
        db: Arc<dyn Database>,
        calendar: Arc<dyn CalendarService>,
        classifier: Option<Arc<dyn CompletionProvider>>,
        config: AssistantConfig,
    ) -> Self {
        let engine = ConversationEngine::new(Arc::clone(&db), classifier.clone());
        let confirmations = ConfirmationController::new(
            Arc::clone(&db),
            Arc::clone(&calendar),
            classifier,
            config.buffers,
            config.confirmation,
        );
        Self {
            db,
            calendar,
            engine,
            confirmations,
            config,
            user_locks: UserLocks::default(),
        }
    }

    /// Handle one inbound message. Always returns reply text; internal
    /// failures surface as gentle messages, never as raw errors.
    pub async fn handle_message(&self, sender: &str, text: &str) -> String {
        let _turn = self.user_locks.acquire(sender.trim()).await;

        match self.route(sender, text).await {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(sender, error = %error, "Turn failed");
                gentle_failure(&error)
            }
        }
    }

    async fn route(&self, sender: &str, text: &str) -> Result<String> {
        let sender = sender.trim();
        if sender.is_empty() {
            return Err(ChannelError::UnknownSender.into());
        }
        let text = text.trim();
        if text.is_empty() {
            return Ok("I didn't catch anything in that message. What can I set up for you?".into());
        }

        let user = self.get_or_create_user(sender).await?;

        // Gateway retry: an identical message inside the dedupe window
        // gets the recorded reply and no second state change.
        if let Some(reply) = self
            .db
            .recent_reply(&user.user_id, text, self.config.dedupe_window)
            .await?
        {
            tracing::debug!(user_id = %user.user_id, "Duplicate delivery, replaying reply");
            return Ok(reply);
        }

        let reply = self.dispatch(&user, text).await?;

        if let Err(error) = self.db.record_processed(&user.user_id, text, &reply).await {
            tracing::warn!(user_id = %user.user_id, error = %error, "Failed to record turn");
        }
        Ok(reply)
    }

    /// The §priority dispatch. Expired records are lazily discarded here
    /// and never routed to.
    async fn dispatch(&self, user: &UserRecord, text: &str) -> Result<String> {
        if let Some(pending) = self.db.get_pending_confirmation(&user.user_id).await? {
            if self.confirmations.is_expired(&pending, Utc::now()) {
                // Expired means implicitly cancelled, not awaiting forever.
                self.db.delete_pending_confirmation(&user.user_id).await?;
                tracing::debug!(user_id = %user.user_id, "Pending confirmation expired");
            } else {
                tracing::debug!(user_id = %user.user_id, intent = "confirmation", "Routed");
                return self.confirmations.handle(user, pending, text).await;
            }
        }

        if let Some(context) = self.db.get_suggestion_context(&user.user_id).await? {
            if self.suggestion_context_expired(&context) || context.set.is_empty() {
                // Nothing left to follow up on; don't capture the turn.
                self.db.delete_suggestion_context(&user.user_id).await?;
                tracing::debug!(user_id = %user.user_id, "Suggestion context discarded");
            } else {
                tracing::debug!(user_id = %user.user_id, intent = "follow_up", "Routed");
                return self.handle_follow_up(user, context, text).await;
            }
        }

        if self
            .db
            .active_conversation(&user.user_id, KIND_ONBOARDING)
            .await?
            .is_some()
        {
            tracing::debug!(user_id = %user.user_id, intent = "conversation", "Routed");
            return self.handle_conversation_turn(user, text).await;
        }

        if parser::has_calendar_intent(text) {
            tracing::debug!(user_id = %user.user_id, intent = "event", "Routed");
            return self.handle_event_request(user, text).await;
        }

        // A first non-calendar message from a user who never finished
        // onboarding starts (or restarts) the dialogue.
        if !self
            .db
            .has_completed_conversation(&user.user_id, KIND_ONBOARDING)
            .await?
        {
            tracing::debug!(user_id = %user.user_id, intent = "conversation", "Routed");
            return self.handle_conversation_turn(user, text).await;
        }

        let name = user.display_name.as_deref().unwrap_or("there");
        Ok(format!(
            "Hi {name}! Tell me something like \"meeting with John tomorrow at 3pm\" and I'll \
             find it a home with breathing room around it."
        ))
    }

    async fn get_or_create_user(&self, sender: &str) -> Result<UserRecord> {
        if let Some(user) = self.db.get_user(sender).await? {
            return Ok(user);
        }
        let user = UserRecord::new(sender, self.config.default_timezone.clone());
        self.db.upsert_user(&user).await?;
        tracing::info!(user_id = %user.user_id, "User created");
        Ok(user)
    }

    /// One turn of the onboarding dialogue; on completion, generate the
    /// suggestion set and append it to the reply.
    async fn handle_conversation_turn(&self, user: &UserRecord, text: &str) -> Result<String> {
        let outcome = self.engine.advance(user, text).await?;

        let Some(insight) = outcome.completed_insight else {
            return Ok(outcome.reply);
        };

        let set = suggest::generate(&insight, self.config.suggestions.max_suggestions);
        let record = SuggestionContextRecord {
            user_id: user.user_id.clone(),
            set: set.clone(),
            created_at: Utc::now(),
        };
        self.db.upsert_suggestion_context(&record).await?;

        let display_name = outcome
            .captured_name
            .or_else(|| user.display_name.clone());
        let rendered = suggest::render_suggestions(&set, display_name.as_deref());
        if outcome.reply.is_empty() {
            Ok(rendered)
        } else {
            Ok(format!("{} {rendered}", outcome.reply))
        }
    }

    async fn handle_follow_up(
        &self,
        user: &UserRecord,
        context: SuggestionContextRecord,
        text: &str,
    ) -> Result<String> {
        let outcome = suggest::follow_up(text, &context.set, user.display_name.as_deref());

        match outcome.action {
            FollowUpAction::Defer => {
                self.db.delete_suggestion_context(&user.user_id).await?;
                Ok(outcome.reply)
            }
            FollowUpAction::Schedule => {
                let Some(chosen) = outcome.chosen else {
                    return Ok(outcome.reply);
                };
                let tz = self.user_timezone(user);
                let now_local = Utc::now().with_timezone(&tz);
                let Some(candidate) = suggest::candidate_for(
                    &chosen,
                    tz,
                    now_local,
                    self.config.default_event_minutes,
                ) else {
                    return Ok(
                        "I couldn't pin that one to a concrete time. Tell me a day and time \
                         and I'll set it up."
                            .to_string(),
                    );
                };
                let reply = self.propose(user, candidate, text).await?;
                // The context is consumed once a proposal is on the table.
                if self
                    .db
                    .get_pending_confirmation(&user.user_id)
                    .await?
                    .is_some()
                {
                    self.db.delete_suggestion_context(&user.user_id).await?;
                }
                Ok(reply)
            }
            FollowUpAction::Modify | FollowUpAction::AskMore => Ok(outcome.reply),
        }
    }

    /// Ad hoc event intake: parse, buffer, and put a proposal on the
    /// table.
    async fn handle_event_request(&self, user: &UserRecord, text: &str) -> Result<String> {
        let tz = self.user_timezone(user);
        let now_local = Utc::now().with_timezone(&tz);

        let candidate = match parser::parse(text, tz, now_local) {
            Ok(candidate) => candidate,
            Err(error) => {
                tracing::debug!(user_id = %user.user_id, error = %error, "Parse failed");
                return Ok(gentle_parse_reply(&error));
            }
        };

        tracing::debug!(
            user_id = %user.user_id,
            title = %candidate.title,
            confidence = candidate.confidence,
            "Event candidate parsed"
        );
        self.propose(user, candidate, text).await
    }

    /// Buffer a candidate against a fresh calendar listing and store it
    /// as the user's pending confirmation.
    async fn propose(
        &self,
        user: &UserRecord,
        candidate: EventCandidate,
        source_text: &str,
    ) -> Result<String> {
        let range = TimeRange {
            start: candidate.start - Duration::hours(12),
            end: candidate.end() + Duration::hours(12),
        };
        let credentials = CalendarCredentials::for_user(&user.user_id);

        // Always a fresh listing: the calendar is the sole source of
        // truth for conflicts.
        let existing = match self.calendar.list_events(&credentials, range).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(user_id = %user.user_id, error = %error, "Calendar listing failed");
                return Ok(
                    "I couldn't check your calendar just now. Give me a minute and try again?"
                        .to_string(),
                );
            }
        };

        match scheduler::apply_buffer(&candidate, &existing, &self.config.buffers) {
            Ok(buffered) => {
                let record = PendingConfirmationRecord {
                    user_id: user.user_id.clone(),
                    buffered: buffered.clone(),
                    source_text: source_text.to_string(),
                    ambiguous_turns: 0,
                    created_at: Utc::now(),
                };
                self.db.upsert_pending_confirmation(&record).await?;
                Ok(confirm::render_proposal(&buffered, &self.config.buffers))
            }
            Err(ScheduleError::ConflictUnresolvable(titles)) => Ok(format!(
                "That time runs straight into {titles}. I'd rather not stack them, so could \
                 you pick another time for \"{}\"?",
                candidate.title
            )),
            Err(error) => {
                tracing::warn!(user_id = %user.user_id, error = %error, "Buffering failed");
                Ok("Something about that time didn't add up on my end. Could you phrase it \
                    again with a day and a time?"
                    .to_string())
            }
        }
    }

    fn user_timezone(&self, user: &UserRecord) -> Tz {
        user.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    fn suggestion_context_expired(&self, context: &SuggestionContextRecord) -> bool {
        Utc::now().signed_duration_since(context.created_at)
            > Duration::from_std(self.config.suggestions.ttl)
                .unwrap_or_else(|_| Duration::hours(24))
    }
}

/// Reply for a failed parse. Names what was missing; never guesses.
fn gentle_parse_reply(error: &ParseError) -> String {
    match error {
        ParseError::NoTimeSignal { .. } => {
            "I got the gist, but I need a time to work with. Try something like \
             \"tomorrow at 3pm\" or \"Friday at 2:30pm\"."
                .to_string()
        }
        ParseError::UnresolvableTime { .. } => {
            "I couldn't pin that to a real time, that one may not exist on the clock. \
             Could you give me the time another way?"
                .to_string()
        }
        ParseError::EmptyInput => {
            "I didn't catch anything in that message. What can I set up for you?".to_string()
        }
    }
}

/// Gentle user-facing text for an internal failure. The turn is treated
/// as not having happened.
fn gentle_failure(error: &Error) -> String {
    match error {
        Error::Database(_) => "I hit a snag saving that, so nothing changed. Mind sending it \
                               once more?"
            .to_string(),
        Error::Channel(_) => "I couldn't tell who that message was from, so I left it alone.".to_string(),
        _ => "Something went sideways on my end just now. Could you try that again?".to_string(),
    }
}
