//! Confirmation dialogue controller.
//!
//! Owns the proposed-event state machine: a pending confirmation either
//! becomes a calendar entry, is revised through the parser, or is
//! discarded. Reply classification never treats an unclear answer as a
//! yes; silence on intent is always ambiguous.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::calendar::{CalendarCredentials, CalendarEvent, CalendarService, TimeRange};
use crate::config::{BufferConfig, ConfirmationConfig};
use crate::error::Result;
use crate::llm::{self, CompletionProvider};
use crate::parser::{self, FALLBACK_TITLE};
use crate::scheduler::{self, BufferedEvent};
use crate::store::{Database, PendingConfirmationRecord, UserRecord};

/// Classified intent of a reply to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyIntent {
    Confirm,
    Modify,
    Cancel,
    Ambiguous,
}

impl ReplyIntent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Modify => "modify",
            Self::Cancel => "cancel",
            Self::Ambiguous => "ambiguous",
        }
    }
}

static CANCEL_STRONG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cancel|nevermind|never mind|forget it|scrap|drop it|leave it|abort)\b")
        .unwrap()
});

static MODIFY_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(change|modify|move|reschedule|instead|different|rather|push|shift|earlier|later|make it)\b")
        .unwrap()
});

static CONFIRM_WORDS: &[&str] = &[
    "y", "yes", "yeah", "yep", "yup", "sure", "ok", "okay", "confirm", "perfect", "great",
    "sounds good", "do it", "book it", "go ahead", "please do", "works for me", "looks good",
];

static DECLINE_WORDS: &[&str] = &[
    "no", "nah", "nope", "no thanks", "not now", "don't", "do not", "skip it",
];

/// Deterministic reply classification.
///
/// The heuristic alone decides the safety-critical cases; a completion
/// backend is only consulted for text the heuristic cannot place.
pub fn classify_reply(text: &str) -> ReplyIntent {
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    if normalized.is_empty() {
        return ReplyIntent::Ambiguous;
    }

    if CANCEL_STRONG.is_match(&normalized) {
        return ReplyIntent::Cancel;
    }
    if MODIFY_WORDS.is_match(&normalized) || parser::has_calendar_intent(&normalized) {
        return ReplyIntent::Modify;
    }
    if DECLINE_WORDS.contains(&normalized.as_str()) {
        return ReplyIntent::Cancel;
    }
    if CONFIRM_WORDS.contains(&normalized.as_str())
        || CONFIRM_WORDS
            .iter()
            .any(|w| w.len() > 2 && normalized.starts_with(&format!("{w} ")))
    {
        return ReplyIntent::Confirm;
    }

    ReplyIntent::Ambiguous
}

/// Render a proposal message for a buffered event.
pub fn render_proposal(buffered: &BufferedEvent, defaults: &BufferConfig) -> String {
    let local = buffered.candidate.local_start();
    let mut message = format!(
        "Here's what I'd set up: \"{}\" on {} for {} minutes, with {} min before and {} min after kept free.",
        buffered.candidate.title,
        local.format("%A, %B %-d at %-I:%M %p"),
        buffered.candidate.duration_minutes,
        buffered.pre_minutes,
        buffered.post_minutes,
    );
    if !buffered.conflicts.is_empty() {
        message.push(' ');
        message.push_str(&scheduler::explain(buffered, defaults));
    }
    message.push_str(" Shall I add it? (yes / change it / no)");
    message
}

/// Coordinates the confirmation flow for one user's pending proposal.
pub struct ConfirmationController {
    db: Arc<dyn Database>,
    calendar: Arc<dyn CalendarService>,
    classifier: Option<Arc<dyn CompletionProvider>>,
    buffers: BufferConfig,
    config: ConfirmationConfig,
}

impl ConfirmationController {
    pub fn new(
        db: Arc<dyn Database>,
        calendar: Arc<dyn CalendarService>,
        classifier: Option<Arc<dyn CompletionProvider>>,
        buffers: BufferConfig,
        config: ConfirmationConfig,
    ) -> Self {
        Self {
            db,
            calendar,
            classifier,
            buffers,
            config,
        }
    }

    /// Whether a pending record is past its confirmation lifetime.
    pub fn is_expired(&self, pending: &PendingConfirmationRecord, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(pending.created_at)
            > Duration::from_std(self.config.ttl).unwrap_or_else(|_| Duration::minutes(30))
    }

    /// Handle a reply while a proposal is pending. Returns the reply text.
    pub async fn handle(
        &self,
        user: &UserRecord,
        pending: PendingConfirmationRecord,
        text: &str,
    ) -> Result<String> {
        let mut intent = classify_reply(text);

        if intent == ReplyIntent::Ambiguous {
            if let Some(classifier) = self.classifier.as_deref() {
                intent = self.classify_with_backend(classifier, text).await;
            }
        }

        tracing::debug!(
            user_id = %user.user_id,
            intent = intent.label(),
            "Confirmation reply classified"
        );

        match intent {
            ReplyIntent::Confirm => self.create(user, pending).await,
            ReplyIntent::Cancel => {
                self.db.delete_pending_confirmation(&user.user_id).await?;
                Ok(format!(
                    "No problem, I've let \"{}\" go. Just tell me if you want to pick a new time.",
                    pending.buffered.candidate.title
                ))
            }
            ReplyIntent::Modify => self.revise(user, pending, text).await,
            ReplyIntent::Ambiguous => self.reprompt(user, pending).await,
        }
    }

    /// Ask the completion backend to place an unclear reply. Any failure
    /// leaves the reply ambiguous; the backend can never promote an
    /// unclear answer straight past the user.
    async fn classify_with_backend(
        &self,
        classifier: &dyn CompletionProvider,
        text: &str,
    ) -> ReplyIntent {
        let schema = r#"{"intent": "confirm" | "modify" | "cancel" | "ambiguous"}"#;
        let prompt = format!(
            "The user was asked to confirm a proposed calendar event.\n\
             Their reply: \"{text}\"\n\
             Classify the reply. If you are not certain, use \"ambiguous\"."
        );
        match llm::extract_json(classifier, schema, &prompt).await {
            Ok(value) => match value.get("intent").and_then(|v| v.as_str()) {
                Some("confirm") => ReplyIntent::Confirm,
                Some("modify") => ReplyIntent::Modify,
                Some("cancel") => ReplyIntent::Cancel,
                _ => ReplyIntent::Ambiguous,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Classifier unavailable, keeping reply ambiguous");
                ReplyIntent::Ambiguous
            }
        }
    }

    async fn create(&self, user: &UserRecord, pending: PendingConfirmationRecord) -> Result<String> {
        let candidate = &pending.buffered.candidate;
        let event = CalendarEvent {
            id: None,
            title: candidate.title.clone(),
            start: candidate.start,
            end: candidate.end(),
        };
        let credentials = CalendarCredentials::for_user(&user.user_id);

        match self.calendar.create_event(&credentials, &event).await {
            Ok(created) => {
                self.db.delete_pending_confirmation(&user.user_id).await?;
                let local = candidate.local_start();
                tracing::info!(user_id = %user.user_id, event_id = %created.id, "Event created");
                Ok(format!(
                    "Done! \"{}\" is on your calendar for {}, with {} min before and {} min after kept free.",
                    created.reference,
                    local.format("%A, %B %-d at %-I:%M %p"),
                    pending.buffered.pre_minutes,
                    pending.buffered.post_minutes,
                ))
            }
            Err(e) => {
                // The proposal stays pending; no re-parse on a retry.
                tracing::warn!(user_id = %user.user_id, error = %e, "Calendar creation failed");
                Ok(format!(
                    "I couldn't reach your calendar just now, so \"{}\" isn't booked yet. \
                     Say \"yes\" again in a moment and I'll retry.",
                    candidate.title
                ))
            }
        }
    }

    async fn revise(
        &self,
        user: &UserRecord,
        pending: PendingConfirmationRecord,
        text: &str,
    ) -> Result<String> {
        let tz: Tz = user
            .timezone
            .parse()
            .unwrap_or(chrono_tz::UTC);
        let now_local = Utc::now().with_timezone(&tz);

        let mut candidate = match parser::parse(text, tz, now_local) {
            Ok(candidate) => candidate,
            Err(_) => {
                // The reply asked for a change but gave no usable time.
                return Ok(format!(
                    "Sure, what should I change \"{}\" to? Give me a day and time, like \
                     \"tomorrow at 4pm\".",
                    pending.buffered.candidate.title
                ));
            }
        };

        // The modify turn is about the time; the event keeps its name.
        // Whatever the parser scraped out of "make it 4pm instead" is
        // not a better title than the one already on the table.
        if pending.buffered.candidate.title != FALLBACK_TITLE || candidate.title == FALLBACK_TITLE {
            candidate.title = pending.buffered.candidate.title.clone();
        }

        let range = TimeRange {
            start: candidate.start - Duration::hours(12),
            end: candidate.end() + Duration::hours(12),
        };
        let credentials = CalendarCredentials::for_user(&user.user_id);
        let existing = match self.calendar.list_events(&credentials, range).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(user_id = %user.user_id, error = %e, "Calendar listing failed");
                return Ok(
                    "I couldn't check your calendar just now. Give me a minute and try again?"
                        .to_string(),
                );
            }
        };

        match scheduler::apply_buffer(&candidate, &existing, &self.buffers) {
            Ok(buffered) => {
                let record = PendingConfirmationRecord {
                    user_id: user.user_id.clone(),
                    buffered: buffered.clone(),
                    source_text: text.to_string(),
                    ambiguous_turns: 0,
                    created_at: Utc::now(),
                };
                self.db.upsert_pending_confirmation(&record).await?;
                Ok(format!("Got it, updated. {}", render_proposal(&buffered, &self.buffers)))
            }
            Err(e) => {
                tracing::debug!(user_id = %user.user_id, error = %e, "Revised time conflicts");
                Ok(format!(
                    "That time runs into something already on your calendar. \
                     Want to pick another time for \"{}\"?",
                    candidate.title
                ))
            }
        }
    }

    async fn reprompt(
        &self,
        user: &UserRecord,
        mut pending: PendingConfirmationRecord,
    ) -> Result<String> {
        pending.ambiguous_turns += 1;
        if pending.ambiguous_turns > self.config.max_ambiguous_turns {
            self.db.delete_pending_confirmation(&user.user_id).await?;
            return Ok(format!(
                "I couldn't quite tell what you'd like, so I've set \"{}\" aside for now. \
                 Tell me a day and time whenever you want to book it.",
                pending.buffered.candidate.title
            ));
        }

        let title = pending.buffered.candidate.title.clone();
        self.db.upsert_pending_confirmation(&pending).await?;
        Ok(format!(
            "Just to be sure about \"{title}\": reply \"yes\" to book it, \"change it\" to pick \
             another time, or \"no\" to drop it."
        ))
    }
}
