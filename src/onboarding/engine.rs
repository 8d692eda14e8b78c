//! Conversation state machine for the onboarding dialogue.
//!
//! Owns phase progression: each turn applies the reply to the current
//! phase, merges extracted signal into the insight snapshot, and commits
//! the updated conversation row before the reply is returned. A failed
//! commit means the turn did not happen, so a gateway retry cannot
//! double-advance a phase.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::llm::{self, CompletionProvider};
use crate::onboarding::insight::InsightSnapshot;
use crate::onboarding::phases::{self, KIND_ONBOARDING, PhaseDef, PhaseTarget};
use crate::store::{ConversationRecord, ConversationStatus, Database, UserRecord};

/// Result of one turn through the state machine.
#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub conversation_id: Uuid,
    pub current_phase: usize,
    pub reply: String,
    /// Whether this turn completed the phase it landed in.
    pub phase_completed: bool,
    /// True when the turn continued a phase that had already been
    /// announced, i.e. nothing was replayed.
    pub is_resuming: bool,
    /// Set when this turn completed the final phase; carries the
    /// accumulated snapshot for suggestion generation.
    pub completed_insight: Option<InsightSnapshot>,
    /// Display name captured this turn, if any.
    pub captured_name: Option<String>,
}

/// Coordinates phase progression, insight accumulation, and durable
/// commits for the onboarding conversation.
pub struct ConversationEngine {
    db: Arc<dyn Database>,
    classifier: Option<Arc<dyn CompletionProvider>>,
    phases: Vec<PhaseDef>,
}

impl ConversationEngine {
    pub fn new(db: Arc<dyn Database>, classifier: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            db,
            classifier,
            phases: phases::default_phases(),
        }
    }

    /// Replace the phase list. The engine never assumes a count.
    pub fn with_phases(mut self, phases: Vec<PhaseDef>) -> Self {
        assert!(!phases.is_empty(), "phase list must not be empty");
        self.phases = phases;
        self
    }

    /// Process one inbound turn for this user.
    pub async fn advance(&self, user: &UserRecord, text: &str) -> Result<AdvanceOutcome> {
        match self
            .db
            .active_conversation(&user.user_id, KIND_ONBOARDING)
            .await?
        {
            None => self.begin(user).await,
            Some(conversation) => self.step(user, conversation, text).await,
        }
    }

    /// Create a fresh conversation and announce the first phase.
    async fn begin(&self, user: &UserRecord) -> Result<AdvanceOutcome> {
        let first = &self.phases[0];
        let mut conversation = ConversationRecord::new(&user.user_id, KIND_ONBOARDING);
        // Present-but-false marks the phase as announced, which is how a
        // later turn knows not to replay the announcement.
        conversation
            .phase_completion
            .insert(first.key.to_string(), false);

        self.db.insert_conversation(&conversation).await?;
        tracing::info!(user_id = %user.user_id, "Onboarding conversation started");

        Ok(AdvanceOutcome {
            conversation_id: conversation.id,
            current_phase: 0,
            reply: render_template(first.announcement, user.display_name.as_deref()),
            phase_completed: false,
            is_resuming: false,
            completed_insight: None,
            captured_name: None,
        })
    }

    /// Apply a reply to the current phase of an existing conversation.
    async fn step(
        &self,
        user: &UserRecord,
        mut conversation: ConversationRecord,
        text: &str,
    ) -> Result<AdvanceOutcome> {
        let index = conversation.current_phase.min(self.phases.len() - 1);
        let def = &self.phases[index];
        let is_resuming = conversation.phase_completion.get(def.key) == Some(&false);

        let result = phases::apply_phase(def, text, &mut conversation.insight);

        let mut display_name = user.display_name.clone();
        if let Some(ref name) = result.display_name {
            self.db.set_display_name(&user.user_id, name).await?;
            display_name = Some(name.clone());
        }

        if !result.completed {
            // Digression never stalls the machine: keep whatever merged,
            // acknowledge, and re-ask.
            self.db.update_conversation(&conversation).await?;
            tracing::debug!(
                user_id = %user.user_id,
                phase = def.key,
                "Phase needs more signal"
            );
            return Ok(AdvanceOutcome {
                conversation_id: conversation.id,
                current_phase: index,
                reply: render_template(def.reprompt, display_name.as_deref()),
                phase_completed: false,
                is_resuming,
                completed_insight: None,
                captured_name: result.display_name,
            });
        }

        // Structured enrichment is best-effort; the heuristic merge above
        // already satisfied the completion predicate.
        if !result.skipped {
            if let Some(classifier) = self.classifier.as_deref() {
                enrich_snapshot(classifier, def, text, &mut conversation.insight).await;
            }
        }

        conversation
            .phase_completion
            .insert(def.key.to_string(), true);

        let next_index = index + 1;
        let mut completed_insight = None;
        let reply = if next_index < self.phases.len() {
            let next = &self.phases[next_index];
            conversation.current_phase = next_index;
            conversation
                .phase_completion
                .insert(next.key.to_string(), false);
            join_ack(
                &render_template(def.ack, display_name.as_deref()),
                &render_template(next.announcement, display_name.as_deref()),
            )
        } else {
            conversation.status = ConversationStatus::Completed;
            completed_insight = Some(conversation.insight.clone());
            render_template(def.ack, display_name.as_deref())
        };

        // Commit before responding: if this fails the caller sees an
        // error and the phase index is unchanged for the retry.
        self.db.update_conversation(&conversation).await?;

        tracing::info!(
            user_id = %user.user_id,
            phase = def.key,
            completed = completed_insight.is_some(),
            "Phase completed"
        );

        Ok(AdvanceOutcome {
            conversation_id: conversation.id,
            current_phase: conversation.current_phase,
            reply,
            phase_completed: true,
            is_resuming,
            completed_insight,
            captured_name: result.display_name,
        })
    }
}

/// Fill the `{name}` placeholder.
fn render_template(template: &str, display_name: Option<&str>) -> String {
    template.replace("{name}", display_name.unwrap_or("there"))
}

fn join_ack(ack: &str, announcement: &str) -> String {
    if ack.is_empty() {
        announcement.to_string()
    } else {
        format!("{ack} {announcement}")
    }
}

/// Ask the classifier for structured fields the heuristics may have
/// missed. Failures are logged and ignored.
async fn enrich_snapshot(
    classifier: &dyn CompletionProvider,
    def: &PhaseDef,
    text: &str,
    snapshot: &mut InsightSnapshot,
) {
    let Some(schema_hint) = extraction_hint(def.target) else {
        return;
    };
    let prompt = format!(
        "The user was asked: \"{}\"\nThey answered: \"{}\"\n\
         Extract the fields. Use empty arrays or null for anything not mentioned.",
        def.announcement, text
    );
    match llm::extract_json(classifier, schema_hint, &prompt).await {
        Ok(value) => snapshot.merge_extracted(&value),
        Err(e) => {
            tracing::warn!(phase = def.key, error = %e, "Extraction call failed");
        }
    }
}

/// JSON schema hint for the classifier, per phase target.
fn extraction_hint(target: PhaseTarget) -> Option<&'static str> {
    match target {
        PhaseTarget::Priorities => Some(r#"{"priorities": ["short phrases"]}"#),
        PhaseTarget::PeakWindows => Some(
            r#"{"peak_windows": [{"label": "string", "start_hour": 0-23, "end_hour": 1-24}]}"#,
        ),
        PhaseTarget::LowWindows => Some(
            r#"{"low_windows": [{"label": "string", "start_hour": 0-23, "end_hour": 1-24}]}"#,
        ),
        PhaseTarget::CoreValues => Some(r#"{"core_values": ["short phrases"]}"#),
        PhaseTarget::Energizing => Some(r#"{"energizing": ["short phrases"]}"#),
        PhaseTarget::NonNegotiables => Some(
            r#"{"non_negotiables": [{"label": "string", "start_hour": 0-23, "end_hour": 1-24}]}"#,
        ),
        PhaseTarget::TimeBounds => {
            Some(r#"{"earliest_hour": 0-23 or null, "latest_hour": 0-24 or null}"#)
        }
        PhaseTarget::AvoidanceTasks => Some(r#"{"avoidance_tasks": ["short phrases"]}"#),
        PhaseTarget::DisplayName | PhaseTarget::WrapUp => None,
    }
}
