//! Proactive suggestion generator.
//!
//! Turns a completed insight snapshot into a handful of candidate
//! calendar additions: priorities and energizing activities matched to
//! declared peak-energy windows, never overlapping a non-negotiable
//! commitment. Follow-up replies are classified with the same
//! no-silent-default discipline as the confirmation dialogue.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::onboarding::insight::{HourWindow, InsightSnapshot};
use crate::parser::EventCandidate;

/// A suggested calendar addition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub title: String,
    /// Names the specific priority, value, or activity it derives from.
    pub rationale: String,
    pub window: HourWindow,
}

/// The set generated once per completed conversation, consumed by zero
/// or more follow-up turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionSet {
    pub suggestions: Vec<Suggestion>,
    pub generated_at: DateTime<Utc>,
}

impl SuggestionSet {
    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }
}

/// Classified intent of a follow-up reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpAction {
    Schedule,
    Modify,
    AskMore,
    Defer,
}

/// Result of classifying a follow-up reply.
#[derive(Debug, Clone)]
pub struct FollowUpOutcome {
    pub action: FollowUpAction,
    /// Reply text for every action except `Schedule`, where the caller
    /// renders the proposal itself.
    pub reply: String,
    /// The suggestion a `Schedule` reply picked.
    pub chosen: Option<Suggestion>,
}

/// Generate suggestions from a completed snapshot.
pub fn generate(insight: &InsightSnapshot, max_suggestions: usize) -> SuggestionSet {
    let mut suggestions = Vec::new();

    // Peak windows that don't collide with a protected commitment.
    let open_windows: Vec<&HourWindow> = insight
        .peak_windows
        .iter()
        .filter(|w| !insight.non_negotiables.iter().any(|c| w.overlaps(c)))
        .filter(|w| within_bounds(w, insight))
        .collect();

    if !open_windows.is_empty() {
        for (i, priority) in insight.priorities.iter().enumerate() {
            if suggestions.len() >= max_suggestions {
                break;
            }
            let window = open_windows[i % open_windows.len()];
            suggestions.push(Suggestion {
                title: format!("Focus time: {priority}"),
                rationale: format!(
                    "Protects your {} peak energy for \"{priority}\", which you named as a \
                     priority.",
                    window.label
                ),
                window: window.clone(),
            });
        }

        for (i, activity) in insight.energizing.iter().enumerate() {
            if suggestions.len() >= max_suggestions {
                break;
            }
            let window = open_windows[(insight.priorities.len() + i) % open_windows.len()];
            suggestions.push(Suggestion {
                title: activity.clone(),
                rationale: format!(
                    "You said \"{activity}\" gives you energy back; this slots it into your {} \
                     window.",
                    window.label
                ),
                window: window.clone(),
            });
        }
    }

    tracing::debug!(count = suggestions.len(), "Suggestions generated");
    SuggestionSet {
        suggestions,
        generated_at: Utc::now(),
    }
}

fn within_bounds(window: &HourWindow, insight: &InsightSnapshot) -> bool {
    if let Some(earliest) = insight.earliest_hour {
        if window.start_hour < earliest {
            return false;
        }
    }
    if let Some(latest) = insight.latest_hour {
        if window.end_hour > latest {
            return false;
        }
    }
    true
}

/// Render the suggestion set as a reply.
pub fn render_suggestions(set: &SuggestionSet, display_name: Option<&str>) -> String {
    let name = display_name.unwrap_or("there");
    if set.is_empty() {
        return format!(
            "Thanks, {name}! I don't have enough about your energy patterns to suggest \
             anything yet, but just tell me things like \"gym tomorrow at 7am\" and I'll \
             protect time around them."
        );
    }

    let mut lines = vec![format!(
        "Thanks, {name}! Based on what you told me, here's what I'd carve out:"
    )];
    for (i, suggestion) in set.suggestions.iter().enumerate() {
        lines.push(format!(
            "{}. {} ({}:00 to {}:00). {}",
            i + 1,
            suggestion.title,
            suggestion.window.start_hour,
            suggestion.window.end_hour,
            suggestion.rationale
        ));
    }
    lines.push(
        "Want me to put one on your calendar? Reply with a number, or \"not now\".".to_string(),
    );
    lines.join("\n")
}

/// Classify a follow-up reply against the pending suggestion set.
pub fn follow_up(text: &str, set: &SuggestionSet, display_name: Option<&str>) -> FollowUpOutcome {
    let name = display_name.unwrap_or("there");
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();

    if normalized.is_empty() {
        return clarify(set);
    }

    const DEFER: &[&str] = &[
        "no", "nah", "nope", "not now", "later", "maybe later", "skip", "pass", "no thanks",
    ];
    if DEFER.contains(&normalized.as_str()) {
        return FollowUpOutcome {
            action: FollowUpAction::Defer,
            reply: format!(
                "No problem, {name}. They'll keep. Just message me whenever you want to book \
                 something."
            ),
            chosen: None,
        };
    }

    const ASK_MORE: &[&str] = &["why", "how come", "tell me more", "what do you mean", "explain"];
    if ASK_MORE.iter().any(|w| normalized.starts_with(w)) {
        let detail = set
            .suggestions
            .iter()
            .map(|s| format!("\"{}\": {}", s.title, s.rationale))
            .collect::<Vec<_>>()
            .join(" ");
        return FollowUpOutcome {
            action: FollowUpAction::AskMore,
            reply: format!("Happy to explain. {detail}"),
            chosen: None,
        };
    }

    const MODIFY: &[&str] = &["change", "different", "instead", "other time", "swap", "another"];
    if MODIFY.iter().any(|w| normalized.contains(w)) {
        return FollowUpOutcome {
            action: FollowUpAction::Modify,
            reply: "Sure, which one would you like to change, and to when?".to_string(),
            chosen: None,
        };
    }

    // An explicit pick ("2", "the first one", a title word) schedules
    // that suggestion directly.
    if let Some(chosen) = explicit_match(&normalized, set) {
        return FollowUpOutcome {
            action: FollowUpAction::Schedule,
            reply: String::new(),
            chosen: Some(chosen),
        };
    }

    // A bare affirmative books the first suggestion.
    const SCHEDULE_HINTS: &[&str] = &[
        "yes", "yeah", "sure", "ok", "okay", "sounds good", "book", "schedule", "do it", "add",
        "let's",
    ];
    if !set.is_empty() && SCHEDULE_HINTS.iter().any(|w| normalized.starts_with(w)) {
        return FollowUpOutcome {
            action: FollowUpAction::Schedule,
            reply: String::new(),
            chosen: Some(set.suggestions[0].clone()),
        };
    }

    clarify(set)
}

/// Unclear replies surface as a clarifying question, never an assumed
/// action.
fn clarify(set: &SuggestionSet) -> FollowUpOutcome {
    FollowUpOutcome {
        action: FollowUpAction::AskMore,
        reply: format!(
            "Just so I get it right: reply with a number from 1 to {} to book one of those, \
             \"not now\" to skip, or ask me why I suggested something.",
            set.suggestions.len().max(1)
        ),
        chosen: None,
    }
}

/// Find the suggestion a reply explicitly refers to: a number, an
/// ordinal, or a title word.
fn explicit_match(normalized: &str, set: &SuggestionSet) -> Option<Suggestion> {
    for (i, (digit, ordinal)) in [("1", "first"), ("2", "second"), ("3", "third")]
        .iter()
        .enumerate()
    {
        if i < set.suggestions.len()
            && (normalized == *digit
                || normalized.contains(ordinal)
                || normalized.ends_with(&format!(" {digit}")))
        {
            return Some(set.suggestions[i].clone());
        }
    }

    set.suggestions
        .iter()
        .find(|suggestion| {
            suggestion
                .title
                .to_lowercase()
                .split_whitespace()
                .any(|w| w.len() > 3 && normalized.contains(w))
        })
        .cloned()
}

/// Resolve a chosen suggestion into a concrete candidate: the window's
/// next occurrence, starting tomorrow in the user's timezone.
pub fn candidate_for(
    suggestion: &Suggestion,
    tz: Tz,
    now_local: DateTime<Tz>,
    default_minutes: i64,
) -> Option<EventCandidate> {
    use chrono::TimeZone;

    let date = now_local.date_naive().succ_opt()?;
    let naive = date.and_hms_opt(suggestion.window.start_hour, 0, 0)?;
    let start_local = tz
        .from_local_datetime(&naive)
        .single()
        .or_else(|| tz.from_local_datetime(&naive).earliest())?;

    let window_minutes =
        (suggestion.window.end_hour as i64 - suggestion.window.start_hour as i64) * 60;
    let duration_minutes = window_minutes.clamp(30, default_minutes.max(30));

    Some(EventCandidate {
        title: suggestion.title.clone(),
        start: start_local.with_timezone(&Utc),
        duration_minutes,
        confidence: 0.9,
        source_text: suggestion.rationale.clone(),
        timezone: tz,
    })
}

#[cfg(test)]
mod tests {
    use crate::onboarding::insight::HourWindow;

    use super::*;

    fn snapshot() -> InsightSnapshot {
        InsightSnapshot {
            priorities: vec!["shipping the launch".into(), "health".into()],
            peak_windows: vec![
                HourWindow::new("morning", 9, 11),
                HourWindow::new("evening", 18, 20),
            ],
            energizing: vec!["trail runs".into()],
            ..Default::default()
        }
    }

    #[test]
    fn generates_from_priorities_and_peak_windows() {
        let set = generate(&snapshot(), 3);
        assert_eq!(set.suggestions.len(), 3);
        assert!(set.suggestions[0].title.contains("shipping the launch"));
        assert!(set.suggestions[0].rationale.contains("shipping the launch"));
    }

    #[test]
    fn rationale_names_energizing_activity() {
        let set = generate(&snapshot(), 3);
        let run = set
            .suggestions
            .iter()
            .find(|s| s.title == "trail runs")
            .unwrap();
        assert!(run.rationale.contains("trail runs"));
    }

    #[test]
    fn non_negotiable_windows_are_excluded() {
        let mut insight = snapshot();
        insight
            .non_negotiables
            .push(HourWindow::new("school run", 9, 10));
        let set = generate(&insight, 3);
        // The 9-11 morning window overlaps the school run and must not
        // be used; everything lands in the evening window.
        assert!(set.suggestions.iter().all(|s| s.window.start_hour == 18));
    }

    #[test]
    fn time_bounds_exclude_windows() {
        let mut insight = snapshot();
        insight.latest_hour = Some(17);
        let set = generate(&insight, 3);
        assert!(set.suggestions.iter().all(|s| s.window.end_hour <= 17));
    }

    #[test]
    fn no_windows_means_no_suggestions() {
        let insight = InsightSnapshot {
            priorities: vec!["health".into()],
            ..Default::default()
        };
        let set = generate(&insight, 3);
        assert!(set.is_empty());
    }

    #[test]
    fn follow_up_defer() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("not now", &set, Some("Dana"));
        assert_eq!(outcome.action, FollowUpAction::Defer);
        assert!(outcome.reply.contains("Dana"));
    }

    #[test]
    fn follow_up_schedule_by_number() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("2", &set, None);
        assert_eq!(outcome.action, FollowUpAction::Schedule);
        assert_eq!(
            outcome.chosen.unwrap().title,
            set.suggestions[1].title
        );
    }

    #[test]
    fn follow_up_bare_yes_books_first() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("yes please", &set, None);
        assert_eq!(outcome.action, FollowUpAction::Schedule);
        assert_eq!(outcome.chosen.unwrap().title, set.suggestions[0].title);
    }

    #[test]
    fn follow_up_ask_more() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("why that one?", &set, None);
        assert_eq!(outcome.action, FollowUpAction::AskMore);
        assert!(outcome.reply.contains("shipping the launch"));
    }

    #[test]
    fn follow_up_modify() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("can we do a different time", &set, None);
        assert_eq!(outcome.action, FollowUpAction::Modify);
    }

    #[test]
    fn unclear_follow_up_asks_instead_of_assuming() {
        let set = generate(&snapshot(), 3);
        let outcome = follow_up("asdkjf", &set, None);
        assert_eq!(outcome.action, FollowUpAction::AskMore);
        assert!(outcome.chosen.is_none());
    }

    #[test]
    fn render_lists_every_suggestion() {
        let set = generate(&snapshot(), 3);
        let text = render_suggestions(&set, Some("Dana"));
        assert!(text.contains("Dana"));
        for suggestion in &set.suggestions {
            assert!(text.contains(&suggestion.title));
        }
    }

    #[test]
    fn render_empty_set_degrades_gracefully() {
        let set = SuggestionSet {
            suggestions: vec![],
            generated_at: Utc::now(),
        };
        let text = render_suggestions(&set, None);
        assert!(text.contains("there"));
    }

    #[test]
    fn candidate_lands_in_window_tomorrow() {
        use chrono::{TimeZone, Timelike};

        let tz: Tz = "America/New_York".parse().unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        let set = generate(&snapshot(), 3);
        let candidate = candidate_for(&set.suggestions[0], tz, now, 60).unwrap();
        let local = candidate.local_start();
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(local.hour(), 9);
        assert!(candidate.duration_minutes >= 30);
    }
}
