//! Onboarding phase definitions.
//!
//! Phases are data: an ordered list the engine walks by index. Editing
//! the wording, predicates, or count here never touches the state
//! machine itself.

use super::insight::{self, InsightSnapshot};

/// Conversation kind for the onboarding dialogue.
pub const KIND_ONBOARDING: &str = "onboarding";

/// Which snapshot field a phase feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTarget {
    DisplayName,
    Priorities,
    PeakWindows,
    LowWindows,
    CoreValues,
    Energizing,
    NonNegotiables,
    TimeBounds,
    AvoidanceTasks,
    WrapUp,
}

/// One phase of the onboarding dialogue.
#[derive(Debug, Clone)]
pub struct PhaseDef {
    /// Stable key used in the completion map and notes.
    pub key: &'static str,
    /// Entry announcement, emitted exactly once. `{name}` is replaced
    /// with the user's display name when known.
    pub announcement: &'static str,
    /// Gentle re-ask when a reply carries too little signal.
    pub reprompt: &'static str,
    /// Acknowledgement prefixed to the next phase's announcement.
    pub ack: &'static str,
    /// Minimum words for a free-text answer to count as enough signal.
    pub min_words: usize,
    pub target: PhaseTarget,
}

/// The default ten-phase onboarding flow.
pub fn default_phases() -> Vec<PhaseDef> {
    vec![
        PhaseDef {
            key: "welcome",
            announcement: "Hi, I'm your scheduling assistant. I protect transition time around \
                           your appointments so your days breathe. First things first: what \
                           should I call you?",
            reprompt: "Just a name is fine, whatever you'd like me to call you.",
            ack: "Nice to meet you, {name}!",
            min_words: 1,
            target: PhaseTarget::DisplayName,
        },
        PhaseDef {
            key: "priorities",
            announcement: "What matters most to you right now? A couple of priorities is \
                           plenty, work or personal.",
            reprompt: "Even one thing that matters right now helps, or say \"skip\".",
            ack: "Got it, noted.",
            min_words: 2,
            target: PhaseTarget::Priorities,
        },
        PhaseDef {
            key: "peak_energy",
            announcement: "When do you usually feel sharpest? Mornings, evenings, or specific \
                           hours like 9-11am?",
            reprompt: "A rough time of day is enough, like \"mornings\" or \"after 8pm\".",
            ack: "Good to know.",
            min_words: 1,
            target: PhaseTarget::PeakWindows,
        },
        PhaseDef {
            key: "low_energy",
            announcement: "And when does your energy usually dip?",
            reprompt: "Rough is fine, like \"mid afternoon\", or say \"skip\".",
            ack: "Noted, I'll keep demanding things away from those hours where I can.",
            min_words: 1,
            target: PhaseTarget::LowWindows,
        },
        PhaseDef {
            key: "values",
            announcement: "What do you want your weeks to stand for? A few words about what \
                           you value is enough.",
            reprompt: "A word or two is plenty, like \"family\" or \"craft\", or \"skip\".",
            ack: "That helps me suggest things that actually fit you.",
            min_words: 1,
            target: PhaseTarget::CoreValues,
        },
        PhaseDef {
            key: "energizing",
            announcement: "Which activities reliably give you energy back?",
            reprompt: "Anything that leaves you better than it found you, or \"skip\".",
            ack: "Great, I'll look for room for those.",
            min_words: 1,
            target: PhaseTarget::Energizing,
        },
        PhaseDef {
            key: "non_negotiables",
            announcement: "Any fixed commitments I should never schedule over? Things like \
                           \"school pickup at 3pm\" or \"gym 6-7am\".",
            reprompt: "A commitment with a rough time works best, or say \"skip\".",
            ack: "Protected. I won't touch those.",
            min_words: 1,
            target: PhaseTarget::NonNegotiables,
        },
        PhaseDef {
            key: "time_bounds",
            announcement: "How early is too early, and how late is too late, for anything on \
                           your calendar?",
            reprompt: "Something like \"nothing before 8am or after 9pm\" is perfect.",
            ack: "Understood.",
            min_words: 1,
            target: PhaseTarget::TimeBounds,
        },
        PhaseDef {
            key: "avoidance",
            announcement: "Last real question: what kind of task do you tend to put off?",
            reprompt: "Whatever you quietly push to tomorrow, or \"skip\".",
            ack: "Thanks for being honest, that one's useful.",
            min_words: 1,
            target: PhaseTarget::AvoidanceTasks,
        },
        PhaseDef {
            key: "wrap_up",
            announcement: "That's everything I need. Say anything and I'll put together a few \
                           ideas for your week.",
            reprompt: "",
            ack: "",
            min_words: 0,
            target: PhaseTarget::WrapUp,
        },
    ]
}

/// Result of applying one reply to the current phase.
#[derive(Debug, Clone, Default)]
pub struct PhaseResult {
    pub completed: bool,
    pub skipped: bool,
    /// Set when the phase captured the user's name.
    pub display_name: Option<String>,
}

const SKIP_WORDS: &[&str] = &[
    "skip", "pass", "don't know", "dont know", "dunno", "idk", "not sure", "no idea",
    "nothing comes to mind",
];

/// Whether the reply is an explicit skip. Accepted as phase-completing
/// with a placeholder, never silently dropped.
pub fn is_skip(text: &str) -> bool {
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    SKIP_WORDS
        .iter()
        .any(|w| normalized == *w || normalized.starts_with(&format!("{w} ")))
}

/// Apply a reply to the phase, merging whatever it yields into the
/// snapshot, and decide whether the phase is complete.
pub fn apply_phase(def: &PhaseDef, text: &str, snapshot: &mut InsightSnapshot) -> PhaseResult {
    if def.target == PhaseTarget::WrapUp {
        return PhaseResult {
            completed: true,
            ..Default::default()
        };
    }

    if is_skip(text) {
        snapshot.note(def.key, "(skipped)");
        return PhaseResult {
            completed: true,
            skipped: true,
            ..Default::default()
        };
    }

    let word_count = text.split_whitespace().count();
    let enough_signal = word_count >= def.min_words;

    let extracted = match def.target {
        PhaseTarget::DisplayName => {
            if let Some(name) = extract_name(text) {
                return PhaseResult {
                    completed: true,
                    display_name: Some(name),
                    ..Default::default()
                };
            }
            false
        }
        PhaseTarget::Priorities => {
            let items = insight::split_list(text);
            let found = !items.is_empty();
            InsightSnapshot::add_items(&mut snapshot.priorities, items);
            found
        }
        PhaseTarget::PeakWindows => {
            let windows = insight::extract_hour_windows(text);
            let found = !windows.is_empty();
            InsightSnapshot::add_windows(&mut snapshot.peak_windows, windows);
            found
        }
        PhaseTarget::LowWindows => {
            let windows = insight::extract_hour_windows(text);
            let found = !windows.is_empty();
            InsightSnapshot::add_windows(&mut snapshot.low_windows, windows);
            found
        }
        PhaseTarget::CoreValues => {
            let items = insight::split_list(text);
            let found = !items.is_empty();
            InsightSnapshot::add_items(&mut snapshot.core_values, items);
            found
        }
        PhaseTarget::Energizing => {
            let items = insight::split_list(text);
            let found = !items.is_empty();
            InsightSnapshot::add_items(&mut snapshot.energizing, items);
            found
        }
        PhaseTarget::NonNegotiables => {
            let windows = insight::extract_constraint_windows(text);
            let found = !windows.is_empty();
            InsightSnapshot::add_windows(&mut snapshot.non_negotiables, windows);
            found
        }
        PhaseTarget::TimeBounds => apply_time_bounds(text, snapshot),
        PhaseTarget::AvoidanceTasks => {
            let items = insight::split_list(text);
            let found = !items.is_empty();
            InsightSnapshot::add_items(&mut snapshot.avoidance_tasks, items);
            found
        }
        PhaseTarget::WrapUp => unreachable!("handled above"),
    };

    // Minimum-signal rule: an answer that resisted structured extraction
    // still completes the phase once it carries enough words; the raw
    // text is kept so nothing the user said is lost.
    if extracted || enough_signal {
        if !extracted {
            snapshot.note(def.key, text);
        }
        PhaseResult {
            completed: true,
            ..Default::default()
        }
    } else {
        PhaseResult::default()
    }
}

/// Pull earliest/latest bounds out of text like "nothing before 8am or
/// after 9pm".
fn apply_time_bounds(text: &str, snapshot: &mut InsightSnapshot) -> bool {
    let windows = insight::extract_constraint_windows(text);
    if windows.is_empty() {
        return false;
    }

    let lower = text.to_lowercase();
    let mut found = false;
    for window in &windows {
        let label = window.label.to_lowercase();
        if label.contains("before") || (lower.contains("before") && snapshot.earliest_hour.is_none())
        {
            snapshot.earliest_hour.get_or_insert(window.start_hour);
            found = true;
        } else if label.contains("after") || lower.contains("after") {
            if snapshot.latest_hour.is_none() {
                snapshot.latest_hour = Some(window.start_hour);
            }
            found = true;
        }
    }

    if !found {
        // Two bare hours: treat them as the day's bookends.
        if windows.len() >= 2 {
            let mut hours: Vec<u32> = windows.iter().map(|w| w.start_hour).collect();
            hours.sort_unstable();
            snapshot.earliest_hour.get_or_insert(hours[0]);
            snapshot.latest_hour.get_or_insert(*hours.last().unwrap());
            found = true;
        }
    }

    found
}

/// Pull a display name out of a first-contact reply.
fn extract_name(text: &str) -> Option<String> {
    let mut cleaned = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation())
        .to_string();

    for prefix in [
        "my name is",
        "my name's",
        "i'm",
        "i am",
        "it's",
        "its",
        "call me",
        "this is",
        "hi i'm",
        "hey i'm",
    ] {
        // ASCII lowering keeps byte offsets aligned with the original.
        let lower = cleaned.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix(prefix) {
            let offset = cleaned.len() - rest.len();
            cleaned = cleaned[offset..].trim().to_string();
        }
    }

    let words: Vec<&str> = cleaned.split_whitespace().collect();
    match words.len() {
        0 => None,
        1..=3 => Some(words.join(" ")),
        _ => Some(words[0].to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(target: PhaseTarget) -> PhaseDef {
        default_phases()
            .into_iter()
            .find(|p| p.target == target)
            .unwrap()
    }

    #[test]
    fn default_flow_has_ten_phases_with_unique_keys() {
        let phases = default_phases();
        assert_eq!(phases.len(), 10);
        let mut keys: Vec<&str> = phases.iter().map(|p| p.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), 10);
        assert_eq!(phases.last().unwrap().target, PhaseTarget::WrapUp);
    }

    #[test]
    fn skip_words_complete_with_placeholder() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(&phase(PhaseTarget::Priorities), "skip", &mut snapshot);
        assert!(result.completed);
        assert!(result.skipped);
        assert_eq!(snapshot.notes.get("priorities").unwrap(), "(skipped)");
    }

    #[test]
    fn skip_detection_variants() {
        assert!(is_skip("skip"));
        assert!(is_skip("Don't know"));
        assert!(is_skip("idk"));
        assert!(is_skip("not sure..."));
        assert!(!is_skip("I don't know if mornings or evenings, probably mornings"));
        assert!(!is_skip("skipping rope"));
    }

    #[test]
    fn name_phase_extracts_display_name() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(&phase(PhaseTarget::DisplayName), "my name is Dana", &mut snapshot);
        assert!(result.completed);
        assert_eq!(result.display_name.as_deref(), Some("Dana"));
    }

    #[test]
    fn name_extraction_variants() {
        assert_eq!(extract_name("I'm Priya"), Some("Priya".into()));
        assert_eq!(extract_name("call me Sam"), Some("Sam".into()));
        assert_eq!(extract_name("Dana"), Some("Dana".into()));
        assert_eq!(
            extract_name("Mary Jane Watson"),
            Some("Mary Jane Watson".into())
        );
    }

    #[test]
    fn priorities_phase_splits_list() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(
            &phase(PhaseTarget::Priorities),
            "shipping the launch, family time",
            &mut snapshot,
        );
        assert!(result.completed);
        assert_eq!(snapshot.priorities.len(), 2);
    }

    #[test]
    fn peak_energy_phase_extracts_windows() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(
            &phase(PhaseTarget::PeakWindows),
            "sharpest 9-11am usually",
            &mut snapshot,
        );
        assert!(result.completed);
        assert_eq!(snapshot.peak_windows.len(), 1);
    }

    #[test]
    fn unstructured_but_wordy_answer_lands_in_notes() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(
            &phase(PhaseTarget::PeakWindows),
            "honestly it depends on how the day went before",
            &mut snapshot,
        );
        assert!(result.completed);
        assert!(snapshot.peak_windows.is_empty());
        assert!(snapshot.notes.contains_key("peak_energy"));
    }

    #[test]
    fn too_little_signal_does_not_complete() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(&phase(PhaseTarget::Priorities), "eh", &mut snapshot);
        assert!(!result.completed);
    }

    #[test]
    fn time_bounds_before_and_after() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(
            &phase(PhaseTarget::TimeBounds),
            "nothing before 8am or after 9pm please",
            &mut snapshot,
        );
        assert!(result.completed);
        assert_eq!(snapshot.earliest_hour, Some(8));
        assert_eq!(snapshot.latest_hour, Some(21));
    }

    #[test]
    fn non_negotiables_capture_constraint_window() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(
            &phase(PhaseTarget::NonNegotiables),
            "school pickup at 3pm",
            &mut snapshot,
        );
        assert!(result.completed);
        assert_eq!(snapshot.non_negotiables.len(), 1);
        assert_eq!(snapshot.non_negotiables[0].start_hour, 15);
    }

    #[test]
    fn wrap_up_always_completes() {
        let mut snapshot = InsightSnapshot::default();
        let result = apply_phase(&phase(PhaseTarget::WrapUp), "anything", &mut snapshot);
        assert!(result.completed);
    }
}
