//! Insight snapshot: the structured profile accumulated across
//! onboarding phases.
//!
//! Each phase merges into one or more fields; nothing is ever
//! overwritten wholesale. Extraction is heuristic first, with optional
//! enrichment from the classifier collaborator.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A labeled hour range, e.g. "mornings" 9..12.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub label: String,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn new(label: impl Into<String>, start_hour: u32, end_hour: u32) -> Self {
        Self {
            label: label.into(),
            start_hour,
            end_hour,
        }
    }

    /// Whether two windows share any hour.
    pub fn overlaps(&self, other: &HourWindow) -> bool {
        self.start_hour < other.end_hour && other.start_hour < self.end_hour
    }
}

/// Accumulated user profile built across the onboarding conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightSnapshot {
    /// What matters most right now.
    #[serde(default)]
    pub priorities: Vec<String>,
    /// Hours of peak energy.
    #[serde(default)]
    pub peak_windows: Vec<HourWindow>,
    /// Hours of low energy.
    #[serde(default)]
    pub low_windows: Vec<HourWindow>,
    /// Core values, in the user's words.
    #[serde(default)]
    pub core_values: Vec<String>,
    /// Activities that give energy back.
    #[serde(default)]
    pub energizing: Vec<String>,
    /// Non-negotiable commitments, as protected hour windows.
    #[serde(default)]
    pub non_negotiables: Vec<HourWindow>,
    /// Earliest hour the user wants anything scheduled.
    #[serde(default)]
    pub earliest_hour: Option<u32>,
    /// Latest hour the user wants anything scheduled.
    #[serde(default)]
    pub latest_hour: Option<u32>,
    /// Tasks the user tends to put off.
    #[serde(default)]
    pub avoidance_tasks: Vec<String>,
    /// Raw phase answers that resisted structured extraction, keyed by
    /// phase. Skipped phases record a placeholder here.
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

impl InsightSnapshot {
    /// Append items, skipping case-insensitive duplicates.
    pub fn add_items(target: &mut Vec<String>, items: Vec<String>) {
        for item in items {
            let duplicate = target
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&item));
            if !duplicate {
                target.push(item);
            }
        }
    }

    /// Append windows, skipping exact duplicates.
    pub fn add_windows(target: &mut Vec<HourWindow>, windows: Vec<HourWindow>) {
        for window in windows {
            if !target.contains(&window) {
                target.push(window);
            }
        }
    }

    /// Record a raw note for a phase.
    pub fn note(&mut self, phase_key: &str, text: &str) {
        self.notes
            .insert(phase_key.to_string(), text.trim().to_string());
    }

    /// Merge a classifier extraction result. Unknown keys are ignored;
    /// malformed entries are dropped silently so a sloppy extraction can
    /// never corrupt the snapshot.
    pub fn merge_extracted(&mut self, value: &serde_json::Value) {
        for (key, target) in [
            ("priorities", &mut self.priorities),
            ("core_values", &mut self.core_values),
            ("energizing", &mut self.energizing),
            ("avoidance_tasks", &mut self.avoidance_tasks),
        ] {
            if let Some(items) = value.get(key).and_then(|v| v.as_array()) {
                let parsed = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                Self::add_items(target, parsed);
            }
        }

        for (key, target) in [
            ("peak_windows", &mut self.peak_windows),
            ("low_windows", &mut self.low_windows),
            ("non_negotiables", &mut self.non_negotiables),
        ] {
            if let Some(items) = value.get(key).and_then(|v| v.as_array()) {
                let parsed = items
                    .iter()
                    .filter_map(|v| {
                        let label = v.get("label")?.as_str()?.to_string();
                        let start_hour = v.get("start_hour")?.as_u64()? as u32;
                        let end_hour = v.get("end_hour")?.as_u64()? as u32;
                        (start_hour < 24 && end_hour <= 24 && start_hour < end_hour)
                            .then_some(HourWindow {
                                label,
                                start_hour,
                                end_hour,
                            })
                    })
                    .collect();
                Self::add_windows(target, parsed);
            }
        }

        if let Some(hour) = value.get("earliest_hour").and_then(|v| v.as_u64()) {
            if hour < 24 && self.earliest_hour.is_none() {
                self.earliest_hour = Some(hour as u32);
            }
        }
        if let Some(hour) = value.get("latest_hour").and_then(|v| v.as_u64()) {
            if hour <= 24 && self.latest_hour.is_none() {
                self.latest_hour = Some(hour as u32);
            }
        }
    }
}

// ── Heuristic extraction ────────────────────────────────────────────

static HOUR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:from\s+)?(\d{1,2})\s*(am|pm)?\s*(?:-|–|to|until)\s*(\d{1,2})\s*(am|pm)?\b")
        .unwrap()
});

static SINGLE_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:at\s+|by\s+|before\s+|after\s+)?(\d{1,2})\s*(am|pm)\b").unwrap());

/// Named day periods and the hour windows they imply.
const DAY_PERIODS: &[(&str, u32, u32)] = &[
    ("early morning", 6, 9),
    ("morning", 8, 12),
    ("midday", 11, 14),
    ("afternoon", 13, 17),
    ("evening", 18, 21),
    ("night", 20, 23),
];

fn meridiem_hour(raw: u32, meridiem: Option<&str>) -> Option<u32> {
    match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m == "pm" => {
            if raw == 12 {
                Some(12)
            } else if raw < 12 {
                Some(raw + 12)
            } else {
                None
            }
        }
        Some(_) => {
            if raw == 12 {
                Some(0)
            } else if raw < 12 {
                Some(raw)
            } else {
                None
            }
        }
        None => (raw < 24).then_some(raw),
    }
}

/// Pull labeled hour windows out of free text: explicit ranges
/// ("9-11am", "2pm to 4pm") and named periods ("mornings", "evening").
pub fn extract_hour_windows(text: &str) -> Vec<HourWindow> {
    let mut windows = Vec::new();

    for caps in HOUR_RANGE.captures_iter(text) {
        let raw_start: u32 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let raw_end: u32 = match caps[3].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let end_meridiem = caps.get(4).map(|m| m.as_str());
        // "9-11am": the start inherits the end's meridiem.
        let start_meridiem = caps.get(2).map(|m| m.as_str()).or(end_meridiem);

        let (Some(mut start), Some(end)) = (
            meridiem_hour(raw_start, start_meridiem),
            meridiem_hour(raw_end, end_meridiem),
        ) else {
            continue;
        };
        // "10-2pm" style ranges crossing noon.
        if start > end && start >= 12 && caps.get(2).is_none() {
            start -= 12;
        }
        if start < end {
            windows.push(HourWindow::new(caps[0].trim().to_string(), start, end));
        }
    }

    if windows.is_empty() {
        let lower = text.to_lowercase();
        for (name, start, end) in DAY_PERIODS {
            if lower.contains(name) {
                windows.push(HourWindow::new(*name, *start, *end));
                // "early morning" subsumes "morning".
                if *name == "early morning" {
                    break;
                }
            }
        }
    }

    windows
}

/// Pull a single constraint window out of text like "school pickup at
/// 3pm": one stated hour becomes a one-hour protected window.
pub fn extract_constraint_windows(text: &str) -> Vec<HourWindow> {
    let ranged = extract_hour_windows(text);
    if !ranged.is_empty() {
        return ranged;
    }

    SINGLE_HOUR
        .captures_iter(text)
        .filter_map(|caps| {
            let raw: u32 = caps[1].parse().ok()?;
            let hour = meridiem_hour(raw, caps.get(2).map(|m| m.as_str()))?;
            Some(HourWindow::new(caps[0].trim().to_string(), hour, (hour + 1).min(24)))
        })
        .collect()
}

/// Split a free-text enumeration into trimmed items. Fragments without
/// a vowel or digit ("hmm", "eh") are dropped as filler.
pub fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';', '\n'])
        .flat_map(|part| part.split(" and "))
        .map(|part| {
            part.trim()
                .trim_start_matches(|c: char| c.is_ascii_punctuation())
                .trim()
                .to_string()
        })
        .filter(|part| part.len() > 2 && part.len() <= 80)
        .filter(|part| {
            part.chars()
                .any(|c| "aeiouyAEIOUY".contains(c) || c.is_ascii_digit())
        })
        .take(8)
        .collect()
}
