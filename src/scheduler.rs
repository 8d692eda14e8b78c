//! Buffer-time scheduler.
//!
//! Wraps a candidate event with protective transition buffers and trims
//! them against the user's existing calendar. Existing events are never
//! moved or resized; only the candidate's own buffers shrink. The whole
//! computation is a pure function of its inputs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::CalendarEvent;
use crate::config::BufferConfig;
use crate::error::ScheduleError;
use crate::parser::EventCandidate;

/// Which side of the candidate a conflicting event touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSide {
    Before,
    After,
}

/// An existing event that constrained the candidate's buffers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConflict {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub side: ConflictSide,
}

/// A candidate event with buffers applied. Recomputed on every
/// scheduling attempt; never authoritative beyond the pending
/// confirmation it is snapshotted into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub candidate: EventCandidate,
    /// Transition minutes actually applied before the event.
    pub pre_minutes: i64,
    /// Transition minutes actually applied after the event.
    pub post_minutes: i64,
    pub conflicts: Vec<BufferConflict>,
    pub buffer_applied: bool,
}

impl BufferedEvent {
    /// Start of the protected window.
    pub fn padded_start(&self) -> DateTime<Utc> {
        self.candidate.start - Duration::minutes(self.pre_minutes)
    }

    /// End of the protected window.
    pub fn padded_end(&self) -> DateTime<Utc> {
        self.candidate.end() + Duration::minutes(self.post_minutes)
    }
}

/// Apply protective buffers to `candidate`, trimming against `existing`.
///
/// Buffers shrink toward zero as neighbouring events close in; the
/// post-buffer (transition out) is computed against its own gap
/// independently of the pre-buffer, so trimming one side never steals
/// from the other. An existing event overlapping the candidate's own
/// interval cannot be resolved by trimming and is an error.
pub fn apply_buffer(
    candidate: &EventCandidate,
    existing: &[CalendarEvent],
    config: &BufferConfig,
) -> Result<BufferedEvent, ScheduleError> {
    if candidate.duration_minutes <= 0 {
        return Err(ScheduleError::InvalidCandidate(format!(
            "non-positive duration: {} minutes",
            candidate.duration_minutes
        )));
    }

    let start = candidate.start;
    let end = candidate.end();

    // Events overlapping the candidate itself leave nothing to trim.
    let blocking: Vec<&CalendarEvent> = existing
        .iter()
        .filter(|e| e.start < end && start < e.end)
        .collect();
    if !blocking.is_empty() {
        let names: Vec<&str> = blocking.iter().map(|e| e.title.as_str()).collect();
        return Err(ScheduleError::ConflictUnresolvable(names.join(", ")));
    }

    let padded_start = start - Duration::minutes(config.pre_minutes);
    let padded_end = end + Duration::minutes(config.post_minutes);

    let mut pre = config.pre_minutes;
    let mut post = config.post_minutes;
    let mut conflicts = Vec::new();

    // Closed-interval test: an event that merely touches the padded
    // window still counts, so a neighbour starting exactly at
    // end + post_minutes is recorded and the buffer trims to the gap.
    for event in existing {
        if event.start > padded_end || event.end < padded_start {
            continue;
        }
        if event.end <= start {
            let gap = (start - event.end).num_minutes();
            pre = trim_to_gap(pre, gap, config.min_minutes);
            conflicts.push(BufferConflict {
                title: event.title.clone(),
                start: event.start,
                end: event.end,
                side: ConflictSide::Before,
            });
        } else if event.start >= end {
            let gap = (event.start - end).num_minutes();
            post = trim_to_gap(post, gap, config.min_minutes);
            conflicts.push(BufferConflict {
                title: event.title.clone(),
                start: event.start,
                end: event.end,
                side: ConflictSide::After,
            });
        }
    }

    conflicts.sort_by_key(|c| c.start);

    Ok(BufferedEvent {
        candidate: candidate.clone(),
        pre_minutes: pre,
        post_minutes: post,
        conflicts,
        buffer_applied: pre > 0 || post > 0,
    })
}

/// Shrink a buffer into `gap`, respecting the floor.
///
/// A buffer shrinks down to `min_minutes` before being dropped; a gap
/// too small for even the floor removes the buffer entirely rather than
/// keeping a token sliver.
fn trim_to_gap(current: i64, gap: i64, min_minutes: i64) -> i64 {
    let gap = gap.max(0);
    if gap >= min_minutes {
        current.min(gap)
    } else {
        0
    }
}

/// Human-readable justification of the applied buffers.
pub fn explain(buffered: &BufferedEvent, defaults: &BufferConfig) -> String {
    let tz = buffered.candidate.timezone;
    let mut parts = vec![format!(
        "\"{}\" is protected with {} min before and {} min after.",
        buffered.candidate.title, buffered.pre_minutes, buffered.post_minutes
    )];

    for conflict in &buffered.conflicts {
        let when = conflict.start.with_timezone(&tz).format("%-I:%M %p");
        match conflict.side {
            ConflictSide::Before if buffered.pre_minutes < defaults.pre_minutes => {
                parts.push(format!(
                    "Trimmed the before-buffer from {} to {} min to clear \"{}\" (ends {}).",
                    defaults.pre_minutes,
                    buffered.pre_minutes,
                    conflict.title,
                    conflict.end.with_timezone(&tz).format("%-I:%M %p"),
                ));
            }
            ConflictSide::After if buffered.post_minutes < defaults.post_minutes => {
                parts.push(format!(
                    "Trimmed the after-buffer from {} to {} min to clear \"{}\" (starts {}).",
                    defaults.post_minutes, buffered.post_minutes, conflict.title, when,
                ));
            }
            _ => {
                parts.push(format!(
                    "\"{}\" at {} sits right at the edge of the buffer window.",
                    conflict.title, when,
                ));
            }
        }
    }

    parts.join(" ")
}
