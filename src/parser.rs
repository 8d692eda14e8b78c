//! Natural-language event intake parser.
//!
//! Turns free text like "meeting with John tomorrow at 3pm" into a
//! structured `EventCandidate`. Relative expressions resolve against the
//! caller-supplied local "now", so parsing is a pure function of its
//! inputs. A missing time is an error, never a guess; a missing duration
//! gets the documented default with a confidence penalty.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Duration applied when the text names none.
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

/// Title applied when nothing remains after stripping time phrases.
pub const FALLBACK_TITLE: &str = "New event";

/// A structured candidate event. Ephemeral: lives only within a single
/// parse → confirm round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCandidate {
    pub title: String,
    /// Resolved absolute start instant.
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    /// How much of {title, time, duration} was extracted vs defaulted.
    pub confidence: f32,
    pub source_text: String,
    /// User timezone the start was resolved in, kept for display.
    pub timezone: Tz,
}

impl EventCandidate {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(self.duration_minutes)
    }

    /// Start rendered in the user's timezone.
    pub fn local_start(&self) -> DateTime<Tz> {
        self.start.with_timezone(&self.timezone)
    }
}

// ── Pattern tables ──────────────────────────────────────────────────

static TIME_12H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)\b").unwrap()
});

static TIME_24H: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:at\s+)?([01]?\d|2[0-3]):([0-5]\d)\b").unwrap());

static TIME_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:at\s+)?(noon|midday|midnight)\b").unwrap());

static DATE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(today|tonight|tomorrow)\b").unwrap());

static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:on\s+)?(next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});

static RELATIVE_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bin\s+(\d{1,3})\s*(minutes?|mins?|hours?|hrs?)\b").unwrap()
});

static DURATION_FOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(\d{1,3})\s*(minutes?|mins?|hours?|hrs?|h)\b").unwrap()
});

static DURATION_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})\s*-?\s*(minutes?|mins?|hours?|hrs?)\b").unwrap()
});

static DURATION_AN_HOUR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(half\s+)?an?\s+hour\b").unwrap()
});

static LEADING_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:hey\s+|hi\s+|please\s+)*(?:can|could|would)?\s*(?:you\s+)?(?:please\s+)?(?:schedule|book|add|set\s+up|setup|create|plan|put(?:\s+in)?)\s+(?:a\s+|an\s+|the\s+|me\s+(?:a\s+|an\s+)?)?",
    )
    .unwrap()
});

/// Whether the text carries enough time/date phrasing to be worth a full
/// parse. Used by the router as the calendar-intent signal.
pub fn has_calendar_intent(text: &str) -> bool {
    TIME_12H.is_match(text)
        || TIME_24H.is_match(text)
        || TIME_WORD.is_match(text)
        || DATE_WORD.is_match(text)
        || WEEKDAY.is_match(text)
        || RELATIVE_OFFSET.is_match(text)
}

/// Parse free text into an event candidate.
///
/// `now_local` anchors relative expressions and must already be in the
/// user's timezone.
pub fn parse(text: &str, tz: Tz, now_local: DateTime<Tz>) -> Result<EventCandidate, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::EmptyInput);
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();

    // Relative offset ("in 20 minutes") fixes the start outright, and its
    // number must not be mistaken for a duration.
    let offset = extract_relative_offset(trimmed, &mut spans);
    let (duration_minutes, duration_explicit) =
        extract_duration(trimmed, offset.is_none(), &mut spans);

    if let Some(offset) = offset {
        let start_local = now_local + offset;
        let title = extract_title(trimmed, &spans);
        return Ok(build_candidate(
            title,
            start_local.with_timezone(&Utc),
            duration_minutes,
            duration_explicit,
            true,
            trimmed,
            tz,
        ));
    }

    let time = extract_time_of_day(trimmed, &mut spans)
        .ok_or_else(|| ParseError::NoTimeSignal {
            text: trimmed.to_string(),
        })?;

    let explicit_date = extract_date(trimmed, now_local.date_naive(), &mut spans);
    let date_explicit = explicit_date.is_some();
    let mut date = explicit_date.unwrap_or_else(|| now_local.date_naive());

    let mut start_local = resolve_local(tz, NaiveDateTime::new(date, time)).ok_or_else(|| {
        ParseError::UnresolvableTime {
            phrase: format!("{date} {time}"),
        }
    })?;

    // Without an explicit date, "at 3pm" means the next 3pm, not a past one.
    if !date_explicit && start_local <= now_local {
        date = date.succ_opt().unwrap_or(date);
        start_local = resolve_local(tz, NaiveDateTime::new(date, time)).ok_or_else(|| {
            ParseError::UnresolvableTime {
                phrase: format!("{date} {time}"),
            }
        })?;
    }

    let title = extract_title(trimmed, &spans);
    Ok(build_candidate(
        title,
        start_local.with_timezone(&Utc),
        duration_minutes,
        duration_explicit,
        date_explicit,
        trimmed,
        tz,
    ))
}

fn build_candidate(
    title: String,
    start: DateTime<Utc>,
    duration_minutes: i64,
    duration_explicit: bool,
    date_explicit: bool,
    source: &str,
    tz: Tz,
) -> EventCandidate {
    let title_explicit = !title.is_empty();
    let mut confidence: f32 = 1.0;
    if !duration_explicit {
        confidence -= 0.15;
    }
    if !date_explicit {
        confidence -= 0.1;
    }
    if !title_explicit {
        confidence -= 0.35;
    }

    EventCandidate {
        title: if title_explicit {
            title
        } else {
            FALLBACK_TITLE.to_string()
        },
        start,
        duration_minutes,
        confidence: confidence.clamp(0.0, 1.0),
        source_text: source.to_string(),
        timezone: tz,
    }
}

// ── Extraction helpers ──────────────────────────────────────────────

fn extract_duration(
    text: &str,
    allow_bare: bool,
    spans: &mut Vec<(usize, usize)>,
) -> (i64, bool) {
    if let Some(caps) = DURATION_AN_HOUR.captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let minutes = if caps.get(1).is_some() { 30 } else { 60 };
        return (minutes, true);
    }

    let patterns: &[&Regex] = if allow_bare {
        &[&*DURATION_FOR, &*DURATION_BARE]
    } else {
        &[&*DURATION_FOR]
    };
    for pattern in patterns {
        if let Some(caps) = pattern.captures(text) {
            let whole = caps.get(0).unwrap();
            let amount: i64 = caps[1].parse().unwrap_or(0);
            if amount == 0 {
                continue;
            }
            spans.push((whole.start(), whole.end()));
            let unit = caps[2].to_ascii_lowercase();
            let minutes = if unit.starts_with('h') {
                amount * 60
            } else {
                amount
            };
            return (minutes, true);
        }
    }

    (DEFAULT_DURATION_MINUTES, false)
}

fn extract_relative_offset(text: &str, spans: &mut Vec<(usize, usize)>) -> Option<Duration> {
    let caps = RELATIVE_OFFSET.captures(text)?;
    let whole = caps.get(0).unwrap();
    let amount: i64 = caps[1].parse().ok()?;
    spans.push((whole.start(), whole.end()));
    let unit = caps[2].to_ascii_lowercase();
    if unit.starts_with('h') {
        Some(Duration::hours(amount))
    } else {
        Some(Duration::minutes(amount))
    }
}

fn extract_time_of_day(text: &str, spans: &mut Vec<(usize, usize)>) -> Option<NaiveTime> {
    if let Some(caps) = TIME_12H.captures(text) {
        let whole = caps.get(0).unwrap();
        let hour_12: u32 = caps[1].parse().ok()?;
        if !(1..=12).contains(&hour_12) {
            return None;
        }
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        let pm = caps[3].eq_ignore_ascii_case("pm");
        let hour = match (hour_12, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        spans.push((whole.start(), whole.end()));
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    if let Some(caps) = TIME_WORD.captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let hour = if caps[1].eq_ignore_ascii_case("midnight") {
            0
        } else {
            12
        };
        return NaiveTime::from_hms_opt(hour, 0, 0);
    }

    if let Some(caps) = TIME_24H.captures(text) {
        let whole = caps.get(0).unwrap();
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        spans.push((whole.start(), whole.end()));
        return NaiveTime::from_hms_opt(hour, minute, 0);
    }

    None
}

fn extract_date(
    text: &str,
    today: chrono::NaiveDate,
    spans: &mut Vec<(usize, usize)>,
) -> Option<chrono::NaiveDate> {
    if let Some(caps) = DATE_WORD.captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let word = caps[1].to_ascii_lowercase();
        return match word.as_str() {
            "tomorrow" => today.succ_opt(),
            // "today" and "tonight" both anchor to the current date.
            _ => Some(today),
        };
    }

    if let Some(caps) = WEEKDAY.captures(text) {
        let whole = caps.get(0).unwrap();
        spans.push((whole.start(), whole.end()));
        let target = parse_weekday(&caps[2])?;
        // Bare weekday: next occurrence (1..=7 days out).
        // "next" weekday: the occurrence a week after that.
        let mut days_ahead =
            (target.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
                .rem_euclid(7);
        if days_ahead == 0 {
            days_ahead = 7;
        }
        if caps.get(1).is_some() {
            days_ahead += 7;
        }
        return today.checked_add_signed(Duration::days(days_ahead));
    }

    None
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word.to_ascii_lowercase().as_str() {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Resolve a naive local datetime in `tz`, tolerating DST ambiguity.
///
/// Ambiguous times (fall-back) take the earlier instant; nonexistent
/// times (spring-forward gap) are unresolvable.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    if let Some(dt) = tz.from_local_datetime(&naive).single() {
        return Some(dt);
    }
    tz.from_local_datetime(&naive).earliest()
}

/// Remove matched spans and scheduling-verb prefixes, leaving the title.
fn extract_title(text: &str, spans: &[(usize, usize)]) -> String {
    let mut kept = String::with_capacity(text.len());
    for (i, ch) in text.char_indices() {
        if spans.iter().any(|&(s, e)| i >= s && i < e) {
            continue;
        }
        kept.push(ch);
    }

    let kept = LEADING_VERB.replace(kept.trim(), "");
    let mut words: Vec<&str> = kept.split_whitespace().collect();

    // Drop connector words left dangling at either end after stripping.
    const DANGLING: &[&str] = &["at", "on", "for", "from", "in", "the", "a", "an", "to"];
    while let Some(last) = words.last() {
        if DANGLING.contains(&last.to_ascii_lowercase().as_str()) {
            words.pop();
        } else {
            break;
        }
    }
    while let Some(first) = words.first() {
        if DANGLING.contains(&first.to_ascii_lowercase().as_str()) {
            words.remove(0);
        } else {
            break;
        }
    }

    words
        .join(" ")
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> Tz {
        "America/New_York".parse().unwrap()
    }

    /// Monday 2026-03-02, 10:00 local.
    fn monday_morning() -> DateTime<Tz> {
        tz().with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn meeting_tomorrow_at_3pm() {
        let candidate = parse("meeting with John tomorrow at 3pm", tz(), monday_morning()).unwrap();
        assert_eq!(candidate.title, "meeting with John");
        let local = candidate.local_start();
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(local.time(), NaiveTime::from_hms_opt(15, 0, 0).unwrap());
        assert_eq!(candidate.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert!(candidate.confidence > 0.6);
    }

    #[test]
    fn weekday_with_minutes() {
        let candidate = parse("dentist Friday at 2:30pm", tz(), monday_morning()).unwrap();
        let local = candidate.local_start();
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 6).unwrap());
        assert_eq!(local.time(), NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(candidate.title, "dentist");
    }

    #[test]
    fn next_weekday_skips_a_week() {
        let bare = parse("sync tuesday at 9am", tz(), monday_morning()).unwrap();
        let next = parse("sync next tuesday at 9am", tz(), monday_morning()).unwrap();
        assert_eq!(
            bare.local_start().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
        );
        assert_eq!(
            next.local_start().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[test]
    fn explicit_duration_wins_and_raises_confidence() {
        let explicit = parse("call mom tomorrow at 15:00 for 30 minutes", tz(), monday_morning())
            .unwrap();
        assert_eq!(explicit.duration_minutes, 30);
        assert_eq!(explicit.title, "call mom");

        let defaulted = parse("call mom tomorrow at 15:00", tz(), monday_morning()).unwrap();
        assert_eq!(defaulted.duration_minutes, DEFAULT_DURATION_MINUTES);
        assert!(explicit.confidence > defaulted.confidence);
    }

    #[test]
    fn hour_durations_convert_to_minutes() {
        let candidate =
            parse("deep work tomorrow at 9am for 2 hours", tz(), monday_morning()).unwrap();
        assert_eq!(candidate.duration_minutes, 120);

        let an_hour = parse("review tomorrow at 9am for an hour", tz(), monday_morning()).unwrap();
        assert_eq!(an_hour.duration_minutes, 60);

        let half = parse("standup tomorrow at 9am for half an hour", tz(), monday_morning())
            .unwrap();
        assert_eq!(half.duration_minutes, 30);
    }

    #[test]
    fn noon_and_midnight_words() {
        let noon = parse("lunch with Sam tomorrow at noon", tz(), monday_morning()).unwrap();
        assert_eq!(noon.local_start().time(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert_eq!(noon.title, "lunch with Sam");

        let midnight = parse("server deploy tomorrow at midnight", tz(), monday_morning()).unwrap();
        assert_eq!(
            midnight.local_start().time(),
            NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn twelve_oclock_edge_cases() {
        let noon = parse("lunch tomorrow at 12pm", tz(), monday_morning()).unwrap();
        assert_eq!(noon.local_start().time(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());

        let midnight = parse("job run tomorrow at 12am", tz(), monday_morning()).unwrap();
        assert_eq!(
            midnight.local_start().time(),
            NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn bare_time_resolves_to_upcoming_instant() {
        // 10:00 now; "at 9am" already passed today, so it means tomorrow.
        let past = parse("workout at 9am", tz(), monday_morning()).unwrap();
        assert_eq!(
            past.local_start().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
        );

        // "at 3pm" is still ahead today.
        let ahead = parse("workout at 3pm", tz(), monday_morning()).unwrap();
        assert_eq!(
            ahead.local_start().date_naive(),
            chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
    }

    #[test]
    fn relative_offset_start() {
        let candidate = parse("standup in 20 minutes", tz(), monday_morning()).unwrap();
        let expected = monday_morning() + Duration::minutes(20);
        assert_eq!(candidate.start, expected.with_timezone(&Utc));
        assert_eq!(candidate.title, "standup");
    }

    #[test]
    fn missing_time_is_an_error_not_a_guess() {
        let result = parse("dentist appointment tomorrow", tz(), monday_morning());
        assert!(matches!(result, Err(ParseError::NoTimeSignal { .. })));

        let result = parse("let's catch up sometime", tz(), monday_morning());
        assert!(matches!(result, Err(ParseError::NoTimeSignal { .. })));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(parse("   ", tz(), monday_morning()), Err(ParseError::EmptyInput)));
    }

    #[test]
    fn scheduling_verbs_are_stripped_from_title() {
        let candidate =
            parse("schedule a team retro tomorrow at 4pm", tz(), monday_morning()).unwrap();
        assert_eq!(candidate.title, "team retro");

        let candidate =
            parse("can you book the dentist tomorrow at 8am", tz(), monday_morning()).unwrap();
        assert_eq!(candidate.title, "dentist");
    }

    #[test]
    fn titleless_text_gets_fallback_and_penalty() {
        let candidate = parse("tomorrow at 3pm", tz(), monday_morning()).unwrap();
        assert_eq!(candidate.title, FALLBACK_TITLE);
        let titled = parse("review tomorrow at 3pm", tz(), monday_morning()).unwrap();
        assert!(candidate.confidence < titled.confidence);
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let candidate = parse("at 3pm", tz(), monday_morning()).unwrap();
        assert!((0.0..=1.0).contains(&candidate.confidence));
        assert!(candidate.confidence > 0.0);
    }

    #[test]
    fn calendar_intent_signal() {
        assert!(has_calendar_intent("meeting tomorrow at 3pm"));
        assert!(has_calendar_intent("dinner friday"));
        assert!(has_calendar_intent("standup in 15 minutes"));
        assert!(has_calendar_intent("lunch at noon"));
        assert!(!has_calendar_intent("how are you doing"));
        assert!(!has_calendar_intent("thanks!"));
    }

    #[test]
    fn end_is_start_plus_duration() {
        let candidate = parse("review tomorrow at 3pm for 45 minutes", tz(), monday_morning())
            .unwrap();
        assert_eq!(candidate.end() - candidate.start, Duration::minutes(45));
    }
}
