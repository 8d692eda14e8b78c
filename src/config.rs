//! Configuration types.

use std::time::Duration;

/// Top-level assistant configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Assistant name for identification.
    pub name: String,
    /// Timezone assigned to users who have not stated one (IANA name).
    pub default_timezone: String,
    /// Event duration applied when the user gives none.
    pub default_event_minutes: i64,
    /// Protective buffer defaults.
    pub buffers: BufferConfig,
    /// Confirmation dialogue limits.
    pub confirmation: ConfirmationConfig,
    /// Suggestion follow-up context limits.
    pub suggestions: SuggestionConfig,
    /// Window in which a redelivered identical message is answered from
    /// the recorded reply instead of being processed again.
    pub dedupe_window: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "sched-assist".to_string(),
            default_timezone: "UTC".to_string(),
            default_event_minutes: 60,
            buffers: BufferConfig::default(),
            confirmation: ConfirmationConfig::default(),
            suggestions: SuggestionConfig::default(),
            dedupe_window: Duration::from_secs(120), // 2 minutes
        }
    }
}

/// Buffer-time defaults for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Transition time before an event, minutes.
    pub pre_minutes: i64,
    /// Transition time after an event, minutes.
    pub post_minutes: i64,
    /// Floor a buffer shrinks toward before being dropped entirely.
    pub min_minutes: i64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pre_minutes: 15,
            post_minutes: 15,
            min_minutes: 5,
        }
    }
}

/// Confirmation dialogue limits.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationConfig {
    /// How long a proposal waits for a reply before being treated as
    /// cancelled.
    pub ttl: Duration,
    /// Ambiguous replies tolerated before the proposal is auto-discarded.
    pub max_ambiguous_turns: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60), // 30 minutes
            max_ambiguous_turns: 2,
        }
    }
}

/// Suggestion follow-up context limits.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionConfig {
    /// How long a generated suggestion set accepts follow-up replies.
    pub ttl: Duration,
    /// Cap on suggestions produced per completed conversation.
    pub max_suggestions: usize,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 3600), // 24 hours
            max_suggestions: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.default_event_minutes, 60);
        assert!(cfg.buffers.pre_minutes > 0);
        assert!(cfg.buffers.post_minutes > 0);
        assert!(cfg.buffers.min_minutes <= cfg.buffers.pre_minutes);
        assert!(cfg.confirmation.max_ambiguous_turns >= 1);
        assert!(cfg.dedupe_window > Duration::ZERO);
    }
}
