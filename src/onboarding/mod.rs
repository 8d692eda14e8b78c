//! Onboarding conversation: a multi-phase dialogue that builds the
//! user's insight snapshot.

pub mod engine;
pub mod insight;
pub mod phases;

pub use engine::{AdvanceOutcome, ConversationEngine};
pub use insight::InsightSnapshot;
pub use phases::{KIND_ONBOARDING, PhaseDef};
