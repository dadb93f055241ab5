//! The council: pitches, anonymized peer review and chairman synthesis

pub mod anonymize;
pub mod chairman;
pub mod pitch;
pub mod review;
pub mod validation;

pub use anonymize::{Anonymizer, LabelMap};
pub use chairman::{fallback_decision, ChairmanEngine, ChairmanError, FallbackPolicy, FALLBACK_MARKER};
pub use pitch::{PitchEngine, PitchOutcome, PitchReport, PitchReportSummary, PitchRequest};
pub use review::{AttributedReview, ReviewEngine, ReviewRound};
pub use validation::{validate_reply, PitchViolation, ViolationClass, BANNED_TERMS};
