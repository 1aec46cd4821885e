pub mod message;
pub mod types;

pub use message::FetchedMessage;
pub use types::{
    ActionThresholds, Backend, ClassifierError, Feedback, InboxBehaviour, Score, ScoreResult,
    SpamAction, Strategy, Verdict, VerdictFailure, EATSPAM_SEEN_FLAG,
};
#[cfg(test)]
pub use types::SEEN_FLAG;
