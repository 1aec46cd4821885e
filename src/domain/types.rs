use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What should happen to a message once its verdict is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpamAction {
    #[serde(rename = "no action")]
    NoAction,
    #[serde(rename = "soft reject")]
    SoftReject,
    #[serde(rename = "reject")]
    Reject,
    #[serde(rename = "rewrite subject")]
    RewriteSubject,
    #[serde(rename = "add header")]
    AddHeader,
    #[serde(rename = "greylist")]
    Greylist,
}

impl SpamAction {
    pub const ALL: [SpamAction; 6] = [
        SpamAction::NoAction,
        SpamAction::SoftReject,
        SpamAction::Reject,
        SpamAction::RewriteSubject,
        SpamAction::AddHeader,
        SpamAction::Greylist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpamAction::NoAction => "no action",
            SpamAction::SoftReject => "soft reject",
            SpamAction::Reject => "reject",
            SpamAction::RewriteSubject => "rewrite subject",
            SpamAction::AddHeader => "add header",
            SpamAction::Greylist => "greylist",
        }
    }
}

impl fmt::Display for SpamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown spam action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for SpamAction {
    type Err = UnknownAction;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-'], " ");
        SpamAction::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| UnknownAction(value.to_string()))
    }
}

/// The two classification backends. Spamd is the primary, rspamd the secondary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Spamd,
    Rspamd,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Spamd => f.write_str("spamd"),
            Backend::Rspamd => f.write_str("rspamd"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Average,
    Lowest,
    Highest,
    Spamd,
    Rspamd,
}

impl Strategy {
    /// Backend a single-source strategy depends on.
    pub fn required_backend(&self) -> Option<Backend> {
        match self {
            Strategy::Spamd => Some(Backend::Spamd),
            Strategy::Rspamd => Some(Backend::Rspamd),
            Strategy::Average | Strategy::Lowest | Strategy::Highest => None,
        }
    }

    /// Whether the strategy reads the result of `backend` at all.
    pub fn consults(&self, backend: Backend) -> bool {
        self.required_backend().map_or(true, |required| required == backend)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Average => "average",
            Strategy::Lowest => "lowest",
            Strategy::Highest => "highest",
            Strategy::Spamd => "spamd",
            Strategy::Rspamd => "rspamd",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "average" => Ok(Strategy::Average),
            "lowest" => Ok(Strategy::Lowest),
            "highest" => Ok(Strategy::Highest),
            "spamd" => Ok(Strategy::Spamd),
            "rspamd" => Ok(Strategy::Rspamd),
            other => Err(format!("unknown strategy `{other}`")),
        }
    }
}

/// Which messages of an inbox count as candidates for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InboxBehaviour {
    /// Everything without the `\Seen` flag.
    #[default]
    #[serde(rename = "unseen")]
    Unseen,
    /// Everything without the private [`EATSPAM_SEEN_FLAG`].
    #[serde(rename = "eatspam-marked-unseen", alias = "eatspam")]
    EatspamMarkedUnseen,
    #[serde(rename = "all")]
    All,
}

impl fmt::Display for InboxBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboxBehaviour::Unseen => f.write_str("unseen"),
            InboxBehaviour::EatspamMarkedUnseen => f.write_str("eatspam-marked-unseen"),
            InboxBehaviour::All => f.write_str("all"),
        }
    }
}

#[cfg(test)]
pub const SEEN_FLAG: &str = "\\Seen";
pub const EATSPAM_SEEN_FLAG: &str = "$EatspamSeen";

/// Score table used by the `average` strategy, kept sorted highest threshold first.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionThresholds {
    entries: Vec<(f64, SpamAction)>,
}

impl ActionThresholds {
    pub fn new(entries: impl IntoIterator<Item = (f64, SpamAction)>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().collect();
        entries.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self { entries }
    }

    pub fn action_for(&self, score: f64) -> SpamAction {
        self.entries
            .iter()
            .find(|(threshold, _)| score >= *threshold)
            .map(|(_, action)| *action)
            .unwrap_or(SpamAction::NoAction)
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[(f64, SpamAction)] {
        &self.entries
    }
}

impl Default for ActionThresholds {
    fn default() -> Self {
        Self::new([
            (4.0, SpamAction::AddHeader),
            (6.0, SpamAction::RewriteSubject),
            (8.0, SpamAction::Reject),
        ])
    }
}

/// Successful answer of one classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub score: f64,
    pub action: Option<SpamAction>,
}

impl Score {
    pub fn new(score: f64, action: Option<SpamAction>) -> Self {
        Self { score, action }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("{backend} unreachable: {message}")]
    Transport { backend: Backend, message: String },
    #[error("{backend} did not answer within {seconds}s")]
    Timeout { backend: Backend, seconds: u64 },
    #[error("{backend} sent an unexpected response: {message}")]
    Protocol { backend: Backend, message: String },
}

impl ClassifierError {
    pub fn backend(&self) -> Backend {
        match self {
            ClassifierError::Transport { backend, .. }
            | ClassifierError::Timeout { backend, .. }
            | ClassifierError::Protocol { backend, .. } => *backend,
        }
    }
}

pub type ScoreResult = Result<Score, ClassifierError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerdictFailure {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("neither spamd nor rspamd is enabled")]
    NoBackendEnabled,
    #[error("strategy {strategy} requires {backend}, which is not enabled")]
    BackendDisabled { strategy: Strategy, backend: Backend },
}

/// The strategy-reduced outcome for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub score: f64,
    pub action: SpamAction,
    pub failure: Option<VerdictFailure>,
}

impl Verdict {
    pub fn new(score: f64, action: SpamAction) -> Self {
        Self {
            score,
            action,
            failure: None,
        }
    }

    pub fn failed(failure: impl Into<VerdictFailure>) -> Self {
        Self {
            score: 0.0,
            action: SpamAction::NoAction,
            failure: Some(failure.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// True when the executor has something to do for this verdict.
    pub fn is_actionable(&self) -> bool {
        self.failure.is_none() && self.action != SpamAction::NoAction
    }
}

impl From<Score> for Verdict {
    fn from(score: Score) -> Self {
        Verdict::new(score.score, score.action.unwrap_or(SpamAction::NoAction))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Ham,
    Spam,
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feedback::Ham => f.write_str("ham"),
            Feedback::Spam => f.write_str("spam"),
        }
    }
}
