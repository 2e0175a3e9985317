//! The error kinds produced by the orchestration engine.

use std::fmt;

/// An error produced somewhere in the cluster orchestration engine.
///
/// Every error the core raises is one of these kinds. None of them
/// propagate synchronously out of a running reconciliation loop: they are
/// logged and folded into node or cluster state, and the loop resumes on
/// its next tick.
#[derive(Clone, Debug)]
pub enum OrrError {
    /// An RPC failed, or its result shape was invalid.
    Transport(String),

    /// Required software was missing, or outside its supported version
    /// range, on a node.
    UnsupportedVersion(String),

    /// A [`crate::zone_input::ZoneInput`] could not produce zone content.
    Fetch(String),

    /// An invalid descriptor was found at start-up (missing uuid/mode/
    /// policy, malformed zone record).
    Config(String),

    /// An "impossible" situation was observed (e.g. a node in `UNKNOWN`
    /// state inside the operational code path).
    Invariant(String),

    /// The database could not be reached or set up.
    External(String),
}

impl fmt::Display for OrrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::UnsupportedVersion(msg) => write!(f, "unsupported version: {msg}"),
            Self::Fetch(msg) => write!(f, "zone fetch error: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Invariant(msg) => write!(f, "invariant violation: {msg}"),
            Self::External(msg) => write!(f, "external dependency error: {msg}"),
        }
    }
}

impl std::error::Error for OrrError {}

impl From<reqwest::Error> for OrrError {
    fn from(err: reqwest::Error) -> Self {
        OrrError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for OrrError {
    fn from(err: serde_json::Error) -> Self {
        OrrError::Transport(format!("malformed JSON: {err}"))
    }
}

impl From<sqlx::Error> for OrrError {
    fn from(err: sqlx::Error) -> Self {
        OrrError::External(err.to_string())
    }
}
