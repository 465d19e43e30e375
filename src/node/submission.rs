//! Atom submission lifecycle.
//!
//! ```text
//! CREATED → SUBMITTING → SUBMITTED → STORED            (terminal ok)
//!                              ↘ COLLISION
//!                                ILLEGAL_STATE
//!                                UNSUITABLE_PEER
//!                                VALIDATION_ERROR      (terminal fail)
//! ```

use serde::{Deserialize, Serialize};

/// State of one atom submission, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Created,
    Submitting,
    Submitted,
    Stored,
    Collision,
    IllegalState,
    UnsuitablePeer,
    ValidationError,
}

impl SubmissionState {
    /// Parse the wire form of a state.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATED" => Some(Self::Created),
            "SUBMITTING" => Some(Self::Submitting),
            "SUBMITTED" => Some(Self::Submitted),
            "STORED" => Some(Self::Stored),
            "COLLISION" => Some(Self::Collision),
            "ILLEGAL_STATE" => Some(Self::IllegalState),
            "UNSUITABLE_PEER" => Some(Self::UnsuitablePeer),
            "VALIDATION_ERROR" => Some(Self::ValidationError),
            _ => None,
        }
    }

    /// Wire form, also used as the error code prefix.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitting => "SUBMITTING",
            Self::Submitted => "SUBMITTED",
            Self::Stored => "STORED",
            Self::Collision => "COLLISION",
            Self::IllegalState => "ILLEGAL_STATE",
            Self::UnsuitablePeer => "UNSUITABLE_PEER",
            Self::ValidationError => "VALIDATION_ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Stored
                | Self::Collision
                | Self::IllegalState
                | Self::UnsuitablePeer
                | Self::ValidationError
        )
    }

    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != Self::Stored
    }
}

/// What a submission stream currently shows.
///
/// The stream is last-value-cached: attaching late yields the most recent
/// progress, and the channel closing means the lifecycle completed.
#[derive(Debug, Clone)]
pub enum SubmissionProgress {
    State {
        state: SubmissionState,
        message: Option<String>,
    },
    /// Terminal failure, formatted `"<CODE>: <message>"`, or the socket
    /// error that killed the submission.
    Error(String),
}
