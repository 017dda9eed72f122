use thiserror::Error;

use crate::types::SessionStatus;

/// Rejected request input. Raised while deserializing filters and locations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude out of range: {0}")]
    Latitude(f64),

    #[error("longitude out of range: {0}")]
    Longitude(f64),

    #[error("radius must be between 0 and 50 km, got {0}")]
    Radius(f64),

    #[error("minRating must be between 0 and 5, got {0}")]
    MinRating(f32),

    #[error("price tier must be between 1 and 4, got {0}")]
    PriceTier(u8),
}

/// Failures of the candidate selection pipeline.
#[derive(Error, Debug)]
pub enum SelectionError {
    /// Every filter applied and nothing was left. Widen the radius or relax
    /// filters; retrying the same request will not help.
    #[error("no restaurants matched the filters")]
    EmptyCandidatePool,

    /// The catalog failed on both the primary and the fallback query.
    #[error("catalog error: {0}")]
    Catalog(#[source] anyhow::Error),
}

/// Caller-visible outcomes of session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {code}")]
    NotFound { code: String },

    #[error("only the host can {action}")]
    Forbidden { action: &'static str },

    #[error("session {code} already exists")]
    Conflict { code: String },

    #[error("invalid vote: {reason}")]
    InvalidVote { reason: InvalidVoteReason },

    #[error("cannot {action} while session is {status}")]
    InvalidState {
        action: &'static str,
        status: SessionStatus,
    },

    #[error("{participant_id} has not joined session {code}")]
    NotParticipant { code: String, participant_id: String },

    #[error("no restaurants matched the filters")]
    EmptyCandidatePool,

    #[error("unable to allocate a unique session code")]
    CodeSpaceExhausted,

    #[error("too many concurrent updates to session {code}")]
    ConcurrencyExhausted { code: String },

    #[error("candidate selection failed: {0}")]
    Selection(#[source] SelectionError),

    #[error("session store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidVoteReason {
    /// Votes after close would corrupt the computed result.
    SessionFinished,
    UnknownCandidate,
}

impl std::fmt::Display for InvalidVoteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidVoteReason::SessionFinished => {
                write!(f, "session has already ended, voting is closed")
            }
            InvalidVoteReason::UnknownCandidate => {
                write!(f, "restaurant is not part of this round")
            }
        }
    }
}

impl From<SelectionError> for SessionError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::EmptyCandidatePool => SessionError::EmptyCandidatePool,
            other => SessionError::Selection(other),
        }
    }
}

impl SessionError {
    pub fn not_found(code: &str) -> Self {
        SessionError::NotFound {
            code: code.to_string(),
        }
    }
}
