use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::warn;

use groupnom_common::{InvalidVoteReason, SessionError};

pub fn status_for(err: &SessionError) -> StatusCode {
    match err {
        SessionError::NotFound { .. } => StatusCode::NOT_FOUND,
        SessionError::Forbidden { .. } | SessionError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        SessionError::InvalidVote {
            reason: InvalidVoteReason::SessionFinished,
        } => StatusCode::FORBIDDEN,
        SessionError::InvalidVote { .. } => StatusCode::BAD_REQUEST,
        SessionError::Conflict { .. } | SessionError::InvalidState { .. } => StatusCode::CONFLICT,
        SessionError::EmptyCandidatePool => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::CodeSpaceExhausted | SessionError::ConcurrencyExhausted { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Selection(_) => StatusCode::BAD_GATEWAY,
        SessionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn session_error(err: SessionError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "Session request failed");
    }
    error_body(status, err.to_string())
}

/// Malformed or out-of-range JSON bodies, including filter validation.
pub fn bad_body(rejection: JsonRejection) -> Response {
    error_body(StatusCode::BAD_REQUEST, rejection.body_text())
}

pub fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupnom_common::{SelectionError, SessionStatus};

    #[test]
    fn finished_votes_are_forbidden_not_bad_requests() {
        let finished = SessionError::InvalidVote {
            reason: InvalidVoteReason::SessionFinished,
        };
        let unknown = SessionError::InvalidVote {
            reason: InvalidVoteReason::UnknownCandidate,
        };
        assert_eq!(status_for(&finished), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&unknown), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_and_capacity_failures() {
        let catalog = SessionError::from(SelectionError::Catalog(anyhow::anyhow!("down")));
        let empty = SessionError::from(SelectionError::EmptyCandidatePool);
        assert_eq!(status_for(&catalog), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&empty), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(&SessionError::CodeSpaceExhausted),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&SessionError::InvalidState {
                action: "vote",
                status: SessionStatus::Pending,
            }),
            StatusCode::CONFLICT
        );
    }
}
