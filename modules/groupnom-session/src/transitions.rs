//! State machine steps as pure functions over `Session`.
//!
//! The service runs these inside its compare-and-swap loop, so each may be
//! applied more than once to successive snapshots. None of them touch
//! anything but the session they are given.

use serde::Serialize;

use groupnom_common::{
    FoodMethod, GeoPoint, InvalidVoteReason, Restaurant, SelectionFilters, Session, SessionError,
    SessionStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    /// The voter has now voted on every candidate.
    pub participant_finished: bool,
    /// Every participant has voted on every candidate.
    pub all_finished: bool,
    /// This vote moved the session to finished.
    #[serde(skip)]
    pub closed_session: bool,
}

fn require_host(session: &Session, participant_id: &str, action: &'static str) -> Result<(), SessionError> {
    if session.is_host(participant_id) {
        Ok(())
    } else {
        Err(SessionError::Forbidden { action })
    }
}

fn require_participant(session: &Session, participant_id: &str) -> Result<(), SessionError> {
    if session.is_participant(participant_id) {
        Ok(())
    } else {
        Err(SessionError::NotParticipant {
            code: session.code.clone(),
            participant_id: participant_id.to_string(),
        })
    }
}

/// pending → active. A second activation is a conflict, never an overwrite.
pub fn activate(
    session: &mut Session,
    host_id: &str,
    candidates: Vec<Restaurant>,
    filters: SelectionFilters,
    location: GeoPoint,
) -> Result<(), SessionError> {
    require_host(session, host_id, "activate the session")?;
    if session.status != SessionStatus::Pending {
        return Err(SessionError::Conflict {
            code: session.code.clone(),
        });
    }
    session.candidates = candidates;
    session.filters = Some(filters);
    session.location = Some(location);
    session.status = SessionStatus::Active;
    Ok(())
}

/// Adds a participant in join order. Finished sessions are read-only.
pub fn join(session: &mut Session, participant_id: &str) -> bool {
    if session.status == SessionStatus::Finished {
        return false;
    }
    session.add_participant(participant_id)
}

pub fn vote(
    session: &mut Session,
    participant_id: &str,
    candidate_id: &str,
    liked: bool,
) -> Result<VoteReceipt, SessionError> {
    match session.status {
        SessionStatus::Active => {}
        SessionStatus::Finished => {
            return Err(SessionError::InvalidVote {
                reason: InvalidVoteReason::SessionFinished,
            })
        }
        status @ (SessionStatus::Pending | SessionStatus::Reconfiguring) => {
            return Err(SessionError::InvalidState {
                action: "vote",
                status,
            })
        }
    }
    require_participant(session, participant_id)?;
    if !session.has_candidate(candidate_id) {
        return Err(SessionError::InvalidVote {
            reason: InvalidVoteReason::UnknownCandidate,
        });
    }

    session.record_vote(participant_id, candidate_id, liked);

    let participant_finished = session.has_finished_voting(participant_id);
    let all_finished = session.all_participants_finished();
    if all_finished {
        session.status = SessionStatus::Finished;
    }
    Ok(VoteReceipt {
        participant_finished,
        all_finished,
        closed_session: all_finished,
    })
}

/// active|finished → reconfiguring. Repeating the request is harmless.
pub fn request_reconfigure(session: &mut Session, host_id: &str) -> Result<(), SessionError> {
    require_host(session, host_id, "reconfigure the session")?;
    match session.status {
        SessionStatus::Active | SessionStatus::Finished => {
            session.status = SessionStatus::Reconfiguring;
            Ok(())
        }
        SessionStatus::Reconfiguring => Ok(()),
        status @ SessionStatus::Pending => Err(SessionError::InvalidState {
            action: "reconfigure",
            status,
        }),
    }
}

/// Starts a new round: new candidates and filters, empty vote log, same
/// participants.
pub fn reconfigure(
    session: &mut Session,
    host_id: &str,
    candidates: Vec<Restaurant>,
    filters: SelectionFilters,
    location: GeoPoint,
) -> Result<(), SessionError> {
    require_host(session, host_id, "reconfigure the session")?;
    if session.status == SessionStatus::Pending {
        return Err(SessionError::InvalidState {
            action: "reconfigure",
            status: SessionStatus::Pending,
        });
    }
    session.candidates = candidates;
    session.filters = Some(filters);
    session.location = Some(location);
    session.votes.clear();
    session.food_method_votes.clear();
    session.food_method_result = None;
    session.status = SessionStatus::Active;
    Ok(())
}

/// Host forces finish. Returns true when this call did the transition.
pub fn close_voting(session: &mut Session, host_id: &str) -> Result<bool, SessionError> {
    require_host(session, host_id, "close voting")?;
    match session.status {
        SessionStatus::Active => {
            session.status = SessionStatus::Finished;
            Ok(true)
        }
        SessionStatus::Finished => Ok(false),
        status => Err(SessionError::InvalidState {
            action: "close voting",
            status,
        }),
    }
}

fn require_finished(session: &Session, action: &'static str) -> Result<(), SessionError> {
    if session.status == SessionStatus::Finished {
        Ok(())
    } else {
        Err(SessionError::InvalidState {
            action,
            status: session.status,
        })
    }
}

/// How the group eats, voted once a restaurant is picked. Last vote wins.
pub fn vote_food_method(
    session: &mut Session,
    participant_id: &str,
    method: FoodMethod,
) -> Result<(), SessionError> {
    require_finished(session, "choose how to eat")?;
    require_participant(session, participant_id)?;
    session
        .food_method_votes
        .insert(participant_id.to_string(), method);
    Ok(())
}

pub fn set_food_method_result(
    session: &mut Session,
    host_id: &str,
    method: FoodMethod,
) -> Result<(), SessionError> {
    require_host(session, host_id, "set the final decision")?;
    require_finished(session, "set the final decision")?;
    session.food_method_result = Some(method);
    Ok(())
}
