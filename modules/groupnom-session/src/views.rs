//! Read models served to polling clients.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use groupnom_common::{FoodMethod, GeoPoint, Restaurant, SelectionFilters, Session, SessionStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProgress {
    pub participant_id: String,
    /// Position in join order; the host is 0.
    pub join_index: usize,
    pub vote_count: usize,
    pub finished: bool,
    pub is_host: bool,
}

impl ParticipantProgress {
    fn of(session: &Session, join_index: usize, participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            join_index,
            vote_count: session.vote_count_for(participant_id),
            finished: session.has_finished_voting(participant_id),
            is_host: session.is_host(participant_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub code: String,
    pub status: SessionStatus,
    pub host_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub candidates: Vec<Restaurant>,
    pub total_candidates: usize,
    pub participants: Vec<ParticipantProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SelectionFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_method_result: Option<FoodMethod>,
    /// Progress of the participant asking, if they have joined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_status: Option<ParticipantProgress>,
}

impl SessionView {
    pub fn build(session: &Session, viewer: Option<&str>, expires_at: DateTime<Utc>) -> Self {
        let participants: Vec<ParticipantProgress> = session
            .participants
            .iter()
            .enumerate()
            .map(|(i, p)| ParticipantProgress::of(session, i, p))
            .collect();
        let user_status = viewer.and_then(|v| participants.iter().find(|p| p.participant_id == v).cloned());

        Self {
            code: session.code.clone(),
            status: session.status,
            host_id: session.host_id.clone(),
            created_at: session.created_at,
            expires_at,
            candidates: session.candidates.clone(),
            total_candidates: session.candidates.len(),
            participants,
            filters: session.filters.clone(),
            location: session.location,
            food_method_result: session.food_method_result,
            user_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub code: String,
    pub status: SessionStatus,
    /// Finished, or every participant has voted on everything.
    pub all_finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_finished: Option<bool>,
    pub participant_count: usize,
    pub total_votes: usize,
    pub total_candidates: usize,
    /// When the client should poll again.
    pub poll_after_ms: u64,
}

impl StatusView {
    pub fn build(session: &Session, participant: Option<&str>, poll_after: Duration) -> Self {
        Self {
            code: session.code.clone(),
            status: session.status,
            all_finished: match session.status {
                SessionStatus::Finished => true,
                SessionStatus::Active => session.all_participants_finished(),
                SessionStatus::Pending | SessionStatus::Reconfiguring => false,
            },
            participant_finished: participant
                .filter(|p| session.is_participant(p))
                .map(|p| session.has_finished_voting(p)),
            participant_count: session.participants.len(),
            total_votes: session.votes.len(),
            total_candidates: session.candidates.len(),
            poll_after_ms: poll_after.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodMethodTally {
    pub method: FoodMethod,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodMethodTallies {
    /// Always all three methods, in a fixed order.
    pub tallies: Vec<FoodMethodTally>,
    pub total_votes: usize,
    pub result: Option<FoodMethod>,
}

impl FoodMethodTallies {
    pub fn from_session(session: &Session) -> Self {
        let tallies = FoodMethod::ALL
            .iter()
            .map(|method| FoodMethodTally {
                method: *method,
                count: session.food_method_votes.values().filter(|m| *m == method).count(),
            })
            .collect();
        Self {
            tallies,
            total_votes: session.food_method_votes.len(),
            result: session.food_method_result,
        }
    }

    pub fn count(&self, method: FoodMethod) -> usize {
        self.tallies
            .iter()
            .find(|t| t.method == method)
            .map(|t| t.count)
            .unwrap_or(0)
    }
}
