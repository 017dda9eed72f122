//! Group consensus over a round's vote log.
//!
//! `resolve` is a pure function. Ties are returned as-is: when several
//! candidates win, the caller presents all of them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use groupnom_common::Vote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusKind {
    /// Every participant voted yes on each winner.
    Unanimous,
    /// Winners share the highest yes count.
    Plurality,
    /// Nobody voted yes on anything.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateTally {
    pub candidate_id: String,
    pub yes: u32,
    pub no: u32,
    /// Participants who voted on this candidate either way.
    pub voters: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub kind: ConsensusKind,
    /// In candidate-list order.
    pub winners: Vec<String>,
    /// One per candidate, in candidate-list order.
    pub tallies: Vec<CandidateTally>,
}

impl ConsensusResult {
    pub fn is_unanimous(&self) -> bool {
        self.kind == ConsensusKind::Unanimous
    }

    pub fn tally_for(&self, candidate_id: &str) -> Option<&CandidateTally> {
        self.tallies.iter().find(|t| t.candidate_id == candidate_id)
    }
}

pub fn resolve(candidate_ids: &[String], votes: &[Vote], participants: &[String]) -> ConsensusResult {
    // Last write wins per (participant, candidate), whatever the log holds.
    let mut latest: HashMap<(&str, &str), bool> = HashMap::new();
    for vote in votes {
        latest.insert((vote.participant_id.as_str(), vote.candidate_id.as_str()), vote.liked);
    }

    let mut yes_voters: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut tallies: Vec<CandidateTally> = candidate_ids
        .iter()
        .map(|id| CandidateTally {
            candidate_id: id.clone(),
            yes: 0,
            no: 0,
            voters: 0,
        })
        .collect();
    let index: HashMap<&str, usize> = candidate_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    for ((participant, candidate), liked) in &latest {
        let Some(&i) = index.get(candidate) else {
            continue;
        };
        let tally = &mut tallies[i];
        tally.voters += 1;
        if *liked {
            tally.yes += 1;
            yes_voters.entry(*candidate).or_default().insert(*participant);
        } else {
            tally.no += 1;
        }
    }

    let full_agreement: Vec<String> = if participants.is_empty() {
        Vec::new()
    } else {
        tallies
            .iter()
            .filter(|t| {
                yes_voters
                    .get(t.candidate_id.as_str())
                    .is_some_and(|set| participants.iter().all(|p| set.contains(p.as_str())))
            })
            .map(|t| t.candidate_id.clone())
            .collect()
    };

    if !full_agreement.is_empty() {
        return ConsensusResult {
            kind: ConsensusKind::Unanimous,
            winners: full_agreement,
            tallies,
        };
    }

    let max_yes = tallies.iter().map(|t| t.yes).max().unwrap_or(0);
    if max_yes == 0 {
        return ConsensusResult {
            kind: ConsensusKind::None,
            winners: Vec::new(),
            tallies,
        };
    }

    let winners = tallies
        .iter()
        .filter(|t| t.yes == max_yes)
        .map(|t| t.candidate_id.clone())
        .collect();
    ConsensusResult {
        kind: ConsensusKind::Plurality,
        winners,
        tallies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn vote(participant: &str, candidate: &str, liked: bool) -> Vote {
        Vote {
            participant_id: participant.into(),
            candidate_id: candidate.into(),
            liked,
        }
    }

    #[test]
    fn no_votes_is_none() {
        let result = resolve(&ids(&["c1", "c2"]), &[], &ids(&["a", "b"]));
        assert_eq!(result.kind, ConsensusKind::None);
        assert!(result.winners.is_empty());
        assert_eq!(result.tallies.len(), 2);
    }

    #[test]
    fn all_no_is_none() {
        let votes = vec![vote("a", "c1", false), vote("b", "c1", false)];
        let result = resolve(&ids(&["c1"]), &votes, &ids(&["a", "b"]));
        assert_eq!(result.kind, ConsensusKind::None);
        assert_eq!(result.tally_for("c1").unwrap().no, 2);
    }

    #[test]
    fn everyone_yes_on_one_is_unanimous() {
        let votes = vec![
            vote("a", "c1", true),
            vote("a", "c2", true),
            vote("b", "c1", true),
            vote("b", "c2", false),
        ];
        let result = resolve(&ids(&["c1", "c2"]), &votes, &ids(&["a", "b"]));
        assert!(result.is_unanimous());
        assert_eq!(result.winners, vec!["c1"]);
        let c1 = result.tally_for("c1").unwrap();
        assert_eq!((c1.yes, c1.no, c1.voters), (2, 0, 2));
        let c2 = result.tally_for("c2").unwrap();
        assert_eq!((c2.yes, c2.no, c2.voters), (1, 1, 2));
    }

    #[test]
    fn unanimous_ties_are_all_returned() {
        let votes = vec![
            vote("a", "c1", true),
            vote("a", "c2", true),
            vote("b", "c1", true),
            vote("b", "c2", true),
        ];
        let result = resolve(&ids(&["c1", "c2"]), &votes, &ids(&["a", "b"]));
        assert!(result.is_unanimous());
        assert_eq!(result.winners, vec!["c1", "c2"]);
    }

    #[test]
    fn missing_voter_blocks_unanimity() {
        // c is in the session but never voted, so two yes votes are not unanimous.
        let votes = vec![vote("a", "c1", true), vote("b", "c1", true)];
        let result = resolve(&ids(&["c1"]), &votes, &ids(&["a", "b", "c"]));
        assert_eq!(result.kind, ConsensusKind::Plurality);
        assert_eq!(result.winners, vec!["c1"]);
    }

    #[test]
    fn plurality_ties_surface_every_winner() {
        let votes = vec![
            vote("a", "c1", true),
            vote("a", "c2", false),
            vote("b", "c1", false),
            vote("b", "c2", true),
            vote("c", "c1", true),
            vote("c", "c2", true),
        ];
        let result = resolve(&ids(&["c1", "c2"]), &votes, &ids(&["a", "b", "c"]));
        assert_eq!(result.kind, ConsensusKind::Plurality);
        assert_eq!(result.winners, vec!["c1", "c2"]);
        for tally in &result.tallies {
            assert_eq!((tally.yes, tally.no, tally.voters), (2, 1, 3));
        }
    }

    #[test]
    fn later_vote_for_same_pair_wins() {
        let votes = vec![vote("a", "c1", true), vote("a", "c1", false)];
        let result = resolve(&ids(&["c1"]), &votes, &ids(&["a"]));
        assert_eq!(result.kind, ConsensusKind::None);
        assert_eq!(result.tally_for("c1").unwrap().voters, 1);
    }

    #[test]
    fn votes_outside_the_round_are_ignored() {
        let votes = vec![vote("a", "old", true), vote("a", "c1", false)];
        let result = resolve(&ids(&["c1"]), &votes, &ids(&["a"]));
        assert_eq!(result.kind, ConsensusKind::None);
        assert_eq!(result.tallies.len(), 1);
    }

    #[test]
    fn resolution_ignores_vote_order() {
        let mut votes = vec![
            vote("a", "c1", true),
            vote("b", "c2", true),
            vote("c", "c1", true),
            vote("a", "c2", false),
        ];
        let participants = ids(&["a", "b", "c"]);
        let forward = resolve(&ids(&["c1", "c2"]), &votes, &participants);
        votes.reverse();
        let backward = resolve(&ids(&["c1", "c2"]), &votes, &participants);
        assert_eq!(forward, backward);
    }
}
