use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use groupnom_common::{
    Clock, Config, FoodMethod, GeoPoint, PollingConfig, Restaurant, SelectionFilters, Session,
    SessionError, SessionStatus,
};
use groupnom_selection::{
    CandidateOutcome, CandidateSelector, NoopOutcomeRecorder, OutcomeRecorder, SelectionRequest,
};

use crate::code::{generate_code, normalize_code, MAX_CODE_ATTEMPTS};
use crate::consensus::{resolve, ConsensusResult};
use crate::store::{CasOutcome, SessionStore};
use crate::transitions::{self, VoteReceipt};
use crate::views::{FoodMethodTallies, SessionView, StatusView};

pub const DEFAULT_CANDIDATE_LIMIT: usize = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub code: String,
    pub host_id: String,
    pub session: Session,
}

/// Drives the session state machine against a [`SessionStore`].
///
/// Every mutation is load → apply → compare-and-swap, retried on conflict,
/// so concurrent voters never drop each other's votes.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    selector: Arc<CandidateSelector>,
    outcomes: Arc<dyn OutcomeRecorder>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    candidate_limit: usize,
    max_attempts: u32,
    polling: PollingConfig,
    rng: Mutex<StdRng>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, selector: Arc<CandidateSelector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            selector,
            outcomes: Arc::new(NoopOutcomeRecorder),
            clock,
            ttl: Duration::hours(24),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            polling: PollingConfig::default(),
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Applies the session settings from `config`.
    pub fn configured(self, config: &Config) -> Self {
        let ttl = Duration::from_std(config.session_ttl).unwrap_or_else(|_| Duration::hours(24));
        self.with_ttl(ttl)
            .with_candidate_limit(config.candidate_limit)
            .with_max_attempts(config.cas_max_attempts)
            .with_polling(config.polling)
    }

    pub fn with_outcome_recorder(mut self, outcomes: Arc<dyn OutcomeRecorder>) -> Self {
        self.outcomes = outcomes;
        self
    }

    /// Only used for the `expiresAt` shown to clients; the store enforces it.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Deterministic session codes.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Selects candidates and stores a new active session under a fresh code.
    pub async fn create_session(
        &self,
        host_id: Option<String>,
        filters: SelectionFilters,
        location: GeoPoint,
    ) -> Result<CreatedSession, SessionError> {
        let host_id = host_id
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(anonymous_user_id);
        let candidates = self.select(location, &filters, HashSet::new()).await?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = self.next_code();
            let mut session = Session::pending(&code, &host_id, self.clock.now());
            transitions::activate(&mut session, &host_id, candidates.clone(), filters.clone(), location)?;

            if self.store.insert_new(&session).await? {
                info!(code = %code, host = %host_id, candidates = session.candidates.len(), "Session created");
                return Ok(CreatedSession {
                    code,
                    host_id,
                    session,
                });
            }
            debug!(code = %code, attempt, "Session code collision");
        }

        warn!(attempts = MAX_CODE_ATTEMPTS, "Could not allocate a session code");
        Err(SessionError::CodeSpaceExhausted)
    }

    /// Reserves `code` for a host who has not picked filters yet.
    pub async fn init_pending_session(&self, code: &str, host_id: &str) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let session = Session::pending(&code, host_id, self.clock.now());
        if !self.store.insert_new(&session).await? {
            return Err(SessionError::Conflict { code });
        }
        info!(code = %code, host = %host_id, "Pending session reserved");
        Ok(session)
    }

    pub async fn activate(
        &self,
        code: &str,
        host_id: &str,
        filters: SelectionFilters,
        location: GeoPoint,
    ) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let current = self.load(&code).await?;
        // Fail fast before paying for selection; re-checked under CAS below.
        if !current.is_host(host_id) {
            return Err(SessionError::Forbidden {
                action: "activate the session",
            });
        }
        if current.status != SessionStatus::Pending {
            return Err(SessionError::Conflict { code });
        }

        let candidates = self.select(location, &filters, HashSet::new()).await?;
        let ((), session) = self
            .mutate(&code, |s| {
                transitions::activate(s, host_id, candidates.clone(), filters.clone(), location)
            })
            .await?;
        info!(code = %code, candidates = session.candidates.len(), "Session activated");
        Ok(session)
    }

    pub async fn join(&self, code: &str, participant_id: &str) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let (joined, session) = self
            .mutate(&code, |s| Ok(transitions::join(s, participant_id)))
            .await?;
        if joined {
            info!(code = %code, participant = %participant_id, "Participant joined");
        }
        Ok(session)
    }

    pub async fn vote(
        &self,
        code: &str,
        participant_id: &str,
        candidate_id: &str,
        liked: bool,
    ) -> Result<VoteReceipt, SessionError> {
        let code = normalize_code(code);
        let (receipt, session) = self
            .mutate(&code, |s| transitions::vote(s, participant_id, candidate_id, liked))
            .await?;

        debug!(code = %code, participant = %participant_id, candidate = %candidate_id, liked, "Vote recorded");
        if receipt.closed_session {
            info!(code = %code, "All participants finished, session closed");
            self.spawn_outcome_recording(&session);
        }
        Ok(receipt)
    }

    /// Tells pollers the host is changing settings.
    pub async fn request_reconfigure(&self, code: &str, host_id: &str) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let ((), session) = self
            .mutate(&code, |s| transitions::request_reconfigure(s, host_id))
            .await?;
        info!(code = %code, "Session reconfiguring");
        Ok(session)
    }

    /// New round with new filters. The current candidates are excluded from
    /// selection so the group sees different restaurants.
    pub async fn reconfigure(
        &self,
        code: &str,
        host_id: &str,
        filters: SelectionFilters,
        location: GeoPoint,
    ) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let current = self.load(&code).await?;
        if !current.is_host(host_id) {
            return Err(SessionError::Forbidden {
                action: "reconfigure the session",
            });
        }
        if current.status == SessionStatus::Pending {
            return Err(SessionError::InvalidState {
                action: "reconfigure",
                status: current.status,
            });
        }

        let exclude: HashSet<String> = current.candidate_ids().into_iter().collect();
        let candidates = self.select(location, &filters, exclude).await?;
        let ((), session) = self
            .mutate(&code, |s| {
                transitions::reconfigure(s, host_id, candidates.clone(), filters.clone(), location)
            })
            .await?;
        info!(code = %code, candidates = session.candidates.len(), "Session reconfigured");
        Ok(session)
    }

    /// Host ends voting early. Calling it again is a no-op.
    pub async fn close_voting(&self, code: &str, host_id: &str) -> Result<Session, SessionError> {
        let code = normalize_code(code);
        let (closed, session) = self
            .mutate(&code, |s| transitions::close_voting(s, host_id))
            .await?;
        if closed {
            info!(code = %code, votes = session.votes.len(), "Voting closed by host");
            self.spawn_outcome_recording(&session);
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// `None` until someone has voted, so "no votes yet" differs from
    /// "voted, no match".
    pub async fn results(&self, code: &str) -> Result<Option<ConsensusResult>, SessionError> {
        let session = self.load(&normalize_code(code)).await?;
        if session.votes.is_empty() {
            return Ok(None);
        }
        Ok(Some(resolve(
            &session.candidate_ids(),
            &session.votes,
            &session.participants,
        )))
    }

    pub async fn session_view(&self, code: &str, viewer: Option<&str>) -> Result<SessionView, SessionError> {
        let session = self.load(&normalize_code(code)).await?;
        Ok(SessionView::build(&session, viewer, session.created_at + self.ttl))
    }

    pub async fn status(&self, code: &str, participant_id: Option<&str>) -> Result<StatusView, SessionError> {
        let session = self.load(&normalize_code(code)).await?;
        let waited = (self.clock.now() - session.created_at)
            .to_std()
            .unwrap_or_default();
        Ok(StatusView::build(
            &session,
            participant_id,
            self.polling.interval_after(waited),
        ))
    }

    // -----------------------------------------------------------------------
    // Food method
    // -----------------------------------------------------------------------

    pub async fn vote_food_method(
        &self,
        code: &str,
        participant_id: &str,
        method: FoodMethod,
    ) -> Result<FoodMethodTallies, SessionError> {
        let code = normalize_code(code);
        let ((), session) = self
            .mutate(&code, |s| transitions::vote_food_method(s, participant_id, method))
            .await?;
        Ok(FoodMethodTallies::from_session(&session))
    }

    pub async fn set_food_method_result(
        &self,
        code: &str,
        host_id: &str,
        method: FoodMethod,
    ) -> Result<FoodMethodTallies, SessionError> {
        let code = normalize_code(code);
        let ((), session) = self
            .mutate(&code, |s| transitions::set_food_method_result(s, host_id, method))
            .await?;
        info!(code = %code, method = ?method, "Food method decided");
        Ok(FoodMethodTallies::from_session(&session))
    }

    pub async fn food_method_tallies(&self, code: &str) -> Result<FoodMethodTallies, SessionError> {
        let session = self.load(&normalize_code(code)).await?;
        Ok(FoodMethodTallies::from_session(&session))
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    pub async fn purge_expired(&self) -> Result<usize, SessionError> {
        let purged = self.store.purge_expired().await?;
        if purged > 0 {
            info!(purged, "Purged expired sessions");
        }
        Ok(purged)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load(&self, code: &str) -> Result<Session, SessionError> {
        self.store
            .load(code)
            .await?
            .map(|v| v.value)
            .ok_or_else(|| SessionError::not_found(code))
    }

    /// Read, apply `f` to a copy, write back only if nobody else wrote in
    /// between. Unchanged sessions are not written.
    async fn mutate<T, F>(&self, code: &str, mut f: F) -> Result<(T, Session), SessionError>
    where
        F: FnMut(&mut Session) -> Result<T, SessionError> + Send,
        T: Send,
    {
        for attempt in 1..=self.max_attempts {
            let Some(current) = self.store.load(code).await? else {
                return Err(SessionError::not_found(code));
            };

            let mut next = current.value.clone();
            let out = f(&mut next)?;
            if next == current.value {
                return Ok((out, next));
            }

            match self.store.compare_and_swap(code, current.version, &next).await? {
                CasOutcome::Applied(_) => return Ok((out, next)),
                CasOutcome::Missing => return Err(SessionError::not_found(code)),
                CasOutcome::Conflict => {
                    debug!(code = %code, attempt, "Concurrent session update, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }

        warn!(code = %code, attempts = self.max_attempts, "Gave up on contended session");
        Err(SessionError::ConcurrencyExhausted {
            code: code.to_string(),
        })
    }

    async fn select(
        &self,
        location: GeoPoint,
        filters: &SelectionFilters,
        exclude: HashSet<String>,
    ) -> Result<Vec<Restaurant>, SessionError> {
        let request = SelectionRequest::new(location, filters.clone(), self.candidate_limit).excluding(exclude);
        let picked = self.selector.select(&request).await?;
        Ok(picked.into_iter().map(|c| c.restaurant).collect())
    }

    fn next_code(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        generate_code(&mut *rng)
    }

    /// Best-effort: one outcome per voted-on candidate, in the background.
    /// Failures are logged and never reach the caller.
    fn spawn_outcome_recording(&self, session: &Session) {
        let outcomes = outcomes_for(session);
        if outcomes.is_empty() {
            return;
        }
        let recorder = self.outcomes.clone();
        let code = session.code.clone();
        tokio::spawn(async move {
            for outcome in outcomes {
                let candidate = outcome.candidate_id.clone();
                if let Err(e) = recorder.record_outcome(outcome).await {
                    warn!(code = %code, candidate = %candidate, error = %e, "Failed to record voting outcome");
                }
            }
        });
    }
}

/// Final tallies worth recording: candidates nobody voted on are skipped.
pub fn outcomes_for(session: &Session) -> Vec<CandidateOutcome> {
    let result = resolve(&session.candidate_ids(), &session.votes, &session.participants);
    let participant_count = session.participants.len() as u32;
    result
        .tallies
        .iter()
        .filter(|t| t.voters > 0)
        .map(|t| CandidateOutcome {
            candidate_id: t.candidate_id.clone(),
            won: result.winners.contains(&t.candidate_id),
            yes: t.yes,
            no: t.no,
            participant_count,
        })
        .collect()
}

fn anonymous_user_id() -> String {
    format!("user-{}", Uuid::new_v4().simple())
}
