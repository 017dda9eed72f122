//! Collaborators the selection engine calls but does not own.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use groupnom_common::Restaurant;

/// Final tally for one candidate of a finished round. Feeds pick rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOutcome {
    pub candidate_id: String,
    pub won: bool,
    pub yes: u32,
    pub no: u32,
    pub participant_count: u32,
}

/// Bumps `times_shown` for restaurants that made it into a round.
#[async_trait]
pub trait ExposureCounter: Send + Sync {
    async fn increment_times_shown(&self, ids: &[String]) -> Result<()>;
}

/// Records voting outcomes for future quality scores.
#[async_trait]
pub trait OutcomeRecorder: Send + Sync {
    async fn record_outcome(&self, outcome: CandidateOutcome) -> Result<()>;
}

/// Fills in photo references (and whatever else a provider offers) for the
/// selected candidates.
#[async_trait]
pub trait PhotoEnricher: Send + Sync {
    async fn enrich(&self, restaurants: &mut [Restaurant]) -> Result<()>;
}

/// Lowercased names of chain restaurants.
#[async_trait]
pub trait ChainNameSource: Send + Sync {
    async fn chain_names(&self) -> Result<HashSet<String>>;
}

// ---------------------------------------------------------------------------
// Noops
// ---------------------------------------------------------------------------

pub struct NoopEnricher;

#[async_trait]
impl PhotoEnricher for NoopEnricher {
    async fn enrich(&self, _restaurants: &mut [Restaurant]) -> Result<()> {
        Ok(())
    }
}

pub struct NoopOutcomeRecorder;

#[async_trait]
impl OutcomeRecorder for NoopOutcomeRecorder {
    async fn record_outcome(&self, _outcome: CandidateOutcome) -> Result<()> {
        Ok(())
    }
}

pub struct NoopExposureCounter;

#[async_trait]
impl ExposureCounter for NoopExposureCounter {
    async fn increment_times_shown(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc<T> blankets, so tests can keep a handle for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<T: ExposureCounter + ?Sized> ExposureCounter for Arc<T> {
    async fn increment_times_shown(&self, ids: &[String]) -> Result<()> {
        (**self).increment_times_shown(ids).await
    }
}

#[async_trait]
impl<T: OutcomeRecorder + ?Sized> OutcomeRecorder for Arc<T> {
    async fn record_outcome(&self, outcome: CandidateOutcome) -> Result<()> {
        (**self).record_outcome(outcome).await
    }
}

#[async_trait]
impl<T: ChainNameSource + ?Sized> ChainNameSource for Arc<T> {
    async fn chain_names(&self) -> Result<HashSet<String>> {
        (**self).chain_names().await
    }
}
