//! Session persistence with optimistic concurrency.
//!
//! Every write names the version it read. A write against a stale version
//! reports `Conflict` and the caller re-reads, so two simultaneous votes can
//! never silently overwrite each other.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use groupnom_common::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; carries the new version.
    Applied(u64),
    /// Someone else wrote first.
    Conflict,
    /// Absent or expired.
    Missing,
}

/// Keyed, expiring session records. Expired records are invisible to every
/// method, whether or not they have been purged yet.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, code: &str) -> Result<Option<Versioned<Session>>>;

    /// Insert if no live record holds `session.code`. Returns false when one
    /// does. The expiry clock starts at `session.created_at`.
    async fn insert_new(&self, session: &Session) -> Result<bool>;

    async fn compare_and_swap(
        &self,
        code: &str,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome>;

    /// Hard-deletes expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[async_trait]
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    async fn load(&self, code: &str) -> Result<Option<Versioned<Session>>> {
        (**self).load(code).await
    }

    async fn insert_new(&self, session: &Session) -> Result<bool> {
        (**self).insert_new(session).await
    }

    async fn compare_and_swap(
        &self,
        code: &str,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome> {
        (**self).compare_and_swap(code, expected_version, session).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        (**self).purge_expired().await
    }
}
