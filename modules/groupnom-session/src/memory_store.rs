use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use groupnom_common::{Clock, Session};

use crate::store::{CasOutcome, SessionStore, Versioned};

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    session: Session,
    expires_at: DateTime<Utc>,
}

/// In-process session store (tests and single-node deployments).
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Records held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn is_live(&self, entry: &Entry) -> bool {
        entry.expires_at > self.clock.now()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, code: &str) -> Result<Option<Versioned<Session>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(code)
            .filter(|e| self.is_live(e))
            .map(|e| Versioned {
                version: e.version,
                value: e.session.clone(),
            }))
    }

    async fn insert_new(&self, session: &Session) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(&session.code).is_some_and(|e| self.is_live(e)) {
            return Ok(false);
        }
        entries.insert(
            session.code.clone(),
            Entry {
                version: 1,
                session: session.clone(),
                expires_at: session.created_at + self.ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        code: &str,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();
        let Some(entry) = entries.get_mut(code).filter(|e| e.expires_at > now) else {
            return Ok(CasOutcome::Missing);
        };
        if entry.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        entry.version += 1;
        entry.session = session.clone();
        Ok(CasOutcome::Applied(entry.version))
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }
}
