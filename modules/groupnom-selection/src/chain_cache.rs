use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use groupnom_common::Clock;

use crate::traits::ChainNameSource;

#[derive(Debug, Clone)]
struct CacheEntry {
    names: Arc<HashSet<String>>,
    loaded_at: DateTime<Utc>,
}

/// Chain restaurant names, reloaded from `source` once the TTL lapses.
/// One per process, shared by reference.
pub struct ChainCache<S> {
    source: S,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
}

impl<S: ChainNameSource> ChainCache<S> {
    pub fn new(source: S, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl,
            entry: RwLock::new(None),
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        let age = self.clock.now().signed_duration_since(entry.loaded_at);
        match age.to_std() {
            Ok(age) => age < self.ttl,
            // Loaded "in the future": the clock moved backwards. Treat as fresh.
            Err(_) => true,
        }
    }

    /// Cached names while fresh; otherwise reload. A failed reload keeps
    /// serving the stale set if there is one.
    pub async fn get_or_refresh(&self) -> Result<Arc<HashSet<String>>> {
        if let Some(entry) = self.entry.read().await.as_ref() {
            if self.is_fresh(entry) {
                return Ok(entry.names.clone());
            }
        }

        let mut slot = self.entry.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(entry) = slot.as_ref() {
            if self.is_fresh(entry) {
                return Ok(entry.names.clone());
            }
        }

        match self.source.chain_names().await {
            Ok(raw) => {
                let names: HashSet<String> = raw
                    .into_iter()
                    .map(|n| chain_key(&n))
                    .filter(|n| !n.is_empty())
                    .collect();
                info!(count = names.len(), "Refreshed chain name cache");
                let names = Arc::new(names);
                *slot = Some(CacheEntry {
                    names: names.clone(),
                    loaded_at: self.clock.now(),
                });
                Ok(names)
            }
            Err(e) => match slot.as_ref() {
                Some(stale) => {
                    warn!(error = %e, "Chain name refresh failed, serving stale set");
                    Ok(stale.names.clone())
                }
                None => Err(e),
            },
        }
    }
}

/// Lookup key for a restaurant name in the chain set.
pub fn chain_key(name: &str) -> String {
    name.trim().to_lowercase()
}
