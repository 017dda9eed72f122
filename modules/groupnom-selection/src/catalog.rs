//! The restaurant catalog seam and its in-memory implementation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use groupnom_common::{normalize_category, Restaurant};

use crate::chain_cache::chain_key;
use crate::geo_index::{cell_for, CellId, Resolution};
use crate::scoring::MIN_EXPOSURES_FOR_PICK_RATE;
use crate::traits::{CandidateOutcome, ChainNameSource, ExposureCounter, OutcomeRecorder};

/// A name seen at this many locations is a chain.
pub const CHAIN_MIN_LOCATIONS: usize = 5;

/// "Restaurants in these cells matching these hard filters."
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub cells: BTreeSet<CellId>,
    pub resolution: Resolution,
    /// Normalized. Empty means any category.
    pub categories: Vec<String>,
    /// Empty means any tier. Restaurants with no tier always match.
    pub price_tiers: Vec<u8>,
    pub exclude_ids: HashSet<String>,
    pub limit: usize,
}

impl CatalogQuery {
    /// Hard-filter check shared by catalog implementations that filter in
    /// process. The cell test is separate since it depends on resolution.
    pub fn matches_filters(&self, restaurant: &Restaurant) -> bool {
        if self.exclude_ids.contains(&restaurant.id) {
            return false;
        }
        if !self.categories.is_empty()
            && !restaurant
                .categories
                .iter()
                .any(|tag| self.categories.contains(&normalize_category(tag)))
        {
            return false;
        }
        match restaurant.price_tier {
            Some(tier) if !self.price_tiers.is_empty() => self.price_tiers.contains(&tier),
            _ => true,
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn candidates(&self, query: &CatalogQuery) -> Result<Vec<Restaurant>>;
}

#[async_trait]
impl<T: Catalog + ?Sized> Catalog for std::sync::Arc<T> {
    async fn candidates(&self, query: &CatalogQuery) -> Result<Vec<Restaurant>> {
        (**self).candidates(query).await
    }
}

// ---------------------------------------------------------------------------
// MemoryCatalog (tests and small deployments, no database required)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryCatalogState {
    restaurants: Vec<Restaurant>,
    picks: HashMap<String, u32>,
    outcomes: Vec<CandidateOutcome>,
}

/// In-process catalog. Cells are computed per query, so any resolution works.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<MemoryCatalogState>,
}

impl MemoryCatalog {
    pub fn new(restaurants: Vec<Restaurant>) -> Self {
        Self {
            state: RwLock::new(MemoryCatalogState {
                restaurants,
                ..Default::default()
            }),
        }
    }

    /// Loads a JSON array of restaurants.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(read_json_file(path)?))
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.restaurants.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: &str) -> Option<Restaurant> {
        self.state
            .read()
            .await
            .restaurants
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Every outcome recorded so far (for test assertions).
    pub async fn outcomes(&self) -> Vec<CandidateOutcome> {
        self.state.read().await.outcomes.clone()
    }
}

/// Reads a JSON array of restaurants, as used to seed either catalog.
pub fn read_json_file(path: impl AsRef<Path>) -> Result<Vec<Restaurant>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    let restaurants: Vec<Restaurant> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing catalog {}", path.display()))?;
    info!(count = restaurants.len(), path = %path.display(), "Loaded restaurant catalog");
    Ok(restaurants)
}

fn refresh_pick_rate(restaurant: &mut Restaurant, picks: u32) {
    restaurant.pick_rate = if restaurant.times_shown >= MIN_EXPOSURES_FOR_PICK_RATE {
        Some(picks as f64 / restaurant.times_shown as f64)
    } else {
        None
    };
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn candidates(&self, query: &CatalogQuery) -> Result<Vec<Restaurant>> {
        let state = self.state.read().await;
        let found = state
            .restaurants
            .iter()
            .filter(|r| query.matches_filters(r))
            .filter(|r| {
                cell_for(r.location.lat, r.location.lng, query.resolution)
                    .map(|cell| query.cells.contains(&cell))
                    .unwrap_or(false)
            })
            .take(query.limit)
            .cloned()
            .collect();
        Ok(found)
    }
}

#[async_trait]
impl ExposureCounter for MemoryCatalog {
    async fn increment_times_shown(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        let MemoryCatalogState {
            restaurants, picks, ..
        } = &mut *state;
        for restaurant in restaurants.iter_mut().filter(|r| ids.contains(&r.id)) {
            restaurant.times_shown += 1;
            let picked = picks.get(&restaurant.id).copied().unwrap_or(0);
            refresh_pick_rate(restaurant, picked);
        }
        Ok(())
    }
}

#[async_trait]
impl OutcomeRecorder for MemoryCatalog {
    async fn record_outcome(&self, outcome: CandidateOutcome) -> Result<()> {
        let mut state = self.state.write().await;
        if outcome.won {
            let picked = {
                let entry = state.picks.entry(outcome.candidate_id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if let Some(restaurant) = state
                .restaurants
                .iter_mut()
                .find(|r| r.id == outcome.candidate_id)
            {
                refresh_pick_rate(restaurant, picked);
            }
        }
        state.outcomes.push(outcome);
        Ok(())
    }
}

#[async_trait]
impl ChainNameSource for MemoryCatalog {
    async fn chain_names(&self) -> Result<HashSet<String>> {
        let state = self.state.read().await;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for restaurant in &state.restaurants {
            *counts.entry(chain_key(&restaurant.name)).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .filter(|(_, n)| *n >= CHAIN_MIN_LOCATIONS)
            .map(|(name, _)| name)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_index::CellCover;
    use groupnom_common::{Address, GeoPoint};

    fn restaurant(id: &str, name: &str, lat: f64, lng: f64, tags: &[&str], tier: Option<u8>) -> Restaurant {
        Restaurant {
            id: id.into(),
            name: name.into(),
            address: Address::default(),
            location: GeoPoint::new(lat, lng).unwrap(),
            categories: tags.iter().map(|t| t.to_string()).collect(),
            pick_rate: None,
            times_shown: 0,
            rating: None,
            price_tier: tier,
            photo_ref: None,
        }
    }

    fn query_around(lat: f64, lng: f64, radius_km: f64) -> CatalogQuery {
        let cover = CellCover::for_radius(GeoPoint::new(lat, lng).unwrap(), radius_km);
        CatalogQuery {
            cells: cover.cells,
            resolution: cover.resolution,
            categories: Vec::new(),
            price_tiers: Vec::new(),
            exclude_ids: HashSet::new(),
            limit: 100,
        }
    }

    #[tokio::test]
    async fn filters_by_cell_category_tier_and_exclusion() {
        let catalog = MemoryCatalog::new(vec![
            restaurant("a", "Thai One", 44.9778, -93.2650, &["Thai"], Some(2)),
            restaurant("b", "Pizza Two", 44.9780, -93.2652, &["pizza"], Some(4)),
            restaurant("c", "Thai Far", 46.0, -93.2650, &["thai"], Some(2)),
            restaurant("d", "Thai Untiered", 44.9779, -93.2651, &["thai"], None),
        ]);

        let mut query = query_around(44.9778, -93.2650, 3.0);
        query.categories = vec!["thai".into()];
        query.price_tiers = vec![1, 2];
        let ids: Vec<_> = catalog.candidates(&query).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "d"]);

        query.exclude_ids.insert("a".into());
        let ids: Vec<_> = catalog.candidates(&query).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["d"]);
    }

    #[tokio::test]
    async fn pick_rate_appears_after_enough_exposures() {
        let catalog = MemoryCatalog::new(vec![restaurant("a", "A", 0.0, 0.0, &[], None)]);
        catalog
            .record_outcome(CandidateOutcome {
                candidate_id: "a".into(),
                won: true,
                yes: 2,
                no: 0,
                participant_count: 2,
            })
            .await
            .unwrap();

        for _ in 0..4 {
            catalog.increment_times_shown(&["a".to_string()]).await.unwrap();
        }
        assert_eq!(catalog.get("a").await.unwrap().pick_rate, None);

        catalog.increment_times_shown(&["a".to_string()]).await.unwrap();
        let a = catalog.get("a").await.unwrap();
        assert_eq!(a.times_shown, 5);
        assert_eq!(a.pick_rate, Some(0.2));
        assert_eq!(catalog.outcomes().await.len(), 1);
    }

    #[tokio::test]
    async fn chain_names_need_five_locations() {
        let mut restaurants: Vec<_> = (0..5)
            .map(|i| restaurant(&format!("chain{i}"), "Burger Barn", 0.0, 0.0, &[], None))
            .collect();
        restaurants.push(restaurant("solo", "Solo Bistro", 0.0, 0.0, &[], None));
        let catalog = MemoryCatalog::new(restaurants);

        let names = catalog.chain_names().await.unwrap();
        assert!(names.contains("burger barn"));
        assert!(!names.contains("solo bistro"));
    }
}
