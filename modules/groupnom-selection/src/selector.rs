use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use groupnom_common::{GeoPoint, Restaurant, SelectionError, SelectionFilters};

use crate::catalog::{Catalog, CatalogQuery};
use crate::chain_cache::{chain_key, ChainCache};
use crate::diversify::diversified_select;
use crate::geo_index::{CellCover, Resolution};
use crate::scoring::{score_candidates, ScoredCandidate};
use crate::traits::{ChainNameSource, ExposureCounter, NoopEnricher, NoopExposureCounter, PhotoEnricher};

/// The catalog is asked for this many times the requested count, leaving
/// room for the radius, rating and chain filters.
pub const POOL_MULTIPLIER: usize = 10;

pub const DEFAULT_FALLBACK_LIMIT: usize = 5;

pub type SharedChainCache = Arc<ChainCache<Arc<dyn ChainNameSource>>>;

#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub origin: GeoPoint,
    pub filters: SelectionFilters,
    pub limit: usize,
    /// Restaurants that must not appear, e.g. the previous round's list.
    pub exclude_ids: HashSet<String>,
}

impl SelectionRequest {
    pub fn new(origin: GeoPoint, filters: SelectionFilters, limit: usize) -> Self {
        Self {
            origin,
            filters,
            limit,
            exclude_ids: HashSet::new(),
        }
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.exclude_ids.extend(ids);
        self
    }
}

/// Point + filters in, diversified shortlist out.
pub struct CandidateSelector {
    catalog: Arc<dyn Catalog>,
    exposure: Arc<dyn ExposureCounter>,
    enricher: Arc<dyn PhotoEnricher>,
    chains: Option<SharedChainCache>,
    fallback_limit: usize,
    rng: Mutex<StdRng>,
}

impl CandidateSelector {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            exposure: Arc::new(NoopExposureCounter),
            enricher: Arc::new(NoopEnricher),
            chains: None,
            fallback_limit: DEFAULT_FALLBACK_LIMIT,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_exposure_counter(mut self, exposure: Arc<dyn ExposureCounter>) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn PhotoEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_chain_cache(mut self, chains: SharedChainCache) -> Self {
        self.chains = Some(chains);
        self
    }

    pub fn with_fallback_limit(mut self, limit: usize) -> Self {
        self.fallback_limit = limit;
        self
    }

    /// Deterministic freshness draws and shuffles.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub async fn select(&self, request: &SelectionRequest) -> Result<Vec<ScoredCandidate>, SelectionError> {
        let filters = &request.filters;
        let cover = CellCover::for_radius(request.origin, filters.radius_km);
        let query = CatalogQuery {
            cells: cover.cells,
            resolution: cover.resolution,
            categories: filters.categories.clone(),
            price_tiers: filters.price_tiers.clone(),
            exclude_ids: request.exclude_ids.clone(),
            limit: request.limit.saturating_mul(POOL_MULTIPLIER).max(1),
        };

        let (pool, limit) = match self.catalog.candidates(&query).await {
            Ok(pool) => (pool, request.limit),
            Err(e) => {
                warn!(error = %e, cells = query.cells.len(), "Catalog query failed, using fallback");
                let pool = self.fallback_pool(request).await?;
                (pool, self.fallback_limit.min(request.limit))
            }
        };

        let pool = self.apply_hard_filters(pool, filters).await;

        let mut selected = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let scored = score_candidates(
                pool,
                request.origin,
                filters.radius_km,
                &filters.categories,
                &mut *rng,
            );
            diversified_select(scored, &filters.categories, limit, &mut *rng)
        };

        if selected.is_empty() {
            info!(
                lat = request.origin.lat,
                lng = request.origin.lng,
                radius_km = filters.radius_km,
                "No candidates matched"
            );
            return Err(SelectionError::EmptyCandidatePool);
        }

        self.enrich(&mut selected).await;
        self.record_exposure(&selected).await;

        info!(
            count = selected.len(),
            requested = request.limit,
            resolution = ?cover.resolution,
            lat_rings = cover.span.lat_rings,
            lng_rings = ?cover.span.lng_rings,
            "Selected candidates"
        );
        Ok(selected)
    }

    /// Center coarse cell plus one ring, without the category filter.
    async fn fallback_pool(&self, request: &SelectionRequest) -> Result<Vec<Restaurant>, SelectionError> {
        let cover = CellCover::around(request.origin, 1, Resolution::Coarse);
        let query = CatalogQuery {
            cells: cover.cells,
            resolution: cover.resolution,
            categories: Vec::new(),
            price_tiers: request.filters.price_tiers.clone(),
            exclude_ids: request.exclude_ids.clone(),
            limit: self.fallback_limit.saturating_mul(POOL_MULTIPLIER).max(1),
        };
        self.catalog
            .candidates(&query)
            .await
            .map_err(SelectionError::Catalog)
    }

    async fn apply_hard_filters(&self, pool: Vec<Restaurant>, filters: &SelectionFilters) -> Vec<Restaurant> {
        let chain_names = match (&self.chains, filters.exclude_chains) {
            (Some(cache), true) => match cache.get_or_refresh().await {
                Ok(names) => Some(names),
                Err(e) => {
                    warn!(error = %e, "Chain names unavailable, not excluding chains");
                    None
                }
            },
            _ => None,
        };

        pool.into_iter()
            .filter(|r| r.rating.map_or(true, |rating| rating >= filters.min_rating))
            .filter(|r| {
                chain_names
                    .as_ref()
                    .map_or(true, |names| !names.contains(&chain_key(&r.name)))
            })
            .collect()
    }

    async fn enrich(&self, selected: &mut [ScoredCandidate]) {
        let mut restaurants: Vec<Restaurant> = selected.iter().map(|c| c.restaurant.clone()).collect();
        match self.enricher.enrich(&mut restaurants).await {
            Ok(()) => {
                for (candidate, restaurant) in selected.iter_mut().zip(restaurants) {
                    candidate.restaurant = restaurant;
                }
            }
            Err(e) => warn!(error = %e, "Photo enrichment failed"),
        }
    }

    async fn record_exposure(&self, selected: &[ScoredCandidate]) {
        let ids: Vec<String> = selected.iter().map(|c| c.restaurant.id.clone()).collect();
        if let Err(e) = self.exposure.increment_times_shown(&ids).await {
            warn!(error = %e, "Failed to record exposure");
        }
    }
}
