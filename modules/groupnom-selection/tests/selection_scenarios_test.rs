//! End-to-end selection scenarios against the in-memory catalog.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use groupnom_common::{Address, GeoPoint, ManualClock, Restaurant, SelectionError, SelectionFilters};
use groupnom_selection::{
    CandidateSelector, Catalog, CatalogQuery, ChainCache, ChainNameSource, MemoryCatalog,
    SelectionRequest,
};

const CENTER: (f64, f64) = (44.9778, -93.2650);
const CATEGORIES: [&str; 4] = ["thai", "pizza", "sushi", "burgers"];

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn restaurant(id: &str, name: &str, lat: f64, lng: f64, category: &str, rating: Option<f32>) -> Restaurant {
    Restaurant {
        id: id.into(),
        name: name.into(),
        address: Address {
            street: Some(format!("{id} Main St")),
            city: Some("Minneapolis".into()),
            state: Some("MN".into()),
        },
        location: GeoPoint::new(lat, lng).unwrap(),
        categories: vec![category.into()],
        pick_rate: None,
        times_shown: 0,
        rating,
        price_tier: Some(2),
        photo_ref: None,
    }
}

/// 80 restaurants on a grid within ~2.5 km of the center, four categories.
fn city_catalog() -> Vec<Restaurant> {
    let mut restaurants = Vec::new();
    for i in 0..80 {
        let row = (i / 10) as f64 - 4.5;
        let col = (i % 10) as f64 - 4.5;
        let lat = CENTER.0 + row * 0.004;
        let lng = CENTER.1 + col * 0.005;
        let category = CATEGORIES[i % CATEGORIES.len()];
        restaurants.push(restaurant(&format!("r{i:02}"), &format!("Spot {i}"), lat, lng, category, Some(4.0)));
    }
    restaurants
}

fn center() -> GeoPoint {
    GeoPoint::new(CENTER.0, CENTER.1).unwrap()
}

fn filters(radius_km: f64, categories: &[&str]) -> SelectionFilters {
    SelectionFilters {
        radius_km,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        ..Default::default()
    }
}

fn ids(candidates: &[groupnom_selection::ScoredCandidate]) -> Vec<String> {
    candidates.iter().map(|c| c.restaurant.id.clone()).collect()
}

/// Fails the first `failures` queries, then delegates.
struct FlakyCatalog {
    inner: MemoryCatalog,
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl Catalog for FlakyCatalog {
    async fn candidates(&self, query: &CatalogQuery) -> Result<Vec<Restaurant>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("catalog timed out");
        }
        self.inner.candidates(query).await
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn selects_within_radius_up_to_limit() {
    let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
    let selector = CandidateSelector::new(catalog.clone()).with_seed(1);

    let request = SelectionRequest::new(center(), filters(1.5, &[]), 10);
    let picked = selector.select(&request).await.unwrap();

    assert_eq!(picked.len(), 10);
    for candidate in &picked {
        assert!(candidate.distance_km <= 1.5, "{} is {} km away", candidate.restaurant.id, candidate.distance_km);
        assert!((0.0..=1.0).contains(&candidate.score));
    }
    let unique: HashSet<_> = ids(&picked).into_iter().collect();
    assert_eq!(unique.len(), 10);
}

#[tokio::test]
async fn selection_increments_exposure() {
    let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
    let selector = CandidateSelector::new(catalog.clone())
        .with_exposure_counter(catalog.clone())
        .with_seed(2);

    let picked = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &[]), 5))
        .await
        .unwrap();

    for id in ids(&picked) {
        assert_eq!(catalog.get(&id).await.unwrap().times_shown, 1);
    }
}

#[tokio::test]
async fn exclusions_never_reappear() {
    let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
    let selector = CandidateSelector::new(catalog.clone()).with_seed(3);

    let first = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &[]), 10))
        .await
        .unwrap();
    let previous: HashSet<String> = ids(&first).into_iter().collect();

    let second = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &[]), 10).excluding(previous.clone()))
        .await
        .unwrap();

    assert_eq!(second.len(), 10);
    for id in ids(&second) {
        assert!(!previous.contains(&id), "{id} was in the previous round");
    }
}

#[tokio::test]
async fn empty_area_is_a_distinct_outcome() {
    let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
    let selector = CandidateSelector::new(catalog);

    let nowhere = GeoPoint::new(-45.0, 170.0).unwrap();
    let err = selector
        .select(&SelectionRequest::new(nowhere, filters(5.0, &[]), 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SelectionError::EmptyCandidatePool), "got {err:?}");
}

#[tokio::test]
async fn high_latitude_search_reaches_the_full_radius() {
    // 9 km due east of (88, 0): many degrees of longitude this far north.
    let east = restaurant("svalbard", "Polar Diner", 88.0, 2.32, "burgers", Some(4.0));
    let north = restaurant("north", "Top Cafe", 88.08, 0.0, "burgers", Some(4.0));
    let catalog = Arc::new(MemoryCatalog::new(vec![east, north]));
    let selector = CandidateSelector::new(catalog);

    let origin = GeoPoint::new(88.0, 0.0).unwrap();
    let picked = selector
        .select(&SelectionRequest::new(origin, filters(10.0, &[]), 5))
        .await
        .unwrap();
    let mut got = ids(&picked);
    got.sort();
    assert_eq!(got, vec!["north", "svalbard"]);
}

#[tokio::test]
async fn multi_category_request_is_stratified() {
    let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
    let selector = CandidateSelector::new(catalog).with_seed(4);

    let picked = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &["thai", "pizza"]), 8))
        .await
        .unwrap();

    assert_eq!(picked.len(), 8);
    let thai = picked.iter().filter(|c| c.stratum == "thai").count();
    let pizza = picked.iter().filter(|c| c.stratum == "pizza").count();
    assert_eq!(thai + pizza, 8, "category filter should keep only thai and pizza");
    assert_eq!(thai, 4);
    assert_eq!(pizza, 4);
}

#[tokio::test]
async fn min_rating_filters_but_unrated_pass() {
    let catalog = Arc::new(MemoryCatalog::new(vec![
        restaurant("low", "Low", CENTER.0, CENTER.1, "thai", Some(2.5)),
        restaurant("high", "High", CENTER.0 + 0.001, CENTER.1, "thai", Some(4.5)),
        restaurant("unrated", "Unrated", CENTER.0, CENTER.1 + 0.001, "thai", None),
    ]));
    let selector = CandidateSelector::new(catalog);

    let mut f = filters(2.0, &[]);
    f.min_rating = 4.0;
    let picked = selector.select(&SelectionRequest::new(center(), f, 10)).await.unwrap();

    let mut got = ids(&picked);
    got.sort();
    assert_eq!(got, vec!["high", "unrated"]);
}

#[tokio::test]
async fn chains_are_excluded_on_request() {
    let mut restaurants = city_catalog();
    for i in 0..5 {
        let lat = CENTER.0 + 0.0005 * i as f64;
        restaurants.push(restaurant(&format!("chain{i}"), "Burger Barn", lat, CENTER.1, "burgers", Some(4.0)));
    }
    let catalog = Arc::new(MemoryCatalog::new(restaurants));
    let source: Arc<dyn ChainNameSource> = catalog.clone();
    let cache = Arc::new(ChainCache::new(
        source,
        Arc::new(ManualClock::default()),
        Duration::from_secs(3600),
    ));
    let selector = CandidateSelector::new(catalog).with_chain_cache(cache).with_seed(5);

    let mut f = filters(3.0, &["burgers"]);
    f.exclude_chains = true;
    let picked = selector.select(&SelectionRequest::new(center(), f, 30)).await.unwrap();

    assert!(!picked.is_empty());
    assert!(picked.iter().all(|c| c.restaurant.name != "Burger Barn"));
}

#[tokio::test]
async fn catalog_failure_falls_back_to_smaller_set() {
    let catalog = Arc::new(FlakyCatalog {
        inner: MemoryCatalog::new(city_catalog()),
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let selector = CandidateSelector::new(catalog.clone())
        .with_fallback_limit(5)
        .with_seed(6);

    let picked = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &["sushi"]), 10))
        .await
        .unwrap();

    assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    assert!(!picked.is_empty());
    assert!(picked.len() <= 5);
}

#[tokio::test]
async fn catalog_failure_on_both_paths_is_reported() {
    let catalog = Arc::new(FlakyCatalog {
        inner: MemoryCatalog::new(city_catalog()),
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let selector = CandidateSelector::new(catalog);

    let err = selector
        .select(&SelectionRequest::new(center(), filters(3.0, &[]), 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SelectionError::Catalog(_)), "got {err:?}");
}

#[tokio::test]
async fn same_seed_same_shortlist() {
    let run = |seed| async move {
        let catalog = Arc::new(MemoryCatalog::new(city_catalog()));
        let selector = CandidateSelector::new(catalog).with_seed(seed);
        ids(&selector
            .select(&SelectionRequest::new(center(), filters(3.0, &["thai", "sushi"]), 6))
            .await
            .unwrap())
    };
    assert_eq!(run(77).await, run(77).await);
}
