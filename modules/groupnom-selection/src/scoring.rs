//! Composite candidate score: quality, discovery, freshness, proximity.

use rand::Rng;
use serde::Serialize;

use groupnom_common::{GeoPoint, Restaurant};

use crate::diversify::stratum_for;

pub const QUALITY_WEIGHT: f64 = 0.30;
pub const DISCOVERY_WEIGHT: f64 = 0.30;
pub const FRESHNESS_WEIGHT: f64 = 0.25;
pub const PROXIMITY_WEIGHT: f64 = 0.15;

/// Pick rate is noise below this many exposures.
pub const MIN_EXPOSURES_FOR_PICK_RATE: u32 = 5;

/// Quality for restaurants without a meaningful pick rate.
pub const NEUTRAL_QUALITY: f64 = 0.5;

/// Stand-in radius when the request asks for 0 km.
pub const MIN_RADIUS_KM: f64 = 0.05;

/// Per-signal components, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub quality: f64,
    pub discovery: f64,
    pub freshness: f64,
    pub proximity: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        let raw = QUALITY_WEIGHT * self.quality
            + DISCOVERY_WEIGHT * self.discovery
            + FRESHNESS_WEIGHT * self.freshness
            + PROXIMITY_WEIGHT * self.proximity;
        raw.clamp(0.0, 1.0)
    }
}

/// A restaurant scored for one request. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub restaurant: Restaurant,
    pub distance_km: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    /// Category this candidate is stratified under.
    pub stratum: String,
}

pub fn quality_signal(restaurant: &Restaurant) -> f64 {
    match restaurant.pick_rate {
        Some(rate) if restaurant.times_shown >= MIN_EXPOSURES_FOR_PICK_RATE && rate.is_finite() => {
            rate.clamp(0.0, 1.0)
        }
        _ => NEUTRAL_QUALITY,
    }
}

/// `1 / ln(times_shown + 2)`, capped at 1.0 (the uncapped value for an
/// unseen restaurant is 1/ln 2).
pub fn discovery_signal(times_shown: u32) -> f64 {
    (1.0 / (times_shown as f64 + 2.0).ln()).min(1.0)
}

pub fn proximity_signal(distance_km: f64, radius_km: f64) -> f64 {
    let radius = if radius_km > 0.0 { radius_km } else { MIN_RADIUS_KM };
    (1.0 - distance_km / radius).clamp(0.0, 1.0)
}

/// Scores every restaurant within `radius_km` of `origin`, dropping the rest.
/// The cell prefilter is a superset of the disc, so this is where the radius
/// actually gets enforced.
pub fn score_candidates<R: Rng + ?Sized>(
    pool: Vec<Restaurant>,
    origin: GeoPoint,
    radius_km: f64,
    requested_categories: &[String],
    rng: &mut R,
) -> Vec<ScoredCandidate> {
    let effective_radius = if radius_km > 0.0 { radius_km } else { MIN_RADIUS_KM };

    pool.into_iter()
        .filter_map(|restaurant| {
            let distance_km = origin.distance_km(&restaurant.location);
            if distance_km > effective_radius {
                return None;
            }
            let breakdown = ScoreBreakdown {
                quality: quality_signal(&restaurant),
                discovery: discovery_signal(restaurant.times_shown),
                freshness: rng.random::<f64>(),
                proximity: proximity_signal(distance_km, radius_km),
            };
            let stratum = stratum_for(&restaurant, requested_categories);
            Some(ScoredCandidate {
                score: breakdown.total(),
                restaurant,
                distance_km,
                breakdown,
                stratum,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupnom_common::Address;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn restaurant_at(id: &str, lat: f64, lng: f64, times_shown: u32, pick_rate: Option<f64>) -> Restaurant {
        Restaurant {
            id: id.into(),
            name: id.into(),
            address: Address::default(),
            location: GeoPoint::new(lat, lng).unwrap(),
            categories: vec!["thai".into()],
            pick_rate,
            times_shown,
            rating: Some(4.0),
            price_tier: Some(2),
            photo_ref: None,
        }
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = QUALITY_WEIGHT + DISCOVERY_WEIGHT + FRESHNESS_WEIGHT + PROXIMITY_WEIGHT;
        assert!((sum - 1.0).abs() < 1e-12, "weights sum to {sum}");
    }

    #[test]
    fn cold_start_gets_neutral_quality() {
        let fresh = restaurant_at("a", 0.0, 0.0, 4, Some(0.9));
        assert_eq!(quality_signal(&fresh), NEUTRAL_QUALITY);

        let seasoned = restaurant_at("b", 0.0, 0.0, 5, Some(0.9));
        assert_eq!(quality_signal(&seasoned), 0.9);

        let never_picked = restaurant_at("c", 0.0, 0.0, 50, None);
        assert_eq!(quality_signal(&never_picked), NEUTRAL_QUALITY);
    }

    #[test]
    fn discovery_decreases_with_exposure() {
        assert_eq!(discovery_signal(0), 1.0);
        let mut last = discovery_signal(1);
        for shown in 2..200 {
            let next = discovery_signal(shown);
            assert!(next < last, "discovery should fall at {shown}");
            last = next;
        }
    }

    #[test]
    fn proximity_handles_zero_radius() {
        assert_eq!(proximity_signal(0.0, 0.0), 1.0);
        assert_eq!(proximity_signal(1.0, 0.0), 0.0);
        assert!((proximity_signal(1.0, 4.0) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(11);
        let origin = GeoPoint::new(44.9778, -93.2650).unwrap();
        let pool: Vec<Restaurant> = (0..200)
            .map(|i| {
                let offset = (i as f64) * 0.0002;
                let pick_rate = Some((i % 11) as f64 / 10.0);
                restaurant_at(&format!("r{i}"), 44.9778 + offset, -93.2650, i * 3, pick_rate)
            })
            .collect();

        let scored = score_candidates(pool, origin, 5.0, &[], &mut rng);
        assert!(!scored.is_empty());
        for candidate in &scored {
            assert!((0.0..=1.0).contains(&candidate.score), "{} scored {}", candidate.restaurant.id, candidate.score);
            let b = candidate.breakdown;
            for component in [b.quality, b.discovery, b.freshness, b.proximity] {
                assert!((0.0..=1.0).contains(&component));
            }
        }
    }

    #[test]
    fn drops_restaurants_outside_radius() {
        let mut rng = StdRng::seed_from_u64(3);
        let origin = GeoPoint::new(44.9778, -93.2650).unwrap();
        let near = restaurant_at("near", 44.9800, -93.2650, 0, None);
        let far = restaurant_at("far", 45.1, -93.2650, 0, None);

        let scored = score_candidates(vec![near, far], origin, 2.0, &[], &mut rng);
        let ids: Vec<_> = scored.iter().map(|c| c.restaurant.id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);
        assert!(scored[0].distance_km < 2.0);
    }
}
