//! Category-stratified selection so one cuisine cannot fill the whole list.

use std::collections::{HashMap, VecDeque};

use rand::Rng;

use groupnom_common::{normalize_category, Restaurant};

use crate::scoring::ScoredCandidate;

pub const OTHER_STRATUM: &str = "other";

/// First tag that was requested, else the first tag, else "other".
pub fn stratum_for(restaurant: &Restaurant, requested_categories: &[String]) -> String {
    let tags: Vec<String> = restaurant
        .categories
        .iter()
        .map(|t| normalize_category(t))
        .filter(|t| !t.is_empty())
        .collect();

    tags.iter()
        .find(|t| requested_categories.contains(t))
        .or_else(|| tags.first())
        .cloned()
        .unwrap_or_else(|| OTHER_STRATUM.to_string())
}

/// Picks up to `limit` candidates and shuffles them.
///
/// With fewer than two requested categories this is plain top-N by score.
/// Otherwise candidates are bucketed by stratum and drawn round-robin, one
/// per bucket per round, best score first within each bucket. Returns
/// `min(limit, candidates.len())` items; a short pool is not an error.
pub fn diversified_select<R: Rng + ?Sized>(
    mut candidates: Vec<ScoredCandidate>,
    requested_categories: &[String],
    limit: usize,
    rng: &mut R,
) -> Vec<ScoredCandidate> {
    if limit == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let mut selected = if requested_categories.len() <= 1 {
        sort_by_score(&mut candidates);
        candidates.truncate(limit);
        candidates
    } else {
        round_robin(candidates, requested_categories, limit)
    };

    fisher_yates(&mut selected, rng);
    selected
}

fn sort_by_score(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn round_robin(
    candidates: Vec<ScoredCandidate>,
    requested_categories: &[String],
    limit: usize,
) -> Vec<ScoredCandidate> {
    let mut buckets: HashMap<String, Vec<ScoredCandidate>> = HashMap::new();
    for candidate in candidates {
        buckets.entry(candidate.stratum.clone()).or_default().push(candidate);
    }
    for bucket in buckets.values_mut() {
        sort_by_score(bucket);
    }

    // Requested categories keep request order; leftovers follow by best score.
    let mut order: Vec<String> = requested_categories
        .iter()
        .filter(|c| buckets.contains_key(*c))
        .cloned()
        .collect();
    let mut rest: Vec<(String, f64)> = buckets
        .iter()
        .filter(|(key, _)| !order.contains(key))
        .map(|(key, bucket)| (key.clone(), bucket.first().map(|c| c.score).unwrap_or(0.0)))
        .collect();
    rest.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    order.extend(rest.into_iter().map(|(key, _)| key));

    let mut queues: Vec<VecDeque<ScoredCandidate>> = order
        .iter()
        .filter_map(|key| buckets.remove(key))
        .map(VecDeque::from)
        .collect();

    let mut selected = Vec::with_capacity(limit);
    'rounds: loop {
        let mut progressed = false;
        for queue in queues.iter_mut() {
            if selected.len() >= limit {
                break 'rounds;
            }
            if let Some(candidate) = queue.pop_front() {
                selected.push(candidate);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    selected
}

/// Unbiased in-place shuffle: every permutation equally likely given a
/// uniform `rng`.
pub fn fisher_yates<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoreBreakdown;
    use groupnom_common::{Address, GeoPoint};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn candidate(id: &str, tags: &[&str], score: f64, requested: &[String]) -> ScoredCandidate {
        let restaurant = Restaurant {
            id: id.into(),
            name: id.into(),
            address: Address::default(),
            location: GeoPoint::new(0.0, 0.0).unwrap(),
            categories: tags.iter().map(|t| t.to_string()).collect(),
            pick_rate: None,
            times_shown: 0,
            rating: None,
            price_tier: None,
            photo_ref: None,
        };
        let stratum = stratum_for(&restaurant, requested);
        ScoredCandidate {
            restaurant,
            distance_km: 0.0,
            score,
            breakdown: ScoreBreakdown {
                quality: 0.5,
                discovery: 1.0,
                freshness: 0.5,
                proximity: 1.0,
            },
            stratum,
        }
    }

    fn requested(cats: &[&str]) -> Vec<String> {
        cats.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn stratum_prefers_requested_tag() {
        let req = requested(&["sushi", "thai"]);
        let c = candidate("a", &["Asian Fusion", "Thai"], 0.5, &req);
        assert_eq!(c.stratum, "thai");

        let c = candidate("b", &["Asian Fusion", "Thai"], 0.5, &[]);
        assert_eq!(c.stratum, "asian_fusion");

        let c = candidate("c", &[], 0.5, &req);
        assert_eq!(c.stratum, OTHER_STRATUM);
    }

    #[test]
    fn single_category_takes_top_scores() {
        let mut rng = StdRng::seed_from_u64(1);
        let req = requested(&["thai"]);
        let pool: Vec<_> = (0..20)
            .map(|i| candidate(&format!("r{i:02}"), &["thai"], i as f64 / 20.0, &req))
            .collect();

        let picked = diversified_select(pool, &req, 5, &mut rng);
        let mut ids: Vec<_> = picked.iter().map(|c| c.restaurant.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["r15", "r16", "r17", "r18", "r19"]);
    }

    #[test]
    fn short_pool_returns_everything() {
        let mut rng = StdRng::seed_from_u64(2);
        let req = requested(&["thai", "pizza"]);
        let pool = vec![
            candidate("a", &["thai"], 0.9, &req),
            candidate("b", &["pizza"], 0.2, &req),
        ];
        assert_eq!(diversified_select(pool, &req, 10, &mut rng).len(), 2);
        assert!(diversified_select(Vec::new(), &req, 10, &mut rng).is_empty());
    }

    #[test]
    fn no_category_exceeds_round_robin_bound() {
        let mut rng = StdRng::seed_from_u64(5);
        let req = requested(&["thai", "pizza", "sushi"]);
        let k = req.len();
        for limit in [3usize, 4, 7, 10, 12] {
            let mut pool = Vec::new();
            // Thai dominates on score; without stratification it would take every slot.
            for i in 0..30 {
                pool.push(candidate(&format!("thai{i}"), &["thai"], 0.9 + i as f64 / 1000.0, &req));
            }
            for i in 0..limit {
                pool.push(candidate(&format!("pizza{i}"), &["pizza"], 0.3, &req));
                pool.push(candidate(&format!("sushi{i}"), &["sushi"], 0.2, &req));
            }

            let picked = diversified_select(pool, &req, limit, &mut rng);
            assert_eq!(picked.len(), limit);
            let bound = limit.div_ceil(k) + k - 1;
            for cat in &req {
                let count = picked.iter().filter(|c| &c.stratum == cat).count();
                assert!(count <= bound, "{cat} supplied {count} of {limit}, bound {bound}");
            }
        }
    }

    #[test]
    fn round_robin_order_is_requested_first() {
        let req = requested(&["pizza", "thai"]);
        let pool = vec![
            candidate("burger", &["burgers"], 0.99, &req),
            candidate("thai", &["thai"], 0.8, &req),
            candidate("pizza", &["pizza"], 0.1, &req),
        ];
        let picked = round_robin(pool, &req, 2);
        let ids: Vec<_> = picked.iter().map(|c| c.restaurant.id.as_str()).collect();
        assert_eq!(ids, vec!["pizza", "thai"]);
    }

    #[test]
    fn fisher_yates_is_roughly_uniform() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
        let trials = 60_000;
        for _ in 0..trials {
            let mut items = [0u8, 1, 2];
            fisher_yates(&mut items, &mut rng);
            *counts.entry(items).or_default() += 1;
        }
        assert_eq!(counts.len(), 6);
        let expected = trials / 6;
        for (perm, count) in counts {
            let deviation = (count as f64 - expected as f64).abs() / expected as f64;
            assert!(deviation < 0.05, "{perm:?} seen {count} times, expected ~{expected}");
        }
    }

    #[test]
    fn shuffle_is_reproducible_with_seed() {
        let req = requested(&["thai", "pizza"]);
        let make_pool = || {
            (0..10)
                .map(|i| candidate(&format!("r{i}"), &[if i % 2 == 0 { "thai" } else { "pizza" }], 0.5, &req))
                .collect::<Vec<_>>()
        };
        let a = diversified_select(make_pool(), &req, 6, &mut StdRng::seed_from_u64(9));
        let b = diversified_select(make_pool(), &req, 6, &mut StdRng::seed_from_u64(9));
        let ids = |v: &[ScoredCandidate]| v.iter().map(|c| c.restaurant.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }
}
