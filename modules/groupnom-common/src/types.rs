use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// Lowercase, trimmed, spaces replaced with `_` ("Thai Food" → "thai_food").
pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

// --- Location ---

/// A validated WGS84 coordinate. Deserialization rejects out-of-range values,
/// so anything holding a `GeoPoint` may pass it to the geo index as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = ValidationError;

    fn try_from(raw: RawGeoPoint) -> Result<Self, Self::Error> {
        GeoPoint::new(raw.lat, raw.lng)
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::Latitude(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(ValidationError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self.lat, self.lng, other.lat, other.lng)
    }
}

// --- Catalog entity ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A candidate restaurant as read from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Address,
    pub location: GeoPoint,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Fraction of times shown that a group picked it (0.0-1.0).
    #[serde(default)]
    pub pick_rate: Option<f64>,
    #[serde(default)]
    pub times_shown: u32,
    /// 0-5 scale.
    #[serde(default)]
    pub rating: Option<f32>,
    /// 1-4 ($ to $$$$).
    #[serde(default)]
    pub price_tier: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<String>,
}

// --- Filters ---

pub const MAX_RADIUS_KM: f64 = 50.0;
pub const MAX_RATING: f32 = 5.0;
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Validated selection filters. Built once at the API boundary; every layer
/// below trusts the ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "FiltersInput")]
pub struct SelectionFilters {
    pub min_rating: f32,
    #[serde(rename = "radius")]
    pub radius_km: f64,
    pub categories: Vec<String>,
    pub price_tiers: Vec<u8>,
    pub exclude_chains: bool,
}

impl Default for SelectionFilters {
    fn default() -> Self {
        Self {
            min_rating: 0.0,
            radius_km: DEFAULT_RADIUS_KM,
            categories: Vec::new(),
            price_tiers: Vec::new(),
            exclude_chains: false,
        }
    }
}

/// Wire shape of the filters. Accepts the older `distance` / `cuisines` /
/// `priceLevel` names as aliases.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiltersInput {
    #[serde(default)]
    pub min_rating: f32,
    #[serde(default = "default_radius", alias = "distance")]
    pub radius: f64,
    #[serde(default, alias = "cuisines")]
    pub categories: Vec<String>,
    #[serde(default, alias = "priceLevel")]
    pub price_tiers: Vec<u8>,
    #[serde(default)]
    pub exclude_chains: bool,
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS_KM
}

impl TryFrom<FiltersInput> for SelectionFilters {
    type Error = ValidationError;

    fn try_from(input: FiltersInput) -> Result<Self, Self::Error> {
        if !input.min_rating.is_finite() || !(0.0..=MAX_RATING).contains(&input.min_rating) {
            return Err(ValidationError::MinRating(input.min_rating));
        }
        if !input.radius.is_finite() || !(0.0..=MAX_RADIUS_KM).contains(&input.radius) {
            return Err(ValidationError::Radius(input.radius));
        }
        if let Some(bad) = input.price_tiers.iter().find(|t| !(1..=4).contains(*t)) {
            return Err(ValidationError::PriceTier(*bad));
        }

        let mut categories: Vec<String> = Vec::with_capacity(input.categories.len());
        for raw in &input.categories {
            let normalized = normalize_category(raw);
            if !normalized.is_empty() && !categories.contains(&normalized) {
                categories.push(normalized);
            }
        }

        let mut price_tiers = input.price_tiers;
        price_tiers.sort_unstable();
        price_tiers.dedup();

        Ok(Self {
            min_rating: input.min_rating,
            radius_km: input.radius,
            categories,
            price_tiers,
            exclude_chains: input.exclude_chains,
        })
    }
}

// --- Session ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Code reserved, no candidates yet.
    Pending,
    Active,
    /// Host is computing a new candidate list.
    Reconfiguring,
    Finished,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Reconfiguring => write!(f, "reconfiguring"),
            SessionStatus::Finished => write!(f, "finished"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub participant_id: String,
    pub candidate_id: String,
    pub liked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodMethod {
    DineIn,
    Pickup,
    Delivery,
}

impl FoodMethod {
    pub const ALL: [FoodMethod; 3] = [FoodMethod::DineIn, FoodMethod::Pickup, FoodMethod::Delivery];
}

/// One group decision. The candidate list is frozen for the round; the vote
/// log holds at most one entry per (participant, candidate) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub host_id: String,
    /// Join order; no duplicates.
    pub participants: Vec<String>,
    pub candidates: Vec<Restaurant>,
    pub votes: Vec<Vote>,
    #[serde(default)]
    pub filters: Option<SelectionFilters>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub food_method_votes: BTreeMap<String, FoodMethod>,
    #[serde(default)]
    pub food_method_result: Option<FoodMethod>,
}

impl Session {
    /// A session reserved by its host before filters are known.
    pub fn pending(code: impl Into<String>, host_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let host_id = host_id.into();
        Self {
            code: code.into(),
            created_at: now,
            status: SessionStatus::Pending,
            participants: vec![host_id.clone()],
            host_id,
            candidates: Vec::new(),
            votes: Vec::new(),
            filters: None,
            location: None,
            food_method_votes: BTreeMap::new(),
            food_method_result: None,
        }
    }

    pub fn is_host(&self, participant_id: &str) -> bool {
        self.host_id == participant_id
    }

    pub fn is_participant(&self, participant_id: &str) -> bool {
        self.participants.iter().any(|p| p == participant_id)
    }

    /// Returns false when the participant had already joined.
    pub fn add_participant(&mut self, participant_id: &str) -> bool {
        if self.is_participant(participant_id) {
            return false;
        }
        self.participants.push(participant_id.to_string());
        true
    }

    pub fn has_candidate(&self, candidate_id: &str) -> bool {
        self.candidates.iter().any(|c| c.id == candidate_id)
    }

    pub fn candidate_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }

    /// Overwrites an earlier vote for the same pair instead of appending.
    pub fn record_vote(&mut self, participant_id: &str, candidate_id: &str, liked: bool) {
        match self
            .votes
            .iter_mut()
            .find(|v| v.participant_id == participant_id && v.candidate_id == candidate_id)
        {
            Some(existing) => existing.liked = liked,
            None => self.votes.push(Vote {
                participant_id: participant_id.to_string(),
                candidate_id: candidate_id.to_string(),
                liked,
            }),
        }
    }

    pub fn vote_count_for(&self, participant_id: &str) -> usize {
        self.votes
            .iter()
            .filter(|v| v.participant_id == participant_id)
            .count()
    }

    pub fn has_finished_voting(&self, participant_id: &str) -> bool {
        self.vote_count_for(participant_id) >= self.candidates.len()
    }

    pub fn all_participants_finished(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .iter()
                .all(|p| self.has_finished_voting(p))
    }
}
