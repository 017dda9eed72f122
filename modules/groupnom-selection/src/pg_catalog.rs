//! Postgres-backed catalog. Each row carries its geohash at both query
//! precisions so a cover becomes a single `= ANY($1)` index scan.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use groupnom_common::{normalize_category, Address, GeoPoint, Restaurant};

use crate::catalog::{Catalog, CatalogQuery, CHAIN_MIN_LOCATIONS};
use crate::geo_index::{cell_for, Resolution};
use crate::scoring::MIN_EXPOSURES_FOR_PICK_RATE;
use crate::traits::{CandidateOutcome, ChainNameSource, ExposureCounter, OutcomeRecorder};

#[derive(Debug, Clone, sqlx::FromRow)]
struct RestaurantRow {
    id: String,
    name: String,
    street: Option<String>,
    city: Option<String>,
    state: Option<String>,
    lat: f64,
    lng: f64,
    categories: Vec<String>,
    times_shown: i32,
    picks: i32,
    rating: Option<f32>,
    price_tier: Option<i16>,
    photo_ref: Option<String>,
}

impl TryFrom<RestaurantRow> for Restaurant {
    type Error = anyhow::Error;

    fn try_from(row: RestaurantRow) -> Result<Self> {
        let location = GeoPoint::new(row.lat, row.lng)
            .with_context(|| format!("restaurant {} has invalid coordinates", row.id))?;
        let times_shown = row.times_shown.max(0) as u32;
        let pick_rate = (times_shown >= MIN_EXPOSURES_FOR_PICK_RATE)
            .then(|| row.picks.max(0) as f64 / times_shown as f64);

        Ok(Restaurant {
            id: row.id,
            name: row.name,
            address: Address {
                street: row.street,
                city: row.city,
                state: row.state,
            },
            location,
            categories: row.categories,
            pick_rate,
            times_shown,
            rating: row.rating,
            price_tier: row.price_tier.and_then(|t| u8::try_from(t).ok()),
            photo_ref: row.photo_ref,
        })
    }
}

#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The session store migrates the same database from its own directory.
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.context("restaurant migrations")?;
        Ok(())
    }

    /// Insert or replace a restaurant, computing its geohash columns.
    pub async fn upsert(&self, restaurant: &Restaurant) -> Result<()> {
        let (lat, lng) = (restaurant.location.lat, restaurant.location.lng);
        let geohash6 = cell_for(lat, lng, Resolution::Coarse)
            .with_context(|| format!("cannot geohash restaurant {}", restaurant.id))?;
        let geohash7 = cell_for(lat, lng, Resolution::Fine)
            .with_context(|| format!("cannot geohash restaurant {}", restaurant.id))?;
        let categories: Vec<String> = restaurant
            .categories
            .iter()
            .map(|c| normalize_category(c))
            .collect();

        sqlx::query(
            "INSERT INTO restaurants
                (id, name, street, city, state, lat, lng, geohash6, geohash7,
                 categories, rating, price_tier, photo_ref)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id)
             DO UPDATE SET name = EXCLUDED.name,
                          street = EXCLUDED.street,
                          city = EXCLUDED.city,
                          state = EXCLUDED.state,
                          lat = EXCLUDED.lat,
                          lng = EXCLUDED.lng,
                          geohash6 = EXCLUDED.geohash6,
                          geohash7 = EXCLUDED.geohash7,
                          categories = EXCLUDED.categories,
                          rating = EXCLUDED.rating,
                          price_tier = EXCLUDED.price_tier,
                          photo_ref = EXCLUDED.photo_ref",
        )
        .bind(&restaurant.id)
        .bind(&restaurant.name)
        .bind(&restaurant.address.street)
        .bind(&restaurant.address.city)
        .bind(&restaurant.address.state)
        .bind(lat)
        .bind(lng)
        .bind(geohash6.as_str())
        .bind(geohash7.as_str())
        .bind(&categories)
        .bind(restaurant.rating)
        .bind(restaurant.price_tier.map(i16::from))
        .bind(&restaurant.photo_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn candidates(&self, query: &CatalogQuery) -> Result<Vec<Restaurant>> {
        let cells: Vec<String> = query.cells.iter().map(|c| c.as_str().to_string()).collect();
        let exclude: Vec<String> = query.exclude_ids.iter().cloned().collect();
        let tiers: Vec<i16> = query.price_tiers.iter().map(|t| i16::from(*t)).collect();

        // The column name comes from `Resolution`, never from input.
        let sql = format!(
            "SELECT id, name, street, city, state, lat, lng, categories,
                    times_shown, picks, rating, price_tier, photo_ref
             FROM restaurants
             WHERE {column} = ANY($1)
               AND NOT (id = ANY($2))
               AND (cardinality($3::text[]) = 0 OR categories && $3::text[])
               AND (cardinality($4::int2[]) = 0 OR price_tier IS NULL OR price_tier = ANY($4::int2[]))
             LIMIT $5",
            column = query.resolution.column(),
        );

        let rows = sqlx::query_as::<_, RestaurantRow>(&sql)
            .bind(&cells)
            .bind(&exclude)
            .bind(&query.categories)
            .bind(&tiers)
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await?;

        debug!(cells = cells.len(), rows = rows.len(), "Catalog query");
        rows.into_iter().map(Restaurant::try_from).collect()
    }
}

#[async_trait]
impl ExposureCounter for PgCatalog {
    async fn increment_times_shown(&self, ids: &[String]) -> Result<()> {
        sqlx::query("UPDATE restaurants SET times_shown = times_shown + 1 WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeRecorder for PgCatalog {
    async fn record_outcome(&self, outcome: CandidateOutcome) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO voting_outcomes (restaurant_id, won, yes_votes, no_votes, participant_count)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&outcome.candidate_id)
        .bind(outcome.won)
        .bind(outcome.yes as i32)
        .bind(outcome.no as i32)
        .bind(outcome.participant_count as i32)
        .execute(&mut *tx)
        .await?;

        if outcome.won {
            sqlx::query("UPDATE restaurants SET picks = picks + 1 WHERE id = $1")
                .bind(&outcome.candidate_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ChainNameSource for PgCatalog {
    async fn chain_names(&self) -> Result<HashSet<String>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT lower(trim(name)) FROM restaurants
             GROUP BY lower(trim(name))
             HAVING count(*) >= $1",
        )
        .bind(CHAIN_MIN_LOCATIONS as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().collect())
    }
}
