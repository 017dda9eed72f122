use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use sqlx::types::Json;
use sqlx::PgPool;

use groupnom_common::{Clock, Session};

use crate::store::{CasOutcome, SessionStore, Versioned};

/// Sessions as versioned JSONB documents. Expiry is compared against the
/// injected clock rather than `now()` so the store agrees with the service.
pub struct PgSessionStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { pool, clock, ttl }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        // The catalog migrates the same database from its own directory.
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.context("session migrations")?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, code: &str) -> Result<Option<Versioned<Session>>> {
        let row = sqlx::query_as::<_, (i64, Json<Session>)>(
            "SELECT version, doc FROM sessions WHERE code = $1 AND expires_at > $2",
        )
        .bind(code)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(version, Json(session))| Versioned {
            version: version as u64,
            value: session,
        }))
    }

    async fn insert_new(&self, session: &Session) -> Result<bool> {
        // An expired row still holding the code is overwritten in place.
        let result = sqlx::query(
            "INSERT INTO sessions (code, version, doc, created_at, expires_at)
             VALUES ($1, 1, $2, $3, $4)
             ON CONFLICT (code)
             DO UPDATE SET version = 1,
                          doc = EXCLUDED.doc,
                          created_at = EXCLUDED.created_at,
                          expires_at = EXCLUDED.expires_at
             WHERE sessions.expires_at <= $5",
        )
        .bind(&session.code)
        .bind(Json(session))
        .bind(session.created_at)
        .bind(session.created_at + self.ttl)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_swap(
        &self,
        code: &str,
        expected_version: u64,
        session: &Session,
    ) -> Result<CasOutcome> {
        let now = self.clock.now();
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE sessions SET version = version + 1, doc = $3
             WHERE code = $1 AND version = $2 AND expires_at > $4
             RETURNING version",
        )
        .bind(code)
        .bind(expected_version as i64)
        .bind(Json(session))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = updated {
            return Ok(CasOutcome::Applied(version as u64));
        }

        let live = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM sessions WHERE code = $1 AND expires_at > $2)",
        )
        .bind(code)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(if live {
            CasOutcome::Conflict
        } else {
            CasOutcome::Missing
        })
    }

    async fn purge_expired(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}
