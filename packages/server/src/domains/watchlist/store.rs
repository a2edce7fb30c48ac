//! Watched artist persistence.
//!
//! The watchlist timer owns all scheduling mutations on these rows
//! (`last_checked_at`, `next_check_at`, cooldown, retry budget); everything
//! goes through this trait so the timer and handlers never touch rows
//! directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::model::{FailureBudget, WatchedArtist};

#[async_trait]
pub trait WatchedArtistStore: Send + Sync {
    async fn upsert(&self, artist: WatchedArtist) -> Result<()>;

    async fn get(&self, artist_id: Uuid) -> Result<Option<WatchedArtist>>;

    /// Artists eligible for a check at `now`, ordered by
    /// `(priority desc, next_check_at asc)`, at most `limit`.
    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchedArtist>>;

    /// Record that a check was enqueued at `now` and schedule the next one.
    async fn mark_checked(&self, artist_id: Uuid, now: DateTime<Utc>) -> Result<()>;

    /// Charge one failure against the artist's retry budget. When the budget
    /// hits zero the cooldown is applied and the budget reset.
    async fn record_failure(
        &self,
        artist_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
        budget_reset: i32,
    ) -> Result<FailureBudget>;

    /// A successful sync restores the full retry budget.
    async fn record_success(&self, artist_id: Uuid, budget_reset: i32) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryWatchedArtistStore {
    artists: Mutex<HashMap<Uuid, WatchedArtist>>,
}

impl MemoryWatchedArtistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, artist_id: Uuid) -> Option<WatchedArtist> {
        self.artists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&artist_id)
            .cloned()
    }
}

#[async_trait]
impl WatchedArtistStore for MemoryWatchedArtistStore {
    async fn upsert(&self, artist: WatchedArtist) -> Result<()> {
        self.artists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(artist.artist_id, artist);
        Ok(())
    }

    async fn get(&self, artist_id: Uuid) -> Result<Option<WatchedArtist>> {
        Ok(self.snapshot(artist_id))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchedArtist>> {
        let artists = self.artists.lock().unwrap_or_else(|e| e.into_inner());
        let mut due: Vec<WatchedArtist> = artists
            .values()
            .filter(|a| a.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.next_check_at.cmp(&b.next_check_at))
                .then(a.artist_id.cmp(&b.artist_id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn mark_checked(&self, artist_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let mut artists = self.artists.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(artist) = artists.get_mut(&artist_id) {
            artist.mark_checked(now);
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        artist_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
        budget_reset: i32,
    ) -> Result<FailureBudget> {
        let mut artists = self.artists.lock().unwrap_or_else(|e| e.into_inner());
        let artist = artists
            .get_mut(&artist_id)
            .ok_or_else(|| anyhow::anyhow!("watched artist {artist_id} not found"))?;

        artist.retry_budget_remaining -= 1;
        if artist.retry_budget_remaining <= 0 {
            let until = now + ChronoDuration::milliseconds(cooldown.as_millis() as i64);
            artist.cooldown_until = Some(until);
            artist.next_check_at = artist.next_check_at.max(until);
            artist.retry_budget_remaining = budget_reset;
            return Ok(FailureBudget {
                remaining: budget_reset,
                cooled_down: true,
            });
        }
        Ok(FailureBudget {
            remaining: artist.retry_budget_remaining,
            cooled_down: false,
        })
    }

    async fn record_success(&self, artist_id: Uuid, budget_reset: i32) -> Result<()> {
        let mut artists = self.artists.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(artist) = artists.get_mut(&artist_id) {
            artist.retry_budget_remaining = budget_reset;
            artist.cooldown_until = None;
        }
        Ok(())
    }
}

// ============================================================================
// Postgres store
// ============================================================================

#[derive(FromRow)]
struct WatchedArtistRow {
    artist_id: Uuid,
    name: String,
    external_ids: serde_json::Value,
    priority: i32,
    interval_secs: i64,
    enabled: bool,
    last_checked_at: Option<DateTime<Utc>>,
    next_check_at: DateTime<Utc>,
    cooldown_until: Option<DateTime<Utc>>,
    retry_budget_remaining: i32,
}

impl From<WatchedArtistRow> for WatchedArtist {
    fn from(row: WatchedArtistRow) -> Self {
        WatchedArtist {
            artist_id: row.artist_id,
            name: row.name,
            external_ids: row.external_ids,
            priority: row.priority,
            interval: Duration::from_secs(row.interval_secs.max(0) as u64),
            enabled: row.enabled,
            last_checked_at: row.last_checked_at,
            next_check_at: row.next_check_at,
            cooldown_until: row.cooldown_until,
            retry_budget_remaining: row.retry_budget_remaining,
        }
    }
}

const ARTIST_COLUMNS: &str = "artist_id, name, external_ids, priority, interval_secs, enabled, \
     last_checked_at, next_check_at, cooldown_until, retry_budget_remaining";

pub struct PostgresWatchedArtistStore {
    pool: PgPool,
}

impl PostgresWatchedArtistStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WatchedArtistStore for PostgresWatchedArtistStore {
    async fn upsert(&self, artist: WatchedArtist) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watched_artists (
                artist_id, name, external_ids, priority, interval_secs, enabled,
                last_checked_at, next_check_at, cooldown_until, retry_budget_remaining
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (artist_id) DO UPDATE SET
                name = EXCLUDED.name,
                external_ids = EXCLUDED.external_ids,
                priority = EXCLUDED.priority,
                interval_secs = EXCLUDED.interval_secs,
                enabled = EXCLUDED.enabled,
                next_check_at = EXCLUDED.next_check_at
            "#,
        )
        .bind(artist.artist_id)
        .bind(&artist.name)
        .bind(&artist.external_ids)
        .bind(artist.priority)
        .bind(artist.interval.as_secs() as i64)
        .bind(artist.enabled)
        .bind(artist.last_checked_at)
        .bind(artist.next_check_at)
        .bind(artist.cooldown_until)
        .bind(artist.retry_budget_remaining)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, artist_id: Uuid) -> Result<Option<WatchedArtist>> {
        let row = sqlx::query_as::<_, WatchedArtistRow>(&format!(
            "SELECT {ARTIST_COLUMNS} FROM watched_artists WHERE artist_id = $1"
        ))
        .bind(artist_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WatchedArtist::from))
    }

    async fn list_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WatchedArtist>> {
        let rows = sqlx::query_as::<_, WatchedArtistRow>(&format!(
            r#"
            SELECT {ARTIST_COLUMNS}
            FROM watched_artists
            WHERE enabled
              AND next_check_at <= $1
              AND (cooldown_until IS NULL OR cooldown_until <= $1)
            ORDER BY priority DESC, next_check_at ASC, artist_id ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(WatchedArtist::from).collect())
    }

    async fn mark_checked(&self, artist_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE watched_artists
            SET last_checked_at = $1,
                next_check_at = GREATEST(
                    $1 + make_interval(secs => interval_secs),
                    COALESCE(cooldown_until, $1)
                )
            WHERE artist_id = $2
            "#,
        )
        .bind(now)
        .bind(artist_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(
        &self,
        artist_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
        budget_reset: i32,
    ) -> Result<FailureBudget> {
        let cooldown_until = now + ChronoDuration::milliseconds(cooldown.as_millis() as i64);

        let (remaining, cooled_down) = sqlx::query_as::<_, (i32, bool)>(
            r#"
            UPDATE watched_artists
            SET retry_budget_remaining = CASE
                    WHEN retry_budget_remaining - 1 <= 0 THEN $1
                    ELSE retry_budget_remaining - 1
                END,
                cooldown_until = CASE
                    WHEN retry_budget_remaining - 1 <= 0 THEN $2
                    ELSE cooldown_until
                END,
                next_check_at = CASE
                    WHEN retry_budget_remaining - 1 <= 0 THEN GREATEST(next_check_at, $2)
                    ELSE next_check_at
                END
            WHERE artist_id = $3
            RETURNING retry_budget_remaining, COALESCE(cooldown_until = $2, false)
            "#,
        )
        .bind(budget_reset)
        .bind(cooldown_until)
        .bind(artist_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(FailureBudget {
            remaining,
            cooled_down,
        })
    }

    async fn record_success(&self, artist_id: Uuid, budget_reset: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE watched_artists
            SET retry_budget_remaining = $1, cooldown_until = NULL
            WHERE artist_id = $2
            "#,
        )
        .bind(budget_reset)
        .bind(artist_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
