use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::models::referral::Referral;

const REFERRAL_COLUMNS: &str =
    "id, referrer_id, referred_id, status, referred_at, validation_deadline, validated_at";

#[derive(Debug, Clone)]
pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Moves referrals whose quarantine has elapsed to `awaiting_validation`.
    pub async fn release_quarantined(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE referrals SET status = 'awaiting_validation'
             WHERE status = 'pending_quarantine' AND validation_deadline <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to release quarantined referrals")?;
        Ok(result.rows_affected())
    }

    pub async fn get_due(&self, now: DateTime<Utc>) -> Result<Vec<Referral>> {
        let query = format!(
            "SELECT {} FROM referrals
             WHERE status = 'awaiting_validation' AND validation_deadline <= $1
             ORDER BY validation_deadline ASC, id ASC",
            REFERRAL_COLUMNS
        );
        sqlx::query_as::<_, Referral>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch referrals due for validation")
    }

    /// Returns false when the referral was no longer awaiting validation.
    pub async fn mark_validated(&self, id: i64, validated_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET status = 'validated', validated_at = $2
             WHERE id = $1 AND status = 'awaiting_validation'",
        )
        .bind(id)
        .bind(validated_at)
        .execute(&self.pool)
        .await
        .context("Failed to mark referral validated")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_cancelled(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET status = 'cancelled'
             WHERE id = $1 AND status = 'awaiting_validation'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark referral cancelled")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_validated(&self, referrer_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM referrals WHERE referrer_id = $1 AND status = 'validated'",
        )
        .bind(referrer_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count validated referrals")
    }

    /// Oldest validated referrals first; ties broken by id so repeated calls
    /// pick the same rows.
    pub async fn oldest_validated(&self, referrer_id: i64, limit: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM referrals
             WHERE referrer_id = $1 AND status = 'validated'
             ORDER BY validated_at ASC, id ASC
             LIMIT $2",
        )
        .bind(referrer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch validated referrals")
    }

    /// Referrers holding at least `threshold` validated referrals. Picks up
    /// rewards deferred by an earlier run.
    pub async fn referrers_with_validated(&self, threshold: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT referrer_id FROM referrals
             WHERE status = 'validated'
             GROUP BY referrer_id
             HAVING COUNT(*) >= $1
             ORDER BY referrer_id",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch referrers with pending rewards")
    }

    pub(crate) async fn consume_validated_tx(
        conn: &mut PgConnection,
        referrer_id: i64,
        ids: &[i64],
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE referrals SET status = 'rewarded'
             WHERE id = ANY($1) AND referrer_id = $2 AND status = 'validated'",
        )
        .bind(ids)
        .bind(referrer_id)
        .execute(conn)
        .await
        .context("Failed to mark referrals rewarded")?;
        Ok(result.rows_affected())
    }
}
