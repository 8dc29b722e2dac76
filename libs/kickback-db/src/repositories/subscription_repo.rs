use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::models::subscription::{ExtendOutcome, Subscription};

#[derive(Debug, Clone)]
pub struct SubscriptionRepository {
    pool: PgPool,
}

impl SubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_user(&self, user_id: i64) -> Result<Option<Subscription>> {
        sqlx::query_as::<_, Subscription>(
            "SELECT user_id, status, next_due_date FROM subscriptions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch subscription for user")
    }

    /// Moves `next_due_date` to `new_due_date` only while the row still holds
    /// `expected_due_date` and is extendable. Never moves the date backwards.
    pub(crate) async fn extend_due_date_tx(
        conn: &mut PgConnection,
        user_id: i64,
        expected_due_date: DateTime<Utc>,
        new_due_date: DateTime<Utc>,
    ) -> Result<ExtendOutcome> {
        let result = sqlx::query(
            "UPDATE subscriptions SET next_due_date = $3, updated_at = CURRENT_TIMESTAMP
             WHERE user_id = $1
               AND next_due_date = $2
               AND $3 > next_due_date
               AND status IN ('active', 'overdue')",
        )
        .bind(user_id)
        .bind(expected_due_date)
        .bind(new_due_date)
        .execute(&mut *conn)
        .await
        .context("Failed to extend subscription due date")?;

        if result.rows_affected() == 1 {
            return Ok(ExtendOutcome::Extended);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM subscriptions WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&mut *conn)
                .await
                .context("Failed to check subscription existence")?;

        Ok(if exists {
            ExtendOutcome::Conflict
        } else {
            ExtendOutcome::NotFound
        })
    }
}
