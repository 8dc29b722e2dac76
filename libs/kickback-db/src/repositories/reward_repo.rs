use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;

use crate::models::reward::{GrantOutcome, GrantPlan, REWARD_TYPE_SUBSCRIPTION_EXTENSION, RewardRecord};
use crate::models::subscription::ExtendOutcome;
use crate::repositories::referral_repo::ReferralRepository;
use crate::repositories::subscription_repo::SubscriptionRepository;

#[derive(Debug, Clone)]
pub struct RewardRepository {
    pool: PgPool,
}

impl RewardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn exists_for_cycle(&self, user_id: i64, referrals_count: i32, cycle: i32) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM referral_rewards
                WHERE user_id = $1 AND referrals_count = $2 AND cycle = $3
            )",
        )
        .bind(user_id)
        .bind(referrals_count)
        .bind(cycle)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check existing reward")
    }

    pub async fn count_for_user(&self, user_id: i64, referrals_count: i32) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM referral_rewards WHERE user_id = $1 AND referrals_count = $2",
        )
        .bind(user_id)
        .bind(referrals_count)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count rewards for user")
    }

    pub async fn get_by_user(&self, user_id: i64) -> Result<Vec<RewardRecord>> {
        sqlx::query_as::<_, RewardRecord>(
            "SELECT id, user_id, referrals_count, reward_type, days_added, cycle,
                    original_next_due_date, new_next_due_date, granted_at
             FROM referral_rewards
             WHERE user_id = $1
             ORDER BY cycle ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch rewards for user")
    }

    /// Applies a grant in one transaction, serialized per user by an advisory
    /// lock. The reward row goes in first and acts as the fence: if it already
    /// exists nothing else is written. Any mismatch rolls everything back.
    pub async fn grant(&self, plan: &GrantPlan) -> Result<GrantOutcome> {
        if plan.referral_ids.len() as i64 != i64::from(plan.referrals_count) {
            return Ok(GrantOutcome::ReferralsChanged);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open grant transaction")?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(plan.user_id)
            .execute(&mut *tx)
            .await
            .context("Failed to take referrer lock")?;

        let reward_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO referral_rewards
                (user_id, referrals_count, reward_type, days_added, cycle,
                 original_next_due_date, new_next_due_date, granted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, referrals_count, cycle) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(plan.user_id)
        .bind(plan.referrals_count)
        .bind(REWARD_TYPE_SUBSCRIPTION_EXTENSION)
        .bind(plan.days_added)
        .bind(plan.cycle)
        .bind(plan.original_next_due_date)
        .bind(plan.new_next_due_date)
        .bind(plan.granted_at)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert reward record")?;

        let Some(reward_id) = reward_id else {
            debug!("Reward cycle {} for user {} already recorded", plan.cycle, plan.user_id);
            tx.rollback().await?;
            return Ok(GrantOutcome::AlreadyGranted);
        };

        match SubscriptionRepository::extend_due_date_tx(
            &mut *tx,
            plan.user_id,
            plan.original_next_due_date,
            plan.new_next_due_date,
        )
        .await?
        {
            ExtendOutcome::Extended => {}
            ExtendOutcome::Conflict => {
                tx.rollback().await?;
                return Ok(GrantOutcome::SubscriptionChanged);
            }
            ExtendOutcome::NotFound => {
                tx.rollback().await?;
                return Ok(GrantOutcome::SubscriptionMissing);
            }
        }

        let consumed =
            ReferralRepository::consume_validated_tx(&mut *tx, plan.user_id, &plan.referral_ids).await?;
        if consumed != plan.referral_ids.len() as u64 {
            debug!(
                "Expected to consume {} referrals for user {}, found {}",
                plan.referral_ids.len(),
                plan.user_id,
                consumed
            );
            tx.rollback().await?;
            return Ok(GrantOutcome::ReferralsChanged);
        }

        tx.commit().await.context("Failed to commit grant")?;
        Ok(GrantOutcome::Granted { reward_id })
    }
}
