use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kickback_db::db::is_unavailable;
use kickback_db::models::notification::NewNotification;
use kickback_db::models::referral::Referral;
use kickback_db::models::reward::{GrantOutcome, GrantPlan};
use kickback_db::models::subscription::Subscription;
use kickback_db::repositories::notification_repo::NotificationRepository;
use kickback_db::repositories::referral_repo::ReferralRepository;
use kickback_db::repositories::reward_repo::RewardRepository;
use kickback_db::repositories::subscription_repo::SubscriptionRepository;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::ports::{Collaborators, Notifier, ReferralStore, RewardLedger, SubscriptionOracle};

fn store_error(err: anyhow::Error) -> EngineError {
    if is_unavailable(&err) {
        EngineError::Unavailable(format!("{:#}", err))
    } else {
        EngineError::Store(err)
    }
}

/// All ports backed by one Postgres pool.
#[derive(Debug, Clone)]
pub struct PgBackend {
    referrals: ReferralRepository,
    subscriptions: SubscriptionRepository,
    rewards: RewardRepository,
    notifications: NotificationRepository,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            referrals: ReferralRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            rewards: RewardRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool),
        }
    }

    pub fn collaborators(pool: PgPool) -> Collaborators {
        let backend = Arc::new(Self::new(pool));
        Collaborators {
            referrals: backend.clone(),
            subscriptions: backend.clone(),
            rewards: backend.clone(),
            notifier: backend,
        }
    }
}

#[async_trait]
impl ReferralStore for PgBackend {
    async fn release_quarantined(&self, now: DateTime<Utc>) -> Result<u64> {
        self.referrals.release_quarantined(now).await.map_err(store_error)
    }

    async fn due_for_validation(&self, now: DateTime<Utc>) -> Result<Vec<Referral>> {
        self.referrals.get_due(now).await.map_err(store_error)
    }

    async fn mark_validated(&self, referral_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.referrals
            .mark_validated(referral_id, at)
            .await
            .map_err(store_error)
    }

    async fn mark_cancelled(&self, referral_id: i64) -> Result<bool> {
        self.referrals.mark_cancelled(referral_id).await.map_err(store_error)
    }

    async fn count_validated(&self, referrer_id: i64) -> Result<i64> {
        self.referrals.count_validated(referrer_id).await.map_err(store_error)
    }

    async fn oldest_validated(&self, referrer_id: i64, limit: i64) -> Result<Vec<i64>> {
        self.referrals
            .oldest_validated(referrer_id, limit)
            .await
            .map_err(store_error)
    }

    async fn referrers_with_validated(&self, threshold: i64) -> Result<Vec<i64>> {
        self.referrals
            .referrers_with_validated(threshold)
            .await
            .map_err(store_error)
    }
}

// Subscriptions live in the same database, so a failed read is reported
// as an oracle failure for that user unless the whole store is gone.
#[async_trait]
impl SubscriptionOracle for PgBackend {
    async fn subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        self.subscriptions.get_by_user(user_id).await.map_err(|e| {
            if is_unavailable(&e) {
                EngineError::Unavailable(format!("{:#}", e))
            } else {
                EngineError::Oracle {
                    user_id,
                    message: format!("{:#}", e),
                }
            }
        })
    }
}

#[async_trait]
impl RewardLedger for PgBackend {
    async fn rewards_granted(&self, user_id: i64, referrals_count: i32) -> Result<i64> {
        self.rewards
            .count_for_user(user_id, referrals_count)
            .await
            .map_err(store_error)
    }

    async fn reward_exists(&self, user_id: i64, referrals_count: i32, cycle: i32) -> Result<bool> {
        self.rewards
            .exists_for_cycle(user_id, referrals_count, cycle)
            .await
            .map_err(store_error)
    }

    async fn commit_grant(&self, plan: &GrantPlan) -> Result<GrantOutcome> {
        self.rewards.grant(plan).await.map_err(store_error)
    }
}

#[async_trait]
impl Notifier for PgBackend {
    async fn notify(&self, notification: &NewNotification) -> Result<()> {
        self.notifications
            .create(notification)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Notify(format!("{:#}", e)))
    }
}
