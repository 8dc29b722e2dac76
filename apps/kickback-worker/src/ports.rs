//! Seams between the engine and the outside world. The Postgres adapters
//! live in `adapters::postgres`; tests run against an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kickback_db::models::notification::NewNotification;
use kickback_db::models::referral::Referral;
use kickback_db::models::reward::{GrantOutcome, GrantPlan};
use kickback_db::models::subscription::Subscription;
use std::sync::Arc;

use crate::error::Result;

#[async_trait]
pub trait ReferralStore: Send + Sync {
    /// Promote `pending_quarantine` referrals whose deadline passed.
    async fn release_quarantined(&self, now: DateTime<Utc>) -> Result<u64>;

    /// `awaiting_validation` referrals with `validation_deadline <= now`.
    async fn due_for_validation(&self, now: DateTime<Utc>) -> Result<Vec<Referral>>;

    /// Both transitions only apply from `awaiting_validation`; `Ok(false)`
    /// means another run already decided this referral.
    async fn mark_validated(&self, referral_id: i64, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_cancelled(&self, referral_id: i64) -> Result<bool>;

    async fn count_validated(&self, referrer_id: i64) -> Result<i64>;
    async fn oldest_validated(&self, referrer_id: i64, limit: i64) -> Result<Vec<i64>>;
    async fn referrers_with_validated(&self, threshold: i64) -> Result<Vec<i64>>;
}

#[async_trait]
pub trait SubscriptionOracle: Send + Sync {
    async fn subscription(&self, user_id: i64) -> Result<Option<Subscription>>;
}

#[async_trait]
pub trait RewardLedger: Send + Sync {
    async fn rewards_granted(&self, user_id: i64, referrals_count: i32) -> Result<i64>;
    async fn reward_exists(&self, user_id: i64, referrals_count: i32, cycle: i32) -> Result<bool>;

    /// Insert the reward, extend the subscription and consume the referrals
    /// as one unit. Conflicts come back as outcomes, not errors.
    async fn commit_grant(&self, plan: &GrantPlan) -> Result<GrantOutcome>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &NewNotification) -> Result<()>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub referrals: Arc<dyn ReferralStore>,
    pub subscriptions: Arc<dyn SubscriptionOracle>,
    pub rewards: Arc<dyn RewardLedger>,
    pub notifier: Arc<dyn Notifier>,
}
