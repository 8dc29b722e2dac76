use chrono::{DateTime, Utc};
use kickback_db::models::reward::{GrantOutcome, GrantPlan, REFERRALS_PER_REWARD, REWARD_DAYS};
use kickback_db::models::subscription::SubscriptionStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RewardPolicy;
use crate::error::Result;
use crate::ports::{ReferralStore, RewardLedger, SubscriptionOracle};
use crate::services::lookup_subscription;

#[derive(Debug, Clone, PartialEq)]
pub struct RewardGrant {
    pub reward_id: i64,
    pub user_id: i64,
    pub cycle: i32,
    pub original_next_due_date: DateTime<Utc>,
    pub new_next_due_date: DateTime<Utc>,
    pub referral_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeferReason {
    NoSubscription,
    NotExtendable(SubscriptionStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewardDecision {
    BelowThreshold { validated: i64 },
    AlreadyRewarded { cycle: i32 },
    /// Threshold met but nothing to extend yet; retried on a later run.
    Deferred(DeferReason),
    /// Lost a race with another run; nothing was written.
    Conflict(GrantOutcome),
    Granted(RewardGrant),
}

/// Counts validated referrals per referrer and grants subscription days
/// once a batch is complete.
#[derive(Clone)]
pub struct RewardService {
    referrals: Arc<dyn ReferralStore>,
    subscriptions: Arc<dyn SubscriptionOracle>,
    rewards: Arc<dyn RewardLedger>,
    policy: RewardPolicy,
    lookup_timeout: Duration,
}

impl RewardService {
    pub fn new(
        referrals: Arc<dyn ReferralStore>,
        subscriptions: Arc<dyn SubscriptionOracle>,
        rewards: Arc<dyn RewardLedger>,
        policy: RewardPolicy,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            referrals,
            subscriptions,
            rewards,
            policy,
            lookup_timeout,
        }
    }

    /// Cycle the next reward would be recorded under. With `Once` every
    /// reward claims cycle 1, so a second one always collides.
    async fn next_cycle(&self, user_id: i64) -> Result<i32> {
        match self.policy {
            RewardPolicy::Once => Ok(1),
            RewardPolicy::Repeating => {
                let granted = self
                    .rewards
                    .rewards_granted(user_id, REFERRALS_PER_REWARD as i32)
                    .await?;
                Ok(granted as i32 + 1)
            }
        }
    }

    pub async fn evaluate(&self, user_id: i64, now: DateTime<Utc>) -> Result<RewardDecision> {
        let validated = self.referrals.count_validated(user_id).await?;
        if validated < REFERRALS_PER_REWARD {
            debug!("Referrer {} has {}/{} validated referrals", user_id, validated, REFERRALS_PER_REWARD);
            return Ok(RewardDecision::BelowThreshold { validated });
        }

        let cycle = self.next_cycle(user_id).await?;
        if self
            .rewards
            .reward_exists(user_id, REFERRALS_PER_REWARD as i32, cycle)
            .await?
        {
            debug!("Referrer {} already rewarded for cycle {}", user_id, cycle);
            return Ok(RewardDecision::AlreadyRewarded { cycle });
        }

        self.grant(user_id, cycle, now).await
    }

    async fn grant(&self, user_id: i64, cycle: i32, now: DateTime<Utc>) -> Result<RewardDecision> {
        let subscription =
            match lookup_subscription(self.subscriptions.as_ref(), user_id, self.lookup_timeout).await? {
                Some(s) if s.status.is_extendable() => s,
                Some(s) => {
                    info!(
                        "Referrer {} earned a reward but subscription is {}; deferring",
                        user_id, s.status
                    );
                    return Ok(RewardDecision::Deferred(DeferReason::NotExtendable(s.status)));
                }
                None => {
                    info!("Referrer {} earned a reward but has no subscription; deferring", user_id);
                    return Ok(RewardDecision::Deferred(DeferReason::NoSubscription));
                }
            };

        let referral_ids = self
            .referrals
            .oldest_validated(user_id, REFERRALS_PER_REWARD)
            .await?;
        if referral_ids.len() as i64 != REFERRALS_PER_REWARD {
            warn!(
                "Referrer {} lost validated referrals mid-evaluation ({} left)",
                user_id,
                referral_ids.len()
            );
            return Ok(RewardDecision::Conflict(GrantOutcome::ReferralsChanged));
        }

        let plan = GrantPlan {
            user_id,
            cycle,
            referrals_count: REFERRALS_PER_REWARD as i32,
            days_added: REWARD_DAYS as i32,
            original_next_due_date: subscription.next_due_date,
            new_next_due_date: subscription.extended_due_date(now, REWARD_DAYS),
            referral_ids,
            granted_at: now,
        };

        match self.rewards.commit_grant(&plan).await? {
            GrantOutcome::Granted { reward_id } => {
                info!(
                    "Granted reward #{} (cycle {}) to user {}: due date {} -> {}",
                    reward_id, plan.cycle, user_id, plan.original_next_due_date, plan.new_next_due_date
                );
                Ok(RewardDecision::Granted(RewardGrant {
                    reward_id,
                    user_id,
                    cycle: plan.cycle,
                    original_next_due_date: plan.original_next_due_date,
                    new_next_due_date: plan.new_next_due_date,
                    referral_ids: plan.referral_ids,
                }))
            }
            GrantOutcome::SubscriptionMissing => {
                info!("Subscription for user {} disappeared before grant; deferring", user_id);
                Ok(RewardDecision::Deferred(DeferReason::NoSubscription))
            }
            conflict => {
                warn!("Reward for user {} (cycle {}) not applied: {:?}", user_id, cycle, conflict);
                Ok(RewardDecision::Conflict(conflict))
            }
        }
    }
}
