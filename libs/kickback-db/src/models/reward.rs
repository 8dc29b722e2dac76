use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Validated referrals consumed by one reward.
pub const REFERRALS_PER_REWARD: i64 = 5;
/// Days added to the referrer's subscription per reward.
pub const REWARD_DAYS: i64 = 30;
pub const REWARD_TYPE_SUBSCRIPTION_EXTENSION: &str = "subscription_extension";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RewardRecord {
    pub id: i64,
    pub user_id: i64,
    pub referrals_count: i32,
    pub reward_type: String,
    pub days_added: i32,
    pub cycle: i32,
    pub original_next_due_date: DateTime<Utc>,
    pub new_next_due_date: DateTime<Utc>,
    pub granted_at: DateTime<Utc>,
}

/// Everything a grant writes, computed up front so the store can apply it
/// as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantPlan {
    pub user_id: i64,
    pub cycle: i32,
    pub referrals_count: i32,
    pub days_added: i32,
    /// Due date as read before the grant. The update only applies while the
    /// subscription still holds this value.
    pub original_next_due_date: DateTime<Utc>,
    pub new_next_due_date: DateTime<Utc>,
    /// Referrals moved to `rewarded`; exactly `referrals_count` of them.
    pub referral_ids: Vec<i64>,
    pub granted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    Granted { reward_id: i64 },
    /// A reward for this `(user, referrals_count, cycle)` already exists.
    AlreadyGranted,
    /// The subscription no longer matches the snapshot the plan was built on.
    SubscriptionChanged,
    SubscriptionMissing,
    /// Some of the planned referrals are no longer `validated`.
    ReferralsChanged,
}
