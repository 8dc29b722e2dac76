//! In-memory stand-in for every port, with knobs for the failure modes the
//! engine has to survive. Each call yields once first so concurrent passes
//! interleave the way they would against a real database.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use kickback_db::models::notification::NewNotification;
use kickback_db::models::referral::{QUARANTINE_DAYS, Referral, ReferralStatus};
use kickback_db::models::reward::{GrantOutcome, GrantPlan, REWARD_TYPE_SUBSCRIPTION_EXTENSION, RewardRecord};
use kickback_db::models::subscription::{Subscription, SubscriptionStatus};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::ports::{Collaborators, Notifier, ReferralStore, RewardLedger, SubscriptionOracle};

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

#[derive(Default)]
struct State {
    referrals: BTreeMap<i64, Referral>,
    subscriptions: HashMap<i64, Subscription>,
    rewards: Vec<RewardRecord>,
    notifications: Vec<NewNotification>,
    failing_lookups: HashSet<i64>,
    stalled_lookups: HashSet<i64>,
    payments_before_grant: HashMap<i64, DateTime<Utc>>,
    unavailable: bool,
    writes_before_outage: Option<usize>,
    notifier_down: bool,
}

impl State {
    /// Applies a status change only where the referral lifecycle allows it.
    fn transition(&mut self, referral_id: i64, next: ReferralStatus) -> bool {
        match self.referrals.get_mut(&referral_id) {
            Some(referral) if referral.status.can_transition_to(next) => {
                referral.status = next;
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            referrals: self.clone(),
            subscriptions: self.clone(),
            rewards: self.clone(),
            notifier: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn check_available(&self) -> Result<()> {
        if self.lock().unavailable {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn take_write(&self) -> Result<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        if let Some(left) = state.writes_before_outage.as_mut() {
            if *left == 0 {
                state.unavailable = true;
                return Err(EngineError::Unavailable("connection reset".to_string()));
            }
            *left -= 1;
        }
        Ok(())
    }

    pub fn add_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        status: ReferralStatus,
        validation_deadline: DateTime<Utc>,
    ) -> i64 {
        let mut state = self.lock();
        let id = state.referrals.len() as i64 + 1;
        let validated_at = status
            .carries_validation_time()
            .then_some(validation_deadline);
        state.referrals.insert(
            id,
            Referral {
                id,
                referrer_id,
                referred_id,
                status,
                referred_at: validation_deadline - chrono::Duration::days(QUARANTINE_DAYS),
                validation_deadline,
                validated_at,
            },
        );
        id
    }

    /// A referral already validated at `validated_at`, with a fresh referred user.
    pub fn add_validated(&self, referrer_id: i64, validated_at: DateTime<Utc>) -> i64 {
        let referred_id = 1_000_000 + self.lock().referrals.len() as i64;
        let id = self.add_referral(referrer_id, referred_id, ReferralStatus::Validated, validated_at);
        self.lock().referrals.get_mut(&id).unwrap().validated_at = Some(validated_at);
        id
    }

    pub fn set_subscription(&self, user_id: i64, status: SubscriptionStatus, next_due_date: DateTime<Utc>) {
        self.lock().subscriptions.insert(
            user_id,
            Subscription {
                user_id,
                status,
                next_due_date,
            },
        );
    }

    pub fn fail_lookups_for(&self, user_id: i64) {
        self.lock().failing_lookups.insert(user_id);
    }

    pub fn restore_lookups_for(&self, user_id: i64) {
        self.lock().failing_lookups.remove(&user_id);
    }

    pub fn stall_lookups_for(&self, user_id: i64) {
        self.lock().stalled_lookups.insert(user_id);
    }

    /// Simulates a payment that moves the due date between the grant's read
    /// and its write.
    pub fn move_due_date_on_next_grant(&self, user_id: i64, next_due_date: DateTime<Utc>) {
        self.lock().payments_before_grant.insert(user_id, next_due_date);
    }

    /// Clearing the outage also drops any pending `outage_after_writes`.
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut state = self.lock();
        state.unavailable = unavailable;
        if !unavailable {
            state.writes_before_outage = None;
        }
    }

    /// Allow `writes` more status writes, then fail every call as unreachable.
    pub fn outage_after_writes(&self, writes: usize) {
        self.lock().writes_before_outage = Some(writes);
    }

    pub fn set_notifier_down(&self, down: bool) {
        self.lock().notifier_down = down;
    }

    pub fn referral(&self, id: i64) -> Referral {
        self.lock().referrals[&id].clone()
    }

    pub fn all_referrals(&self) -> Vec<Referral> {
        self.lock().referrals.values().cloned().collect()
    }

    pub fn count_with_status(&self, referrer_id: i64, status: ReferralStatus) -> usize {
        self.lock()
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.status == status)
            .count()
    }

    pub fn subscription_of(&self, user_id: i64) -> Subscription {
        self.lock().subscriptions[&user_id].clone()
    }

    pub fn rewards(&self) -> Vec<RewardRecord> {
        self.lock().rewards.clone()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        self.lock().notifications.clone()
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn release_quarantined(&self, now: DateTime<Utc>) -> Result<u64> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let mut state = self.lock();
        let elapsed: Vec<i64> = state
            .referrals
            .values()
            .filter(|r| r.status == ReferralStatus::PendingQuarantine && r.validation_deadline <= now)
            .map(|r| r.id)
            .collect();
        let mut released = 0;
        for id in elapsed {
            if state.transition(id, ReferralStatus::AwaitingValidation) {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn due_for_validation(&self, now: DateTime<Utc>) -> Result<Vec<Referral>> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let mut due: Vec<Referral> = self
            .lock()
            .referrals
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.validation_deadline, r.id));
        Ok(due)
    }

    async fn mark_validated(&self, referral_id: i64, at: DateTime<Utc>) -> Result<bool> {
        tokio::task::yield_now().await;
        self.take_write()?;
        let mut state = self.lock();
        if !state.transition(referral_id, ReferralStatus::Validated) {
            return Ok(false);
        }
        if let Some(referral) = state.referrals.get_mut(&referral_id) {
            referral.validated_at = Some(at);
        }
        Ok(true)
    }

    async fn mark_cancelled(&self, referral_id: i64) -> Result<bool> {
        tokio::task::yield_now().await;
        self.take_write()?;
        Ok(self.lock().transition(referral_id, ReferralStatus::Cancelled))
    }

    async fn count_validated(&self, referrer_id: i64) -> Result<i64> {
        tokio::task::yield_now().await;
        self.check_available()?;
        Ok(self.count_with_status(referrer_id, ReferralStatus::Validated) as i64)
    }

    async fn oldest_validated(&self, referrer_id: i64, limit: i64) -> Result<Vec<i64>> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let mut validated: Vec<(Option<DateTime<Utc>>, i64)> = self
            .lock()
            .referrals
            .values()
            .filter(|r| r.referrer_id == referrer_id && r.status == ReferralStatus::Validated)
            .map(|r| (r.validated_at, r.id))
            .collect();
        validated.sort();
        Ok(validated
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn referrers_with_validated(&self, threshold: i64) -> Result<Vec<i64>> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
        for referral in self.lock().referrals.values() {
            if referral.status == ReferralStatus::Validated {
                *counts.entry(referral.referrer_id).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(referrer, _)| referrer)
            .collect())
    }
}

#[async_trait]
impl SubscriptionOracle for MemoryStore {
    async fn subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        tokio::task::yield_now().await;
        let stalled = self.lock().stalled_lookups.contains(&user_id);
        if stalled {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.lock().failing_lookups.contains(&user_id) {
            return Err(EngineError::Oracle {
                user_id,
                message: "billing service returned 503".to_string(),
            });
        }
        self.check_available()?;
        Ok(self.lock().subscriptions.get(&user_id).cloned())
    }
}

#[async_trait]
impl RewardLedger for MemoryStore {
    async fn rewards_granted(&self, user_id: i64, referrals_count: i32) -> Result<i64> {
        tokio::task::yield_now().await;
        self.check_available()?;
        Ok(self
            .lock()
            .rewards
            .iter()
            .filter(|r| r.user_id == user_id && r.referrals_count == referrals_count)
            .count() as i64)
    }

    async fn reward_exists(&self, user_id: i64, referrals_count: i32, cycle: i32) -> Result<bool> {
        tokio::task::yield_now().await;
        self.check_available()?;
        Ok(self
            .lock()
            .rewards
            .iter()
            .any(|r| r.user_id == user_id && r.referrals_count == referrals_count && r.cycle == cycle))
    }

    // Mirrors the Postgres transaction: every check happens under one lock
    // and nothing is written unless all of them pass.
    async fn commit_grant(&self, plan: &GrantPlan) -> Result<GrantOutcome> {
        tokio::task::yield_now().await;
        self.check_available()?;
        let mut state = self.lock();

        if let Some(paid_until) = state.payments_before_grant.remove(&plan.user_id) {
            if let Some(sub) = state.subscriptions.get_mut(&plan.user_id) {
                sub.next_due_date = paid_until;
            }
        }

        if state.rewards.iter().any(|r| {
            r.user_id == plan.user_id && r.referrals_count == plan.referrals_count && r.cycle == plan.cycle
        }) {
            return Ok(GrantOutcome::AlreadyGranted);
        }

        let Some(sub) = state.subscriptions.get(&plan.user_id) else {
            return Ok(GrantOutcome::SubscriptionMissing);
        };
        if sub.next_due_date != plan.original_next_due_date
            || !sub.status.is_extendable()
            || plan.new_next_due_date <= sub.next_due_date
        {
            return Ok(GrantOutcome::SubscriptionChanged);
        }

        let consumable = plan.referral_ids.len() as i64 == i64::from(plan.referrals_count)
            && plan.referral_ids.iter().all(|id| {
                state
                    .referrals
                    .get(id)
                    .is_some_and(|r| {
                        r.referrer_id == plan.user_id && r.status.can_transition_to(ReferralStatus::Rewarded)
                    })
            });
        if !consumable {
            return Ok(GrantOutcome::ReferralsChanged);
        }

        let reward_id = state.rewards.len() as i64 + 1;
        state.rewards.push(RewardRecord {
            id: reward_id,
            user_id: plan.user_id,
            referrals_count: plan.referrals_count,
            reward_type: REWARD_TYPE_SUBSCRIPTION_EXTENSION.to_string(),
            days_added: plan.days_added,
            cycle: plan.cycle,
            original_next_due_date: plan.original_next_due_date,
            new_next_due_date: plan.new_next_due_date,
            granted_at: plan.granted_at,
        });
        if let Some(sub) = state.subscriptions.get_mut(&plan.user_id) {
            sub.next_due_date = plan.new_next_due_date;
        }
        for id in &plan.referral_ids {
            state.transition(*id, ReferralStatus::Rewarded);
        }

        Ok(GrantOutcome::Granted { reward_id })
    }
}

#[async_trait]
impl Notifier for MemoryStore {
    async fn notify(&self, notification: &NewNotification) -> Result<()> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        if state.notifier_down {
            return Err(EngineError::Notify("push gateway unreachable".to_string()));
        }
        state.notifications.push(notification.clone());
        Ok(())
    }
}
