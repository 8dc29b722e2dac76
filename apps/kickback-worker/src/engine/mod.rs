//! One validation pass: release quarantine, decide due referrals, evaluate
//! every touched referrer, grant what is owed, then wait for notifications.
//!
//! The pass holds no state of its own. Everything is recomputed from the
//! store each time, so a crashed or overlapping run is repaired by the next.

use chrono::{DateTime, Utc};
use kickback_db::models::reward::REFERRALS_PER_REWARD;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};

use crate::config::EngineSettings;
use crate::ports::{Collaborators, ReferralStore};
use crate::services::notification_service::NotificationService;
use crate::services::quarantine_service::QuarantineService;
use crate::services::reward_service::{RewardDecision, RewardService};
use crate::services::validation_service::ValidationService;
use crate::summary::{RunStage, RunSummary};


#[derive(Clone)]
pub struct ReferralEngine {
    referrals: Arc<dyn ReferralStore>,
    quarantine: QuarantineService,
    validation: ValidationService,
    rewards: RewardService,
    notifications: NotificationService,
}

impl ReferralEngine {
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let Collaborators {
            referrals,
            subscriptions,
            rewards,
            notifier,
        } = collaborators;

        Self {
            quarantine: QuarantineService::new(referrals.clone()),
            validation: ValidationService::new(
                referrals.clone(),
                subscriptions.clone(),
                settings.oracle_timeout,
            ),
            rewards: RewardService::new(
                referrals.clone(),
                subscriptions,
                rewards,
                settings.reward_policy,
                settings.oracle_timeout,
            ),
            notifications: NotificationService::new(notifier, settings.notify_timeout, settings.reward_link),
            referrals,
        }
    }

    pub async fn run_validation_pass(&self, now: DateTime<Utc>) -> RunSummary {
        let mut summary = RunSummary::begin(now);
        let mut pending = JoinSet::new();

        self.run_stages(now, &mut summary, &mut pending).await;

        summary.notifications_failed = self.notifications.drain(pending).await;
        let summary = summary.finish(Utc::now());

        if summary.aborted {
            error!("Validation pass aborted: {}", summary);
        } else if summary.errors.is_empty() {
            info!("Validation pass complete: {}", summary);
        } else {
            warn!("Validation pass complete with errors: {}", summary);
        }
        summary
    }

    async fn run_stages(&self, now: DateTime<Utc>, summary: &mut RunSummary, pending: &mut JoinSet<bool>) {
        match self.quarantine.release(now).await {
            Ok(released) => summary.referrals_released = released,
            Err(e) if e.is_fatal() => return summary.abort(RunStage::Release, e.to_string()),
            Err(e) => {
                warn!("Quarantine release failed: {}", e);
                summary.record_error(RunStage::Release, None, e.to_string());
            }
        }

        let due = match self.quarantine.due_referrals(now).await {
            Ok(due) => due,
            Err(e) => return summary.abort(RunStage::Selection, e.to_string()),
        };

        let report = self.validation.validate_all(&due, now).await;
        summary.referrals_processed = report.processed;
        summary.referrals_validated = report.validated;
        summary.referrals_cancelled = report.cancelled;
        summary.referrals_skipped = report.skipped;
        for (referral_id, e) in &report.failures {
            summary.record_error(RunStage::Validation, Some(*referral_id), e.to_string());
        }
        if let Some(e) = report.fatal {
            return summary.abort(RunStage::Validation, e.to_string());
        }

        let referrers = match self.referrers_to_evaluate(report.referrers, summary).await {
            Some(referrers) => referrers,
            None => return,
        };

        for referrer_id in referrers {
            summary.referrers_evaluated += 1;
            match self.rewards.evaluate(referrer_id, now).await {
                Ok(RewardDecision::Granted(grant)) => {
                    summary.rewards_granted += 1;
                    self.notifications.dispatch(pending, &grant);
                }
                Ok(RewardDecision::Deferred(_)) => summary.rewards_deferred += 1,
                Ok(RewardDecision::Conflict(_)) => summary.reward_conflicts += 1,
                Ok(RewardDecision::BelowThreshold { .. }) | Ok(RewardDecision::AlreadyRewarded { .. }) => {}
                Err(e) if e.is_fatal() => return summary.abort(RunStage::Evaluation, e.to_string()),
                Err(e) => {
                    warn!("Reward evaluation failed for referrer {}: {}", referrer_id, e);
                    summary.record_error(RunStage::Evaluation, Some(referrer_id), e.to_string());
                }
            }
        }
    }

    /// Referrers touched in this pass plus any still holding a full batch
    /// from an earlier run (deferred grants, crashed runs).
    async fn referrers_to_evaluate(
        &self,
        touched: BTreeSet<i64>,
        summary: &mut RunSummary,
    ) -> Option<BTreeSet<i64>> {
        let mut referrers = touched;
        match self.referrals.referrers_with_validated(REFERRALS_PER_REWARD).await {
            Ok(backlog) => referrers.extend(backlog),
            Err(e) if e.is_fatal() => {
                summary.abort(RunStage::Evaluation, e.to_string());
                return None;
            }
            Err(e) => {
                warn!("Could not load referrers with pending rewards: {}", e);
                summary.record_error(RunStage::Evaluation, None, e.to_string());
            }
        }
        Some(referrers)
    }

    /// Runs a pass every `period` until the process is stopped. For hosts
    /// without an external scheduler.
    pub async fn watch(&self, period: Duration) {
        info!("Starting validation loop, every {}s", period.as_secs());
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let summary = self.run_validation_pass(Utc::now()).await;
            if summary.aborted {
                error!("Pass aborted, retrying on next tick");
            }
        }
    }
}
