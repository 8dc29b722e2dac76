use chrono::{DateTime, Utc};
use kickback_db::models::referral::{Referral, ReferralStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::ports::{ReferralStore, SubscriptionOracle};
use crate::services::lookup_subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Validated,
    Cancelled,
    /// Another run moved the referral first; nothing was written.
    AlreadyDecided,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub processed: u64,
    pub validated: u64,
    pub cancelled: u64,
    pub skipped: u64,
    /// Referrers with at least one referral validated in this pass.
    pub referrers: BTreeSet<i64>,
    pub failures: Vec<(i64, EngineError)>,
    /// Set when the store went away; the remaining referrals were not tried.
    pub fatal: Option<EngineError>,
}

#[derive(Clone)]
pub struct ValidationService {
    referrals: Arc<dyn ReferralStore>,
    subscriptions: Arc<dyn SubscriptionOracle>,
    lookup_timeout: Duration,
}

impl ValidationService {
    pub fn new(
        referrals: Arc<dyn ReferralStore>,
        subscriptions: Arc<dyn SubscriptionOracle>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            referrals,
            subscriptions,
            lookup_timeout,
        }
    }

    /// One-shot decision for a due referral: `validated` if the referred user
    /// is on an active subscription, `cancelled` otherwise. On error nothing
    /// is written and the referral stays `awaiting_validation`.
    pub async fn validate(&self, referral: &Referral, now: DateTime<Utc>) -> Result<Verdict> {
        if !referral.status.can_transition_to(ReferralStatus::Validated) {
            debug!("Referral {} is {}, nothing to decide", referral.id, referral.status);
            return Ok(Verdict::AlreadyDecided);
        }

        let subscription =
            lookup_subscription(self.subscriptions.as_ref(), referral.referred_id, self.lookup_timeout).await?;

        let active = subscription
            .as_ref()
            .is_some_and(|s| s.status.validates_referral());

        let applied = if active {
            self.referrals.mark_validated(referral.id, now).await?
        } else {
            self.referrals.mark_cancelled(referral.id).await?
        };

        if !applied {
            debug!("Referral {} was decided by another run", referral.id);
            return Ok(Verdict::AlreadyDecided);
        }

        if active {
            info!("Referral {} validated (referrer {})", referral.id, referral.referrer_id);
            Ok(Verdict::Validated)
        } else {
            info!(
                "Referral {} cancelled: referred user {} is {}",
                referral.id,
                referral.referred_id,
                subscription
                    .map(|s| s.status.to_string())
                    .unwrap_or_else(|| "without subscription".to_string())
            );
            Ok(Verdict::Cancelled)
        }
    }

    pub async fn validate_all(&self, due: &[Referral], now: DateTime<Utc>) -> ValidationReport {
        let mut report = ValidationReport::default();

        for referral in due {
            report.processed += 1;
            match self.validate(referral, now).await {
                Ok(Verdict::Validated) => {
                    report.validated += 1;
                    report.referrers.insert(referral.referrer_id);
                }
                Ok(Verdict::Cancelled) => report.cancelled += 1,
                Ok(Verdict::AlreadyDecided) => report.skipped += 1,
                Err(e) if e.is_fatal() => {
                    report.skipped += 1;
                    report.fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!("Skipping referral {} until next run: {}", referral.id, e);
                    report.skipped += 1;
                    report.failures.push((referral.id, e));
                }
            }
        }

        report
    }
}
