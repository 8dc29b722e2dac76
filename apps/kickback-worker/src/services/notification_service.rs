use kickback_db::models::notification::NewNotification;
use kickback_db::models::reward::REWARD_DAYS;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::ports::Notifier;
use crate::services::reward_service::RewardGrant;

/// Reward notices, one task per send. The pass waits for them only at the
/// end. Failures are counted, never propagated.
#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
    link: Option<String>,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration, link: Option<String>) -> Self {
        Self {
            notifier,
            timeout,
            link,
        }
    }

    pub fn reward_notification(&self, grant: &RewardGrant) -> NewNotification {
        NewNotification {
            user_id: grant.user_id,
            title: "Referral reward unlocked".to_string(),
            message: format!(
                "{} of your referrals are now subscribers. We added {} days to your plan; \
                 your next payment is due on {}.",
                grant.referral_ids.len(),
                REWARD_DAYS,
                grant.new_next_due_date.format("%Y-%m-%d")
            ),
            link: self.link.clone(),
        }
    }

    pub fn dispatch(&self, pending: &mut JoinSet<bool>, grant: &RewardGrant) {
        let notification = self.reward_notification(grant);
        let notifier = self.notifier.clone();
        let timeout = self.timeout;

        pending.spawn(async move {
            let sent = match tokio::time::timeout(timeout, notifier.notify(&notification)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout {
                    operation: "notification",
                    after: timeout,
                }),
            };
            match sent {
                Ok(()) => {
                    info!("Notified user {} about reward", notification.user_id);
                    true
                }
                Err(e) => {
                    warn!("Failed to notify user {} about reward: {}", notification.user_id, e);
                    false
                }
            }
        });
    }

    /// Waits for outstanding sends and returns how many failed.
    pub async fn drain(&self, mut pending: JoinSet<bool>) -> u64 {
        let mut failed = 0;
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    warn!("Notification task panicked: {}", e);
                    failed += 1;
                }
            }
        }
        failed
    }
}
