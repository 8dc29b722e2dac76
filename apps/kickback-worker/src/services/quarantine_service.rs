use chrono::{DateTime, Utc};
use kickback_db::models::referral::Referral;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::ports::ReferralStore;

/// Decides which referrals have sat out their quarantine.
#[derive(Clone)]
pub struct QuarantineService {
    referrals: Arc<dyn ReferralStore>,
}

impl QuarantineService {
    pub fn new(referrals: Arc<dyn ReferralStore>) -> Self {
        Self { referrals }
    }

    pub async fn release(&self, now: DateTime<Utc>) -> Result<u64> {
        let released = self.referrals.release_quarantined(now).await?;
        if released > 0 {
            info!("Released {} referrals from quarantine", released);
        }
        Ok(released)
    }

    /// Read-only; calling it again before anything changes returns the same set.
    pub async fn due_referrals(&self, now: DateTime<Utc>) -> Result<Vec<Referral>> {
        let due = self.referrals.due_for_validation(now).await?;
        debug!("{} referrals due for validation at {}", due.len(), now);
        Ok(due)
    }
}
