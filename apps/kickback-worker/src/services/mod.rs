pub mod notification_service;
pub mod quarantine_service;
pub mod reward_service;
pub mod validation_service;

use kickback_db::models::subscription::Subscription;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::ports::SubscriptionOracle;

/// Subscription lookup bounded by `limit`, so one stuck call cannot stall
/// the whole pass.
pub(crate) async fn lookup_subscription(
    oracle: &dyn SubscriptionOracle,
    user_id: i64,
    limit: Duration,
) -> Result<Option<Subscription>> {
    match tokio::time::timeout(limit, oracle.subscription(user_id)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            operation: "subscription lookup",
            after: limit,
        }),
    }
}
