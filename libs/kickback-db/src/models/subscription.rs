use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::fmt;

/// Billing state as reported by the payment side. Anything the engine does
/// not act on is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Overdue,
    Pending,
    Cancelled,
    Expired,
    Other(String),
}

impl SubscriptionStatus {
    pub fn from_db(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "overdue" => SubscriptionStatus::Overdue,
            "pending" => SubscriptionStatus::Pending,
            "cancelled" => SubscriptionStatus::Cancelled,
            "expired" => SubscriptionStatus::Expired,
            other => SubscriptionStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Overdue => "overdue",
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Other(s) => s,
        }
    }

    /// A referred user counts only while actually paying.
    pub fn validates_referral(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    /// Reward days can be added to active and overdue subscriptions.
    pub fn is_extendable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Overdue)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: i64,
    pub status: SubscriptionStatus,
    pub next_due_date: DateTime<Utc>,
}

impl Subscription {
    /// New due date after adding `days`. Counts from whichever is later,
    /// the current due date or `now`, so the date never moves backwards.
    pub fn extended_due_date(&self, now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        self.next_due_date.max(now) + Duration::days(days)
    }
}

impl<'r> FromRow<'r, PgRow> for Subscription {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Subscription {
            user_id: row.try_get("user_id")?,
            status: SubscriptionStatus::from_db(&status),
            next_due_date: row.try_get("next_due_date")?,
        })
    }
}

/// Result of a conditional due-date update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended,
    /// The row changed since it was read (payment landed, status flipped).
    Conflict,
    NotFound,
}
