use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use std::fmt;
use std::str::FromStr;

use super::UnknownStatus;

/// Days a referral sits in quarantine before it may be validated.
pub const QUARANTINE_DAYS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    PendingQuarantine,
    AwaitingValidation,
    Validated,
    Cancelled,
    Rewarded,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::PendingQuarantine => "pending_quarantine",
            ReferralStatus::AwaitingValidation => "awaiting_validation",
            ReferralStatus::Validated => "validated",
            ReferralStatus::Cancelled => "cancelled",
            ReferralStatus::Rewarded => "rewarded",
        }
    }

    /// Whether `validated_at` must be populated in this state.
    pub fn carries_validation_time(&self) -> bool {
        matches!(self, ReferralStatus::Validated | ReferralStatus::Rewarded)
    }

    /// Forward-only lifecycle. `rewarded` is reachable from `validated` alone.
    pub fn can_transition_to(&self, next: ReferralStatus) -> bool {
        use ReferralStatus::*;
        matches!(
            (self, next),
            (PendingQuarantine, AwaitingValidation)
                | (AwaitingValidation, Validated)
                | (AwaitingValidation, Cancelled)
                | (Validated, Rewarded)
        )
    }
}

impl fmt::Display for ReferralStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferralStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_quarantine" => Ok(ReferralStatus::PendingQuarantine),
            "awaiting_validation" => Ok(ReferralStatus::AwaitingValidation),
            "validated" => Ok(ReferralStatus::Validated),
            "cancelled" => Ok(ReferralStatus::Cancelled),
            "rewarded" => Ok(ReferralStatus::Rewarded),
            other => Err(UnknownStatus {
                kind: "referral",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referred_id: i64,
    pub status: ReferralStatus,
    pub referred_at: DateTime<Utc>,
    pub validation_deadline: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl Referral {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ReferralStatus::AwaitingValidation && self.validation_deadline <= now
    }
}

impl<'r> FromRow<'r, PgRow> for Referral {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let raw_status: String = row.try_get("status")?;
        let status = raw_status
            .parse::<ReferralStatus>()
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: Box::new(e),
            })?;

        Ok(Referral {
            id: row.try_get("id")?,
            referrer_id: row.try_get("referrer_id")?,
            referred_id: row.try_get("referred_id")?,
            status,
            referred_at: row.try_get("referred_at")?,
            validation_deadline: row.try_get("validation_deadline")?,
            validated_at: row.try_get("validated_at")?,
        })
    }
}
