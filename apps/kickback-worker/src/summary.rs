use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Release,
    Selection,
    Validation,
    Evaluation,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Release => "release",
            RunStage::Selection => "selection",
            RunStage::Validation => "validation",
            RunStage::Evaluation => "evaluation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    pub stage: RunStage,
    /// Referral id for validation errors, user id otherwise. Absent for
    /// run-wide failures.
    pub subject_id: Option<i64>,
    pub message: String,
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub referrals_released: u64,
    pub referrals_processed: u64,
    pub referrals_validated: u64,
    pub referrals_cancelled: u64,
    /// Left untouched: lookup failed, or another run decided them first.
    pub referrals_skipped: u64,
    pub referrers_evaluated: u64,
    pub rewards_granted: u64,
    pub rewards_deferred: u64,
    pub reward_conflicts: u64,
    pub notifications_failed: u64,
    pub errors: Vec<RunError>,
    pub aborted: bool,
}

impl RunSummary {
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            referrals_released: 0,
            referrals_processed: 0,
            referrals_validated: 0,
            referrals_cancelled: 0,
            referrals_skipped: 0,
            referrers_evaluated: 0,
            rewards_granted: 0,
            rewards_deferred: 0,
            reward_conflicts: 0,
            notifications_failed: 0,
            errors: Vec::new(),
            aborted: false,
        }
    }

    pub fn record_error(&mut self, stage: RunStage, subject_id: Option<i64>, message: impl Into<String>) {
        self.errors.push(RunError {
            stage,
            subject_id,
            message: message.into(),
        });
    }

    pub fn abort(&mut self, stage: RunStage, message: impl Into<String>) {
        self.record_error(stage, None, message);
        self.aborted = true;
    }

    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = Some(finished_at);
        self
    }

    pub fn is_clean(&self) -> bool {
        !self.aborted && self.errors.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} validated={} cancelled={} skipped={} referrers={} granted={} deferred={} conflicts={} errors={}{}",
            self.referrals_processed,
            self.referrals_validated,
            self.referrals_cancelled,
            self.referrals_skipped,
            self.referrers_evaluated,
            self.rewards_granted,
            self.rewards_deferred,
            self.reward_conflicts,
            self.errors.len(),
            if self.aborted { " (aborted)" } else { "" }
        )
    }
}
