pub mod notification;
pub mod referral;
pub mod reward;
pub mod subscription;

use thiserror::Error;

/// A status column held a value this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}
