//! Cached trust state for identities.

use serde::{Deserialize, Serialize};

use crate::IdentityId;

/// Outcome of the last verification of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    /// Verification succeeded.
    Ok,
    /// Verification ran and failed.
    Failed,
    /// Verification has not produced a verdict.
    Unknown,
}

/// Locally cached result of verifying an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    /// The identity this record describes.
    pub identity: IdentityId,
    /// Result of the last check.
    pub status: TrustStatus,
    /// Unix seconds of the last check, successful or not.
    pub last_checked_at: u64,
    /// Unix seconds of the last successful check, if any.
    pub last_success_at: Option<u64>,
}

impl TrustRecord {
    /// Whether the last check succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == TrustStatus::Ok
    }
}
