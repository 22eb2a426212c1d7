//! Trust revalidation.
//!
//! The identity verification engine is external; this module only decides
//! when cached verdicts are re-checked. [`TrustScheduler`] runs a check
//! cycle immediately on start and then on every tick until stopped.

mod mock;
mod scheduler;

pub use mock::MockTrustEngine;
pub use scheduler::{CycleReport, TrustScheduler};

use async_trait::async_trait;
use hush_types::{IdentityId, TrustRecord};
use thiserror::Error;

/// Errors from the verification engine.
#[derive(Debug, Error)]
pub enum TrustError {
    /// Verification could not complete.
    #[error("verification failed: {0}")]
    Engine(String),

    /// The engine's backing data is not available.
    #[error("trust data unavailable: {0}")]
    Unavailable(String),
}

/// External identity verification engine.
#[async_trait]
pub trait TrustEngine: Send + Sync {
    /// Every identity with a locally known sigchain.
    async fn identities(&self) -> Result<Vec<IdentityId>, TrustError>;

    /// Last stored verdict for an identity, if it was ever checked.
    async fn cached(&self, id: &IdentityId) -> Result<Option<TrustRecord>, TrustError>;

    /// Re-verify an identity and store the new verdict.
    async fn refresh(&self, id: &IdentityId) -> Result<TrustRecord, TrustError>;
}

/// Engine that knows no identities.
///
/// Used when the daemon runs without a verification backend; every cycle
/// is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrustEngine;

#[async_trait]
impl TrustEngine for NullTrustEngine {
    async fn identities(&self) -> Result<Vec<IdentityId>, TrustError> {
        Ok(Vec::new())
    }

    async fn cached(&self, _id: &IdentityId) -> Result<Option<TrustRecord>, TrustError> {
        Ok(None)
    }

    async fn refresh(&self, id: &IdentityId) -> Result<TrustRecord, TrustError> {
        Err(TrustError::Unavailable(format!("no verification backend for {}", id)))
    }
}
