//! Mock verification engine for testing.
//!
//! Records refresh calls and lets tests inject failures and latency.
//! Refreshes return an `Ok` verdict but do not overwrite the cached
//! record, so a stale record stays stale across cycles.

use super::{TrustEngine, TrustError};
use async_trait::async_trait;
use hush_types::{IdentityId, TrustRecord, TrustStatus};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock verification engine.
#[derive(Debug, Default, Clone)]
pub struct MockTrustEngine {
    inner: Arc<Mutex<MockTrustInner>>,
}

#[derive(Debug, Default)]
struct MockTrustInner {
    order: Vec<IdentityId>,
    records: HashMap<IdentityId, TrustRecord>,
    failing: HashSet<IdentityId>,
    fail_next_identities: Option<String>,
    hang_identities: bool,
    identities_calls: usize,
    refresh_delay: Option<Duration>,
    refresh_calls: Vec<IdentityId>,
    in_flight: usize,
    max_in_flight: usize,
}

impl MockTrustEngine {
    /// Create an engine with no identities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity that has never been checked.
    pub fn add_identity(&self, id: IdentityId) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.order.contains(&id) {
            inner.order.push(id);
        }
    }

    /// Add an identity with a cached record.
    pub fn set_record(&self, record: TrustRecord) {
        self.add_identity(record.identity);
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(record.identity, record);
    }

    /// Make every refresh of `id` fail.
    pub fn fail_refresh(&self, id: IdentityId) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing.insert(id);
    }

    /// Cause the next identities() to fail with the given error.
    pub fn fail_next_identities(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_identities = Some(error.to_string());
    }

    /// Make identities() never return, ignoring cancellation.
    pub fn hang_identities(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.hang_identities = true;
    }

    /// Number of identities() calls so far.
    pub fn identities_calls(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.identities_calls
    }

    /// Delay every refresh by `delay`.
    pub fn set_refresh_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.refresh_delay = Some(delay);
    }

    /// Identities refreshed so far, in call order.
    pub fn refresh_calls(&self) -> Vec<IdentityId> {
        let inner = self.inner.lock().unwrap();
        inner.refresh_calls.clone()
    }

    /// Highest number of refreshes that were in flight at once.
    pub fn max_concurrent_refreshes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.max_in_flight
    }
}

#[async_trait]
impl TrustEngine for MockTrustEngine {
    async fn identities(&self) -> Result<Vec<IdentityId>, TrustError> {
        let hang = {
            let mut inner = self.inner.lock().unwrap();
            inner.identities_calls += 1;
            if let Some(error) = inner.fail_next_identities.take() {
                return Err(TrustError::Unavailable(error));
            }
            inner.hang_identities
        };
        if hang {
            std::future::pending::<()>().await;
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner.order.clone())
    }

    async fn cached(&self, id: &IdentityId) -> Result<Option<TrustRecord>, TrustError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.records.get(id).cloned())
    }

    async fn refresh(&self, id: &IdentityId) -> Result<TrustRecord, TrustError> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.refresh_calls.push(*id);
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            inner.refresh_delay
        };

        // Decrements even when the refresh future is dropped mid-delay.
        let _in_flight = InFlight(Arc::clone(&self.inner));

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock().unwrap();
        if inner.failing.contains(id) {
            return Err(TrustError::Engine("sigchain verify failed".into()));
        }
        let checked = inner
            .records
            .get(id)
            .map(|r| r.last_checked_at)
            .unwrap_or_default();
        Ok(TrustRecord {
            identity: *id,
            status: TrustStatus::Ok,
            last_checked_at: checked,
            last_success_at: Some(checked),
        })
    }
}

struct InFlight(Arc<Mutex<MockTrustInner>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.0.lock() {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
    }
}
