//! Migration execution.

use crate::client::OrchestratorApi;
use crate::error::SwarmwatchError;
use crate::resilience::{with_timeout, RetryConfig, RetryExecutor};
use crate::types::{PlacementChange, Revision, ServiceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of a successful apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The spec was written.
    Updated,
    /// The live spec already had the desired constraints. Nothing was written.
    AlreadyApplied,
}

/// Why a change could not be applied.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("service {service_id} changed since it was planned (expected revision {expected}): {detail}")]
    RevisionConflict {
        service_id: ServiceId,
        expected: Revision,
        detail: String,
    },

    #[error("service {0} no longer exists")]
    ServiceVanished(ServiceId),

    #[error("apply failed after {attempts} attempt(s): {source}")]
    ApplyFailed {
        attempts: u32,
        #[source]
        source: SwarmwatchError,
    },
}

/// Internal result of one attempt, before mapping to [`ApplyError`].
enum Attempt {
    Done(ApplyOutcome),
    Conflict(String),
}

/// Applies placement changes to the orchestrator.
///
/// Each apply re-reads the live spec first, so re-running a change that already
/// landed is a no-op. Updates carry the revision the change was planned against
/// and are rejected by the orchestrator if anyone else wrote in between. Applies to
/// the same service are serialised; different services run in parallel.
pub struct MigrationExecutor {
    api: Arc<dyn OrchestratorApi>,
    retry: RetryExecutor,
    call_timeout: Duration,
    locks: Mutex<HashMap<ServiceId, Arc<Mutex<()>>>>,
}

impl MigrationExecutor {
    pub fn new(api: Arc<dyn OrchestratorApi>, retry: RetryConfig, call_timeout: Duration) -> Self {
        Self {
            api,
            retry: RetryExecutor::new(retry),
            call_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Apply one change, retrying transient failures.
    pub async fn apply(&self, change: &PlacementChange) -> Result<ApplyOutcome, ApplyError> {
        let lock = self.lock_for(&change.service_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_locked(change).await
        };
        self.release(&change.service_id, lock).await;
        result
    }

    async fn apply_locked(&self, change: &PlacementChange) -> Result<ApplyOutcome, ApplyError> {
        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .execute(|| {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.attempt(change)
            })
            .await;
        let attempts = attempts.load(Ordering::Relaxed);

        match result {
            Ok(Attempt::Done(outcome)) => {
                debug!(
                    service_id = %change.service_id,
                    attempts,
                    outcome = ?outcome,
                    "Placement change applied"
                );
                Ok(outcome)
            }
            Ok(Attempt::Conflict(detail)) | Err(SwarmwatchError::Conflict(detail)) => {
                Err(ApplyError::RevisionConflict {
                    service_id: change.service_id.clone(),
                    expected: change.expected_revision,
                    detail,
                })
            }
            Err(SwarmwatchError::NotFound(_)) => {
                Err(ApplyError::ServiceVanished(change.service_id.clone()))
            }
            Err(source) => {
                warn!(
                    service_id = %change.service_id,
                    attempts,
                    error = %source,
                    "Placement change failed"
                );
                Err(ApplyError::ApplyFailed { attempts, source })
            }
        }
    }

    async fn attempt(&self, change: &PlacementChange) -> crate::error::Result<Attempt> {
        let mut live = with_timeout(self.call_timeout, || {
            self.api.inspect_service(&change.service_id)
        })
        .await?;

        // Covers both a re-run and an earlier attempt whose response was lost.
        if change.is_satisfied_by(&live.constraints()) {
            return Ok(Attempt::Done(ApplyOutcome::AlreadyApplied));
        }

        if live.revision != change.expected_revision {
            return Ok(Attempt::Conflict(format!("live revision is {}", live.revision)));
        }

        live.set_constraints(&change.desired_constraints);
        with_timeout(self.call_timeout, || {
            self.api
                .update_service(&change.service_id, change.expected_revision, &live.spec)
        })
        .await?;

        Ok(Attempt::Done(ApplyOutcome::Updated))
    }

    async fn lock_for(&self, service_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(service_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry unless another apply is waiting on it.
    async fn release(&self, service_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the table, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(service_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}
