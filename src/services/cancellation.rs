//! Cancellation registry for import jobs
//!
//! Provides cooperative cancellation with owner verification
//! (multi-tenant security) and RAII-based automatic cleanup via
//! `JobGuard`. Because the registry knows which company owns every
//! active job, it also enforces the one-import-per-tenant rule.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global cancellation registry singleton
pub static CANCELLATION: Lazy<CancellationRegistry> = Lazy::new(CancellationRegistry::default);

/// Internal entry tracking a job's cancellation token and its owner
struct JobEntry {
    token: CancellationToken,
    company_id: Uuid,
}

/// RAII guard that automatically removes the job from the registry when
/// dropped. Must be kept alive for the duration of job processing.
pub struct JobGuard {
    job_id: Uuid,
    registry: CancellationRegistry,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

/// Error type for cancel operations
#[derive(Debug, PartialEq, Eq)]
pub enum CancelError {
    /// Caller's company does not own this job
    NotOwner,
}

/// Thread-safe registry of active import jobs and their cancellation
/// tokens. All operations are O(n) at worst over the handful of
/// concurrently active jobs.
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

impl CancellationRegistry {
    /// Register a job under its owning company. Returns a `JobGuard`
    /// that must be held in scope during processing; dropping it
    /// removes the job from the registry.
    pub fn register(&self, job_id: Uuid, company_id: Uuid) -> JobGuard {
        let token = CancellationToken::new();
        self.jobs.lock().insert(job_id, JobEntry { token, company_id });
        JobGuard {
            job_id,
            registry: self.clone(),
        }
    }

    /// Cancel a job — ONLY if the caller's company owns it.
    ///
    /// Returns:
    /// - `Ok(true)`  — job found and cancelled
    /// - `Ok(false)` — job not found (already finished or never started)
    /// - `Err(NotOwner)` — job exists but belongs to another company
    pub fn cancel(&self, job_id: &Uuid, company_id: Uuid) -> Result<bool, CancelError> {
        let jobs = self.jobs.lock();
        match jobs.get(job_id) {
            Some(entry) => {
                if entry.company_id != company_id {
                    return Err(CancelError::NotOwner);
                }
                entry.token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pre-register a cancelled token for a job still in the queue.
    /// When the processor picks the job up and checks its token, it
    /// sees the cancellation and skips processing.
    pub fn pre_cancel(&self, job_id: Uuid, company_id: Uuid) {
        let token = CancellationToken::new();
        token.cancel();
        self.jobs.lock().insert(job_id, JobEntry { token, company_id });
    }

    /// Token for a registered job, cloned for the orchestrator to poll.
    pub fn token(&self, job_id: &Uuid) -> Option<CancellationToken> {
        self.jobs.lock().get(job_id).map(|e| e.token.clone())
    }

    /// Check if a job has been cancelled. Hot path inside processing
    /// loops — single HashMap lookup under the mutex.
    pub fn is_cancelled(&self, job_id: &Uuid) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map_or(false, |e| e.token.is_cancelled())
    }

    /// Whether the company already has a live (not cancelled) job.
    /// Exactly one import batch may be in flight per tenant.
    pub fn has_active_for_company(&self, company_id: Uuid) -> bool {
        self.jobs
            .lock()
            .values()
            .any(|e| e.company_id == company_id && !e.token.is_cancelled())
    }

    /// Remove a finished job from the registry.
    /// Called automatically by `JobGuard::drop`.
    pub fn remove(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    #[cfg(test)]
    fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: fresh registry per test (avoids global state interference)
    fn new_registry() -> CancellationRegistry {
        CancellationRegistry::default()
    }

    #[test]
    fn test_register_and_is_cancelled_false() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();
        let company_id = Uuid::new_v4();

        let _guard = reg.register(job_id, company_id);

        // Newly registered job must NOT be cancelled
        assert!(!reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_cancel_own_company_job() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();
        let company_id = Uuid::new_v4();

        let _guard = reg.register(job_id, company_id);

        let result = reg.cancel(&job_id, company_id);
        assert_eq!(result, Ok(true));
        assert!(reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_cancel_other_company_rejected() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();
        let owner_company = Uuid::new_v4();
        let other_company = Uuid::new_v4();

        let _guard = reg.register(job_id, owner_company);

        let result = reg.cancel(&job_id, other_company);
        assert_eq!(result, Err(CancelError::NotOwner));
        // Job must still be running (not cancelled)
        assert!(!reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_cancel_nonexistent_returns_false() {
        let reg = new_registry();
        let result = reg.cancel(&Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(result, Ok(false));
    }

    #[test]
    fn test_pre_cancel_is_immediately_cancelled() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        reg.pre_cancel(job_id, Uuid::new_v4());

        assert!(reg.is_cancelled(&job_id));
    }

    #[test]
    fn test_guard_drop_removes_from_registry() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();
        let company_id = Uuid::new_v4();

        {
            let _guard = reg.register(job_id, company_id);
            assert!(reg.contains(&job_id));
        } // _guard dropped here

        assert!(!reg.contains(&job_id));
    }

    #[test]
    fn test_token_is_shared_with_registry_entry() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();
        let company_id = Uuid::new_v4();

        let _guard = reg.register(job_id, company_id);
        let token = reg.token(&job_id).unwrap();
        assert!(!token.is_cancelled());

        reg.cancel(&job_id, company_id).unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_one_import_per_tenant_guard() {
        let reg = new_registry();
        let company_a = Uuid::new_v4();
        let company_b = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        assert!(!reg.has_active_for_company(company_a));

        let _guard = reg.register(job_id, company_a);
        assert!(reg.has_active_for_company(company_a));
        assert!(!reg.has_active_for_company(company_b));

        // A cancelled job no longer blocks new submissions.
        reg.cancel(&job_id, company_a).unwrap();
        assert!(!reg.has_active_for_company(company_a));
    }
}
