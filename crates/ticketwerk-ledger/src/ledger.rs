// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The ledger contract the delivery loop is written against.

use std::sync::Arc;
use std::time::Duration;

use ticketwerk_core::{
    AttemptToken, ErrorClass, Job, JobId, LedgerEntry, LifecycleState, Outcome, Result,
};

/// Durable record of every job's lifecycle.
///
/// Every method that changes state has returned only once the change is
/// on disk. Implementations are synchronous; each call is one short
/// transaction.
pub trait Ledger: Send + Sync {
    /// Record `job` as `Pending` the first time it is seen. Returns the
    /// current entry either way.
    fn observe(&self, job: &Job, payload_hash: &str) -> Result<LedgerEntry>;

    fn entry(&self, job_id: &JobId) -> Result<Option<LedgerEntry>>;

    /// True iff the job is `Delivered` or `Ambiguous`.
    fn is_settled(&self, job_id: &JobId) -> Result<bool>;

    /// Terminal outcome, if the job has one.
    fn outcome(&self, job_id: &JobId) -> Result<Option<Outcome>>;

    /// `Pending → Rendering`.
    fn mark_rendering(&self, job_id: &JobId) -> Result<()>;

    /// Durably move the job to `Printing` before any byte is written.
    ///
    /// Fails with `AlreadySettled` for `Delivered`/`Ambiguous` jobs and
    /// `AlreadyFailed` for `Failed` ones.
    fn begin_attempt(&self, job_id: &JobId) -> Result<AttemptToken>;

    /// `Printing → Delivered`. Idempotent for the same token.
    fn commit(&self, token: &AttemptToken) -> Result<()>;

    /// Record a failed attempt. Returns the new state: `Pending` while
    /// attempts remain, `Failed` once they are exhausted.
    fn fail(&self, token: &AttemptToken, error: &str, class: ErrorClass)
    -> Result<LifecycleState>;

    /// Permanent failure without a device attempt (e.g. a broken template).
    fn reject(&self, job_id: &JobId, error: &str) -> Result<()>;

    /// Move every job left in `Printing` to `Ambiguous` and every job left
    /// in `Rendering` back to `Pending`. Returns the jobs made ambiguous.
    fn reconcile_on_startup(&self) -> Result<Vec<JobId>>;

    /// Terminal entries whose outcome the backend has not yet accepted,
    /// oldest first.
    fn unreported(&self) -> Result<Vec<LedgerEntry>>;

    fn mark_reported(&self, job_id: &JobId) -> Result<()>;

    /// Operator override: make an `Ambiguous` job deliverable again.
    fn requeue(&self, job_id: &JobId) -> Result<()>;

    /// Delete `Delivered` and `Failed` entries the backend has acknowledged
    /// and that have not changed for `older_than`. `Ambiguous` entries stay
    /// until an operator resolves them. Returns the number removed.
    fn prune(&self, older_than: Duration) -> Result<usize>;

    fn stats(&self) -> Result<LedgerStats>;
}

impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    fn observe(&self, job: &Job, payload_hash: &str) -> Result<LedgerEntry> {
        (**self).observe(job, payload_hash)
    }

    fn entry(&self, job_id: &JobId) -> Result<Option<LedgerEntry>> {
        (**self).entry(job_id)
    }

    fn is_settled(&self, job_id: &JobId) -> Result<bool> {
        (**self).is_settled(job_id)
    }

    fn outcome(&self, job_id: &JobId) -> Result<Option<Outcome>> {
        (**self).outcome(job_id)
    }

    fn mark_rendering(&self, job_id: &JobId) -> Result<()> {
        (**self).mark_rendering(job_id)
    }

    fn begin_attempt(&self, job_id: &JobId) -> Result<AttemptToken> {
        (**self).begin_attempt(job_id)
    }

    fn commit(&self, token: &AttemptToken) -> Result<()> {
        (**self).commit(token)
    }

    fn fail(
        &self,
        token: &AttemptToken,
        error: &str,
        class: ErrorClass,
    ) -> Result<LifecycleState> {
        (**self).fail(token, error, class)
    }

    fn reject(&self, job_id: &JobId, error: &str) -> Result<()> {
        (**self).reject(job_id, error)
    }

    fn reconcile_on_startup(&self) -> Result<Vec<JobId>> {
        (**self).reconcile_on_startup()
    }

    fn unreported(&self) -> Result<Vec<LedgerEntry>> {
        (**self).unreported()
    }

    fn mark_reported(&self, job_id: &JobId) -> Result<()> {
        (**self).mark_reported(job_id)
    }

    fn requeue(&self, job_id: &JobId) -> Result<()> {
        (**self).requeue(job_id)
    }

    fn prune(&self, older_than: Duration) -> Result<usize> {
        (**self).prune(older_than)
    }

    fn stats(&self) -> Result<LedgerStats> {
        (**self).stats()
    }
}

/// Entry counts per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub pending: u64,
    pub rendering: u64,
    pub printing: u64,
    pub delivered: u64,
    pub failed: u64,
    pub ambiguous: u64,
    /// Terminal entries still waiting for backend acknowledgement.
    pub unreported: u64,
}

impl LedgerStats {
    pub fn total(&self) -> u64 {
        self.pending + self.rendering + self.printing + self.delivered + self.failed + self.ambiguous
    }

    pub(crate) fn add(&mut self, state: LifecycleState, count: u64) {
        let slot = match state {
            LifecycleState::Pending => &mut self.pending,
            LifecycleState::Rendering => &mut self.rendering,
            LifecycleState::Printing => &mut self.printing,
            LifecycleState::Delivered => &mut self.delivered,
            LifecycleState::Failed => &mut self.failed,
            LifecycleState::Ambiguous => &mut self.ambiguous,
        };
        *slot += count;
    }
}
