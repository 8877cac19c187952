// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Delivery orchestrator: the control loop.
//
// Each tick flushes unacknowledged outcomes, fetches a batch and walks it
// strictly in order. A job is durably moved to `Printing` before any byte
// is written, so a crash mid-write is found on the next start and
// reported as ambiguous instead of being printed twice.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use ticketwerk_core::config::AgentConfig;
use ticketwerk_core::{
    CodePage, Job, JobId, LifecycleState, Outcome, PrinterHandle, RenderedTicket, Result,
    TicketwerkError,
};
use ticketwerk_device::TicketSink;
use ticketwerk_ledger::Ledger;
use ticketwerk_render::Renderer;
use ticketwerk_render::integrity::payload_hash;

use crate::retry::{RetryDecision, RetryPolicy, classify_error, decide};
use crate::source::{JobSource, PollStatus};

/// What happened to one job within a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Delivered,
    Failed,
    /// Already settled or failed earlier; re-acknowledged, not printed.
    Skipped,
    /// Left pending for a later tick.
    Deferred,
}

/// How the backend answered one acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acknowledgement {
    Accepted,
    /// Refused for good (unknown or cancelled job); not retried.
    Refused,
    /// Failed in a way worth retrying.
    Kept,
    /// The backend could not be reached at all.
    Unreachable,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub printer_attached: bool,
    pub fetched: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// Outcomes from earlier ticks acknowledged at the start of this one.
    pub flushed: usize,
}

impl TickReport {
    fn record(&mut self, disposition: JobDisposition) {
        match disposition {
            JobDisposition::Delivered => self.delivered += 1,
            JobDisposition::Failed => self.failed += 1,
            JobDisposition::Skipped => self.skipped += 1,
            JobDisposition::Deferred => self.deferred += 1,
        }
    }
}

/// Ties the job source, ledger, renderer and printer together.
pub struct Orchestrator<S, L, D> {
    source: S,
    ledger: L,
    device: D,
    renderer: Renderer,
    policy: RetryPolicy,
    poll_interval: Duration,
    batch_size: usize,
    retention: Option<Duration>,
}

impl<S, L, D> Orchestrator<S, L, D>
where
    S: JobSource,
    L: Ledger,
    D: TicketSink,
{
    pub fn new(source: S, ledger: L, device: D, config: &AgentConfig) -> Self {
        Self {
            source,
            ledger,
            device,
            renderer: Renderer::from_config(&config.printer),
            policy: RetryPolicy::from_config(&config.delivery),
            poll_interval: Duration::from_secs(config.polling.interval_secs),
            batch_size: config.polling.batch_size,
            retention: config.ledger.retention(),
        }
    }

    /// Run until `shutdown` fires or a fatal error occurs.
    ///
    /// A write in progress when shutdown is requested is allowed to finish;
    /// polling and backoff sleeps end immediately.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        self.reconcile().await?;
        info!(
            interval_s = self.poll_interval.as_secs(),
            batch = self.batch_size,
            "delivery loop started"
        );

        while !shutdown.is_cancelled() {
            match self.tick(&shutdown).await {
                Ok(report) if report.fetched > 0 || report.flushed > 0 => {
                    info!(?report, "tick complete");
                }
                Ok(report) => debug!(?report, "tick complete"),
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "delivery halted");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "tick aborted"),
            }
            if !pause(self.poll_interval, &shutdown).await {
                break;
            }
        }

        info!("delivery loop stopped");
        Ok(())
    }

    /// Startup recovery: jobs caught mid-write become `Ambiguous`, every
    /// unacknowledged outcome is reported and old settled entries are
    /// pruned. Returns the newly ambiguous jobs.
    pub async fn reconcile(&self) -> Result<Vec<JobId>> {
        let ambiguous = self.ledger.reconcile_on_startup()?;
        if !ambiguous.is_empty() {
            warn!(
                count = ambiguous.len(),
                "jobs interrupted mid-write need operator review"
            );
        }
        self.flush_outbox().await?;
        if let Some(retention) = self.retention {
            self.ledger.prune(retention)?;
        }
        Ok(ambiguous)
    }

    /// One poll-and-deliver cycle.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Result<TickReport> {
        let mut report = TickReport {
            flushed: self.flush_outbox().await?,
            ..TickReport::default()
        };

        let Some(printer) = self.device.current() else {
            debug!("no printer attached; not polling");
            return Ok(report);
        };
        report.printer_attached = true;

        let batch = self.source.fetch_batch(self.batch_size).await;
        match batch.status().clone() {
            PollStatus::Ok => {}
            PollStatus::Transient(detail) => {
                warn!(%detail, "poll failed; retrying next tick");
                return Ok(report);
            }
            PollStatus::AuthRejected(detail) => {
                return Err(TicketwerkError::CredentialRejected(detail));
            }
        }

        for job in batch {
            if shutdown.is_cancelled() {
                break;
            }
            report.fetched += 1;
            let disposition = self.process(&job, &printer, shutdown).await?;
            report.record(disposition);
            if disposition == JobDisposition::Deferred {
                break;
            }
        }
        Ok(report)
    }

    #[instrument(skip(self, job, printer, shutdown), fields(job_id = %job.job_id))]
    async fn process(
        &self,
        job: &Job,
        printer: &PrinterHandle,
        shutdown: &CancellationToken,
    ) -> Result<JobDisposition> {
        let job_id = &job.job_id;

        if let Some(entry) = self.ledger.entry(job_id)? {
            if let Some(outcome) = entry.state.outcome() {
                info!(state = %entry.state, "job already settled; re-acknowledging");
                self.report(job_id, outcome, entry.last_error.as_deref()).await?;
                return Ok(JobDisposition::Skipped);
            }
        }

        self.ledger.observe(job, &payload_hash(&job.payload))?;
        self.ledger.mark_rendering(job_id)?;

        let ticket = match self.render(job, printer.charset) {
            Ok(ticket) => ticket,
            Err(TicketwerkError::InvalidTemplate(detail)) => {
                let message = format!("invalid template: {detail}");
                self.ledger.reject(job_id, &message)?;
                self.report(job_id, Outcome::Failed, Some(&message)).await?;
                return Ok(JobDisposition::Failed);
            }
            Err(e) => return Err(e),
        };

        loop {
            let token = self.ledger.begin_attempt(job_id)?;
            let err = match self.device.write(&ticket).await {
                Ok(receipt) => {
                    self.ledger.commit(&token)?;
                    info!(
                        attempt = token.attempt_number,
                        bytes = receipt.bytes_written,
                        "job printed"
                    );
                    self.report(job_id, Outcome::Delivered, None).await?;
                    return Ok(JobDisposition::Delivered);
                }
                Err(err) => err,
            };

            let class = classify_error(&err);
            let detail = err.to_string();
            let state = self.ledger.fail(&token, &detail, class)?;

            match decide(&err, state, token.attempt_number, &self.policy) {
                RetryDecision::GiveUp(_) => {
                    self.report(job_id, Outcome::Failed, Some(&detail)).await?;
                    return Ok(JobDisposition::Failed);
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt = token.attempt_number,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "write failed; retrying"
                    );
                    if !pause(delay, shutdown).await {
                        return Ok(JobDisposition::Deferred);
                    }
                }
                RetryDecision::Defer => {
                    if let TicketwerkError::PermissionDenied { path } = &err {
                        warn!(
                            %path,
                            "cannot open printer; add the agent user to the device group (usually `lp`) and replug"
                        );
                    } else {
                        warn!(attempt = token.attempt_number, error = %err, "write failed; job deferred");
                    }
                    debug_assert_eq!(state, LifecycleState::Pending);
                    return Ok(JobDisposition::Deferred);
                }
            }
        }
    }

    fn render(&self, job: &Job, charset: CodePage) -> Result<RenderedTicket> {
        self.renderer.render(&job.payload, &job.template, charset)
    }

    /// Acknowledge an outcome. Accepted and refused outcomes leave the
    /// outbox; anything else stays for a later tick.
    async fn report(
        &self,
        job_id: &JobId,
        outcome: Outcome,
        detail: Option<&str>,
    ) -> Result<Acknowledgement> {
        match self.source.acknowledge(job_id, outcome, detail).await {
            Ok(()) => {
                self.ledger.mark_reported(job_id)?;
                Ok(Acknowledgement::Accepted)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) if e.is_rejection() => {
                warn!(
                    job_id = %job_id,
                    %outcome,
                    error = %e,
                    "backend refused acknowledgement; dropped from outbox"
                );
                self.ledger.mark_reported(job_id)?;
                Ok(Acknowledgement::Refused)
            }
            Err(e) => {
                warn!(job_id = %job_id, %outcome, error = %e, "acknowledgement failed; kept in outbox");
                Ok(match e {
                    TicketwerkError::Transport(_) => Acknowledgement::Unreachable,
                    _ => Acknowledgement::Kept,
                })
            }
        }
    }

    /// Report terminal outcomes the backend has not accepted yet, oldest
    /// first. Stops early only when the backend cannot be reached.
    async fn flush_outbox(&self) -> Result<usize> {
        let mut flushed = 0;
        for entry in self.ledger.unreported()? {
            let Some(outcome) = entry.state.outcome() else {
                continue;
            };
            match self
                .report(&entry.job_id, outcome, entry.last_error.as_deref())
                .await?
            {
                Acknowledgement::Accepted => flushed += 1,
                Acknowledgement::Refused | Acknowledgement::Kept => {}
                Acknowledgement::Unreachable => break,
            }
        }
        if flushed > 0 {
            debug!(flushed, "outbox flushed");
        }
        Ok(flushed)
    }
}

/// Sleep for `delay` unless shutdown comes first. Returns false on shutdown.
async fn pause(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{Value, json};
    use tokio::sync::{Notify, oneshot};

    use ticketwerk_core::{ConnectionState, UsbIdentity, WriteReceipt};
    use ticketwerk_ledger::JobLedger;

    use super::*;
    use crate::source::{Batch, decode_job};

    /// Scripted backend: hands out queued batches and records acks.
    #[derive(Default)]
    struct FakeSource {
        batches: Mutex<VecDeque<Batch>>,
        acks: Mutex<Vec<(String, Outcome)>>,
        fail_acks: Mutex<bool>,
        /// Jobs the backend no longer knows about.
        gone: Mutex<HashSet<String>>,
        /// Jobs whose acknowledgement hits a 503.
        unavailable: Mutex<HashSet<String>>,
    }

    impl FakeSource {
        fn push(&self, batch: Batch) {
            self.batches.lock().expect("lock").push_back(batch);
        }

        fn acks(&self) -> Vec<(String, Outcome)> {
            self.acks.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl JobSource for FakeSource {
        async fn fetch_batch(&self, _max_items: usize) -> Batch {
            self.batches
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(Batch::empty)
        }

        async fn acknowledge(
            &self,
            job_id: &JobId,
            outcome: Outcome,
            _detail: Option<&str>,
        ) -> Result<()> {
            if *self.fail_acks.lock().expect("lock") {
                return Err(TicketwerkError::Transport("backend down".into()));
            }
            if self.gone.lock().expect("lock").contains(&job_id.0) {
                return Err(TicketwerkError::Backend {
                    status: 404,
                    code: Some("JOB_NOT_FOUND".into()),
                    message: "no such job".into(),
                });
            }
            if self.unavailable.lock().expect("lock").contains(&job_id.0) {
                return Err(TicketwerkError::Backend {
                    status: 503,
                    code: None,
                    message: "HTTP 503 Service Unavailable".into(),
                });
            }
            self.acks
                .lock()
                .expect("lock")
                .push((job_id.0.clone(), outcome));
            Ok(())
        }
    }

    /// Printer whose write results are scripted per call.
    #[derive(Default)]
    struct FakePrinter {
        detached: Mutex<bool>,
        script: Mutex<VecDeque<Result<()>>>,
        printed: Mutex<Vec<Vec<u8>>>,
        writes: Mutex<usize>,
        /// When set, the next write blocks until the sender fires.
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        started: Notify,
    }

    impl FakePrinter {
        fn script(&self, results: Vec<Result<()>>) {
            self.script.lock().expect("lock").extend(results);
        }

        fn printed(&self) -> usize {
            self.printed.lock().expect("lock").len()
        }

        fn writes(&self) -> usize {
            *self.writes.lock().expect("lock")
        }
    }

    #[async_trait]
    impl TicketSink for FakePrinter {
        async fn write(&self, ticket: &RenderedTicket) -> Result<WriteReceipt> {
            *self.writes.lock().expect("lock") += 1;
            self.started.notify_one();
            let gate = self.gate.lock().expect("lock").take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            let next = self.script.lock().expect("lock").pop_front().unwrap_or(Ok(()));
            next?;
            self.printed.lock().expect("lock").push(ticket.bytes().to_vec());
            Ok(WriteReceipt {
                device_path: PathBuf::from("/dev/usb/lp0"),
                bytes_written: ticket.len() as u64,
            })
        }

        fn current(&self) -> Option<PrinterHandle> {
            if *self.detached.lock().expect("lock") {
                return None;
            }
            Some(PrinterHandle {
                device_path: PathBuf::from("/dev/usb/lp0"),
                connection_state: ConnectionState::Attached,
                charset: CodePage::Pc857,
                paper_width: 48,
                identity: UsbIdentity::default(),
                model: "Epson TM-T20".into(),
                attached_at: Utc::now(),
            })
        }
    }

    type TestOrchestrator = Orchestrator<Arc<FakeSource>, Arc<JobLedger>, Arc<FakePrinter>>;

    struct Harness {
        source: Arc<FakeSource>,
        ledger: Arc<JobLedger>,
        printer: Arc<FakePrinter>,
        orchestrator: TestOrchestrator,
    }

    fn config(max_attempts: u32) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.delivery.max_attempts = max_attempts;
        config.delivery.backoff_base_ms = 1;
        config.delivery.backoff_max_ms = 5;
        config.polling.interval_secs = 0;
        config
    }

    fn harness_with(ledger: Arc<JobLedger>, max_attempts: u32) -> Harness {
        let source = Arc::new(FakeSource::default());
        let printer = Arc::new(FakePrinter::default());
        let orchestrator = Orchestrator::new(
            Arc::clone(&source),
            Arc::clone(&ledger),
            Arc::clone(&printer),
            &config(max_attempts),
        );
        Harness {
            source,
            ledger,
            printer,
            orchestrator,
        }
    }

    fn harness(max_attempts: u32) -> Harness {
        let ledger = Arc::new(JobLedger::open_in_memory(max_attempts).expect("ledger"));
        harness_with(ledger, max_attempts)
    }

    fn template() -> Value {
        json!({
            "required": ["orderNumber"],
            "elements": [
                { "v": "#{{orderNumber}}", "a": "c", "b": true },
                { "t": "items" },
                { "t": "cut" }
            ]
        })
    }

    fn descriptor(id: &str) -> Value {
        json!({
            "jobGuid": id,
            "printData": {
                "orderNumber": id,
                "items": [{ "name": "Lahmacun", "quantity": 2, "price": 90.0 }]
            },
            "templateContent": template(),
            "templateVersion": 1
        })
    }

    fn state_of(ledger: &JobLedger, id: &str) -> LifecycleState {
        ledger
            .entry(&JobId::from(id))
            .expect("entry")
            .expect("known job")
            .state
    }

    fn timeout() -> Result<()> {
        Err(TicketwerkError::Timeout("30 s".into()))
    }

    #[tokio::test]
    async fn in_order_delivery_survives_two_timeouts() {
        let h = harness(5);
        h.source
            .push(Batch::new(vec![descriptor("A"), descriptor("B"), descriptor("C")]));
        // A prints, B times out twice then prints, C prints.
        h.printer.script(vec![Ok(()), timeout(), timeout(), Ok(()), Ok(())]);

        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.delivered, 3);
        assert_eq!(
            h.source.acks(),
            vec![
                ("A".into(), Outcome::Delivered),
                ("B".into(), Outcome::Delivered),
                ("C".into(), Outcome::Delivered),
            ]
        );
        let b = h.ledger.entry(&JobId::from("B")).expect("entry").expect("B");
        assert_eq!(b.state, LifecycleState::Delivered);
        assert_eq!(b.attempt_count, 2);
        assert_eq!(h.printer.printed(), 3);
    }

    #[tokio::test]
    async fn detach_mid_write_defers_job_and_holds_later_ones() {
        let h = harness(5);
        h.source.push(Batch::new(vec![descriptor("D"), descriptor("F")]));
        h.printer.script(vec![Err(TicketwerkError::DeviceLost {
            bytes_sent: 512,
            detail: "unplugged".into(),
        })]);

        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.deferred, 1);
        assert_eq!(report.fetched, 1);
        assert_eq!(state_of(&h.ledger, "D"), LifecycleState::Pending);
        let d = h.ledger.entry(&JobId::from("D")).expect("entry").expect("D");
        assert_eq!(d.attempt_count, 1);
        assert!(h.ledger.entry(&JobId::from("F")).expect("entry").is_none());
        assert!(h.source.acks().is_empty());

        // Printer back: both go out, D first.
        h.source.push(Batch::new(vec![descriptor("D"), descriptor("F")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(
            h.source.acks(),
            vec![("D".into(), Outcome::Delivered), ("F".into(), Outcome::Delivered)]
        );
    }

    #[tokio::test]
    async fn missing_price_fails_once_without_printing() {
        let h = harness(5);
        let mut broken = descriptor("E");
        broken["printData"]["items"] = json!([{ "name": "Ayran", "quantity": 1 }]);
        h.source.push(Batch::new(vec![broken, descriptor("G")]));

        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(h.printer.writes(), 1);
        assert_eq!(state_of(&h.ledger, "E"), LifecycleState::Failed);
        assert_eq!(
            h.source.acks(),
            vec![("E".into(), Outcome::Failed), ("G".into(), Outcome::Delivered)]
        );
    }

    #[tokio::test]
    async fn exhausted_timeouts_report_failed() {
        let h = harness(2);
        h.source.push(Batch::new(vec![descriptor("H")]));
        h.printer.script(vec![timeout(), timeout()]);

        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(state_of(&h.ledger, "H"), LifecycleState::Failed);
        assert_eq!(h.source.acks(), vec![("H".into(), Outcome::Failed)]);
        assert_eq!(h.printer.printed(), 0);
    }

    #[tokio::test]
    async fn refetched_delivered_job_is_acknowledged_not_printed() {
        let h = harness(5);
        h.source.push(Batch::new(vec![descriptor("A")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        h.source.push(Batch::new(vec![descriptor("A")]));
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.skipped, 1);
        assert_eq!(h.printer.writes(), 1);
        assert_eq!(
            h.source.acks(),
            vec![("A".into(), Outcome::Delivered), ("A".into(), Outcome::Delivered)]
        );
    }

    #[tokio::test]
    async fn crash_mid_write_is_reported_ambiguous_and_never_reprinted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jobs.db");
        {
            let ledger = JobLedger::open(&path, 5).expect("ledger");
            let job = recorded_job("K");
            ledger.observe(&job, "hash").expect("observe");
            ledger.begin_attempt(&job.job_id).expect("begin");
            // Process dies here.
        }

        let ledger = Arc::new(JobLedger::open(&path, 5).expect("reopen"));
        let h = harness_with(ledger, 5);
        let ambiguous = h.orchestrator.reconcile().await.expect("reconcile");
        assert_eq!(ambiguous, vec![JobId::from("K")]);
        assert_eq!(h.source.acks(), vec![("K".into(), Outcome::Ambiguous)]);

        h.source.push(Batch::new(vec![descriptor("K")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(h.printer.writes(), 0);
        assert_eq!(state_of(&h.ledger, "K"), LifecycleState::Ambiguous);
    }

    fn recorded_job(id: &str) -> Job {
        decode_job(&descriptor(id)).expect("job")
    }

    #[tokio::test]
    async fn failed_acks_stay_in_outbox_until_backend_returns() {
        let h = harness(5);
        *h.source.fail_acks.lock().expect("lock") = true;
        h.source.push(Batch::new(vec![descriptor("A")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(h.ledger.unreported().expect("outbox").len(), 1);

        *h.source.fail_acks.lock().expect("lock") = false;
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(report.flushed, 1);
        assert_eq!(h.source.acks(), vec![("A".into(), Outcome::Delivered)]);
        assert!(h.ledger.unreported().expect("outbox").is_empty());
    }

    #[tokio::test]
    async fn no_printer_means_no_poll() {
        let h = harness(5);
        *h.printer.detached.lock().expect("lock") = true;
        h.source.push(Batch::new(vec![descriptor("A")]));

        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert!(!report.printer_attached);
        assert_eq!(h.source.batches.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn rejected_credential_halts_the_loop() {
        let h = harness(5);
        h.source.push(Batch::auth_rejected("TOKEN_REVOKED"));

        let err = h
            .orchestrator
            .run(CancellationToken::new())
            .await
            .expect_err("halt");
        assert!(matches!(err, TicketwerkError::CredentialRejected(_)));
        assert_eq!(h.printer.writes(), 0);
    }

    #[tokio::test]
    async fn transient_poll_failure_is_not_an_error() {
        let h = harness(5);
        h.source.push(Batch::transient("connection refused"));
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test]
    async fn cancelled_run_stops_promptly() {
        let h = harness(5);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        h.orchestrator.run(shutdown).await.expect("clean stop");
        assert_eq!(h.printer.writes(), 0);
    }

    #[tokio::test]
    async fn shutdown_during_write_lets_it_finish_and_records_outcome() {
        let h = harness(5);
        let (release, gate) = oneshot::channel();
        *h.printer.gate.lock().expect("lock") = Some(gate);
        h.source.push(Batch::new(vec![descriptor("A"), descriptor("B")]));
        let shutdown = CancellationToken::new();

        let operator = async {
            h.printer.started.notified().await;
            shutdown.cancel();
            release.send(()).expect("release write");
        };
        let (result, ()) = tokio::join!(h.orchestrator.run(shutdown.clone()), operator);
        result.expect("clean stop");

        assert_eq!(state_of(&h.ledger, "A"), LifecycleState::Delivered);
        assert_eq!(h.source.acks(), vec![("A".into(), Outcome::Delivered)]);
        assert!(h.ledger.unreported().expect("outbox").is_empty());
        assert!(h.ledger.entry(&JobId::from("B")).expect("entry").is_none());
        assert_eq!(h.printer.writes(), 1);
    }

    #[tokio::test]
    async fn refused_acknowledgement_does_not_block_the_outbox() {
        let h = harness(5);
        h.source.gone.lock().expect("lock").insert("A".into());
        *h.source.fail_acks.lock().expect("lock") = true;
        h.source.push(Batch::new(vec![descriptor("A"), descriptor("B")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(h.ledger.unreported().expect("outbox").len(), 2);

        *h.source.fail_acks.lock().expect("lock") = false;
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.flushed, 1);
        assert_eq!(h.source.acks(), vec![("B".into(), Outcome::Delivered)]);
        assert!(h.ledger.unreported().expect("outbox").is_empty());
        assert_eq!(state_of(&h.ledger, "A"), LifecycleState::Delivered);

        // Nothing left to resend on later ticks.
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(report.flushed, 0);
        assert_eq!(h.source.acks().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_entry_stays_queued_without_holding_back_others() {
        let h = harness(5);
        h.source.unavailable.lock().expect("lock").insert("A".into());
        *h.source.fail_acks.lock().expect("lock") = true;
        h.source.push(Batch::new(vec![descriptor("A"), descriptor("B")]));
        h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        *h.source.fail_acks.lock().expect("lock") = false;
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");

        assert_eq!(report.flushed, 1);
        assert_eq!(h.source.acks(), vec![("B".into(), Outcome::Delivered)]);
        let queued: Vec<JobId> = h
            .ledger
            .unreported()
            .expect("outbox")
            .into_iter()
            .map(|entry| entry.job_id)
            .collect();
        assert_eq!(queued, vec![JobId::from("A")]);

        h.source.unavailable.lock().expect("lock").clear();
        let report = h.orchestrator.tick(&CancellationToken::new()).await.expect("tick");
        assert_eq!(report.flushed, 1);
        assert!(h.ledger.unreported().expect("outbox").is_empty());
    }
}
