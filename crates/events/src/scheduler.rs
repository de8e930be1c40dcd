//! Delivery queue and scheduler.
//!
//! [`DeliveryScheduler`] owns the due set (a min-heap keyed by due time,
//! delivery id as tiebreak) and is the single writer of all scheduling
//! state: new arrivals come in over an mpsc handle, worker outcomes come
//! back over a second channel, and every ledger write happens inside the
//! scheduler task. Workers only perform the HTTP call.
//!
//! Guarantees:
//!
//! - never two concurrent attempts for the same delivery;
//! - backoff per the configured [`RetryPolicy`], finalizing as `failed`
//!   once the attempt budget is exhausted;
//! - a failed ledger write leaves the in-memory bookkeeping untouched (the
//!   attempt is treated as not-yet-committed and retried shortly);
//! - on shutdown, in-flight attempts drain to the ledger while queued
//!   entries that never started are left as they are.
//!
//! Scheduling runs on the tokio clock (`tokio::time::Instant`); chrono
//! timestamps appear only in ledger records.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chatgate_core::types::{DbId, Timestamp};
use chatgate_core::RetryPolicy;
use chatgate_db::models::delivery::{status, WebhookDeliveryRow};
use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ledger::{AttemptRecord, DeliveryLedger, LedgerError};
use crate::transport::{AttemptResult, DeliveryTransport};

/// How long to wait before re-running an attempt whose ledger write
/// failed.
const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How long after cancellation to keep draining in-flight outcomes. Must
/// exceed the per-attempt HTTP timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// ScheduledDelivery
// ---------------------------------------------------------------------------

/// The slice of a delivery row the scheduler needs to run attempts.
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    pub id: DbId,
    pub webhook_url: String,
    pub payload: serde_json::Value,
    /// Attempts already made.
    pub retry_count: i32,
    pub due_at: Timestamp,
}

impl ScheduledDelivery {
    /// Extract scheduling state from a ledger row. A row without
    /// `next_retry_at` would be terminal; `list_pending` never returns
    /// one, and a fresh enqueue is due immediately.
    pub fn from_row(row: &WebhookDeliveryRow) -> Self {
        Self {
            id: row.id,
            webhook_url: row.webhook_url.clone(),
            payload: row.payload.clone(),
            retry_count: row.retry_count,
            due_at: row.next_retry_at.unwrap_or_else(Utc::now),
        }
    }

    /// Map the wall-clock due time onto the runtime clock. Past-due
    /// deliveries (e.g. rehydrated after a crash) become due now.
    fn due_instant(&self) -> Instant {
        let wait = (self.due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Instant::now() + wait
    }
}

// ---------------------------------------------------------------------------
// SchedulerHandle
// ---------------------------------------------------------------------------

/// Cheap handle for enqueueing deliveries into a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<ScheduledDelivery>,
}

impl SchedulerHandle {
    /// Hand a delivery to the scheduler. Wakes the scheduling loop if the
    /// new entry is due earlier than anything queued.
    pub fn enqueue(&self, delivery: ScheduledDelivery) {
        // A send error means the scheduler has shut down; the delivery
        // stays `pending` in the ledger and is rehydrated on next start.
        if self.tx.send(delivery).is_err() {
            tracing::warn!("Scheduler is gone; delivery will be picked up on restart");
        }
    }

    /// A handle wired to a bare channel, for unit tests that assert on
    /// what gets enqueued without running a scheduler loop.
    #[cfg(test)]
    pub(crate) fn for_tests() -> (Self, mpsc::UnboundedReceiver<ScheduledDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

// ---------------------------------------------------------------------------
// DeliveryScheduler
// ---------------------------------------------------------------------------

/// Outcome report sent back from a worker task.
struct WorkerOutcome {
    id: DbId,
    result: AttemptResult,
}

/// A tracked delivery plus its position on the runtime clock.
struct Job {
    delivery: ScheduledDelivery,
    due: Instant,
}

/// The due-set scheduler and its bounded worker pool.
pub struct DeliveryScheduler {
    ledger: Arc<dyn DeliveryLedger>,
    transport: Arc<dyn DeliveryTransport>,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,

    /// Min-heap of `(due, id)`; id ascending breaks ties for determinism.
    due: BinaryHeap<Reverse<(Instant, DbId)>>,
    /// Scheduling state per known delivery.
    jobs: HashMap<DbId, Job>,
    /// Deliveries currently handed to a worker.
    in_flight: HashSet<DbId>,

    cmd_rx: mpsc::UnboundedReceiver<ScheduledDelivery>,
    outcome_tx: mpsc::UnboundedSender<WorkerOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<WorkerOutcome>,
}

impl DeliveryScheduler {
    /// Create a scheduler and the handle used to enqueue into it.
    ///
    /// `worker_count` bounds concurrent HTTP attempts; a due delivery with
    /// no free worker slot waits, which is backpressure rather than an
    /// error.
    pub fn new(
        ledger: Arc<dyn DeliveryLedger>,
        transport: Arc<dyn DeliveryTransport>,
        policy: RetryPolicy,
        worker_count: usize,
    ) -> (Self, SchedulerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            ledger,
            transport,
            policy,
            workers: Arc::new(Semaphore::new(worker_count)),
            due: BinaryHeap::new(),
            jobs: HashMap::new(),
            in_flight: HashSet::new(),
            cmd_rx,
            outcome_tx,
            outcome_rx,
        };
        (scheduler, SchedulerHandle { tx: cmd_tx })
    }

    /// Reload all `pending` deliveries from the ledger into the due set.
    ///
    /// Called once before [`run`](Self::run); past-due rows become
    /// immediately eligible. Returns how many were rehydrated.
    pub async fn rehydrate(&mut self) -> Result<usize, LedgerError> {
        let rows = self.ledger.list_pending().await?;
        let count = rows.len();
        for row in &rows {
            self.insert(ScheduledDelivery::from_row(row));
        }
        if count > 0 {
            tracing::info!(count, "Rehydrated pending webhook deliveries");
        }
        Ok(count)
    }

    /// Run the scheduling loop until cancelled, then drain in-flight
    /// attempts.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            max_attempts = self.policy.max_attempts(),
            "Delivery scheduler started"
        );

        loop {
            self.dispatch_due();

            let wake = self.next_wake();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Delivery scheduler cancelled");
                    break;
                }
                Some(delivery) = self.cmd_rx.recv() => {
                    self.insert(delivery);
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }
                _ = Self::sleep_until(wake) => {}
            }
        }

        self.drain().await;
    }

    /// Add a delivery to the due set, ignoring duplicates of a delivery
    /// the scheduler already tracks.
    fn insert(&mut self, delivery: ScheduledDelivery) {
        if self.jobs.contains_key(&delivery.id) {
            tracing::warn!(
                delivery_id = delivery.id,
                "Delivery already scheduled, ignoring"
            );
            return;
        }
        let due = delivery.due_instant();
        self.due.push(Reverse((due, delivery.id)));
        self.jobs.insert(delivery.id, Job { delivery, due });
    }

    /// Submit every due delivery to the worker pool.
    ///
    /// A delivery is due when its scheduled instant has passed and it is
    /// not already in flight; marking it in flight here guarantees a
    /// delivery is never handed to two workers concurrently.
    fn dispatch_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, id))) = self.due.peek().copied() {
            if at > now {
                break;
            }
            self.due.pop();

            // Stale heap entries: the job finished or was rescheduled.
            let Some(job) = self.jobs.get(&id) else { continue };
            if self.in_flight.contains(&id) || job.due != at {
                continue;
            }

            self.in_flight.insert(id);
            self.spawn_attempt(job.delivery.clone());
        }
    }

    /// Spawn one worker attempt, gated by the pool semaphore.
    fn spawn_attempt(&self, job: ScheduledDelivery) {
        let transport = Arc::clone(&self.transport);
        let workers = Arc::clone(&self.workers);
        let outcome_tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            // Waiting here is pool backpressure. If the semaphore is
            // closed the scheduler is gone and the attempt never starts.
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };

            tracing::debug!(
                delivery_id = job.id,
                url = %job.webhook_url,
                attempt = job.retry_count + 1,
                "Posting webhook delivery"
            );
            let result = transport.post(&job.webhook_url, &job.payload).await;

            // The receiver only disappears after the drain grace expires;
            // an unreported outcome is then indistinguishable from a crash
            // and resolved by rehydration.
            let _ = outcome_tx.send(WorkerOutcome { id: job.id, result });
        });
    }

    /// Apply a worker outcome: write the ledger, then update the due set.
    ///
    /// Serialized through the scheduler task so `retry_count`/`status`
    /// stay monotonic under concurrent workers.
    async fn handle_outcome(&mut self, outcome: WorkerOutcome) {
        let WorkerOutcome { id, result } = outcome;

        let Some(job) = self.jobs.get(&id) else {
            tracing::warn!(delivery_id = id, "Outcome for unknown delivery, dropping");
            self.in_flight.remove(&id);
            return;
        };

        let new_count = job.delivery.retry_count + 1;
        let response_status = result.response_status.map(i32::from);

        let (record, retry_in) = if result.success {
            (
                AttemptRecord {
                    status: status::DELIVERED,
                    response_status,
                    response_body: result.response_body,
                    retry_count: new_count,
                    next_retry_at: None,
                },
                None,
            )
        } else {
            match self.policy.delay_after(new_count as u32) {
                Some(delay) => {
                    let next_at = Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_else(|_| {
                            chrono::Duration::zero()
                        });
                    (
                        AttemptRecord {
                            status: status::PENDING,
                            response_status,
                            response_body: result.response_body,
                            retry_count: new_count,
                            next_retry_at: Some(next_at),
                        },
                        Some(delay),
                    )
                }
                None => (
                    AttemptRecord {
                        status: status::FAILED,
                        response_status,
                        response_body: result.response_body,
                        retry_count: new_count,
                        next_retry_at: None,
                    },
                    None,
                ),
            }
        };

        if let Err(e) = self.ledger.record_attempt(id, record.clone()).await {
            // Not-yet-committed: keep the pre-attempt bookkeeping and run
            // the whole attempt again shortly.
            tracing::error!(
                delivery_id = id,
                error = %e,
                "Ledger write failed, re-queueing attempt"
            );
            self.in_flight.remove(&id);
            self.reschedule(id, Instant::now() + STORAGE_RETRY_DELAY);
            return;
        }

        self.in_flight.remove(&id);

        match record.status {
            status::DELIVERED => {
                tracing::info!(delivery_id = id, attempts = new_count, "Webhook delivered");
                self.jobs.remove(&id);
            }
            status::FAILED => {
                tracing::warn!(
                    delivery_id = id,
                    attempts = new_count,
                    response_status = record.response_status,
                    "Webhook delivery permanently failed"
                );
                self.jobs.remove(&id);
            }
            _ => {
                let delay = retry_in.expect("pending record always carries a retry delay");
                if let Some(job) = self.jobs.get_mut(&id) {
                    job.delivery.retry_count = new_count;
                    if let Some(next_at) = record.next_retry_at {
                        job.delivery.due_at = next_at;
                    }
                }
                tracing::debug!(
                    delivery_id = id,
                    retry_count = new_count,
                    retry_in_secs = delay.as_secs(),
                    "Webhook attempt failed, retry scheduled"
                );
                self.reschedule(id, Instant::now() + delay);
            }
        }
    }

    /// Move a tracked delivery to a new due instant.
    fn reschedule(&mut self, id: DbId, due: Instant) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.due = due;
            self.due.push(Reverse((due, id)));
        }
    }

    /// Record outcomes of attempts that were in flight when the scheduler
    /// was cancelled. Queued entries that never started stay `pending` in
    /// the ledger and are rehydrated on restart.
    async fn drain(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        tracing::info!(
            in_flight = self.in_flight.len(),
            "Draining in-flight webhook attempts"
        );

        let deadline = Instant::now() + DRAIN_GRACE;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.outcome_rx.recv()).await {
                Ok(Some(outcome)) => self.handle_outcome(outcome).await,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        abandoned = self.in_flight.len(),
                        "Drain grace expired with attempts still in flight"
                    );
                    break;
                }
            }
        }
    }

    /// The earliest queued due instant; `None` when the due set is empty
    /// (sleep until a message arrives).
    fn next_wake(&self) -> Option<Instant> {
        self.due.peek().map(|Reverse((at, _))| *at)
    }

    async fn sleep_until(wake: Option<Instant>) {
        match wake {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryLedger, ScriptedTransport};
    use chatgate_db::models::delivery::NewDelivery;

    fn pending_delivery(ledger: &MemoryLedger, instance_id: DbId) -> WebhookDeliveryRow {
        ledger.create_sync(NewDelivery {
            instance_id,
            event_type: "message".into(),
            payload: serde_json::json!({"event": "message"}),
            webhook_url: "https://example.com/hook".into(),
            next_retry_at: Utc::now(),
        })
    }

    fn scheduler_with(
        ledger: &Arc<MemoryLedger>,
        transport: ScriptedTransport,
    ) -> (DeliveryScheduler, SchedulerHandle) {
        DeliveryScheduler::new(
            Arc::clone(ledger) as Arc<dyn DeliveryLedger>,
            Arc::new(transport),
            RetryPolicy::default(),
            4,
        )
    }

    /// Poll until `condition` holds. Under the paused test clock the
    /// 30-second probe interval fast-forwards through backoff waits.
    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(60 * 60 * 48), async {
            while !condition() {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn successful_attempt_delivers_and_halts() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_succeed(200);
        let row = pending_delivery(&ledger, 1);

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        handle.enqueue(ScheduledDelivery::from_row(&row));
        wait_for(|| ledger.get(row.id).unwrap().status == status::DELIVERED).await;

        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.response_status, Some(200));
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_retry_at, None);

        // No further attempts happen once delivered.
        tokio::time::sleep(Duration::from_secs(60 * 60 * 24)).await;
        assert_eq!(transport.attempt_count(), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_follow_backoff_then_finalize() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_fail(500);
        let row = pending_delivery(&ledger, 1);

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        handle.enqueue(ScheduledDelivery::from_row(&row));
        wait_for(|| ledger.get(row.id).unwrap().status == status::FAILED).await;

        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.retry_count, 5);
        assert_eq!(stored.next_retry_at, None);
        assert_eq!(stored.response_status, Some(500));

        // A sixth attempt must never occur.
        tokio::time::sleep(Duration::from_secs(60 * 60 * 24)).await;
        assert_eq!(transport.attempt_count(), 5);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_schedule_retries_at_backoff_offsets() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_fail(500);
        let row = pending_delivery(&ledger, 1);

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        handle.enqueue(ScheduledDelivery::from_row(&row));
        wait_for(|| ledger.get(row.id).unwrap().retry_count >= 1).await;

        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.status, status::PENDING);
        assert_eq!(stored.retry_count, 1);

        // First failure: next retry one minute after the attempt. Wall
        // clock barely moves under the paused runtime, so compare against
        // the write time with slack.
        let next = stored.next_retry_at.expect("retry must be scheduled");
        let offset = (next - stored.updated_at).num_seconds();
        assert!((55..=65).contains(&offset), "unexpected offset: {offset}");

        // Second failure: five minutes after the second attempt.
        wait_for(|| ledger.get(row.id).unwrap().retry_count >= 2).await;
        let stored = ledger.get(row.id).unwrap();
        let next = stored.next_retry_at.expect("retry must be scheduled");
        let offset = (next - stored.updated_at).num_seconds();
        assert!((295..=305).contains(&offset), "unexpected offset: {offset}");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failures_halts_retries() {
        let ledger = Arc::new(MemoryLedger::default());
        // Fail twice, then succeed.
        let transport = ScriptedTransport::script(vec![
            AttemptResult {
                success: false,
                response_status: Some(503),
                response_body: Some("busy".into()),
            },
            AttemptResult {
                success: false,
                response_status: None,
                response_body: None,
            },
            AttemptResult {
                success: true,
                response_status: Some(200),
                response_body: Some("ok".into()),
            },
        ]);
        let row = pending_delivery(&ledger, 1);

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        handle.enqueue(ScheduledDelivery::from_row(&row));
        wait_for(|| ledger.get(row.id).unwrap().status == status::DELIVERED).await;

        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.retry_count, 3);
        assert_eq!(stored.next_retry_at, None);
        assert_eq!(stored.response_status, Some(200));
        assert_eq!(transport.attempt_count(), 3);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rehydration_makes_past_due_rows_immediately_eligible() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_succeed(200);

        // Rows whose next_retry_at is long past, as after a crash.
        let mut row_a = pending_delivery(&ledger, 1);
        let mut row_b = pending_delivery(&ledger, 2);
        row_a.next_retry_at = Some(Utc::now() - chrono::Duration::hours(3));
        row_b.next_retry_at = Some(Utc::now() - chrono::Duration::minutes(1));
        ledger.put(row_a.clone());
        ledger.put(row_b.clone());

        let (mut scheduler, _handle) = scheduler_with(&ledger, transport.clone());
        let rehydrated = scheduler.rehydrate().await.unwrap();
        assert_eq!(rehydrated, 2);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        wait_for(|| {
            ledger.get(row_a.id).unwrap().status == status::DELIVERED
                && ledger.get(row_b.id).unwrap().status == status::DELIVERED
        })
        .await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_write_failure_does_not_advance_retry_count() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_fail(500);
        let row = pending_delivery(&ledger, 1);

        ledger.fail_writes(true);

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        handle.enqueue(ScheduledDelivery::from_row(&row));

        // Let a few storage-failure cycles elapse; the row must still show
        // zero committed attempts.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.get(row.id).unwrap().retry_count, 0);
        assert!(transport.attempt_count() >= 1);

        // Storage recovers: bookkeeping resumes from the uncommitted state
        // and the first recorded attempt is retry_count = 1.
        ledger.fail_writes(false);
        wait_for(|| ledger.get(row.id).unwrap().retry_count >= 1).await;
        let stored = ledger.get(row.id).unwrap();
        assert_eq!(stored.status, status::PENDING);
        assert_eq!(stored.retry_count, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deliveries_dispatch_independently() {
        let ledger = Arc::new(MemoryLedger::default());
        let transport = ScriptedTransport::always_succeed(204);
        let rows: Vec<_> = (0..5).map(|i| pending_delivery(&ledger, i)).collect();

        let (scheduler, handle) = scheduler_with(&ledger, transport.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        for row in &rows {
            handle.enqueue(ScheduledDelivery::from_row(row));
        }
        wait_for(|| {
            rows.iter()
                .all(|r| ledger.get(r.id).unwrap().status == status::DELIVERED)
        })
        .await;

        assert_eq!(transport.attempt_count(), 5);

        cancel.cancel();
        task.await.unwrap();
    }
}
