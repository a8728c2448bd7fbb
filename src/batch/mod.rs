// ============================================================================
// Batch Queue
// ============================================================================
//
// Accumulates jobs per operation kind and hands each accumulation to the
// ledger as one batch.
//
// Per kind the lane moves through:
//
//   Idle --submit--> Accumulating(timer) --timer/size/manual--> Flushing --> Idle
//
// - The first job of a batch arms exactly one flush timer
// - Jobs keep FIFO order within a batch
// - The lane is back to Idle before the ledger round trip starts, so jobs
//   arriving while a batch is in flight start a fresh batch
// - Every timer is tagged with its batch id; a stale timer never flushes a
//   newer batch
//
// ============================================================================

mod job;

pub use job::{Job, JobCompletion, JobOutcome, JobReceipt};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::BatchConfig;
use crate::ledger::{LedgerClient, OperationKind};
use crate::metrics;
use crate::telemetry::TelemetryEmitter;

/// What caused a batch to flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The flush window elapsed
    Timer,
    /// The batch reached the configured maximum size
    Size,
    /// Explicit `flush` call (shutdown drain)
    Manual,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Timer => "timer",
            FlushTrigger::Size => "size",
            FlushTrigger::Manual => "manual",
        }
    }
}

#[derive(Default)]
enum BatchState {
    #[default]
    Idle,
    Accumulating {
        batch_id: u64,
        jobs: Vec<Job>,
        started: Instant,
        timer: AbortHandle,
    },
    Flushing {
        batch_id: u64,
    },
}

impl BatchState {
    fn name(&self) -> &'static str {
        match self {
            BatchState::Idle => "idle",
            BatchState::Accumulating { .. } => "accumulating",
            BatchState::Flushing { .. } => "flushing",
        }
    }
}

#[derive(Default)]
struct Lane {
    state: BatchState,
    /// Batches handed to the ledger and not yet settled
    in_flight: usize,
}

/// Point-in-time view of one kind's lane, served by `/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    pub kind: OperationKind,
    pub state: &'static str,
    pub pending: usize,
    pub in_flight: usize,
}

struct Inner {
    lanes: Mutex<HashMap<OperationKind, Lane>>,
    next_batch_id: AtomicU64,
    ledger: LedgerClient,
    flush_window: Duration,
    max_batch_size: Option<usize>,
    telemetry: TelemetryEmitter,
}

impl Inner {
    // Critical sections never await, so a poisoned lock still holds
    // consistent state
    fn lanes(&self) -> MutexGuard<'_, HashMap<OperationKind, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owned batching state, cheap to clone and share between handlers.
#[derive(Clone)]
pub struct BatchQueue {
    inner: Arc<Inner>,
}

impl BatchQueue {
    pub fn new(ledger: LedgerClient, config: &BatchConfig, telemetry: TelemetryEmitter) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                next_batch_id: AtomicU64::new(1),
                ledger,
                flush_window: config.flush_window,
                max_batch_size: config.max_batch_size,
                telemetry,
            }),
        }
    }

    /// Appends `job` to the current batch for `kind` and returns that batch's id.
    ///
    /// Starting a batch arms its flush timer. Must be called inside a tokio
    /// runtime.
    pub fn submit(&self, kind: OperationKind, job: Job) -> u64 {
        metrics::JOBS_SUBMITTED_TOTAL
            .with_label_values(&[kind.as_str()])
            .inc();

        let (batch_id, size) = {
            let mut lanes = self.inner.lanes();
            let lane = lanes.entry(kind).or_default();

            match &mut lane.state {
                BatchState::Accumulating { batch_id, jobs, .. } => {
                    jobs.push(job);
                    (*batch_id, jobs.len())
                }
                state => {
                    let batch_id = self.inner.next_batch_id.fetch_add(1, Ordering::Relaxed);
                    let timer = self.arm_timer(kind, batch_id);
                    *state = BatchState::Accumulating {
                        batch_id,
                        jobs: vec![job],
                        started: Instant::now(),
                        timer,
                    };
                    debug!(batch_id = batch_id, kind = %kind, "Batch started");
                    (batch_id, 1)
                }
            }
        };

        if self.inner.max_batch_size.is_some_and(|max| size >= max) {
            self.flush_batch(kind, batch_id, FlushTrigger::Size);
        }
        batch_id
    }

    /// Flushes whatever is accumulating for `kind`.
    pub fn flush(&self, kind: OperationKind) -> Option<JoinHandle<()>> {
        let batch_id = match self.inner.lanes().get(&kind).map(|lane| &lane.state) {
            Some(BatchState::Accumulating { batch_id, .. }) => *batch_id,
            _ => return None,
        };
        self.flush_batch(kind, batch_id, FlushTrigger::Manual)
    }

    /// Flushes every kind; the handles resolve once each batch has settled.
    pub fn flush_all(&self) -> Vec<JoinHandle<()>> {
        OperationKind::ALL
            .iter()
            .filter_map(|kind| self.flush(*kind))
            .collect()
    }

    /// Jobs waiting in the current batch for `kind`
    pub fn pending(&self, kind: OperationKind) -> usize {
        match self.inner.lanes().get(&kind).map(|lane| &lane.state) {
            Some(BatchState::Accumulating { jobs, .. }) => jobs.len(),
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        let lanes = self.inner.lanes();
        OperationKind::ALL
            .iter()
            .map(|kind| match lanes.get(kind) {
                Some(lane) => LaneSnapshot {
                    kind: *kind,
                    state: lane.state.name(),
                    pending: match &lane.state {
                        BatchState::Accumulating { jobs, .. } => jobs.len(),
                        _ => 0,
                    },
                    in_flight: lane.in_flight,
                },
                None => LaneSnapshot {
                    kind: *kind,
                    state: BatchState::Idle.name(),
                    pending: 0,
                    in_flight: 0,
                },
            })
            .collect()
    }

    fn arm_timer(&self, kind: OperationKind, batch_id: u64) -> AbortHandle {
        let queue = self.clone();
        let window = self.inner.flush_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            queue.flush_batch(kind, batch_id, FlushTrigger::Timer);
        })
        .abort_handle()
    }

    /// Flushes batch `batch_id` of `kind` if it is still the one accumulating.
    fn flush_batch(
        &self,
        kind: OperationKind,
        batch_id: u64,
        trigger: FlushTrigger,
    ) -> Option<JoinHandle<()>> {
        let (jobs, started, timer) = {
            let mut lanes = self.inner.lanes();
            let lane = lanes.get_mut(&kind)?;
            let previous = std::mem::replace(&mut lane.state, BatchState::Flushing { batch_id });
            match previous {
                BatchState::Accumulating {
                    batch_id: current,
                    jobs,
                    started,
                    timer,
                } if current == batch_id => {
                    lane.in_flight += 1;
                    (jobs, started, timer)
                }
                other => {
                    lane.state = other;
                    return None;
                }
            }
        };

        // The timer task is the caller in that case
        if trigger != FlushTrigger::Timer {
            timer.abort();
        }

        let size = jobs.len();
        let waited = started.elapsed();
        metrics::BATCHES_FLUSHED_TOTAL
            .with_label_values(&[kind.as_str(), trigger.as_str()])
            .inc();
        metrics::BATCH_SIZE
            .with_label_values(&[kind.as_str()])
            .observe(size as f64);
        metrics::BATCH_WAIT_SECONDS.observe(waited.as_secs_f64());
        self.inner.telemetry.emit_label(format!(
            "batched {} jobs in {}ms",
            size,
            waited.as_millis()
        ));
        info!(
            batch_id = batch_id,
            kind = %kind,
            jobs = size,
            waited_ms = waited.as_millis() as u64,
            trigger = trigger.as_str(),
            "Flushing batch"
        );

        {
            let mut lanes = self.inner.lanes();
            if let Some(lane) = lanes.get_mut(&kind) {
                if matches!(lane.state, BatchState::Flushing { batch_id: current } if current == batch_id)
                {
                    lane.state = BatchState::Idle;
                }
            }
        }

        let in_flight = InFlight {
            inner: Arc::clone(&self.inner),
            kind,
        };
        Some(tokio::spawn(async move {
            in_flight.inner.ledger.execute(kind, batch_id, jobs).await;
            drop(in_flight);
        }))
    }
}

/// Counts one batch as in flight until dropped, even if the ledger call
/// panics or the task is aborted.
struct InFlight {
    inner: Arc<Inner>,
    kind: OperationKind,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(lane) = self.inner.lanes().get_mut(&self.kind) {
            lane.in_flight = lane.in_flight.saturating_sub(1);
        }
    }
}
