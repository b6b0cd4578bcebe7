// ── Delivery contexts ──
//
// A subscription either runs on the publishing thread or is posted to a
// `DispatchQueue` owned by some other context (typically the UI loop),
// which drains it with `run_pending` or `run`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a subscription's callback runs.
#[derive(Clone, Default)]
pub enum Scheduler {
    /// Synchronously on the publishing thread, before `publish` returns.
    #[default]
    Immediate,
    /// Posted to the queue behind this handle; `publish` does not wait.
    Queued(QueueHandle),
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("Immediate"),
            Self::Queued(q) => f.debug_tuple("Queued").field(&q.pending()).finish(),
        }
    }
}

/// Posting side of a [`DispatchQueue`]. Cheap to clone.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    warning_threshold: usize,
}

impl QueueHandle {
    /// Enqueue a job. Returns `false` when the queue has been dropped.
    pub(crate) fn post(&self, job: Job) -> bool {
        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        if depth == self.warning_threshold {
            tracing::warn!(depth, "dispatch queue backlog reached warning threshold");
        }
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A serial execution context for queued subscriptions.
///
/// Jobs run in posting order, one at a time, on whichever task drains the
/// queue.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
    warning_threshold: usize,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::with_warning_threshold(usize::MAX)
    }

    /// Queue that logs a warning whenever its backlog reaches `threshold`.
    pub fn with_warning_threshold(threshold: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            pending: Arc::new(AtomicUsize::new(0)),
            warning_threshold: threshold,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            warning_threshold: self.warning_threshold,
        }
    }

    /// Shorthand for `Scheduler::Queued(self.handle())`.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::Queued(self.handle())
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Run the jobs queued at the time of the call. Jobs posted while
    /// draining wait for the next call. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let budget = self.pending();
        let mut ran = 0;
        while ran < budget {
            let Ok(job) = self.rx.try_recv() else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::AcqRel);
            job();
            ran += 1;
        }
        ran
    }

    /// Drain jobs as they arrive until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                job = self.rx.recv() => {
                    let Some(job) = job else { break };
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    job();
                }
            }
        }
        tracing::debug!(left = self.pending(), "dispatch queue stopped");
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
