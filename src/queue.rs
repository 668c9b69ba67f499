use crate::model::ProposedOperation;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_MAX_WAIT_MS: u64 = 2_000;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct BatchQueueConfig {
    /// Quiet period after the most recent add before a flush fires.
    pub debounce: Duration,
    /// Ceiling from the first add; guarantees progress under continuous
    /// arrival.
    pub max_wait: Duration,
    /// Queue depth above which a flush fires immediately, bypassing both
    /// timers.
    pub flush_threshold: usize,
}

impl Default for BatchQueueConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

/// Coalesces rapid-fire proposed operations into one downstream batch.
///
/// On the first add both a debounce timer and a max-wait timer start; later
/// adds reset only the debounce timer. Whichever elapses first hands the
/// queued operations, as one array, to the sink, after which the queue is
/// empty and both timers are cleared.
pub struct BatchQueue {
    config: BatchQueueConfig,
    inner: Arc<Mutex<Inner>>,
    sink: mpsc::UnboundedSender<Vec<ProposedOperation>>,
}

#[derive(Default)]
struct Inner {
    pending: Vec<ProposedOperation>,
    debounce: Option<CancellationToken>,
    max_wait: Option<CancellationToken>,
    /// Bumped on every flush/clear; in-flight timer tasks from an earlier
    /// arming observe the mismatch and stand down.
    generation: u64,
}

impl Inner {
    fn cancel_timers(&mut self) {
        if let Some(token) = self.debounce.take() {
            token.cancel();
        }
        if let Some(token) = self.max_wait.take() {
            token.cancel();
        }
    }
}

impl BatchQueue {
    pub fn new(
        config: BatchQueueConfig,
        sink: mpsc::UnboundedSender<Vec<ProposedOperation>>,
    ) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            sink,
        }
    }

    pub fn add(&self, op: ProposedOperation) {
        self.add_batch(vec![op]);
    }

    pub fn add_batch(&self, ops: Vec<ProposedOperation>) {
        if ops.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let was_empty = inner.pending.is_empty();
        inner.pending.extend(ops);

        if inner.pending.len() > self.config.flush_threshold {
            debug!(
                queued = inner.pending.len(),
                threshold = self.config.flush_threshold,
                "flushing immediately on batch size"
            );
            self.flush_locked(&mut inner);
            return;
        }

        if was_empty {
            inner.max_wait = Some(self.arm_timer(&inner, self.config.max_wait));
        } else if let Some(token) = inner.debounce.take() {
            token.cancel();
        }
        inner.debounce = Some(self.arm_timer(&inner, self.config.debounce));
    }

    /// Flush whatever is queued right now. No-op when empty.
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        if !inner.pending.is_empty() {
            self.flush_locked(&mut inner);
        }
    }

    /// Drop queued operations without notifying the sink.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_timers();
        inner.generation += 1;
        let dropped = inner.pending.len();
        inner.pending.clear();
        if dropped > 0 {
            debug!(dropped, "batch queue cleared");
        }
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn arm_timer(&self, inner: &Inner, delay: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let queue_inner = Arc::clone(&self.inner);
        let sink = self.sink.clone();
        let generation = inner.generation;

        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    flush_for_generation(&queue_inner, &sink, generation);
                }
            }
        });
        token
    }

    fn flush_locked(&self, inner: &mut Inner) {
        inner.cancel_timers();
        inner.generation += 1;
        let batch = std::mem::take(&mut inner.pending);
        deliver(&self.sink, batch);
    }
}

fn flush_for_generation(
    inner: &Arc<Mutex<Inner>>,
    sink: &mpsc::UnboundedSender<Vec<ProposedOperation>>,
    generation: u64,
) {
    let mut inner = inner.lock();
    if inner.generation != generation {
        trace!("timer fired for a superseded queue generation");
        return;
    }
    if inner.pending.is_empty() {
        return;
    }
    inner.cancel_timers();
    inner.generation += 1;
    let batch = std::mem::take(&mut inner.pending);
    deliver(sink, batch);
}

fn deliver(sink: &mpsc::UnboundedSender<Vec<ProposedOperation>>, batch: Vec<ProposedOperation>) {
    let size = batch.len();
    if sink.send(batch).is_err() {
        debug!(size, "batch sink closed; dropping flush");
    } else {
        trace!(size, "flushed operation batch");
    }
}
