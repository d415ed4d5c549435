use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use redix_client::{Client, ClientError, FromValue, ScoredMember, Script, Value};
use redix_core::CounterVec;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::DelayError;
use crate::handler::TaskHandler;
use crate::options::DelayQueueOptions;
use crate::scripts;

pub(crate) type QueueMap = DashMap<String, Arc<DelayQueue>>;

tokio::task_local! {
    /// The worker whose ticker runs the current task.
    static TICKER: Arc<Worker>;
}

/// Counters shared by every queue of a registry.
#[derive(Debug, Clone)]
pub(crate) struct QueueMetrics {
    pub(crate) poll_errors: Arc<CounterVec>,
    pub(crate) reclaim_errors: Arc<CounterVec>,
    pub(crate) reclaims: Arc<CounterVec>,
}

/// A named delay queue with its poll and reclaim tickers.
///
/// Queues are opened through [`DelayQueues`](crate::DelayQueues), which
/// hands out one instance per name.
pub struct DelayQueue {
    worker: Arc<Worker>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    closed: AtomicBool,
    registry: Weak<QueueMap>,
}

impl std::fmt::Debug for DelayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueue")
            .field("name", &self.worker.name)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// The state the tickers work on.
pub(crate) struct Worker {
    name: String,
    client: Client,
    delay_key: String,
    doing_key: String,
    handler: Arc<dyn TaskHandler>,
    options: DelayQueueOptions,
    metrics: QueueMetrics,
}

impl DelayQueue {
    pub(crate) fn start(
        name: &str,
        client: &Client,
        handler: Arc<dyn TaskHandler>,
        options: DelayQueueOptions,
        metrics: QueueMetrics,
        registry: Weak<QueueMap>,
    ) -> Self {
        let worker = Arc::new(Worker::new(name, client, handler, options, metrics));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();

        tracker.spawn(TICKER.scope(
            worker.clone(),
            tick(worker.clone(), cancel.clone(), worker.options.poll_interval, Worker::poll),
        ));
        tracker.spawn(TICKER.scope(
            worker.clone(),
            tick(worker.clone(), cancel.clone(), worker.options.reclaim_interval, Worker::reclaim),
        ));
        tracker.close();

        info!(queue = %name, "delay queue started");
        Self {
            worker,
            tracker,
            cancel,
            closed: AtomicBool::new(false),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.worker.name
    }

    /// Enqueue `payload` to be handled once `delay` has passed.
    ///
    /// Delays are rounded up to whole seconds. Adding a payload that is
    /// already queued moves its fire time.
    pub async fn add(&self, payload: impl Into<Bytes>, delay: Duration) -> Result<(), DelayError> {
        let mut secs = delay.as_secs();
        if delay.subsec_nanos() > 0 {
            secs += 1;
        }
        let at = self
            .worker
            .options
            .clock
            .now()
            .saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
        self.add_at(payload, at).await
    }

    /// Enqueue `payload` to be handled at the Unix second `at`.
    ///
    /// Times before the epoch are treated as "now": negative scores are
    /// reserved for retry counts.
    pub async fn add_at(&self, payload: impl Into<Bytes>, at: i64) -> Result<(), DelayError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DelayError::Closed);
        }
        let w = &self.worker;
        let _: Value = w
            .run(&scripts::ADD, &[w.delay_key.as_str()], vec![payload.into(), score(at.max(0))])
            .await?;
        Ok(())
    }

    /// Number of payloads waiting or in flight.
    pub async fn len(&self) -> Result<u64, DelayError> {
        let w = &self.worker;
        let n: u64 = w
            .run(&scripts::LENGTH, &[w.delay_key.as_str(), w.doing_key.as_str()], Vec::new())
            .await?;
        Ok(n)
    }

    pub async fn is_empty(&self) -> Result<bool, DelayError> {
        Ok(self.len().await? == 0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach from the registry, stop both tickers and wait for them.
    ///
    /// A handler running at that moment is abandoned at its next await
    /// point; its payload stays leased until the lease times out and
    /// another instance reclaims it. Returns [`DelayError::Closed`] when
    /// called again.
    ///
    /// Called from this queue's own handler, the close returns without
    /// waiting: the calling ticker stops once the handler next yields.
    pub async fn close(&self) -> Result<(), DelayError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(DelayError::Closed);
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_if(&self.worker.name, |_, q| std::ptr::eq(Arc::as_ptr(q), self));
        }
        self.cancel.cancel();
        info!(queue = %self.worker.name, "delay queue closed");

        let from_own_ticker = TICKER
            .try_with(|w| Arc::ptr_eq(w, &self.worker))
            .unwrap_or(false);
        if !from_own_ticker {
            self.tracker.wait().await;
        }
        Ok(())
    }
}

impl Drop for DelayQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `work` every `period` until `cancel` fires. A tick's work completes
/// before the next tick is taken.
async fn tick<F, Fut>(worker: Arc<Worker>, cancel: CancellationToken, period: Duration, work: F)
where
    F: Fn(Arc<Worker>) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = work(worker.clone()) => {}
        }
    }
    debug!(queue = %worker.name, "delay queue ticker stopped");
}

fn score(n: i64) -> Bytes {
    Bytes::from(n.to_string())
}

impl Worker {
    fn new(
        name: &str,
        client: &Client,
        handler: Arc<dyn TaskHandler>,
        options: DelayQueueOptions,
        metrics: QueueMetrics,
    ) -> Self {
        let (delay_key, doing_key) = options.keys(name);
        Self {
            name: name.to_owned(),
            // Scripts span both sets; the development checks do not apply.
            client: client.with_skip_check(),
            delay_key,
            doing_key,
            handler,
            options,
            metrics,
        }
    }

    async fn run<T: FromValue>(&self, script: &Script, keys: &[&str], args: Vec<Bytes>) -> Result<T, ClientError> {
        self.client
            .with_sub_command_name(script.name())
            .eval(script, keys, &args)
            .await
    }

    /// Move everything in `from` scored at or below `max` into `to` with
    /// score `new`, returning the payloads with their previous scores.
    async fn transfer(&self, from: &str, to: &str, max: i64, new: i64) -> Result<Vec<(Bytes, i64)>, ClientError> {
        let reply: Value = self
            .run(&scripts::MOVE, &[from, to], vec![score(max), score(new)])
            .await?;
        let moved = ScoredMember::decode_list(reply)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(moved
            .into_iter()
            .map(|m| (m.member, m.score as i64))
            .collect())
    }

    /// Lease every due payload and hand each to the handler in turn.
    pub(crate) async fn poll(self: Arc<Self>) {
        let now = self.options.clock.now();
        let deadline = now.saturating_add(self.options.lease_secs());
        let due = match self.transfer(&self.delay_key, &self.doing_key, now, deadline).await {
            Ok(due) => due,
            Err(e) => {
                self.metrics.poll_errors.inc(&[&self.name]);
                warn!(queue = %self.name, error = %e, "delay queue poll failed");
                return;
            }
        };

        for (payload, original) in due {
            let attempts = original.min(0).unsigned_abs();
            if attempts > u64::from(self.options.max_retries) {
                self.dead_letter(payload, attempts).await;
                continue;
            }

            let handled = self.invoke(&payload, attempts).await;
            let ack = if handled {
                self.run::<Value>(&scripts::ACK_OK, &[self.doing_key.as_str()], vec![payload])
                    .await
            } else {
                self.run::<Value>(
                    &scripts::ACK_FAIL,
                    &[self.delay_key.as_str(), self.doing_key.as_str()],
                    vec![payload, score(original.min(0))],
                )
                .await
            };
            if let Err(e) = ack {
                self.metrics.poll_errors.inc(&[&self.name]);
                warn!(queue = %self.name, error = %e, "delay queue acknowledgement failed");
            }
        }
    }

    /// Run the handler, treating a panic as a failure.
    async fn invoke(&self, payload: &Bytes, attempts: u64) -> bool {
        match AssertUnwindSafe(self.handler.handle(payload.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(queue = %self.name, attempts, error = %e, "delayed task failed");
                false
            }
            Err(_) => {
                error!(queue = %self.name, attempts, "delayed task handler panicked");
                false
            }
        }
    }

    async fn dead_letter(&self, payload: Bytes, attempts: u64) {
        let removed = self
            .run::<Value>(
                &scripts::DISCARD,
                &[self.delay_key.as_str(), self.doing_key.as_str()],
                vec![payload.clone()],
            )
            .await;
        if let Err(e) = removed {
            // Left leased; it comes back through reclaim.
            self.metrics.poll_errors.inc(&[&self.name]);
            warn!(queue = %self.name, error = %e, "failed to discard dead payload");
            return;
        }
        warn!(queue = %self.name, attempts, "delayed task exhausted its retries");

        let Some(sink) = &self.options.dead_letter else {
            return;
        };
        let name = self.name.as_str();
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink.dead_letter(name, &payload))).is_err() {
            error!(queue = %self.name, "dead-letter sink panicked");
        }
    }

    /// Return payloads whose lease has expired to the delay set.
    pub(crate) async fn reclaim(self: Arc<Self>) {
        let now = self.options.clock.now();
        let deadline = now.saturating_add(self.options.lease_secs());
        match self.transfer(&self.doing_key, &self.delay_key, now, deadline).await {
            Ok(moved) if moved.is_empty() => {}
            Ok(moved) => {
                self.metrics
                    .reclaims
                    .add(&[&self.name], u64::try_from(moved.len()).unwrap_or(u64::MAX));
                info!(queue = %self.name, count = moved.len(), "reclaimed expired leases");
            }
            Err(e) => {
                self.metrics.reclaim_errors.inc(&[&self.name]);
                warn!(queue = %self.name, error = %e, "delay queue reclaim failed");
            }
        }
    }
}
