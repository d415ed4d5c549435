use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use redix_client::Client;
use redix_core::{Collector, MetricFamily, MetricKind, MultiError, Sample};
use tracing::{debug, info};

use crate::error::DelayError;
use crate::handler::TaskHandler;
use crate::options::DelayQueueOptions;
use crate::queue::{DelayQueue, QueueMap, QueueMetrics};

/// Poll-side script failures, per queue.
pub const POLL_ERROR: &str = "redis_delay_poll_error";
/// Reclaim-side script failures, per queue.
pub const RECLAIM_ERROR: &str = "redis_delay_reclaim_error";
/// Payloads returned from an expired lease, per queue.
pub const RECLAIM: &str = "redis_delay_reclaim";
/// Outstanding payloads (delayed plus in flight), per queue.
pub const QUEUE_LENGTH: &str = "redis_delay_queue_length";

const LABELS: &[&str] = &["queue"];

/// Delay queues of one client, indexed by name.
///
/// ```no_run
/// use std::time::Duration;
///
/// use redix_client::Client;
/// use redix_core::ClientConfig;
/// use redix_delay::{DelayQueueOptions, DelayQueues, handler_fn};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::connect(ClientConfig::new(["127.0.0.1:6379"])).await?;
/// let queues = DelayQueues::new(&client);
/// let emails = queues.open(
///     "emails",
///     handler_fn(|payload| async move {
///         println!("sending {payload:?}");
///         Ok(())
///     }),
///     DelayQueueOptions::default(),
/// );
/// emails.add("welcome:42", Duration::from_secs(30)).await?;
/// queues.close_all().await?;
/// # Ok(())
/// # }
/// ```
pub struct DelayQueues {
    client: Client,
    queues: Arc<QueueMap>,
    metrics: QueueMetrics,
}

impl std::fmt::Debug for DelayQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayQueues")
            .field("queues", &self.queues.len())
            .finish_non_exhaustive()
    }
}

impl DelayQueues {
    /// Create an empty registry and publish its metrics on the client's
    /// metrics registry.
    pub fn new(client: &Client) -> Self {
        let registry = client.metrics();
        let metrics = QueueMetrics {
            poll_errors: registry.counter_vec(POLL_ERROR, "Delay queue poll script failures.", LABELS),
            reclaim_errors: registry.counter_vec(RECLAIM_ERROR, "Delay queue reclaim script failures.", LABELS),
            reclaims: registry.counter_vec(RECLAIM, "Payloads reclaimed from expired leases.", LABELS),
        };
        let queues = Arc::new(QueueMap::new());
        registry.register_collector(Arc::new(DelayQueueCollector {
            queues: Arc::downgrade(&queues),
        }));
        Self {
            client: client.clone(),
            queues,
            metrics,
        }
    }

    /// Open the queue `name`, starting its tickers.
    ///
    /// When a queue of that name is already open it is returned as is and
    /// `handler` and `options` are dropped. Must be called within a tokio
    /// runtime.
    pub fn open<H>(&self, name: &str, handler: H, options: DelayQueueOptions) -> Arc<DelayQueue>
    where
        H: TaskHandler + 'static,
    {
        self.open_with(name, Arc::new(handler), options)
    }

    /// Like [`open`](Self::open) for a handler that is already shared.
    pub fn open_with(
        &self,
        name: &str,
        handler: Arc<dyn TaskHandler>,
        options: DelayQueueOptions,
    ) -> Arc<DelayQueue> {
        let start = || {
            Arc::new(DelayQueue::start(
                name,
                &self.client,
                handler,
                options,
                self.metrics.clone(),
                Arc::downgrade(&self.queues),
            ))
        };
        match self.queues.entry(name.to_owned()) {
            // Still closing; it detaches itself by identity, not by name.
            Entry::Occupied(mut e) if e.get().is_closed() => {
                let queue = start();
                e.insert(queue.clone());
                queue
            }
            Entry::Occupied(e) => {
                debug!(queue = %name, "delay queue already open");
                e.get().clone()
            }
            Entry::Vacant(e) => e.insert(start()).value().clone(),
        }
    }

    /// The open queue named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<DelayQueue>> {
        self.queues.get(name).map(|q| q.value().clone())
    }

    /// Names of the open queues, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Close every open queue concurrently.
    pub async fn close_all(&self) -> Result<(), MultiError<DelayError>> {
        let open = snapshot(&self.queues);
        let count = open.len();
        let results = join_all(open.iter().map(|q| q.close())).await;
        let errors: MultiError<DelayError> = results.into_iter().filter_map(Result::err).collect();
        info!(closed = count - errors.len(), failed = errors.len(), "delay queues closed");
        errors.into_result()
    }
}

fn snapshot(queues: &QueueMap) -> Vec<Arc<DelayQueue>> {
    queues.iter().map(|e| e.value().clone()).collect()
}

/// Reports the length of every open queue at scrape time.
struct DelayQueueCollector {
    queues: Weak<QueueMap>,
}

#[async_trait]
#[allow(clippy::cast_precision_loss)]
impl Collector for DelayQueueCollector {
    async fn collect(&self) -> Vec<MetricFamily> {
        let Some(queues) = self.queues.upgrade() else {
            return Vec::new();
        };
        // Snapshot first so no shard lock is held across `.await`.
        let open = snapshot(&queues);
        drop(queues);

        let mut samples = Vec::with_capacity(open.len());
        for queue in open {
            match queue.len().await {
                Ok(n) => samples.push(Sample {
                    suffix: "",
                    labels: vec![("queue".to_owned(), queue.name().to_owned())],
                    value: n as f64,
                }),
                Err(e) => debug!(queue = %queue.name(), error = %e, "skipping queue length"),
            }
        }
        vec![MetricFamily {
            name: QUEUE_LENGTH.to_owned(),
            help: "Payloads waiting or in flight.".to_owned(),
            kind: MetricKind::Gauge,
            samples,
        }]
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use bytes::Bytes;
    use redix_core::ClientConfig;
    use redix_driver_memory::{MemoryConnector, MemoryServer};
    use tokio::sync::mpsc;
    use tokio::time::{Instant, sleep, timeout};

    use super::*;
    use crate::clock::Clock;
    use crate::handler::{HandlerError, dead_letter_fn, handler_fn};

    const T0: i64 = 1_700_000_000;

    /// Unix seconds that follow the (paused) runtime clock.
    #[derive(Debug)]
    struct RuntimeClock {
        start: Instant,
    }

    impl Clock for RuntimeClock {
        fn now(&self) -> i64 {
            T0 + i64::try_from(self.start.elapsed().as_secs()).unwrap()
        }
    }

    async fn setup() -> (Client, DelayQueues) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let client = Client::connect_with(
            ClientConfig::new(["127.0.0.1:6379"]),
            MemoryConnector::new(MemoryServer::new()),
        )
        .await
        .unwrap();
        let queues = DelayQueues::new(&client);
        (client, queues)
    }

    fn options() -> DelayQueueOptions {
        DelayQueueOptions {
            clock: Arc::new(RuntimeClock { start: Instant::now() }),
            ..DelayQueueOptions::default()
        }
    }

    fn notify(tx: mpsc::UnboundedSender<Bytes>) -> impl TaskHandler {
        handler_fn(move |payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(payload);
                Ok::<(), HandlerError>(())
            }
        })
    }

    async fn drained(queue: &DelayQueue) -> bool {
        for _ in 0..100 {
            if queue.len().await.unwrap() == 0 {
                return true;
            }
            sleep(Duration::from_millis(100)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_once_after_the_delay() {
        let (_client, queues) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = queues.open("jobs", notify(tx), options());

        let added = Instant::now();
        queue.add("task", Duration::from_secs(2)).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        let got = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from("task"));
        assert!(added.elapsed() >= Duration::from_secs(2));
        assert!(drained(&queue).await);

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_handler_succeeds() {
        let (_client, queues) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let dead = Arc::new(Mutex::new(Vec::new()));

        let handler = {
            let calls = calls.clone();
            handler_fn(move |payload| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                let tx = tx.clone();
                async move {
                    if attempt < 3 {
                        Err::<(), HandlerError>("not yet".into())
                    } else {
                        let _ = tx.send(payload);
                        Ok(())
                    }
                }
            })
        };
        let sink = {
            let dead = dead.clone();
            dead_letter_fn(move |_: &str, payload: &Bytes| dead.lock().unwrap().push(payload.clone()))
        };
        let queue = queues.open(
            "jobs",
            handler,
            DelayQueueOptions {
                max_retries: 4,
                dead_letter: Some(Arc::new(sink)),
                ..options()
            },
        );
        queue.add("task", Duration::from_secs(1)).await.unwrap();

        let got = timeout(Duration::from_secs(30), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from("task"));
        assert!(drained(&queue).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(dead.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_leases_are_picked_up_by_a_new_instance() {
        let (client, queues) = setup().await;
        let opts = DelayQueueOptions {
            timeout: Duration::from_secs(5),
            ..options()
        };

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let stuck = handler_fn(move |_| {
            let started = started_tx.clone();
            async move {
                let _ = started.send(());
                std::future::pending::<()>().await;
                Ok::<(), HandlerError>(())
            }
        });
        let first = queues.open("jobs", stuck, opts.clone());
        first.add("task", Duration::ZERO).await.unwrap();
        timeout(Duration::from_secs(5), started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        first.close().await.unwrap();
        assert_eq!(first.len().await.unwrap(), 1);
        assert!(queues.get("jobs").is_none());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let second = queues.open("jobs", notify(tx), opts);
        assert!(!Arc::ptr_eq(&first, &second));
        let got = timeout(Duration::from_secs(60), rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from("task"));
        assert!(drained(&second).await);

        let reclaims = client
            .metrics()
            .counter_vec(RECLAIM, "", LABELS)
            .get(&["jobs"]);
        assert_eq!(reclaims, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_payloads_reach_the_dead_letter_sink() {
        let (_client, queues) = setup().await;
        let (dead_tx, mut dead_rx) = mpsc::unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));

        let handler = {
            let calls = calls.clone();
            handler_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), HandlerError>("boom".into()) }
            })
        };
        let sink = dead_letter_fn(move |queue: &str, payload: &Bytes| {
            let _ = dead_tx.send((queue.to_owned(), payload.clone()));
        });
        let queue = queues.open(
            "jobs",
            handler,
            DelayQueueOptions {
                max_retries: 3,
                dead_letter: Some(Arc::new(sink)),
                ..options()
            },
        );
        queue.add("task", Duration::from_secs(1)).await.unwrap();

        let (name, payload) = timeout(Duration::from_secs(30), dead_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name, "jobs");
        assert_eq!(payload, Bytes::from("task"));
        assert!(drained(&queue).await);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        sleep(Duration::from_secs(5)).await;
        assert!(dead_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_reported_once() {
        let (_client, queues) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = queues.open("jobs", notify(tx), options());

        queue.close().await.unwrap();
        assert!(queue.is_closed());
        assert!(queues.is_empty());
        assert!(matches!(queue.close().await, Err(DelayError::Closed)));
        assert!(matches!(
            queue.add("late", Duration::from_secs(1)).await,
            Err(DelayError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn a_handler_can_close_its_own_queue() {
        let (_client, queues) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let own: Arc<OnceLock<Arc<DelayQueue>>> = Arc::new(OnceLock::new());

        let handler = {
            let own = own.clone();
            handler_fn(move |_| {
                let own = own.clone();
                let tx = tx.clone();
                async move {
                    if let Some(queue) = own.get() {
                        let _ = tx.send(queue.close().await.is_ok());
                    }
                    Ok::<(), HandlerError>(())
                }
            })
        };
        let queue = queues.open("jobs", handler, options());
        assert!(own.set(queue.clone()).is_ok());
        queue.add("task", Duration::ZERO).await.unwrap();

        let closed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert!(closed);
        assert!(queue.is_closed());
        assert!(queues.get("jobs").is_none());
        assert!(matches!(queue.close().await, Err(DelayError::Closed)));

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        let (tx, _rx) = mpsc::unbounded_channel();
        let reopened = queues.open("jobs", notify(tx), options());
        assert!(!Arc::ptr_eq(&queue, &reopened));
    }

    #[tokio::test(start_paused = true)]
    async fn first_open_wins() {
        let (_client, queues) = setup().await;
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        let a = queues.open("jobs", notify(first_tx), options());
        let b = queues.open("jobs", notify(second_tx), options());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(queues.names(), vec!["jobs".to_owned()]);

        b.add("task", Duration::ZERO).await.unwrap();
        let got = timeout(Duration::from_secs(5), first_rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from("task"));
        assert!(second_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_detaches_every_queue() {
        let (_client, queues) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = queues.open("a", notify(tx.clone()), options());
        let b = queues.open("b", notify(tx), options());
        assert_eq!(queues.len(), 2);

        queues.close_all().await.unwrap();
        assert!(a.is_closed() && b.is_closed());
        assert!(queues.is_empty());
        queues.close_all().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn queue_length_is_reported_as_a_gauge() {
        let (client, queues) = setup().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = queues.open("jobs", notify(tx), options());
        queue.add("one", Duration::from_secs(100)).await.unwrap();
        queue.add("two", Duration::from_secs(100)).await.unwrap();

        let families = client.metrics().gather().await;
        let gauge = families.iter().find(|f| f.name == QUEUE_LENGTH).unwrap();
        assert_eq!(gauge.kind, MetricKind::Gauge);
        assert_eq!(gauge.samples.len(), 1);
        assert_eq!(gauge.samples[0].labels, vec![("queue".to_owned(), "jobs".to_owned())]);
        assert!((gauge.samples[0].value - 2.0).abs() < f64::EPSILON);

        drop(queues);
        let families = client.metrics().gather().await;
        assert!(families.iter().all(|f| f.name != QUEUE_LENGTH));
    }
}
