//! Worker (spec §4.4): owns a bounded in-flight set of concurrent Prober
//! invocations, fed by a non-blocking inbox the Manager pushes Proxies onto.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, instrument, warn};

use crate::config::ProberConfig;
use crate::models::{CheckDefinition, Proxy};
use crate::models::result::NewCheckResult;
use crate::prober;
use crate::store::Store;

/// How many times `Store::record_result` is retried before a Worker gives up
/// draining and surfaces the failure to `wait_stop` callers (spec §7).
const RECORD_RESULT_MAX_ATTEMPTS: u32 = 3;
const RECORD_RESULT_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Handle used by the Manager to feed a Worker and observe its metrics
/// (spec §4.4 operations).
#[derive(Clone)]
pub struct WorkerHandle {
    inbox_tx: mpsc::UnboundedSender<Proxy>,
    queue_len: Arc<AtomicI64>,
    in_flight: Arc<AtomicUsize>,
    processed_count: Arc<AtomicU64>,
    start_time: Instant,
    stop_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
    failure_rx: watch::Receiver<Option<String>>,
}

impl WorkerHandle {
    /// Non-blocking enqueue (spec §4.4 `put(proxy)`).
    pub fn put(&self, proxy: Proxy) {
        self.queue_len.fetch_add(1, Ordering::SeqCst);
        // An unbounded channel send only fails if the Worker task has
        // already exited; dropping the item is correct at that point since
        // nothing will ever drain it.
        let _ = self.inbox_tx.send(proxy);
    }

    /// `stop()` — transitions running→draining (spec §4.4): finishes
    /// in-flight probes and items already in the inbox, then stops.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Completes when the Worker has reached the `stopped` state. Returns the
    /// persistent `record_result` failure, if draining ended because the
    /// Store stopped accepting writes rather than because `stop()` was
    /// called (spec §7).
    pub async fn wait_stop(&self) -> crate::error::Result<()> {
        let mut rx = self.stopped_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }

        match self.failure_rx.borrow().clone() {
            Some(reason) => Err(crate::error::CheckerError::Internal(reason)),
            None => Ok(()),
        }
    }

    pub fn queue_size(&self) -> i64 {
        self.queue_len.load(Ordering::SeqCst).max(0)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Probes completed per second since the Worker started.
    pub fn performance(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.processed_count.load(Ordering::SeqCst) as f64 / elapsed
    }
}

/// Runtime unit owning a bounded pool of concurrent probes.
struct Worker {
    id: usize,
    store: Store,
    max_in_flight: usize,
    prober_config: ProberConfig,
    inbox_rx: mpsc::UnboundedReceiver<Proxy>,
    queue_len: Arc<AtomicI64>,
    in_flight: Arc<AtomicUsize>,
    processed_count: Arc<AtomicU64>,
    stop_rx: watch::Receiver<bool>,
    stopped_tx: watch::Sender<bool>,
    failure_tx: watch::Sender<Option<String>>,
}

/// Spawn a Worker and return the handle used to feed it.
pub fn spawn(id: usize, store: Store, max_in_flight: usize, prober_config: ProberConfig) -> WorkerHandle {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let (stopped_tx, stopped_rx) = watch::channel(false);
    let (failure_tx, failure_rx) = watch::channel(None);

    let queue_len = Arc::new(AtomicI64::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let processed_count = Arc::new(AtomicU64::new(0));

    let worker = Worker {
        id,
        store,
        max_in_flight,
        prober_config,
        inbox_rx,
        queue_len: queue_len.clone(),
        in_flight: in_flight.clone(),
        processed_count: processed_count.clone(),
        stop_rx,
        stopped_tx,
        failure_tx,
    };

    tokio::spawn(worker.run());

    WorkerHandle {
        inbox_tx,
        queue_len,
        in_flight,
        processed_count,
        start_time: Instant::now(),
        stop_tx,
        stopped_rx,
        failure_rx,
    }
}

impl Worker {
    /// Main loop (spec §4.4, design level).
    #[instrument(skip(self), fields(worker_id = self.id))]
    async fn run(mut self) {
        let mut in_flight_tasks: FuturesUnordered<
            std::pin::Pin<Box<dyn std::future::Future<Output = NewCheckResult> + Send>>,
        > = FuturesUnordered::new();
        let mut draining = false;

        loop {
            // 1. Dispatch queued Proxies up to the concurrency ceiling,
            // fanning out one Prober task per associated CheckDefinition —
            // fan-out is the Worker's responsibility, not the Manager's.
            while self.in_flight.load(Ordering::SeqCst) < self.max_in_flight {
                match self.inbox_rx.try_recv() {
                    Ok(proxy) => {
                        self.queue_len.fetch_sub(1, Ordering::SeqCst);
                        let checks = match self.store.checks_for_proxy(proxy.id).await {
                            Ok(checks) => checks,
                            Err(e) => {
                                warn!(proxy_id = proxy.id, error = %e, "failed to load checks for proxy");
                                continue;
                            }
                        };
                        self.launch_probes(proxy, checks, &mut in_flight_tasks);
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        draining = true;
                        break;
                    }
                }
            }

            if !draining && *self.stop_rx.borrow() {
                draining = true;
            }

            // 4. Nothing left anywhere: stop if draining, else idle briefly.
            if in_flight_tasks.is_empty() && self.queue_len.load(Ordering::SeqCst) <= 0 {
                if draining {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    _ = self.stop_rx.changed() => {
                        if *self.stop_rx.borrow() {
                            draining = true;
                        }
                    }
                }
                continue;
            }

            // 2 & 3. Reap a completed probe (back-pressure: this is the only
            // place the loop blocks when at the concurrency ceiling or with
            // an empty inbox and in-flight work outstanding).
            if let Some(result) = in_flight_tasks.next().await {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.processed_count.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = self.record_result_with_retry(result).await {
                    error!(worker_id = self.id, error = %e, "record_result failed persistently, stopping drain");
                    let _ = self.failure_tx.send(Some(e.to_string()));
                    break;
                }
            }
        }

        debug!(worker_id = self.id, "worker draining complete, stopping");
        let _ = self.stopped_tx.send(true);
    }

    /// Persist one result, retrying a bounded number of times before giving
    /// up (spec §7: "Store errors during record_result are logged and
    /// retried a bounded number of times; if they persist, the Worker stops
    /// draining and surfaces the error to wait_stop callers").
    async fn record_result_with_retry(&self, result: NewCheckResult) -> crate::error::Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.record_result(result.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RECORD_RESULT_MAX_ATTEMPTS => {
                    warn!(
                        worker_id = self.id,
                        attempt, error = %e, "failed to persist check result, retrying"
                    );
                    tokio::time::sleep(RECORD_RESULT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn launch_probes(
        &self,
        proxy: Proxy,
        checks: Vec<CheckDefinition>,
        in_flight_tasks: &mut FuturesUnordered<
            std::pin::Pin<Box<dyn std::future::Future<Output = NewCheckResult> + Send>>,
        >,
    ) {
        for check in checks {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let proxy = proxy.clone();
            let profiles = self.prober_config.session_profile_pool.clone();
            in_flight_tasks.push(Box::pin(async move {
                prober::probe(&proxy, &check, &profiles).await
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_queue_size_tracks_puts_before_drain() {
        // Exercises the handle's bookkeeping in isolation, without spinning
        // up a real worker task.
        let queue_len = Arc::new(AtomicI64::new(0));
        queue_len.fetch_add(1, Ordering::SeqCst);
        queue_len.fetch_add(1, Ordering::SeqCst);
        assert_eq!(queue_len.load(Ordering::SeqCst), 2);
        queue_len.fetch_sub(1, Ordering::SeqCst);
        assert_eq!(queue_len.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn performance_is_zero_before_any_elapsed_time() {
        let processed_count = Arc::new(AtomicU64::new(0));
        assert_eq!(processed_count.load(Ordering::SeqCst), 0);
    }
}
