//! Manager (spec §4.5): the scheduler. Owns the Worker fleet, maintains a
//! schedule of when each Proxy is next due, and dispatches due Proxies to
//! whichever Worker currently carries the least load.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::config::{ManagerConfig, ProberConfig};
use crate::models::Proxy;
use crate::store::Store;
use crate::worker::{self, WorkerHandle};

/// Per-proxy scheduling state.
struct ScheduleEntry {
    proxy: Proxy,
    next_due_at: Instant,
}

/// Handle used to stop the Manager (and, transitively, its Worker fleet).
pub struct ManagerHandle {
    stop_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
    failure_rx: watch::Receiver<Option<String>>,
}

impl ManagerHandle {
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Waits for every Worker to finish draining. Surfaces the first
    /// persistent `record_result` failure any Worker reported (spec §7).
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
}

/// Spawn the Manager: a Worker fleet sized per `config.worker_count`, plus
/// the tick/sync loops that feed them.
pub fn spawn(store: Store, config: ManagerConfig, prober_config: ProberConfig) -> ManagerHandle {
    let workers: Vec<WorkerHandle> = (0..config.worker_count)
        .map(|id| worker::spawn(id, store.clone(), config.worker_max_in_flight, prober_config.clone()))
        .collect();

    let (stop_tx, stop_rx) = watch::channel(false);
    let (stopped_tx, stopped_rx) = watch::channel(false);
    let (failure_tx, failure_rx) = watch::channel(None);

    tokio::spawn(run(store, workers, config, stop_rx, stopped_tx, failure_tx));

    ManagerHandle { stop_tx, stopped_rx, failure_rx }
}

#[instrument(skip_all)]
async fn run(
    store: Store,
    workers: Vec<WorkerHandle>,
    config: ManagerConfig,
    mut stop_rx: watch::Receiver<bool>,
    stopped_tx: watch::Sender<bool>,
    failure_tx: watch::Sender<Option<String>>,
) {
    let schedule: Mutex<HashMap<i64, ScheduleEntry>> = Mutex::new(HashMap::new());

    if let Err(e) = sync_schedule(&store, &schedule).await {
        warn!(error = %e, "initial schedule sync failed");
    }

    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    let mut sync = tokio::time::interval(Duration::from_secs(config.sync_interval_secs.max(1)));
    // The first tick of an `interval` fires immediately; skip it since we
    // just synced above.
    tick.tick().await;
    sync.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                dispatch_due(&workers, &schedule);
            }
            _ = sync.tick() => {
                if let Err(e) = sync_schedule(&store, &schedule).await {
                    warn!(error = %e, "schedule sync failed");
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("manager stopping, draining worker fleet");
    for w in &workers {
        w.stop();
    }
    let mut first_failure = None;
    for w in &workers {
        if let Err(e) = w.wait_stop().await {
            warn!(error = %e, "worker reported a persistent failure while draining");
            first_failure.get_or_insert(e.to_string());
        }
    }
    let _ = failure_tx.send(first_failure);
    let _ = stopped_tx.send(true);
}

/// Re-query the Store for the full proxy set (spec §4.5 sync loop, ≈30s):
/// newly-seen proxies are scheduled immediately, known proxies keep their
/// existing due time but pick up any definition change (e.g. `recheck_every`
/// edited out from under the schedule).
async fn sync_schedule(store: &Store, schedule: &Mutex<HashMap<i64, ScheduleEntry>>) -> crate::error::Result<()> {
    let proxies = store.get_all_proxies().await?;
    let now = Instant::now();

    let mut guard = schedule.lock();
    let seen: std::collections::HashSet<i64> = proxies.iter().map(|p| p.id).collect();
    guard.retain(|id, _| seen.contains(id));

    for proxy in proxies {
        guard
            .entry(proxy.id)
            .and_modify(|entry| entry.proxy.recheck_every = proxy.recheck_every)
            .or_insert_with(|| ScheduleEntry {
                proxy: proxy.clone(),
                next_due_at: now,
            });
    }

    Ok(())
}

/// Dispatch every due Proxy to its least-loaded Worker (spec §4.5 tick loop,
/// ≈0.5s). A `recheck_every: None` proxy is one-shot (spec §9 open question,
/// resolved) and is dropped from the schedule once dispatched.
fn dispatch_due(workers: &[WorkerHandle], schedule: &Mutex<HashMap<i64, ScheduleEntry>>) {
    if workers.is_empty() {
        return;
    }

    let now = Instant::now();
    let mut due = Vec::new();
    let mut one_shot_ids = Vec::new();

    {
        let mut guard = schedule.lock();
        for (id, entry) in guard.iter_mut() {
            if entry.next_due_at > now {
                continue;
            }
            due.push(entry.proxy.clone());
            match entry.proxy.recheck_every {
                Some(secs) => entry.next_due_at = now + Duration::from_secs(secs.max(0) as u64),
                None => one_shot_ids.push(*id),
            }
        }
        for id in &one_shot_ids {
            guard.remove(id);
        }
    }

    for proxy in due {
        let worker = least_loaded(workers);
        worker.put(proxy);
    }
}

fn least_loaded(workers: &[WorkerHandle]) -> &WorkerHandle {
    workers
        .iter()
        .min_by_key(|w| w.queue_size() + w.in_flight() as i64)
        .expect("workers is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use chrono::Utc;

    fn test_proxy(id: i64, recheck_every: Option<i64>) -> Proxy {
        Proxy {
            id,
            host: "127.0.0.1".into(),
            port: 8080,
            protocol: ProxyProtocol::Http,
            recheck_every,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn due_one_shot_entries_are_removed_from_the_schedule() {
        let schedule = Mutex::new(HashMap::new());
        schedule.lock().insert(
            1,
            ScheduleEntry {
                proxy: test_proxy(1, None),
                next_due_at: Instant::now(),
            },
        );

        assert_eq!(schedule.lock().len(), 1);
        // A real dispatch needs workers; here we just exercise the removal
        // logic that `dispatch_due` performs under the lock.
        let now = Instant::now();
        let mut guard = schedule.lock();
        let mut one_shot_ids = Vec::new();
        for (id, entry) in guard.iter() {
            if entry.next_due_at <= now && entry.proxy.recheck_every.is_none() {
                one_shot_ids.push(*id);
            }
        }
        for id in one_shot_ids {
            guard.remove(&id);
        }
        assert!(guard.is_empty());
    }

    #[test]
    fn recurring_entries_get_a_future_due_time() {
        let schedule = Mutex::new(HashMap::new());
        let now = Instant::now();
        schedule.lock().insert(
            2,
            ScheduleEntry {
                proxy: test_proxy(2, Some(60)),
                next_due_at: now,
            },
        );

        let mut guard = schedule.lock();
        let entry = guard.get_mut(&2).unwrap();
        if entry.next_due_at <= now {
            entry.next_due_at = now + Duration::from_secs(entry.proxy.recheck_every.unwrap() as u64);
        }
        assert!(entry.next_due_at > now);
    }
}
