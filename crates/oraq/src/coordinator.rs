//! Per-job admission coordination.
//!
//! Each in-flight submit owns one [`Coordinator`]. It holds the one-shot
//! `can_run` latch, runs admission assessments (directly on wake-ups and
//! periodically from a timer task), sweeps stuck jobs, and refreshes the
//! processing lease once the job is admitted.
//!
//! Assessments are serialized per coordinator; the backing store is the
//! global synchronization point between workers.

use crate::config::QueueConfig;
use crate::keys::{QueueKeys, QueueSide};
use crate::store::RedisStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Default)]
struct AssessState {
    /// Set on the first assessment; the wait timeout counts from here.
    started_at: Option<Instant>,
}

/// Coordinates admission for a single job.
pub(crate) struct Coordinator {
    job_id: String,
    concurrency: u64,
    timeout: Duration,
    processing_lock_ttl_secs: u64,
    store: RedisStore,
    keys: QueueKeys,
    /// One-shot latch: flips to `true` exactly once per admission attempt;
    /// all waiters observe the release.
    can_run: watch::Sender<bool>,
    /// Whether the release came from the timeout escape rather than a
    /// satisfied admission predicate.
    forced: AtomicBool,
    assess: tokio::sync::Mutex<AssessState>,
    wait_task: Mutex<Option<JoinHandle<()>>>,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub(crate) fn new(
        job_id: String,
        cfg: &QueueConfig,
        store: RedisStore,
        keys: QueueKeys,
    ) -> Arc<Self> {
        let (can_run, _) = watch::channel(false);
        Arc::new(Self {
            job_id,
            concurrency: cfg.concurrency as u64,
            timeout: cfg.timeout(),
            processing_lock_ttl_secs: cfg.processing_lock_ttl_secs(),
            store,
            keys,
            can_run,
            forced: AtomicBool::new(false),
            assess: tokio::sync::Mutex::new(AssessState::default()),
            wait_task: Mutex::new(None),
            keep_alive_task: Mutex::new(None),
        })
    }

    /// Waits until the latch releases. Safe to await from several tasks.
    pub(crate) async fn admitted(&self) {
        let mut rx = self.can_run.subscribe();
        let _ = rx.wait_for(|released| *released).await;
    }

    /// True when the release came from the timeout escape.
    pub(crate) fn was_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.can_run.send_replace(true);
    }

    /// Re-arms the latch after a lost admission race so the submit loop can
    /// wait for the next release. The wait-timeout clock keeps running.
    pub(crate) fn rearm(&self) {
        self.can_run.send_replace(false);
    }

    /// Runs one assessment now and (re)arms the periodic reassessment task.
    /// Re-arming replaces any previous timer, so an event storm merely
    /// restarts the period.
    pub(crate) async fn wait(self: &Arc<Self>, poll: Duration) {
        self.assess_once().await;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the priming assessment already ran.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coord) = weak.upgrade() else { break };
                coord.assess_once().await;
            }
        });

        if let Some(prev) = self.wait_task.lock().replace(task) {
            prev.abort();
        }
    }

    /// Cancels the periodic reassessment task.
    pub(crate) fn stop_wait(&self) {
        if let Some(task) = self.wait_task.lock().take() {
            task.abort();
        }
    }

    /// Refreshes the processing lease now, then keeps refreshing it every
    /// `ping`. Refresh failures are swallowed: the next tick retries, and if
    /// they persist the lease expires and peers reap the job.
    pub(crate) async fn keep_alive(self: &Arc<Self>, ping: Duration) {
        self.refresh_processing_lock().await;

        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(coord) = weak.upgrade() else { break };
                coord.refresh_processing_lock().await;
            }
        });

        if let Some(prev) = self.keep_alive_task.lock().replace(task) {
            prev.abort();
        }
    }

    /// Cancels the keep-alive task.
    pub(crate) fn stop_keep_alive(&self) {
        if let Some(task) = self.keep_alive_task.lock().take() {
            task.abort();
        }
    }

    async fn refresh_processing_lock(&self) {
        let lock_key = self.keys.processing_lock(&self.job_id);
        if let Err(e) = self
            .store
            .refresh_lock(&lock_key, self.processing_lock_ttl_secs)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "keep-alive refresh failed");
        }
    }

    /// One admission assessment against current store state.
    ///
    /// Store errors leave the latch untouched; a later event or timer tick
    /// retries.
    pub(crate) async fn assess_once(&self) {
        let mut state = self.assess.lock().await;

        if *self.can_run.borrow() {
            return;
        }

        let started_at = *state.started_at.get_or_insert_with(Instant::now);
        if started_at.elapsed() > self.timeout {
            // Anti-starvation escape hatch: after the wait deadline, any peer
            // still holding a slot is almost certainly dead, and waiting
            // further risks deadlock if keyspace events were lost.
            warn!(
                job_id = %self.job_id,
                waited_ms = started_at.elapsed().as_millis() as u64,
                "wait timeout exceeded, forcing admission"
            );
            self.forced.store(true, Ordering::SeqCst);
            self.release();
            return;
        }

        self.sweep(QueueSide::Pending).await;
        self.sweep(QueueSide::Processing).await;

        match self
            .store
            .admission_snapshot(&self.keys.processing(), &self.keys.pending())
            .await
        {
            Ok((processing_len, tail)) => {
                if processing_len < self.concurrency
                    && tail.as_deref() == Some(self.job_id.as_str())
                {
                    debug!(job_id = %self.job_id, "admission predicate satisfied");
                    self.release();
                }
            }
            Err(e) => {
                debug!(job_id = %self.job_id, error = %e, "assessment read failed");
            }
        }
    }

    /// Evicts ids whose lease key is missing from the given queue list.
    ///
    /// The check is racy against an enqueuer between its id-insert and
    /// lock-set; enqueue writes both in one transaction (lock first) exactly
    /// to close that window. A false eviction only delays the victim, whose
    /// submitter rediscovers the state at its next assessment.
    async fn sweep(&self, side: QueueSide) {
        let list_key = self.keys.list(side);
        let ids = match self.store.lrange_all(&list_key).await {
            Ok(ids) => ids,
            Err(e) => {
                debug!(queue = %side, error = %e, "stuck-job scan failed");
                return;
            }
        };

        let mut stuck = Vec::new();
        for id in ids {
            match self.store.exists(&self.keys.lock(side, &id)).await {
                Ok(true) => {}
                Ok(false) => stuck.push(id),
                Err(e) => {
                    debug!(queue = %side, error = %e, "stuck-job lease check failed");
                    return;
                }
            }
        }

        if stuck.is_empty() {
            return;
        }

        debug!(queue = %side, count = stuck.len(), ids = ?stuck, "evicting stuck jobs");
        if let Err(e) = self.store.evict(&list_key, &stuck).await {
            debug!(queue = %side, error = %e, "stuck-job eviction failed");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(task) = self.wait_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.keep_alive_task.lock().take() {
            task.abort();
        }
    }
}
