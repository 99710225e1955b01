//! Queue façade: owns the store connections and drives jobs through their
//! lifecycle (enqueue → await admission → transition → execute → cleanup).

use crate::config::QueueConfig;
use crate::coordinator::Coordinator;
use crate::error::{QueueError, QueueResult};
use crate::events::{start_subscriber, EventHub, QueueEvent};
use crate::ids::random_job_id;
use crate::keys::QueueKeys;
use crate::store::{create_pool, RedisStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Options for a single [`Queue::submit`] call.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Caller-supplied job id. Empty or absent means a random id.
    pub job_id: Option<String>,
    /// Opaque payload handed to the job function.
    pub job_data: Option<serde_json::Value>,
    /// Insert at the far end so the newest pending job is admitted first.
    pub lifo: bool,
}

impl SubmitOptions {
    /// Default options: random id, no payload, FIFO.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job id.
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Sets the payload handed to the job function.
    pub fn job_data(mut self, data: serde_json::Value) -> Self {
        self.job_data = Some(data);
        self
    }

    /// Switches this submission to LIFO insertion.
    pub fn lifo(mut self, lifo: bool) -> Self {
        self.lifo = lifo;
        self
    }
}

/// Point-in-time queue depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for admission.
    pub pending: u64,
    /// Jobs currently executing (across all workers).
    pub processing: u64,
}

/// A handle to one logical distributed queue.
///
/// Every process that constructs a `Queue` with the same `(prefix, id)` pair
/// shares the queue's state through Redis and cooperates on its concurrency
/// limit. The handle is cheap to share behind an `Arc`; `submit` may be
/// called concurrently from many tasks.
pub struct Queue {
    cfg: QueueConfig,
    keys: QueueKeys,
    store: RedisStore,
    hub: EventHub,
    subscriber: OnceCell<JoinHandle<()>>,
    closed: AtomicBool,
}

impl Queue {
    /// Connects to Redis and builds the queue handle.
    ///
    /// The keyspace subscription is established lazily by the first submit;
    /// construction only verifies the command connection.
    pub async fn new(cfg: QueueConfig) -> QueueResult<Self> {
        cfg.validate()?;

        let keys = QueueKeys::new(&cfg.prefix, &cfg.id);
        let pool = create_pool(&cfg).await?;

        let store = RedisStore::new(pool);
        store.enable_keyspace_events().await?;

        info!(
            namespace = %keys.namespace(),
            concurrency = cfg.concurrency,
            "queue connected"
        );

        Ok(Self {
            cfg,
            keys,
            store,
            hub: EventHub::new(),
            subscriber: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The configuration this queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.cfg
    }

    /// The key layout of this queue's namespace.
    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    /// Submits a job and runs it once the queue admits it.
    ///
    /// Resolves to the job function's output, untouched. Waiting is bounded
    /// by the configured timeout: a job that has waited longer runs
    /// regardless of apparent concurrency.
    pub async fn submit<F, Fut, R>(&self, job: F, opts: SubmitOptions) -> QueueResult<R>
    where
        F: FnOnce(Option<serde_json::Value>) -> Fut,
        Fut: Future<Output = R>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        self.ensure_subscribed().await?;

        let job_id = resolve_job_id(opts.job_id);
        let pending = self.keys.pending();
        let processing = self.keys.processing();
        let pending_lock = self.keys.pending_lock(&job_id);

        self.store
            .enqueue(
                &pending_lock,
                self.cfg.pending_lock_ttl_secs(),
                &pending,
                &job_id,
                opts.lifo,
            )
            .await?;
        debug!(job_id = %job_id, lifo = opts.lifo, "job enqueued");

        let coord = Coordinator::new(
            job_id.clone(),
            &self.cfg,
            self.store.clone(),
            self.keys.clone(),
        );
        let wakeup = self.spawn_wakeup_task(&coord);

        coord.wait(self.cfg.ping()).await;

        loop {
            coord.admitted().await;

            // Lease before the move: the id must never sit in processing
            // without its lock, or a peer's sweep could evict a live job.
            coord.keep_alive(self.cfg.ping()).await;

            if coord.was_forced() {
                if let Err(e) = self
                    .store
                    .force_claim(&pending, &processing, &pending_lock, &job_id)
                    .await
                {
                    self.abandon(&coord, &wakeup, &job_id).await;
                    return Err(e);
                }
                break;
            }

            match self
                .store
                .claim_if_tail(&pending, &processing, &pending_lock, &job_id)
                .await
            {
                Ok(true) => break,
                Ok(false) => {
                    // A concurrent admission took the tail between our
                    // assessment and the move; resume waiting. The stray
                    // processing lease self-expires.
                    debug!(job_id = %job_id, "lost admission race, resuming wait");
                    coord.stop_keep_alive();
                    coord.rearm();
                    coord.wait(self.cfg.ping()).await;
                }
                Err(e) => {
                    self.abandon(&coord, &wakeup, &job_id).await;
                    return Err(e);
                }
            }
        }

        wakeup.abort();
        coord.stop_wait();
        debug!(job_id = %job_id, forced = coord.was_forced(), "job admitted");

        let result = job(opts.job_data).await;

        coord.stop_keep_alive();
        coord.stop_wait();
        self.store
            .finish(
                &processing,
                &job_id,
                &self.keys.processing_lock(&job_id),
            )
            .await?;
        debug!(job_id = %job_id, "job finished");

        Ok(result)
    }

    /// Removes a waiting job: deletes its pending lease and its queue entry.
    ///
    /// Idempotent. Never touches the processing queue: a job already
    /// executing must not be ripped out; its lease expiry is the only
    /// removal path.
    pub async fn remove_by_id(&self, job_id: &str) -> QueueResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }
        self.store
            .remove_pending(&self.keys.pending_lock(job_id), &self.keys.pending(), job_id)
            .await?;
        debug!(job_id = %job_id, "job removed from pending");
        Ok(())
    }

    /// Number of jobs waiting for admission.
    pub async fn pending_count(&self) -> QueueResult<u64> {
        self.store.llen(&self.keys.pending()).await
    }

    /// Number of jobs currently executing across all workers.
    pub async fn processing_count(&self) -> QueueResult<u64> {
        self.store.llen(&self.keys.processing()).await
    }

    /// Point-in-time queue depths.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            pending: self.pending_count().await?,
            processing: self.processing_count().await?,
        })
    }

    /// Verifies the command connection with a `PING`.
    pub async fn health_check(&self) -> QueueResult<()> {
        self.store.ping().await
    }

    /// Shuts the queue down: stops the subscriber, then closes the command
    /// pool. In-flight submits are abandoned and their cleanup may fail;
    /// await outstanding submits first.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.subscriber.get() {
            task.abort();
        }
        self.store.close();
        info!(namespace = %self.keys.namespace(), "queue shut down");
    }

    /// Establishes the keyspace subscription exactly once; racing submits
    /// share the same initialization.
    async fn ensure_subscribed(&self) -> QueueResult<()> {
        self.subscriber
            .get_or_try_init(|| start_subscriber(&self.cfg.url, &self.keys, &self.hub))
            .await?;
        Ok(())
    }

    /// Wires classified keyspace events to one coordinator. Lock expiries
    /// additionally evict the dead id right away, which is redundant with
    /// the stuck-job sweep but reduces latency.
    fn spawn_wakeup_task(&self, coord: &Arc<Coordinator>) -> JoinHandle<()> {
        let mut rx = self.hub.subscribe();
        let weak = Arc::downgrade(coord);
        let store = self.store.clone();
        let keys = self.keys.clone();
        let ping = self.cfg.ping();

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "event stream lagged, reassessing");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(coord) = weak.upgrade() else { break };

                match event {
                    Some(QueueEvent::LockExpired { side, job_id }) => {
                        if let Err(e) = store.lrem_one(&keys.list(side), &job_id).await {
                            debug!(job_id = %job_id, error = %e, "dead-job evict failed");
                        }
                        coord.wait(ping).await;
                    }
                    Some(QueueEvent::QueueChanged { .. }) | None => {
                        coord.wait(ping).await;
                    }
                }
            }
        })
    }

    /// Tears a failed submit down: stops the coordinator's timers and the
    /// wake-up task, then best-effort removes the job id from both queues.
    async fn abandon(&self, coord: &Arc<Coordinator>, wakeup: &JoinHandle<()>, job_id: &str) {
        wakeup.abort();
        coord.stop_wait();
        coord.stop_keep_alive();

        if let Err(e) = self
            .store
            .remove_pending(&self.keys.pending_lock(job_id), &self.keys.pending(), job_id)
            .await
        {
            warn!(job_id = %job_id, error = %e, "pending cleanup failed");
        }
        if let Err(e) = self
            .store
            .finish(
                &self.keys.processing(),
                job_id,
                &self.keys.processing_lock(job_id),
            )
            .await
        {
            warn!(job_id = %job_id, error = %e, "processing cleanup failed");
        }
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Some(task) = self.subscriber.get() {
            task.abort();
        }
    }
}

/// Uses the caller's id when present and non-empty, else a random one.
fn resolve_job_id(requested: Option<String>) -> String {
    match requested {
        Some(id) if !id.is_empty() => id,
        _ => random_job_id(),
    }
}
