//! Thin, typed façade over the Redis backing store.
//!
//! Every multi-key mutation the admission protocol relies on is issued as a
//! single atomic unit: either a `MULTI`/`EXEC` pipeline or a Lua script. The
//! adapter performs no retries; transient errors propagate and upper layers
//! decide. A network loss mid-pipeline has undefined effect, so callers
//! reconcile with idempotent follow-ups.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;

/// Pops a job's id from the pending tail into processing, but only when that
/// job actually is the tail. Deletes the pending lock on success. Returns 1
/// when the move happened, 0 when another id held the tail.
const CLAIM_IF_TAIL: &str = r#"
if redis.call('LINDEX', KEYS[1], -1) == ARGV[1] then
  redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
  redis.call('DEL', KEYS[3])
  return 1
end
return 0
"#;

/// Create the command connection pool, verified with a `PING`.
pub(crate) async fn create_pool(config: &QueueConfig) -> QueueResult<Pool> {
    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| QueueError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| QueueError::Configuration(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    Ok(pool)
}

/// Store adapter shared by all in-flight submits of one queue.
#[derive(Clone)]
pub(crate) struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub(crate) fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> QueueResult<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Closes the underlying pool. Outstanding operations fail afterwards.
    pub(crate) fn close(&self) {
        self.pool.close();
    }

    pub(crate) async fn llen(&self, key: &str) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    pub(crate) async fn lrange_all(&self, key: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, 0, -1).await?)
    }

    pub(crate) async fn exists(&self, key: &str) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    /// Removes one occurrence of `id` from a queue list, head first.
    pub(crate) async fn lrem_one(&self, list_key: &str, id: &str) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.lrem(list_key, 1, id).await?)
    }

    pub(crate) async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }

    /// Enables the keyspace-notification classes the demux relies on:
    /// keyspace channels (K), generic commands (g), expirations (x) and list
    /// commands (l).
    pub(crate) async fn enable_keyspace_events(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg("Kgxl")
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Atomic enqueue: set the pending lease, then insert the id. The lock is
    /// written first within the transaction so a sweeping peer that sees the
    /// id also sees its lease.
    pub(crate) async fn enqueue(
        &self,
        lock_key: &str,
        lock_ttl_secs: u64,
        list_key: &str,
        id: &str,
        lifo: bool,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().set_ex(lock_key, "", lock_ttl_secs);
        if lifo {
            pipe.rpush(list_key, id);
        } else {
            pipe.lpush(list_key, id);
        }
        pipe.query_async::<()>(&mut *conn).await?;
        Ok(())
    }

    /// Consistent `(len(processing), tail(pending))` snapshot for one
    /// admission assessment.
    pub(crate) async fn admission_snapshot(
        &self,
        processing_key: &str,
        pending_key: &str,
    ) -> QueueResult<(u64, Option<String>)> {
        let mut conn = self.conn().await?;
        let (len, tail): (u64, Option<String>) = redis::pipe()
            .atomic()
            .llen(processing_key)
            .lindex(pending_key, -1)
            .query_async(&mut *conn)
            .await?;
        Ok((len, tail))
    }

    /// Conditional pending→processing transition: moves `id` and drops its
    /// pending lease only if `id` is the current pending tail. Returns false
    /// when a concurrent admission won the tail first.
    pub(crate) async fn claim_if_tail(
        &self,
        pending_key: &str,
        processing_key: &str,
        pending_lock_key: &str,
        id: &str,
    ) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let moved: i64 = redis::Script::new(CLAIM_IF_TAIL)
            .key(pending_key)
            .key(processing_key)
            .key(pending_lock_key)
            .arg(id)
            .invoke_async(&mut *conn)
            .await?;
        Ok(moved == 1)
    }

    /// Unconditional transition used by the timeout escape: moves this job's
    /// own id regardless of its queue position.
    pub(crate) async fn force_claim(
        &self,
        pending_key: &str,
        processing_key: &str,
        pending_lock_key: &str,
        id: &str,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .lrem(pending_key, 1, id)
            .lpush(processing_key, id)
            .del(pending_lock_key)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Refreshes a lease key with a new TTL.
    pub(crate) async fn refresh_lock(&self, lock_key: &str, ttl_secs: u64) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(lock_key, "", ttl_secs).await?;
        Ok(())
    }

    /// Atomic removal of a waiting job: delete its pending lease and one
    /// occurrence of its id.
    pub(crate) async fn remove_pending(
        &self,
        lock_key: &str,
        list_key: &str,
        id: &str,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .del(lock_key)
            .lrem(list_key, 1, id)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Completion cleanup: remove the id from processing and delete its lease.
    pub(crate) async fn finish(
        &self,
        processing_key: &str,
        id: &str,
        lock_key: &str,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .lrem(processing_key, 1, id)
            .del(lock_key)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    /// Evicts stuck ids from a queue list in one transaction, removing all
    /// occurrences of each.
    pub(crate) async fn evict(&self, list_key: &str, ids: &[String]) -> QueueResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in ids {
            pipe.lrem(list_key, 0, id);
        }
        pipe.query_async::<()>(&mut *conn).await?;
        Ok(())
    }
}
