//! Keyspace-event demultiplexing.
//!
//! One subscriber connection per queue listens to
//! `__keyspace@0__:{prefix}:{id}:*` and classifies each notification as a
//! lock expiry, a queue-list mutation, or noise. Classified events fan out
//! to every locally live coordinator over a bounded broadcast channel; each
//! coordinator decides whether to react.
//!
//! Delivery is a latency optimization, never a safety requirement: a dropped
//! or lagged event only delays the next reassessment until the periodic
//! timer fires.

use crate::error::{QueueError, QueueResult};
use crate::keys::{QueueKeys, QueueSide};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Broadcast capacity. Coordinators tolerate lag, so this only bounds memory.
const EVENT_BUFFER: usize = 64;

/// A classified keyspace notification relevant to this queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A job's lease expired: its owner is presumed dead.
    LockExpired { side: QueueSide, job_id: String },
    /// A queue list was mutated.
    QueueChanged { side: QueueSide },
}

/// List-mutation command names that signal a queue change.
const LIST_EVENTS: [&str; 5] = ["rpop", "lrem", "lpush", "rpush", "brpoplpush"];

/// Classifies one `(channel, event)` notification pair.
pub fn classify(channel: &str, event: &str, keys: &QueueKeys) -> Option<QueueEvent> {
    let key = keys.channel_key(channel)?;
    let rest = keys.relative(key)?;

    if event == "expired" {
        let body = rest.strip_suffix(":lock")?;
        if let Some(job_id) = body.strip_prefix("pending:") {
            return Some(QueueEvent::LockExpired {
                side: QueueSide::Pending,
                job_id: job_id.to_string(),
            });
        }
        if let Some(job_id) = body.strip_prefix("processing:") {
            return Some(QueueEvent::LockExpired {
                side: QueueSide::Processing,
                job_id: job_id.to_string(),
            });
        }
        return None;
    }

    if LIST_EVENTS.contains(&event) {
        let side = match rest {
            "pending" => QueueSide::Pending,
            "processing" => QueueSide::Processing,
            _ => return None,
        };
        return Some(QueueEvent::QueueChanged { side });
    }

    None
}

/// Fan-out point between the subscriber task and coordinators.
pub(crate) struct EventHub {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    fn sender(&self) -> broadcast::Sender<QueueEvent> {
        self.tx.clone()
    }
}

/// Opens the dedicated subscriber connection and spawns the demux task.
/// Returns once the pattern subscription is established, so events for keys
/// touched afterwards are not missed. Keyspace notifications themselves are
/// enabled at queue construction.
pub(crate) async fn start_subscriber(
    url: &str,
    keys: &QueueKeys,
    hub: &EventHub,
) -> QueueResult<JoinHandle<()>> {
    let client = redis::Client::open(url)
        .map_err(|e| QueueError::Subscribe(format!("invalid Redis URL: {}", e)))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| QueueError::Subscribe(format!("pubsub connect failed: {}", e)))?;
    pubsub
        .psubscribe(keys.keyspace_pattern())
        .await
        .map_err(|e| QueueError::Subscribe(format!("psubscribe failed: {}", e)))?;

    debug!(pattern = %keys.keyspace_pattern(), "subscribed to keyspace events");

    let keys = keys.clone();
    let tx = hub.sender();
    let handle = tokio::spawn(async move {
        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            let channel = msg.get_channel_name().to_string();
            let event: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    debug!(channel = %channel, error = %e, "unreadable keyspace event");
                    continue;
                }
            };
            if let Some(ev) = classify(&channel, &event, &keys) {
                // No receivers is normal between submits.
                let _ = tx.send(ev);
            }
        }
        warn!("keyspace event stream ended");
    });

    Ok(handle)
}
