//! Redis key derivation for a queue's namespace.
//!
//! The layout is fixed so that independent processes (and other
//! implementations) sharing a `(prefix, id)` pair interoperate:
//!
//! - pending list: `{prefix}:{id}:pending`
//! - processing list: `{prefix}:{id}:processing`
//! - locks: `{list_key}:{job_id}:lock`

use std::fmt;

/// Which of the two queue lists a key or event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueSide {
    /// Jobs waiting for admission.
    Pending,
    /// Jobs currently executing.
    Processing,
}

impl QueueSide {
    /// Returns the list-key segment for this side.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueSide::Pending => "pending",
            QueueSide::Processing => "processing",
        }
    }
}

impl fmt::Display for QueueSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key builder for one queue's namespace.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    namespace: String,
}

impl QueueKeys {
    /// Create a key builder for `{prefix}:{id}`.
    pub fn new(prefix: &str, id: &str) -> Self {
        Self {
            namespace: format!("{}:{}", prefix, id),
        }
    }

    /// The shared `{prefix}:{id}` namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// List key for the given side.
    pub fn list(&self, side: QueueSide) -> String {
        format!("{}:{}", self.namespace, side.as_str())
    }

    /// Pending list key.
    pub fn pending(&self) -> String {
        self.list(QueueSide::Pending)
    }

    /// Processing list key.
    pub fn processing(&self) -> String {
        self.list(QueueSide::Processing)
    }

    /// Lease key for a job on the given side.
    pub fn lock(&self, side: QueueSide, job_id: &str) -> String {
        format!("{}:{}:lock", self.list(side), job_id)
    }

    /// Pending-side lease key.
    pub fn pending_lock(&self, job_id: &str) -> String {
        self.lock(QueueSide::Pending, job_id)
    }

    /// Processing-side lease key.
    pub fn processing_lock(&self, job_id: &str) -> String {
        self.lock(QueueSide::Processing, job_id)
    }

    /// Pattern covering every keyspace notification for this namespace.
    pub fn keyspace_pattern(&self) -> String {
        format!("__keyspace@0__:{}:*", self.namespace)
    }

    /// Strips the `__keyspace@<db>__:` channel prefix, returning the key the
    /// notification is about. Tolerates any database index.
    pub fn channel_key<'a>(&self, channel: &'a str) -> Option<&'a str> {
        let rest = channel.strip_prefix("__keyspace@")?;
        let (db, key) = rest.split_once("__:")?;
        if !db.is_empty() && db.bytes().all(|b| b.is_ascii_digit()) {
            Some(key)
        } else {
            None
        }
    }

    /// Strips the namespace from a key, returning the queue-relative part
    /// (e.g. `pending` or `processing:{job}:lock`).
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(self.namespace.as_str())?;
        rest.strip_prefix(':')
    }
}
