//! Oraq - Distributed Job Coordination over Redis
//!
//! A library for bounding concurrency across many independent worker
//! processes, possibly on different hosts, that share state through Redis
//! lists, TTL'd lease keys and keyspace notifications:
//!
//! - Two-queue state machine (pending → processing) with an atomic,
//!   race-checked admission transition
//! - Lease / keep-alive scheme so crashed workers are detected by peers
//! - Stuck-job sweeping that reclaims ids whose lease has expired
//! - Event-driven wake-ups from keyspace notifications, with a periodic
//!   reassessment fallback so lost events never stall the queue
//! - A global wait timeout that bounds time-to-admission even when the
//!   queue misbehaves
//!
//! # Architecture
//!
//! ```text
//!  worker A                 worker B                 worker C
//!  ┌──────────────┐         ┌──────────────┐         ┌──────────────┐
//!  │ Queue::submit│         │ Queue::submit│         │ Queue::submit│
//!  │  Coordinator │         │  Coordinator │         │  Coordinator │
//!  └──────┬───────┘         └──────┬───────┘         └──────┬───────┘
//!         │   commands + keyspace events (2 connections each)│
//!         └───────────────┬────────┴───────────┬─────────────┘
//!                         ▼                    ▼
//!             {prefix}:{id}:pending   {prefix}:{id}:processing
//!             + per-job ":lock" lease keys with TTL
//! ```
//!
//! Admission is cooperative: each waiting worker independently assesses
//! `len(processing) < concurrency && tail(pending) == my id` against an
//! atomic snapshot, and the pending→processing move itself re-checks the
//! tail inside Redis, so races between workers resolve in the store.
//!
//! # Example
//!
//! ```rust,ignore
//! use oraq::{Queue, QueueConfig, SubmitOptions};
//!
//! let queue = Queue::new(QueueConfig {
//!     id: "renders".into(),
//!     concurrency: 4,
//!     ..QueueConfig::default()
//! })
//! .await?;
//!
//! let output = queue
//!     .submit(
//!         |data| async move { render(data).await },
//!         SubmitOptions::new().job_data(serde_json::json!({"frame": 42})),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod queue;

mod coordinator;
mod ids;
mod store;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use events::QueueEvent;
pub use keys::{QueueKeys, QueueSide};
pub use queue::{Queue, QueueStats, SubmitOptions};
