//! Session telemetry.
//!
//! Lock-free counters updated by the dispatcher and its request tasks, read
//! as point-in-time snapshots.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher / tasks ─────► SessionMetrics ─────► TelemetrySnapshot ─────► CLI summary
//!                           (atomic counters)     (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hellofs::telemetry::SessionMetrics;
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(SessionMetrics::new());
//! metrics.request_received();
//! metrics.reply_sent(false);
//!
//! let snapshot = metrics.snapshot();
//! println!("Replies: {}", snapshot.replied);
//! ```

mod metrics;
mod snapshot;

pub use metrics::SessionMetrics;
pub use snapshot::TelemetrySnapshot;
