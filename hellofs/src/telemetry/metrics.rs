//! Atomic session counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::TelemetrySnapshot;

/// Counters for one session.
#[derive(Debug)]
pub struct SessionMetrics {
    started: Instant,
    received: AtomicU64,
    replied: AtomicU64,
    errors: AtomicU64,
    abandoned: AtomicU64,
    unsupported: AtomicU64,
    interrupts: AtomicU64,
    forgets: AtomicU64,
    malformed: AtomicU64,
    bytes_read: AtomicU64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            received: AtomicU64::new(0),
            replied: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            unsupported: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            forgets: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
        }
    }

    pub fn request_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A reply was written; `error` when it carried an errno.
    pub fn reply_sent(&self, error: bool) {
        self.replied.fetch_add(1, Ordering::Relaxed);
        if error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A finished handler's reply was discarded.
    pub fn reply_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsupported(&self) {
        self.unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forgets(&self, count: u64) {
        self.forgets.fetch_add(count, Ordering::Relaxed);
    }

    /// A frame that could not be decoded.
    pub fn malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            uptime: self.started.elapsed(),
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            forgets: self.forgets.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new();
        metrics.request_received();
        metrics.request_received();
        metrics.reply_sent(false);
        metrics.reply_sent(true);
        metrics.reply_abandoned();
        metrics.forgets(3);
        metrics.bytes_read(5);

        let snap = metrics.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.replied, 2);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.abandoned, 1);
        assert_eq!(snap.forgets, 3);
        assert_eq!(snap.bytes_read, 5);
        assert_eq!(snap.unsupported, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = Arc::new(SessionMetrics::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.request_received();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(metrics.snapshot().received, 4000);
    }
}
