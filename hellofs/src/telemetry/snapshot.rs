//! Point-in-time view of the session counters.

use std::fmt;
use std::time::Duration;

/// Copy of [`SessionMetrics`](super::SessionMetrics) at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub uptime: Duration,
    pub received: u64,
    pub replied: u64,
    pub errors: u64,
    pub abandoned: u64,
    pub unsupported: u64,
    pub interrupts: u64,
    pub forgets: u64,
    pub malformed: u64,
    pub bytes_read: u64,
}

impl TelemetrySnapshot {
    /// Requests answered per second of uptime.
    pub fn replies_per_second(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.replied as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of replies that carried an errno, in percent.
    pub fn error_rate_percent(&self) -> f64 {
        if self.replied == 0 {
            0.0
        } else {
            self.errors as f64 * 100.0 / self.replied as f64
        }
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Uptime:       {:.1}s", self.uptime.as_secs_f64())?;
        writeln!(f, "  Requests:     {}", self.received)?;
        writeln!(
            f,
            "  Replies:      {} ({} errors, {:.1}%)",
            self.replied,
            self.errors,
            self.error_rate_percent()
        )?;
        writeln!(f, "  Abandoned:    {}", self.abandoned)?;
        writeln!(f, "  Unsupported:  {}", self.unsupported)?;
        writeln!(f, "  Interrupts:   {}", self.interrupts)?;
        writeln!(f, "  Forgets:      {}", self.forgets)?;
        write!(f, "  Bytes read:   {}", self.bytes_read)
    }
}
