//! Tunables for one session.

use std::time::Duration;

use super::{ConfigError, ConfigResult};
use crate::wire::abi;

/// Default largest WRITE payload.
pub const DEFAULT_MAX_WRITE: u32 = 128 * 1024;

/// Smallest WRITE payload the kernel accepts.
pub const MIN_MAX_WRITE: u32 = 4096;

const PAGE_SIZE: u32 = 4096;

/// Negotiation parameters and timeouts for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest WRITE payload offered to the kernel.
    pub max_write: u32,

    /// Upper bound for readahead; the kernel's value is used when smaller.
    pub max_readahead: u32,

    /// Background requests the kernel may keep outstanding.
    pub max_background: u16,

    /// Background request count at which the kernel considers us congested.
    pub congestion_threshold: u16,

    /// Timestamp granularity in nanoseconds.
    pub time_gran: u32,

    /// Capability flags we ask for; intersected with what the kernel offers
    /// and what this layer supports.
    pub capabilities: u32,

    /// How long the kernel may cache name lookups.
    pub entry_ttl: Duration,

    /// How long the kernel may cache attributes.
    pub attr_ttl: Duration,

    /// How long unmount waits for in-flight handlers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_write: DEFAULT_MAX_WRITE,
            max_readahead: 128 * 1024,
            max_background: 12,
            congestion_threshold: 9,
            time_gran: 1,
            capabilities: abi::SUPPORTED_CAPABILITIES,
            entry_ttl: Duration::from_secs(1),
            attr_ttl: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_write(mut self, max_write: u32) -> Self {
        self.max_write = max_write;
        self
    }

    pub fn with_max_readahead(mut self, max_readahead: u32) -> Self {
        self.max_readahead = max_readahead;
        self
    }

    pub fn with_max_background(mut self, max_background: u16) -> Self {
        self.max_background = max_background;
        self
    }

    pub fn with_congestion_threshold(mut self, threshold: u16) -> Self {
        self.congestion_threshold = threshold;
        self
    }

    pub fn with_time_gran(mut self, time_gran: u32) -> Self {
        self.time_gran = time_gran;
        self
    }

    pub fn with_capabilities(mut self, capabilities: u32) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Pages per request implied by `max_write`.
    pub fn max_pages(&self) -> u16 {
        self.max_write.div_ceil(PAGE_SIZE).min(u16::MAX as u32) as u16
    }

    /// Reject settings the kernel would refuse.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_write < MIN_MAX_WRITE {
            return Err(ConfigError::Invalid(format!(
                "max_write must be at least {} bytes, got {}",
                MIN_MAX_WRITE, self.max_write
            )));
        }
        if self.max_background == 0 {
            return Err(ConfigError::Invalid(
                "max_background must be positive".to_string(),
            ));
        }
        if self.congestion_threshold > self.max_background {
            return Err(ConfigError::Invalid(format!(
                "congestion_threshold ({}) exceeds max_background ({})",
                self.congestion_threshold, self.max_background
            )));
        }
        Ok(())
    }
}
