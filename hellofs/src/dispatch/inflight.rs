//! Registry of requests whose handlers are still running.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Maps request unique ids to the token their handler observes.
///
/// Cancelling a token marks the request abandoned: the handler may notice
/// through its context, and whatever it returns is not written back.
#[derive(Debug, Default)]
pub struct InFlight {
    requests: DashMap<u64, CancellationToken>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `unique` and return the token for its handler.
    pub fn register(&self, unique: u64) -> CancellationToken {
        let token = CancellationToken::new();
        self.requests.insert(unique, token.clone());
        token
    }

    /// Remove `unique` once its handler has finished.
    pub fn complete(&self, unique: u64) {
        self.requests.remove(&unique);
    }

    /// Mark `unique` abandoned. Returns `false` if it is not in flight.
    pub fn abandon(&self, unique: u64) -> bool {
        match self.requests.get(&unique) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Mark every in-flight request abandoned. Returns how many there were.
    pub fn abandon_all(&self) -> usize {
        let mut count = 0;
        for entry in self.requests.iter() {
            entry.value().cancel();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
