//
// src/proxy/pool.rs
//

use super::backend::BackendAddress;
use crate::health::ProbeOutcome;
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("backend pool is empty")]
    Empty,
}

#[derive(Debug)]
struct PoolState {
    addresses: Vec<BackendAddress>,
    cursor: usize,
}

/// Ordered backend list plus round-robin cursor, guarded as one unit.
///
/// Callers only get the atomic operations below; the list itself is never
/// handed out, so nothing iterates it without holding the lock.
#[derive(Debug)]
pub struct BackendPool {
    state: Mutex<PoolState>,
}

impl BackendPool {
    /// Builds the pool. An empty list is a configuration error.
    pub fn new<I, A>(addresses: I) -> Result<Self, PoolError>
    where
        I: IntoIterator<Item = A>,
        A: Into<BackendAddress>,
    {
        let addresses: Vec<BackendAddress> = addresses.into_iter().map(Into::into).collect();
        if addresses.is_empty() {
            return Err(PoolError::Empty);
        }

        Ok(Self {
            state: Mutex::new(PoolState {
                addresses,
                cursor: 0,
            }),
        })
    }

    /// Returns the backend under the cursor and advances it.
    ///
    /// A cursor at or past the end (the pool may have shrunk since it was
    /// last advanced) wraps to 0 before it is used.
    pub async fn pick_next(&self) -> Result<BackendAddress, PoolError> {
        let mut state = self.state.lock().await;
        if state.addresses.is_empty() {
            return Err(PoolError::Empty);
        }
        if state.cursor >= state.addresses.len() {
            state.cursor = 0;
        }

        let picked = state.addresses[state.cursor].clone();
        state.cursor += 1;
        Ok(picked)
    }

    /// Members paired with their current position, for one probing round.
    pub async fn snapshot(&self) -> Vec<(usize, BackendAddress)> {
        let state = self.state.lock().await;
        state.addresses.iter().cloned().enumerate().collect()
    }

    /// Removes every position reported unhealthy, as one batch.
    ///
    /// Positions refer to the snapshot the round probed. They are marked
    /// first and compacted in a single pass, so batch order never shifts
    /// another pending removal. Returns the removed addresses in pool order.
    pub async fn sweep(&self, outcomes: &[ProbeOutcome]) -> Vec<BackendAddress> {
        let mut state = self.state.lock().await;

        let mut doomed = HashSet::new();
        for outcome in outcomes.iter().filter(|o| !o.status.is_healthy()) {
            match state.addresses.get(outcome.position) {
                Some(current) if *current == outcome.address => {
                    doomed.insert(outcome.position);
                }
                current => {
                    tracing::warn!(
                        position = outcome.position,
                        probed = %outcome.address,
                        current = ?current,
                        "stale probe outcome ignored"
                    );
                }
            }
        }

        if doomed.is_empty() {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(doomed.len());
        let mut kept = Vec::with_capacity(state.addresses.len() - doomed.len());
        for (position, address) in state.addresses.drain(..).enumerate() {
            if doomed.contains(&position) {
                removed.push(address);
            } else {
                kept.push(address);
            }
        }
        state.addresses = kept;

        removed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.addresses.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.addresses.is_empty()
    }

    /// Copy of the current members, in round-robin order.
    pub async fn addresses(&self) -> Vec<BackendAddress> {
        self.state.lock().await.addresses.clone()
    }
}
