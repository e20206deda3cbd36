// crates/core/src/registry.rs
//! Central registry of currently-executing analysis requests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::token::CancellationToken;

/// Unique identifier for a registered request.
pub type RequestId = String;

/// Registry entry for one in-flight request. Owned exclusively by the
/// registry; exposed only through snapshots and token-state queries.
struct ActiveRequest {
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Read-only snapshot of one active request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub id: RequestId,
    pub started_at: String,
    pub cancelled: bool,
}

/// Process-wide table of active requests and their cancellation tokens.
///
/// Thread-safe via `Arc` wrapping. An entry is inserted when a request
/// starts and removed by the caller once its run terminates; `cancel` only
/// flips the token, leaving removal to the owner of the run.
///
/// A single mutex guards the map. No operation holds it across a blocking
/// external call (cancelling a token is a plain atomic store), and
/// `cancel_all` snapshots and cancels inside one critical section so a
/// racing `register` lands either fully before or fully after it.
pub struct RequestRegistry {
    active: Mutex<HashMap<RequestId, ActiveRequest>>,
}

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new request and return its id and cancellation token.
    ///
    /// A caller-supplied id must not collide with a currently-active one;
    /// when no id is given the registry generates a UUID unique among active
    /// entries. The returned token is a clone of the one kept in the entry,
    /// so cancellation through the registry is visible to the run.
    pub fn register(
        &self,
        id: Option<String>,
    ) -> Result<(RequestId, CancellationToken), RegistryError> {
        let mut active = self.lock();

        let id = match id {
            Some(id) => {
                if active.contains_key(&id) {
                    return Err(RegistryError::Conflict { id });
                }
                id
            }
            None => {
                // Generated ids must be unique among active entries.
                let mut id = Uuid::new_v4().to_string();
                while active.contains_key(&id) {
                    id = Uuid::new_v4().to_string();
                }
                id
            }
        };

        let token = CancellationToken::new();
        active.insert(
            id.clone(),
            ActiveRequest {
                token: token.clone(),
                started_at: Utc::now(),
            },
        );
        tracing::debug!(request_id = %id, "request registered");

        Ok((id, token))
    }

    /// Remove a request from the registry. No-op if the id is not active.
    pub fn unregister(&self, id: &str) {
        if self.lock().remove(id).is_some() {
            tracing::debug!(request_id = %id, "request unregistered");
        }
    }

    /// Request cancellation of an active request.
    ///
    /// Returns `true` if the id was active and its token is now cancelled,
    /// `false` otherwise. The entry stays in the registry until the running
    /// pipeline observes the flag and its owner unregisters.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock().get(id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::debug!(request_id = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every currently-active request and return how many there were.
    ///
    /// The snapshot and the cancels happen under one lock acquisition, so a
    /// request registered concurrently is either cancelled and counted or
    /// untouched, never half of each.
    pub fn cancel_all(&self) -> usize {
        let active = self.lock();
        for entry in active.values() {
            entry.token.cancel();
        }
        let count = active.len();
        if count > 0 {
            tracing::info!(count, "cancelled all active requests");
        }
        count
    }

    /// Ids of all active requests. Order is unspecified.
    pub fn active_ids(&self) -> Vec<RequestId> {
        self.lock().keys().cloned().collect()
    }

    /// Number of active requests.
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Read-only snapshots of all active requests.
    pub fn snapshot(&self) -> Vec<RequestInfo> {
        self.lock()
            .iter()
            .map(|(id, entry)| RequestInfo {
                id: id.clone(),
                started_at: entry.started_at.to_rfc3339(),
                cancelled: entry.token.is_cancelled(),
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, ActiveRequest>> {
        // The map itself is always valid, so recover it if a panicking
        // holder poisoned the mutex.
        self.active.lock().unwrap_or_else(|poisoned| {
            tracing::error!("registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
