// SPDX-License-Identifier: MIT
//! Single-flight coalescing for identical in-flight requests.
//!
//! A pending-operations map keyed by request key. The first caller for a key
//! starts the work; every caller that arrives while it is pending awaits the
//! same shared future and receives a clone of the same outcome. The entry is
//! removed when the work completes (success or failure) so a later call
//! starts fresh — success caching is the caller's concern, not this map's.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::FederationError;

type Flight<V> = Shared<BoxFuture<'static, Result<V, FederationError>>>;

/// Coalesces concurrent identical requests into one underlying operation.
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, Flight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of operations currently pending.
    pub fn pending(&self) -> usize {
        self.inflight.lock().expect("single-flight map poisoned").len()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Run `work` for `key`, unless an identical request is already pending,
    /// in which case await that one instead.
    ///
    /// The map entry is cleared by the flight itself on completion, so the
    /// cleanup happens no matter which waiter drives the future to its end.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, FederationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FederationError>> + Send + 'static,
    {
        let flight = {
            let mut map = self.inflight.lock().expect("single-flight map poisoned");
            if let Some(existing) = map.get(&key) {
                existing.clone()
            } else {
                let map_handle = Arc::clone(&self.inflight);
                let cleanup_key = key.clone();
                let fut = work();
                let flight = async move {
                    let result = fut.await;
                    map_handle
                        .lock()
                        .expect("single-flight map poisoned")
                        .remove(&cleanup_key);
                    result
                }
                .boxed()
                .shared();
                map.insert(key, flight.clone());
                flight
            }
        };
        flight.await
    }
}
