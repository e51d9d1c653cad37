//! Keyed single-flight execution.
//!
//! Concurrent callers asking for the same key share one in-progress future
//! instead of each starting their own. The entry is removed when the shared
//! future completes, so the next call after that starts fresh.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type Flights<K, T> = Arc<Mutex<HashMap<K, Shared<BoxFuture<'static, T>>>>>;

pub struct SingleFlight<K, T> {
    inflight: Flights<K, T>,
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `make()` for `key`, or join the call already running for it.
    ///
    /// `make` is only invoked when no call is in flight.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let shared = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(&key) {
                Some(existing) => {
                    debug!(?key, "Joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let owned_key = key.clone();
                    let work = make();
                    let shared = async move {
                        let output = work.await;
                        lock(&registry).remove(&owned_key);
                        output
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.inflight).contains_key(key)
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<K, T>(flights: &Flights<K, T>) -> MutexGuard<'_, HashMap<K, Shared<BoxFuture<'static, T>>>> {
    flights.lock().unwrap_or_else(PoisonError::into_inner)
}
