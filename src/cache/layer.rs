//! Cache layer that memoizes producer results through a storage backend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::storage::CacheStorage;

type FlightMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Read-through/write-through cache over a [`CacheStorage`].
///
/// Only successful producer results are stored. With single-flight enabled,
/// concurrent callers for the same identity wait for the first producer
/// instead of racing it.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  flights: Option<FlightMap>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      flights: Some(FlightMap::default()),
    }
  }

  /// Enable or disable the per-identity single-flight guard.
  ///
  /// Without it, two callers missing on the same identity both run their
  /// producer and the last write wins.
  pub fn with_single_flight(mut self, enabled: bool) -> Self {
    self.flights = enabled.then(FlightMap::default);
    self
  }

  pub fn storage(&self) -> &dyn CacheStorage {
    self.storage.as_ref()
  }

  /// Return the cached payload for `identity`, or run `producer` and cache
  /// its result.
  ///
  /// A producer error is returned as-is and nothing is written.
  pub async fn remember<F, Fut, E>(&self, identity: &str, producer: F) -> Result<Vec<u8>, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<u8>, E>>,
  {
    if let Some(hit) = self.storage.get(identity) {
      debug!(identity, "cache hit");
      return Ok(hit);
    }

    let _flight = match &self.flights {
      Some(flights) => {
        let guard = Flight::join(flights, identity).await;
        // Whoever held the flight before us may have filled the entry.
        if let Some(hit) = self.storage.get(identity) {
          debug!(identity, "cache hit after waiting on in-flight producer");
          return Ok(hit);
        }
        Some(guard)
      }
      None => None,
    };

    debug!(identity, "cache miss");
    let payload = producer().await?;
    self.storage.set(identity, &payload);
    Ok(payload)
  }
}

/// Holds the per-identity lock for the duration of one producer call.
struct Flight {
  identity: String,
  flights: FlightMap,
  _guard: OwnedMutexGuard<()>,
}

impl Flight {
  async fn join(flights: &FlightMap, identity: &str) -> Self {
    let lock = {
      let mut map = flights.lock().unwrap_or_else(PoisonError::into_inner);
      Arc::clone(map.entry(identity.to_string()).or_default())
    };

    Self {
      identity: identity.to_string(),
      flights: Arc::clone(flights),
      _guard: lock.lock_owned().await,
    }
  }
}

impl Drop for Flight {
  fn drop(&mut self) {
    let mut map = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
    // One reference in the map plus the one held by our guard: no waiters.
    if map
      .get(&self.identity)
      .is_some_and(|lock| Arc::strong_count(lock) <= 2)
    {
      map.remove(&self.identity);
    }
  }
}
