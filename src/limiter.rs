use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::error::ConfigError;

/// Counting admission gate bounding how many work units may be active at
/// once.
///
/// A permit is held for a unit's whole active window. Permits are RAII
/// guards, so release happens exactly once on every exit path, including a
/// panic inside the work future.
#[derive(Clone, Debug)]
pub(crate) struct ConcurrencyLimiter {
  capacity: usize,
  semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
  /// A zero capacity would admit nothing and hang every run, so it is
  /// rejected here rather than clamped.
  pub(crate) fn new(capacity: usize) -> Result<Self, ConfigError> {
    if capacity == 0 {
      return Err(ConfigError::ZeroConcurrencyLimit);
    }
    Ok(Self {
      capacity,
      semaphore: Arc::new(Semaphore::new(capacity)),
    })
  }

  /// Waits until fewer than `capacity` permits are outstanding, then grants
  /// one. Fails only if the semaphore was closed, which the runner never
  /// does; the caller is expected to bail out with a log line in that case.
  pub(crate) async fn admit(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
    self.semaphore.clone().acquire_owned().await
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of permits currently held by active units.
  pub(crate) fn outstanding(&self) -> usize {
    self.capacity - self.semaphore.available_permits()
  }
}
