use std::time::Duration;

use thiserror::Error;

/// Configuration rejected before any unit is scheduled.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
  #[error("concurrency limit must be greater than zero")]
  ZeroConcurrencyLimit,
}

/// The failure a run terminates with.
///
/// A run reports at most one of these: the first failure to claim the
/// run's error slot. Failures from sibling units that lose that race are
/// logged and dropped, never surfaced to the caller.
#[derive(Error, Debug, PartialEq)]
pub enum RunnerError<E> {
  /// A work unit returned an error. `index` is the unit's position in the
  /// submitted batch.
  #[error("work unit {index} failed: {error}")]
  UnitFailed { index: usize, error: E },

  /// A work unit panicked. The panic is contained by the runner and
  /// reported as a normal failure of that unit.
  #[error("work unit {index} panicked during execution")]
  UnitPanicked { index: usize },

  /// The caller-supplied overall deadline elapsed before every unit
  /// settled. Propagates exactly like a unit failure.
  #[error("run exceeded its overall deadline of {0:?}")]
  DeadlineExceeded(Duration),
}
