use std::fmt;
use std::sync::atomic::AtomicUsize;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::RunnerError;

/// Mutable state shared by every unit of a single run.
///
/// One instance exists per run. It is created when the run starts, shared
/// with the spawned unit tasks, and torn down when the run returns; nothing
/// in here outlives the run.
pub(crate) struct RunContext<T, E> {
  pub(crate) run_id: u64,
  /// One-shot, irreversible cancellation signal for this run. Units observe
  /// it cooperatively; it is never used to interrupt a unit mid-flight.
  pub(crate) scope: CancellationToken,
  /// Successful results, in completion order. Order across units is not
  /// defined; completeness is, because every merge happens under this lock.
  accumulator: Mutex<Vec<T>>,
  /// Single-assignment slot for the run's failure. The first claimant wins.
  first_error: Mutex<Option<RunnerError<E>>>,
  /// Units that invoked their work function.
  pub(crate) executed: AtomicUsize,
  /// Units skipped because the scope was already cancelled at admission.
  pub(crate) skipped: AtomicUsize,
}

impl<T, E> RunContext<T, E> {
  pub(crate) fn new(run_id: u64, unit_count: usize) -> Self {
    Self {
      run_id,
      scope: CancellationToken::new(),
      accumulator: Mutex::new(Vec::with_capacity(unit_count)),
      first_error: Mutex::new(None),
      executed: AtomicUsize::new(0),
      skipped: AtomicUsize::new(0),
    }
  }

  /// Records a successful result.
  ///
  /// Merging does not re-check the scope: a unit that was already past its
  /// cancellation check when a sibling failed has done the work, and its
  /// result is recorded anyway. On a failed run the accumulator is
  /// discarded, so the late merge is visible only to completion handlers
  /// and the executed counter.
  pub(crate) fn merge(&self, index: usize, value: T) {
    let mut results = self.accumulator.lock();
    results.push(value);
    trace!(run_id = self.run_id, index, collected = results.len(), "Merged unit result.");
  }

  /// Claims the first-error slot with `error` and cancels the scope.
  ///
  /// Exactly one caller wins; the losers have their errors logged here and
  /// dropped. This is the documented lossy-error policy, not an accident.
  pub(crate) fn fail(&self, error: RunnerError<E>)
  where
    E: fmt::Debug,
  {
    let mut slot = self.first_error.lock();
    if slot.is_none() {
      debug!(run_id = self.run_id, error = ?error, "Recording first failure; cancelling the run scope.");
      *slot = Some(error);
      drop(slot);
      self.scope.cancel();
    } else {
      debug!(run_id = self.run_id, dropped = ?error, "Unit failed after the run was already failing; dropping its error.");
    }
  }

  /// Consumes the collected state after every unit has settled. Called
  /// exactly once per run.
  pub(crate) fn take_outcome(&self) -> Result<Vec<T>, RunnerError<E>> {
    if let Some(error) = self.first_error.lock().take() {
      return Err(error);
    }
    Ok(std::mem::take(&mut *self.accumulator.lock()))
  }
}
