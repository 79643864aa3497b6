use crate::completion::{self, CompletionDispatcher, CompletionHandler, UnitCompletionInfo, UnitCompletionStatus};
use crate::context::RunContext;
use crate::error::{ConfigError, RunnerError};
use crate::limiter::ConcurrencyLimiter;
use crate::work::WorkUnit;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use futures::FutureExt;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The terminal result of an entire run: every collected result on full
/// success, or the first failure with the partial results discarded.
pub type RunOutcome<T, E> = Result<Vec<T>, RunnerError<E>>;

/// Executes batches of fallible work units under a fixed concurrency limit.
///
/// A run admits at most `concurrency_limit` units at a time, collects every
/// successful result, and cancels remaining work as soon as any unit fails.
/// Cancellation is cooperative: units that have not started are skipped,
/// units already in flight run to completion and are expected to observe
/// the token they were given. The runner is reusable; each call to
/// [`TaskRunner::run`] is an independent run with its own cancellation
/// scope, accumulator and error slot.
#[derive(Clone)]
pub struct TaskRunner {
  runner_name: Arc<String>,
  limiter: ConcurrencyLimiter,
  tokio_handle: TokioHandle,
  /// Units currently between admission and settlement, keyed by
  /// `(run_id, index)`, with the instant they were admitted.
  active_units: Arc<DashMap<(u64, usize), Instant>>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
}

impl TaskRunner {
  /// Creates a runner named `runner_name` that admits at most
  /// `concurrency_limit` units at a time, spawning them on `tokio_handle`.
  ///
  /// Fails fast with [`ConfigError::ZeroConcurrencyLimit`] before anything
  /// is scheduled when the limit is zero.
  pub fn new(
    concurrency_limit: usize,
    tokio_handle: TokioHandle,
    runner_name: &str,
  ) -> Result<Arc<Self>, ConfigError> {
    let limiter = ConcurrencyLimiter::new(concurrency_limit)?;
    info!(runner_name, concurrency_limit, "Created task runner.");
    Ok(Arc::new(Self {
      runner_name: Arc::new(runner_name.to_string()),
      limiter,
      tokio_handle,
      active_units: Arc::new(DashMap::new()),
      handlers: Arc::new(RwLock::new(Vec::new())),
    }))
  }

  pub fn name(&self) -> &str {
    &self.runner_name
  }

  pub fn concurrency_limit(&self) -> usize {
    self.limiter.capacity()
  }

  /// Number of units currently holding a permit, across all in-flight runs.
  pub fn active_unit_count(&self) -> usize {
    self.active_units.len()
  }

  /// Permits currently held. Returns to zero once every run has settled,
  /// whatever mix of success, failure and panics the units produced.
  pub fn outstanding_permits(&self) -> usize {
    self.limiter.outstanding()
  }

  /// Registers a handler invoked once per unit per run with that unit's
  /// terminal status. Handlers run on a per-run dispatch worker; a
  /// panicking handler is contained and logged, and a handler registered
  /// mid-run only applies to runs started afterwards.
  pub fn add_completion_handler(&self, handler: impl Fn(UnitCompletionInfo) + Send + Sync + 'static) {
    let mut handlers_guard = self.handlers.write().unwrap();
    handlers_guard.push(Arc::new(handler));
    debug!(runner = %self.runner_name, handler_count = handlers_guard.len(), "Registered completion handler.");
  }

  /// Runs `units` to settlement and collects their results.
  ///
  /// Returns `Ok` with all results (in completion order, which is
  /// unspecified across units) when every unit succeeds, or the first
  /// failure by completion order, with the partial results discarded.
  /// An empty batch returns `Ok(vec![])` immediately. A unit that finishes
  /// successfully after a sibling's failure cancelled the run still has its
  /// result merged and reports `Succeeded` to completion handlers.
  pub async fn run<T, E>(&self, units: Vec<WorkUnit<T, E>>) -> RunOutcome<T, E>
  where
    T: Send + 'static,
    E: Send + fmt::Debug + 'static,
  {
    self.run_internal(units, None).await
  }

  /// Same as [`TaskRunner::run`], bounded by an overall deadline.
  ///
  /// A deadline that elapses before every unit settles behaves exactly like
  /// a first failure: the scope is cancelled and the outcome is
  /// [`RunnerError::DeadlineExceeded`]. In-flight units are still awaited
  /// cooperatively, so a unit that ignores its token delays the return
  /// past the deadline.
  pub async fn run_with_deadline<T, E>(
    &self,
    units: Vec<WorkUnit<T, E>>,
    deadline: Duration,
  ) -> RunOutcome<T, E>
  where
    T: Send + 'static,
    E: Send + fmt::Debug + 'static,
  {
    self.run_internal(units, Some(deadline)).await
  }

  async fn run_internal<T, E>(
    &self,
    units: Vec<WorkUnit<T, E>>,
    deadline: Option<Duration>,
  ) -> RunOutcome<T, E>
  where
    T: Send + 'static,
    E: Send + fmt::Debug + 'static,
  {
    let run_id = NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let unit_count = units.len();
    info!(
      runner = %self.runner_name,
      run_id,
      unit_count,
      concurrency_limit = self.limiter.capacity(),
      deadline = ?deadline,
      "Starting run."
    );

    if unit_count == 0 {
      return Ok(Vec::new());
    }

    let ctx = Arc::new(RunContext::<T, E>::new(run_id, unit_count));
    let handlers_snapshot = self.handlers.read().unwrap().clone();
    let dispatcher = CompletionDispatcher::spawn(handlers_snapshot, &self.tokio_handle, self.runner_name.clone());
    let completion_tx = dispatcher.as_ref().map(|d| d.sender());

    let mut unit_handles = Vec::with_capacity(unit_count);
    for (index, work) in units.into_iter().enumerate() {
      let ctx = ctx.clone();
      let limiter = self.limiter.clone();
      let active_units = self.active_units.clone();
      let completion_tx = completion_tx.clone();
      let runner_name = self.runner_name.clone();

      let unit_task = async move {
        // Admission: wait for a permit unless the run is already cancelled.
        // A unit that never gets past this point is skipped, not failed.
        let permit = tokio::select! {
          biased;

          _ = ctx.scope.cancelled() => {
            trace!(run_id, index, "Run cancelled while unit awaited admission; skipping it.");
            ctx.skipped.fetch_add(1, AtomicOrdering::Relaxed);
            completion::report(&completion_tx, run_id, index, UnitCompletionStatus::SkippedCancelled).await;
            return;
          }

          admitted = limiter.admit() => {
            match admitted {
              Ok(permit) => permit,
              Err(_) => {
                error!(runner = %runner_name, run_id, index, "Limiter semaphore closed unexpectedly; skipping unit.");
                ctx.skipped.fetch_add(1, AtomicOrdering::Relaxed);
                completion::report(&completion_tx, run_id, index, UnitCompletionStatus::SkippedCancelled).await;
                return;
              }
            }
          }
        };

        // Held for the unit's whole active window; dropped on every exit
        // path below, including a panic inside the work future.
        let _permit_guard = permit;

        // The scope may have fired between admission and here.
        if ctx.scope.is_cancelled() {
          trace!(run_id, index, "Run cancelled after admission, before execution; skipping unit.");
          ctx.skipped.fetch_add(1, AtomicOrdering::Relaxed);
          completion::report(&completion_tx, run_id, index, UnitCompletionStatus::SkippedCancelled).await;
          return;
        }

        ctx.executed.fetch_add(1, AtomicOrdering::Relaxed);
        active_units.insert((run_id, index), Instant::now());
        trace!(run_id, index, "Unit admitted; invoking work function.");

        // The work future is awaited to completion even if the scope fires
        // mid-flight. Observing the token is the work function's job; the
        // runner never interrupts a unit forcibly.
        let unit_outcome = AssertUnwindSafe((work)(ctx.scope.child_token())).catch_unwind().await;

        active_units.remove(&(run_id, index));

        let status = match unit_outcome {
          Ok(Ok(value)) => {
            trace!(run_id, index, "Unit succeeded.");
            ctx.merge(index, value);
            UnitCompletionStatus::Succeeded
          }
          Ok(Err(unit_error)) => {
            debug!(run_id, index, error = ?unit_error, "Unit failed.");
            ctx.fail(RunnerError::UnitFailed { index, error: unit_error });
            UnitCompletionStatus::Failed
          }
          Err(_panic_payload) => {
            error!(runner = %runner_name, run_id, index, "Unit panicked during execution.");
            ctx.fail(RunnerError::UnitPanicked { index });
            UnitCompletionStatus::Panicked
          }
        };
        completion::report(&completion_tx, run_id, index, status).await;
      };

      unit_handles.push(
        self
          .tokio_handle
          .spawn(unit_task.instrument(info_span!("work_unit", runner = %self.runner_name, run_id, index))),
      );
    }
    // This scope's sender clones were moved into the unit tasks; dropping
    // ours now lets the dispatch queue close once every unit has settled.
    drop(completion_tx);

    let mut settle = pin!(join_all(unit_handles));
    let join_results = match deadline {
      Some(limit) => match tokio::time::timeout(limit, settle.as_mut()).await {
        Ok(results) => results,
        Err(_elapsed) => {
          warn!(runner = %self.runner_name, run_id, "Overall deadline of {:?} elapsed; failing the run and cancelling its scope.", limit);
          ctx.fail(RunnerError::DeadlineExceeded(limit));
          for entry in self.active_units.iter() {
            let (entry_run_id, entry_index) = *entry.key();
            if entry_run_id == run_id {
              warn!(
                run_id,
                index = entry_index,
                elapsed_ms = entry.value().elapsed().as_millis() as u64,
                "Unit still in flight past the deadline; awaiting its cooperative settlement."
              );
            }
          }
          settle.await
        }
      },
      None => settle.await,
    };

    for join_result in join_results {
      if let Err(join_error) = join_result {
        // Unit panics are caught inside the task, so a join error means the
        // task itself was torn down by the runtime.
        error!(runner = %self.runner_name, run_id, "Unit task failed to join: {:?}", join_error);
      }
    }

    if let Some(dispatcher) = dispatcher {
      dispatcher.shutdown(&self.runner_name).await;
    }

    let executed = ctx.executed.load(AtomicOrdering::Relaxed);
    let skipped = ctx.skipped.load(AtomicOrdering::Relaxed);
    let outcome = ctx.take_outcome();
    match &outcome {
      Ok(results) => {
        info!(
          runner = %self.runner_name,
          run_id,
          executed,
          skipped,
          collected = results.len(),
          "Run completed successfully."
        );
      }
      Err(run_error) => {
        info!(
          runner = %self.runner_name,
          run_id,
          executed,
          skipped,
          error = ?run_error,
          "Run failed; first failure reported, remaining work was cancelled."
        );
      }
    }
    outcome
  }
}
