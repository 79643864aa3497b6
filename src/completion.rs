use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use fibre::mpsc::{
  RecvError, UnboundedAsyncReceiver as AsyncReceiver, UnboundedAsyncSender as AsyncSender,
};
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Terminal state a unit reached, as reported to completion handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCompletionStatus {
  /// The unit ran and returned `Ok`.
  Succeeded,
  /// The unit ran and returned `Err`.
  Failed,
  /// The unit panicked; the panic was contained by the runner.
  Panicked,
  /// The unit never ran: the run was already cancelled when the unit
  /// reached admission.
  SkippedCancelled,
}

/// Snapshot handed to completion handlers, one per unit per run.
#[derive(Debug, Clone)]
pub struct UnitCompletionInfo {
  pub run_id: u64,
  pub runner_name: Arc<String>,
  pub index: usize,
  pub status: UnitCompletionStatus,
  pub completion_time: SystemTime,
}

pub(crate) type CompletionHandler = Arc<dyn Fn(UnitCompletionInfo) + Send + Sync + 'static>;

/// Internal event produced by unit tasks; stamped with wall-clock time when
/// it is dispatched to handlers.
#[derive(Debug)]
pub(crate) struct CompletionMessage {
  pub(crate) run_id: u64,
  pub(crate) index: usize,
  pub(crate) status: UnitCompletionStatus,
}

/// Sends a completion event, when a dispatcher is attached to the run.
/// Delivery is best-effort: a closed queue costs a warning, never the run.
pub(crate) async fn report(
  tx: &Option<AsyncSender<CompletionMessage>>,
  run_id: u64,
  index: usize,
  status: UnitCompletionStatus,
) {
  if let Some(tx) = tx {
    let mut tx = tx.clone();
    let message = CompletionMessage { run_id, index, status };
    if tx.send(message).await.is_err() {
      warn!(run_id, index, "Completion queue closed; dropping completion event.");
    }
  }
}

/// Run-scoped worker that fans unit completion events out to the runner's
/// registered handlers.
///
/// The worker drains its queue until every sender is gone, so events from
/// late-finishing units are still delivered before the run returns.
pub(crate) struct CompletionDispatcher {
  tx: AsyncSender<CompletionMessage>,
  worker: JoinHandle<()>,
}

impl CompletionDispatcher {
  /// Spawns the dispatch worker. Returns `None` when no handlers are
  /// registered, in which case units skip event reporting entirely.
  pub(crate) fn spawn(
    handlers: Vec<CompletionHandler>,
    tokio_handle: &TokioHandle,
    runner_name: Arc<String>,
  ) -> Option<Self> {
    if handlers.is_empty() {
      return None;
    }
    let (tx, rx) = fibre::mpsc::unbounded_async();
    let worker = tokio_handle.spawn(Self::run_dispatch_loop(rx, handlers, runner_name));
    Some(Self { tx, worker })
  }

  pub(crate) fn sender(&self) -> AsyncSender<CompletionMessage> {
    self.tx.clone()
  }

  async fn run_dispatch_loop(
    mut rx: AsyncReceiver<CompletionMessage>,
    handlers: Vec<CompletionHandler>,
    runner_name: Arc<String>,
  ) {
    trace!(runner = %runner_name, handler_count = handlers.len(), "Completion dispatch worker started.");
    loop {
      match rx.recv().await {
        Ok(message) => {
          let info = UnitCompletionInfo {
            run_id: message.run_id,
            runner_name: runner_name.clone(),
            index: message.index,
            status: message.status,
            completion_time: SystemTime::now(),
          };
          for handler in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(info.clone())));
            if outcome.is_err() {
              error!(
                runner = %runner_name,
                run_id = info.run_id,
                index = info.index,
                "A completion handler panicked; the panic was contained."
              );
            }
          }
        }
        Err(RecvError::Disconnected) => {
          trace!(runner = %runner_name, "Completion queue closed and drained; dispatch worker stopping.");
          break;
        }
      }
    }
  }

  /// Waits for the worker to drain and stop. The runner drops every unit's
  /// sender before calling this; dropping our own here closes the queue.
  pub(crate) async fn shutdown(self, runner_name: &str) {
    let Self { tx, worker } = self;
    drop(tx);
    if let Err(join_error) = worker.await {
      error!(runner = %runner_name, "Completion dispatch worker failed to join: {:?}", join_error);
    } else {
      debug!(runner = %runner_name, "Completion dispatch worker joined.");
    }
  }
}
