use futures_convoy::{work_fn, TaskRunner, WorkUnit};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Overall Deadline Example (4 slow units, 500ms deadline) ---");

  let runner = TaskRunner::new(2, Handle::current(), "deadline_runner").expect("Non-zero limit");

  let units: Vec<WorkUnit<String, String>> = (0..4)
    .map(|i| {
      work_fn(move |token| async move {
        info!("Unit {} starting (needs 2s).", i);
        tokio::select! {
          _ = token.cancelled() => {
            info!("Unit {} giving up: the run was cancelled.", i);
            Err(format!("unit {} cancelled", i))
          }
          _ = tokio::time::sleep(Duration::from_secs(2)) => {
            Ok(format!("unit {} result", i))
          }
        }
      })
    })
    .collect();

  match runner.run_with_deadline(units, Duration::from_millis(500)).await {
    Ok(results) => info!("Unexpected full success: {:?}", results),
    Err(e) => info!("Run failed as expected: {}", e),
  }

  info!("--- Overall Deadline Example End ---");
}
