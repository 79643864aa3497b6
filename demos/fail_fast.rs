use futures_convoy::{work_fn, TaskRunner, UnitCompletionInfo, WorkUnit};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Fail Fast Example (unit 3 fails, siblings are cancelled) ---");

  let runner = TaskRunner::new(2, Handle::current(), "fail_fast_runner").expect("Non-zero limit");

  runner.add_completion_handler(|info: UnitCompletionInfo| {
    info!("Completion event: unit {} of run {} -> {:?}", info.index, info.run_id, info.status);
  });

  let units: Vec<WorkUnit<String, String>> = (0..6)
    .map(|i| {
      work_fn(move |token| async move {
        if i == 3 {
          info!("Unit {} failing immediately.", i);
          return Err(format!("unit {} hit a simulated network error", i));
        }
        // Best-effort cancellation: race the simulated work against the
        // run's token and give up as soon as it fires.
        tokio::select! {
          _ = token.cancelled() => {
            info!("Unit {} observed cancellation; aborting its work.", i);
            Err(format!("unit {} cancelled", i))
          }
          _ = tokio::time::sleep(Duration::from_secs(2)) => {
            info!("Unit {} finished its work.", i);
            Ok(format!("unit {} result", i))
          }
        }
      })
    })
    .collect();

  match runner.run(units).await {
    Ok(results) => info!("Unexpected full success: {:?}", results),
    Err(e) => info!("Run failed as expected with the first error only: {}", e),
  }

  info!("--- Fail Fast Example End ---");
}
