use futures_convoy::{work_fn, TaskRunner, WorkUnit};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// The payload a "fetch" produces, stand-in for a decoded API response.
#[derive(Debug, Clone)]
#[allow(dead_code)]
struct FetchedFact {
  fact: String,
  length: usize,
}

async fn fetch_fact(request_id: usize) -> Result<FetchedFact, String> {
  info!("Request {} starting (simulated fetch, ~300ms)", request_id);
  // A real unit would issue the HTTP call here and abort it when the
  // cancellation token fires; the runner does not care either way.
  tokio::time::sleep(Duration::from_millis(300)).await;
  let fact = format!("Interesting fact number {}", request_id);
  let length = fact.len();
  info!("Request {} finished", request_id);
  Ok(FetchedFact { fact, length })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Fetch Many Example (10 requests, limit 3) ---");

  let num_requests = 10;
  let concurrency_limit = 3;
  let runner = TaskRunner::new(concurrency_limit, Handle::current(), "fetch_runner").expect("Non-zero limit");

  info!(
    "Issuing {} requests of ~300ms each. With limit {}, this should take ~{} waves.",
    num_requests,
    concurrency_limit,
    (num_requests as f32 / concurrency_limit as f32).ceil()
  );

  let units: Vec<WorkUnit<FetchedFact, String>> = (0..num_requests)
    .map(|request_id| work_fn(move |_token| fetch_fact(request_id)))
    .collect();

  match runner.run(units).await {
    Ok(facts) => {
      info!("All requests completed.");
      for fact in facts {
        info!("Fetched: {:?}", fact);
      }
    }
    Err(e) => {
      info!("A request failed: {}", e);
    }
  }

  info!("--- Fetch Many Example End ---");
}
