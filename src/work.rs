use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

/// The boxed future a work unit resolves to.
/// It must be `Send` and `'static`, and produce a `Result<T, E>`.
pub type WorkFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// A single unit of work.
///
/// The runner invokes it at most once, passing a cancellation token scoped
/// to the current run. The unit is expected to observe the token on a
/// best-effort basis (e.g. abort an in-flight network call when it fires);
/// it is never interrupted forcibly. The unit must not retain the token or
/// any other runner state beyond its own execution.
pub type WorkUnit<T, E> = Box<dyn FnOnce(CancellationToken) -> WorkFuture<T, E> + Send + 'static>;

/// Boxes an async closure into a [`WorkUnit`].
///
/// Saves callers the double boxing that the type alias otherwise demands:
///
/// ```
/// use futures_convoy::work_fn;
///
/// let unit = work_fn::<String, String, _, _>(|_token| async move {
///   Ok("done".to_string())
/// });
/// # drop(unit);
/// ```
pub fn work_fn<T, E, F, Fut>(f: F) -> WorkUnit<T, E>
where
  F: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  Box::new(move |token| Box::pin(f(token)))
}
