use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

/// Error type returned by task handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes the payloads of a delay queue.
///
/// An `Err` (or a panic) counts as a failed attempt: the payload is retried
/// on a later poll until the queue's `max_retries` is exceeded.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: Bytes) -> Result<(), HandlerError>;
}

/// Receives payloads whose retries are exhausted. The payload has already
/// been removed from the queue.
pub trait DeadLetterSink: Send + Sync {
    fn dead_letter(&self, queue: &str, payload: &Bytes);
}

/// [`TaskHandler`] backed by an async closure; see [`handler_fn`].
pub struct HandlerFn<F>(F);

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}

/// Build a [`TaskHandler`] from an async closure.
///
/// ```
/// use redix_delay::handler_fn;
///
/// let handler = handler_fn(|payload| async move {
///     println!("got {payload:?}");
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, payload: Bytes) -> Result<(), HandlerError> {
        (self.0)(payload).await
    }
}

/// [`DeadLetterSink`] backed by a closure; see [`dead_letter_fn`].
pub struct DeadLetterFn<F>(F);

impl<F> fmt::Debug for DeadLetterFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeadLetterFn")
    }
}

/// Build a [`DeadLetterSink`] from a closure taking the queue name and the
/// payload.
pub fn dead_letter_fn<F>(f: F) -> DeadLetterFn<F>
where
    F: Fn(&str, &Bytes) + Send + Sync,
{
    DeadLetterFn(f)
}

impl<F> DeadLetterSink for DeadLetterFn<F>
where
    F: Fn(&str, &Bytes) + Send + Sync,
{
    fn dead_letter(&self, queue: &str, payload: &Bytes) {
        (self.0)(queue, payload);
    }
}
