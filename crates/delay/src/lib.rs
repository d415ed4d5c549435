//! Distributed delay queue over two redis sorted sets.
//!
//! Payloads wait in a *delay* set scored by their fire time. A poll ticker
//! leases due payloads into a *doing* set scored by the lease deadline and
//! hands them to a [`TaskHandler`]. Success removes the payload; failure
//! parks it back in the delay set with a negative score counting the
//! attempts, until `max_retries` is exceeded and the payload is handed to
//! the optional [`DeadLetterSink`]. A reclaim ticker returns payloads whose
//! lease expired, so a crashed worker's tasks are picked up elsewhere.
//!
//! Every step is a single server-side script, so several processes may
//! serve the same queue. Delivery is at least once.
//!
//! Queues are opened through a [`DelayQueues`] registry, one instance per
//! name.

mod clock;
mod error;
mod handler;
mod options;
mod queue;
mod registry;
mod scripts;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DelayError;
pub use handler::{DeadLetterFn, DeadLetterSink, HandlerError, HandlerFn, TaskHandler, dead_letter_fn, handler_fn};
pub use options::DelayQueueOptions;
pub use queue::DelayQueue;
pub use registry::{DelayQueues, POLL_ERROR, QUEUE_LENGTH, RECLAIM, RECLAIM_ERROR};
