use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::handler::DeadLetterSink;

/// Configuration for a delay queue.
#[derive(Clone)]
pub struct DelayQueueOptions {
    /// Prepended to the key names as `{prefix}:`.
    pub prefix: Option<String>,
    /// Lease length: a payload held longer than this is handed to another
    /// worker (default: 60 seconds).
    pub timeout: Duration,
    /// Failed attempts allowed before a payload is dead-lettered
    /// (default: 3).
    pub max_retries: u32,
    /// How often due payloads are picked up (default: 1 second).
    pub poll_interval: Duration,
    /// How often expired leases are reclaimed (default: 1 second).
    pub reclaim_interval: Duration,
    pub clock: Arc<dyn Clock>,
    /// Called with payloads whose retries are exhausted.
    pub dead_letter: Option<Arc<dyn DeadLetterSink>>,
}

impl Default for DelayQueueOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            poll_interval: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(1),
            clock: Arc::new(SystemClock),
            dead_letter: None,
        }
    }
}

impl fmt::Debug for DelayQueueOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueueOptions")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("poll_interval", &self.poll_interval)
            .field("reclaim_interval", &self.reclaim_interval)
            .field("clock", &self.clock)
            .field("dead_letter", &self.dead_letter.is_some())
            .finish()
    }
}

impl DelayQueueOptions {
    /// Names of the delay and doing sets of queue `name`.
    ///
    /// The braces keep both sets in one cluster hash slot.
    pub fn keys(&self, name: &str) -> (String, String) {
        match &self.prefix {
            Some(prefix) => (format!("{prefix}:do:{{{name}}}"), format!("{prefix}:doing:{{{name}}}")),
            None => (format!("do:{{{name}}}"), format!("doing:{{{name}}}")),
        }
    }

    /// The lease length in whole seconds, at least one.
    pub(crate) fn lease_secs(&self) -> i64 {
        i64::try_from(self.timeout.as_secs().max(1)).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use redix_core::key_slot;

    use super::*;

    #[test]
    fn key_layout() {
        let opts = DelayQueueOptions::default();
        assert_eq!(opts.keys("emails"), ("do:{emails}".to_owned(), "doing:{emails}".to_owned()));

        let prefixed = DelayQueueOptions {
            prefix: Some("app".into()),
            ..DelayQueueOptions::default()
        };
        let (delay, doing) = prefixed.keys("emails");
        assert_eq!(delay, "app:do:{emails}");
        assert_eq!(doing, "app:doing:{emails}");
        assert_eq!(key_slot(delay.as_bytes()), key_slot(doing.as_bytes()));
    }

    #[test]
    fn lease_is_at_least_a_second() {
        let opts = DelayQueueOptions {
            timeout: Duration::from_millis(10),
            ..DelayQueueOptions::default()
        };
        assert_eq!(opts.lease_secs(), 1);
    }
}
