//! The gatekeeper every command passes through.
//!
//! In development mode [`Handler::before`] rejects commands that would
//! misbehave in production (forbidden commands, commands newer than the
//! server, cross-slot keys in a cluster) and warns about deprecated ones.
//! With monitoring enabled it also times each call and counts errors and
//! cache hits.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex};

use redix_core::{CounterVec, MetricsRegistry, SummaryVec, Version, same_slot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::commands::spec::CommandSpec;
use crate::error::ClientError;

pub const EXEC_TIMING: &str = "redis_exec_timing";
pub const EXEC_ERROR: &str = "redis_exec_error";
pub const CACHE_HITS: &str = "redis_cache_hits";
pub const CACHE_MISS: &str = "redis_cache_miss";

const LABELS: &[&str] = &["command", "s_command"];

/// Commands whose one-time deprecation warning has already been emitted.
static WARNED: LazyLock<Mutex<HashSet<&'static str>>> = LazyLock::new(Mutex::default);

/// Per-call markers carried by a [`Client`](crate::Client) view.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    pub(crate) skip_check: bool,
    pub(crate) sub_command: Option<Arc<str>>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) cache_ttl: Option<std::time::Duration>,
}

/// Started by [`Handler::before`] and consumed by [`Handler::after`].
#[derive(Debug)]
#[must_use]
pub(crate) struct CallGuard {
    tap: Option<Tap>,
}

#[derive(Debug)]
struct Tap {
    started: Instant,
    class: &'static str,
    sub_command: Arc<str>,
}

pub(crate) struct Handler {
    version: Version,
    cluster: bool,
    development: bool,
    monitor: bool,
    silent: fn(&ClientError) -> bool,
    timing: Arc<SummaryVec>,
    errors: Arc<CounterVec>,
    hits: Arc<CounterVec>,
    misses: Arc<CounterVec>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("version", &self.version)
            .field("cluster", &self.cluster)
            .field("development", &self.development)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl Handler {
    pub(crate) fn new(
        version: Version,
        cluster: bool,
        development: bool,
        monitor: bool,
        metrics: &MetricsRegistry,
    ) -> Self {
        Self {
            version,
            cluster,
            development,
            monitor,
            silent: |_| false,
            timing: metrics.summary_vec(EXEC_TIMING, "Latency of redis commands in seconds", LABELS),
            errors: metrics.counter_vec(EXEC_ERROR, "Failed redis commands", LABELS),
            hits: metrics.counter_vec(CACHE_HITS, "Client-side cache hits", LABELS),
            misses: metrics.counter_vec(CACHE_MISS, "Client-side cache misses", LABELS),
        }
    }

    /// Errors matching `silent` count as successes in the metrics tap.
    #[must_use]
    pub(crate) fn with_silent(mut self, silent: fn(&ClientError) -> bool) -> Self {
        self.silent = silent;
        self
    }

    pub(crate) fn version(&self) -> Version {
        self.version
    }

    /// Run the preflight and start the metrics tap for one call.
    ///
    /// `keys` is evaluated at most once, and only when the cross-slot check
    /// or the call trace needs it.
    pub(crate) fn before<F>(
        &self,
        scope: &Scope,
        spec: &'static CommandSpec,
        keys: F,
    ) -> Result<CallGuard, ClientError>
    where
        F: FnOnce() -> Vec<String>,
    {
        let mut keys = Keys::new(keys);
        if self.development && !scope.skip_check {
            self.preflight(spec, &mut keys)?;
        }
        if !self.monitor {
            return Ok(CallGuard { tap: None });
        }
        let sub_command = label(scope, spec);
        trace!(command = spec.class, s_command = %sub_command, keys = ?keys.get(), "redis call");
        Ok(CallGuard {
            tap: Some(Tap {
                started: Instant::now(),
                class: spec.class,
                sub_command,
            }),
        })
    }

    /// The development-mode checks alone, for commands that are not
    /// individually timed (pipelined commands).
    pub(crate) fn check<F>(&self, scope: &Scope, spec: &'static CommandSpec, keys: F) -> Result<(), ClientError>
    where
        F: FnOnce() -> Vec<String>,
    {
        if self.development && !scope.skip_check {
            self.preflight(spec, &mut Keys::new(keys))?;
        }
        Ok(())
    }

    fn preflight<F>(&self, spec: &'static CommandSpec, keys: &mut Keys<F>) -> Result<(), ClientError>
    where
        F: FnOnce() -> Vec<String>,
    {
        if spec.forbid {
            return Err(ClientError::Forbidden {
                command: spec.name.to_owned(),
            });
        }
        if spec.min_version > self.version {
            return Err(ClientError::UnsupportedVersion {
                command: spec.name.to_owned(),
                required: spec.min_version,
                actual: self.version,
            });
        }
        if self.cluster {
            let keys = keys.get();
            if keys.len() > 1 && !same_slot(keys) {
                return Err(ClientError::CrossSlot {
                    command: spec.name.to_owned(),
                });
            }
        }
        if let Some(dep) = &spec.deprecation
            && dep.since <= self.version
            && should_warn(spec)
        {
            warn!(
                command = spec.name,
                since = %dep.since,
                instead = dep.instead,
                etc = dep.etc,
                "{}",
                dep.message
            );
        }
        Ok(())
    }

    /// Finish the metrics tap for one call.
    pub(crate) fn after<T>(&self, guard: CallGuard, result: &Result<T, ClientError>) {
        let Some(tap) = guard.tap else { return };
        let labels = [tap.class, &*tap.sub_command];
        match result {
            Err(e) if !(self.silent)(e) => self.errors.inc(&labels),
            _ => self.timing.observe(&labels, tap.started.elapsed()),
        }
    }

    /// Count a client-side cache lookup.
    pub(crate) fn cache(&self, spec: &'static CommandSpec, scope: &Scope, hit: bool) {
        if !self.monitor {
            return;
        }
        let sub_command = label(scope, spec);
        let labels = [spec.class, &*sub_command];
        if hit {
            self.hits.inc(&labels);
        } else {
            self.misses.inc(&labels);
        }
    }
}

/// The keys of one call, computed on first use.
struct Keys<F> {
    make: Option<F>,
    keys: Vec<String>,
}

impl<F: FnOnce() -> Vec<String>> Keys<F> {
    fn new(make: F) -> Self {
        Self {
            make: Some(make),
            keys: Vec::new(),
        }
    }

    fn get(&mut self) -> &[String] {
        if let Some(make) = self.make.take() {
            self.keys = make();
        }
        &self.keys
    }
}

fn label(scope: &Scope, spec: &'static CommandSpec) -> Arc<str> {
    scope
        .sub_command
        .clone()
        .unwrap_or_else(|| Arc::from(spec.sub_name))
}

/// Whether the deprecation warning for `spec` should be emitted now.
fn should_warn(spec: &'static CommandSpec) -> bool {
    let Some(dep) = &spec.deprecation else {
        return false;
    };
    if !dep.once {
        return true;
    }
    match WARNED.lock() {
        Ok(mut warned) => warned.insert(spec.name),
        // A poisoned set only costs a repeated warning.
        Err(poisoned) => poisoned.into_inner().insert(spec.name),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use redix_driver::DriverError;

    use super::*;
    use crate::commands::spec::{self, Deprecation};

    fn handler(development: bool, cluster: bool) -> (Handler, MetricsRegistry) {
        let metrics = MetricsRegistry::new();
        let handler = Handler::new(Version::new(6, 0, 0), cluster, development, true, &metrics)
            .with_silent(ClientError::is_nil);
        (handler, metrics)
    }

    fn keys(keys: &[&str]) -> impl FnOnce() -> Vec<String> {
        let keys: Vec<String> = keys.iter().map(|k| (*k).to_owned()).collect();
        move || keys
    }

    #[test]
    fn forbidden_commands_are_rejected_in_development() {
        let (h, _) = handler(true, false);
        let err = h.before(&Scope::default(), &spec::KEYS, keys(&[])).unwrap_err();
        assert!(matches!(err, ClientError::Forbidden { ref command } if command == "KEYS"));

        let (h, _) = handler(false, false);
        assert!(h.before(&Scope::default(), &spec::KEYS, keys(&[])).is_ok());
    }

    #[test]
    fn newer_commands_are_rejected() {
        let (h, _) = handler(true, false);
        let err = h.before(&Scope::default(), &spec::GETDEL, keys(&["k"])).unwrap_err();
        match err {
            ClientError::UnsupportedVersion { required, actual, .. } => {
                assert_eq!(required, Version::new(6, 2, 0));
                assert_eq!(actual, Version::new(6, 0, 0));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn cross_slot_keys_are_rejected_in_cluster_mode() {
        let (h, _) = handler(true, true);
        let err = h
            .before(&Scope::default(), &spec::DEL, keys(&["a", "b"]))
            .unwrap_err();
        assert!(matches!(err, ClientError::CrossSlot { .. }));

        // Hash tags pin both keys to one slot.
        assert!(
            h.before(&Scope::default(), &spec::DEL, keys(&["{user1000}.a", "{user1000}.b"]))
                .is_ok()
        );

        let (standalone, _) = handler(true, false);
        assert!(standalone.before(&Scope::default(), &spec::DEL, keys(&["a", "b"])).is_ok());
    }

    #[test]
    fn skip_check_disables_every_preflight_rule() {
        let (h, _) = handler(true, true);
        let scope = Scope {
            skip_check: true,
            ..Scope::default()
        };
        assert!(h.before(&scope, &spec::KEYS, keys(&[])).is_ok());
        assert!(h.before(&scope, &spec::GETDEL, keys(&["k"])).is_ok());
        assert!(h.before(&scope, &spec::DEL, keys(&["a", "b"])).is_ok());
    }

    #[test]
    fn keys_are_not_evaluated_without_need() {
        let metrics = MetricsRegistry::new();
        let h = Handler::new(Version::new(7, 0, 0), false, true, false, &metrics);
        let guard = h
            .before(&Scope::default(), &spec::GET, || panic!("keys evaluated"))
            .unwrap();
        h.after(guard, &Ok::<_, ClientError>(()));
    }

    #[test]
    fn keys_are_evaluated_once_for_check_and_trace() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let metrics = MetricsRegistry::new();
            let h = Handler::new(Version::new(7, 0, 0), true, true, true, &metrics);
            let calls = AtomicUsize::new(0);
            let guard = h
                .before(&Scope::default(), &spec::DEL, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    vec!["{t}.a".to_owned(), "{t}.b".to_owned()]
                })
                .unwrap();
            h.after(guard, &Ok::<_, ClientError>(()));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn tap_records_latency_and_errors() {
        let (h, _) = handler(false, false);
        let scope = Scope::default();

        let guard = h.before(&scope, &spec::GET, keys(&["k"])).unwrap();
        h.after(guard, &Ok::<_, ClientError>(()));
        // Nil is not an error.
        let guard = h.before(&scope, &spec::GET, keys(&["k"])).unwrap();
        h.after(guard, &Err::<(), _>(ClientError::from(DriverError::Nil)));
        let guard = h.before(&scope, &spec::GET, keys(&["k"])).unwrap();
        h.after(guard, &Err::<(), _>(ClientError::from(DriverError::Timeout(Some(Duration::from_secs(1))))));

        assert_eq!(h.timing.count(&["string", "get"]), 2);
        assert_eq!(h.errors.get(&["string", "get"]), 1);
    }

    #[test]
    fn sub_command_override_changes_the_label() {
        let (h, _) = handler(false, false);
        let scope = Scope {
            sub_command: Some(Arc::from("delay-move")),
            ..Scope::default()
        };
        let guard = h.before(&scope, &spec::EVAL, keys(&[])).unwrap();
        h.after(guard, &Ok::<_, ClientError>(()));
        assert_eq!(h.timing.count(&["scripting", "delay-move"]), 1);
        assert_eq!(h.timing.count(&["scripting", "eval"]), 0);
    }

    #[test]
    fn cache_lookups_are_counted() {
        let (h, _) = handler(false, false);
        h.cache(&spec::GET, &Scope::default(), false);
        h.cache(&spec::GET, &Scope::default(), true);
        h.cache(&spec::GET, &Scope::default(), true);
        assert_eq!(h.hits.get(&["string", "get"]), 2);
        assert_eq!(h.misses.get(&["string", "get"]), 1);
    }

    #[test]
    fn once_deprecations_warn_a_single_time() {
        static ONCE: CommandSpec = CommandSpec {
            name: "HANDLER-TEST-ONCE",
            class: "test",
            sub_name: "once",
            min_version: Version::new(1, 0, 0),
            forbid: false,
            readonly: false,
            deprecation: Some(Deprecation {
                since: Version::new(1, 0, 0),
                message: "old",
                instead: "new",
                etc: "",
                once: true,
            }),
        };
        assert!(should_warn(&ONCE));
        assert!(!should_warn(&ONCE));
        assert!(!should_warn(&spec::GET));
    }

    #[test]
    fn deprecations_wait_for_the_server_version() {
        static DEPRECATED_IN_7: CommandSpec = CommandSpec {
            name: "HANDLER-TEST-SINCE-7",
            class: "test",
            sub_name: "since-7",
            min_version: Version::new(1, 0, 0),
            forbid: false,
            readonly: false,
            deprecation: Some(Deprecation {
                since: Version::new(7, 0, 0),
                message: "old",
                instead: "new",
                etc: "",
                once: true,
            }),
        };
        let warned = || WARNED.lock().unwrap().contains(DEPRECATED_IN_7.name);
        let metrics = MetricsRegistry::new();

        let older = Handler::new(Version::new(6, 2, 0), false, true, false, &metrics);
        let guard = older.before(&Scope::default(), &DEPRECATED_IN_7, keys(&[])).unwrap();
        older.after(guard, &Ok::<_, ClientError>(()));
        assert!(!warned(), "a server older than the deprecation must not warn");

        let newer = Handler::new(Version::new(7, 0, 0), false, true, false, &metrics);
        let guard = newer.before(&Scope::default(), &DEPRECATED_IN_7, keys(&[])).unwrap();
        newer.after(guard, &Ok::<_, ClientError>(()));
        assert!(warned());
    }
}
