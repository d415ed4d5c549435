//! Static descriptions of the commands the client issues.
//!
//! A [`CommandSpec`] carries what the development-mode preflight and the
//! metrics tap need to know about a command: the server version that
//! introduced it, whether it is forbidden, whether it is deprecated, and the
//! labels it is reported under.

use redix_core::Version;

/// A deprecation notice attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deprecation {
    /// First server version in which the command is deprecated.
    pub since: Version,
    pub message: &'static str,
    /// The replacement to use instead.
    pub instead: &'static str,
    /// Free-form extra remarks; empty when there are none.
    pub etc: &'static str,
    /// Warn only the first time the command is used in this process.
    pub once: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Upper-case command name, also used as the warn-once identity.
    pub name: &'static str,
    /// Command group, reported as the `command` metric label.
    pub class: &'static str,
    /// Reported as the `s_command` metric label unless a call overrides it.
    pub sub_name: &'static str,
    pub min_version: Version,
    /// Rejected outright in development mode.
    pub forbid: bool,
    /// Eligible for the client-side cache.
    pub readonly: bool,
    pub deprecation: Option<Deprecation>,
}

impl CommandSpec {
    const fn new(name: &'static str, class: &'static str, sub_name: &'static str) -> Self {
        Self {
            name,
            class,
            sub_name,
            min_version: Version::new(1, 0, 0),
            forbid: false,
            readonly: false,
            deprecation: None,
        }
    }

    const fn since(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.min_version = Version::new(major, minor, patch);
        self
    }

    const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    const fn forbidden(mut self) -> Self {
        self.forbid = true;
        self
    }

    const fn deprecated(mut self, deprecation: Deprecation) -> Self {
        self.deprecation = Some(deprecation);
        self
    }
}

pub static PING: CommandSpec = CommandSpec::new("PING", "connection", "ping");
pub static INFO: CommandSpec = CommandSpec::new("INFO", "server", "info");
pub static KEYS: CommandSpec = CommandSpec::new("KEYS", "generic", "keys").readonly().forbidden();
pub static DEL: CommandSpec = CommandSpec::new("DEL", "generic", "del");
pub static EXISTS: CommandSpec = CommandSpec::new("EXISTS", "generic", "exists").readonly();
pub static EXPIRE: CommandSpec = CommandSpec::new("EXPIRE", "generic", "expire");
pub static TTL: CommandSpec = CommandSpec::new("TTL", "generic", "ttl").readonly();

pub static GET: CommandSpec = CommandSpec::new("GET", "string", "get").readonly();
pub static SET: CommandSpec = CommandSpec::new("SET", "string", "set");
pub static GETDEL: CommandSpec = CommandSpec::new("GETDEL", "string", "getdel").since(6, 2, 0);
pub static INCRBY: CommandSpec = CommandSpec::new("INCRBY", "string", "incrby");

pub static ZADD: CommandSpec = CommandSpec::new("ZADD", "sorted_set", "zadd").since(1, 2, 0);
pub static ZREM: CommandSpec = CommandSpec::new("ZREM", "sorted_set", "zrem").since(1, 2, 0);
pub static ZCARD: CommandSpec = CommandSpec::new("ZCARD", "sorted_set", "zcard")
    .since(1, 2, 0)
    .readonly();
pub static ZSCORE: CommandSpec = CommandSpec::new("ZSCORE", "sorted_set", "zscore")
    .since(1, 2, 0)
    .readonly();
pub static ZRANGEBYSCORE: CommandSpec =
    CommandSpec::new("ZRANGEBYSCORE", "sorted_set", "zrangebyscore")
        .since(1, 0, 5)
        .readonly()
        .deprecated(Deprecation {
            since: Version::new(6, 2, 0),
            message: "ZRANGEBYSCORE is deprecated",
            instead: "ZRANGE with the BYSCORE argument",
            etc: "",
            once: true,
        });

pub static GEOADD: CommandSpec = CommandSpec::new("GEOADD", "geo", "geoadd").since(3, 2, 0);
pub static GEODIST: CommandSpec = CommandSpec::new("GEODIST", "geo", "geodist")
    .since(3, 2, 0)
    .readonly();

pub static PUBLISH: CommandSpec = CommandSpec::new("PUBLISH", "pubsub", "publish").since(2, 0, 0);
pub static SUBSCRIBE: CommandSpec =
    CommandSpec::new("SUBSCRIBE", "pubsub", "subscribe").since(2, 0, 0);
pub static PSUBSCRIBE: CommandSpec =
    CommandSpec::new("PSUBSCRIBE", "pubsub", "psubscribe").since(2, 0, 0);

pub static EVAL: CommandSpec = CommandSpec::new("EVAL", "scripting", "eval").since(2, 6, 0);

/// The batch as a whole, as reported by the metrics tap.
pub static PIPELINE: CommandSpec = CommandSpec::new("PIPELINE", "pipeline", "exec");

/// Fallback for commands without a static description: no version floor,
/// no deprecation, but still subject to the cross-slot check.
pub static GENERIC: CommandSpec = CommandSpec::new("*", "generic", "command");

static ALL: &[&CommandSpec] = &[
    &PING, &INFO, &KEYS, &DEL, &EXISTS, &EXPIRE, &TTL, &GET, &SET, &GETDEL, &INCRBY, &ZADD, &ZREM,
    &ZCARD, &ZSCORE, &ZRANGEBYSCORE, &GEOADD, &GEODIST, &PUBLISH, &SUBSCRIBE, &PSUBSCRIBE, &EVAL,
];

/// Find the description of `name`, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    ALL.iter()
        .copied()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}
