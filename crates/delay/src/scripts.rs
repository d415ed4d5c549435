//! The server-side scripts behind a delay queue.
//!
//! Every state transition of a payload is one script, so it runs as a
//! single atomic step on the server. The delay set holds fire times
//! (score >= 0) or negated attempt counts (score < 0); the doing set holds
//! lease deadlines.

use redix_client::Script;

/// KEYS: source, target. ARGV: max score, new score.
///
/// Moves every member of source scored at or below max into target with
/// the new score, and returns `[member, original score, ...]`.
pub(crate) static MOVE: Script = Script::new(
    "delay-move",
    r"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'WITHSCORES')
for i = 1, #due, 2 do
    redis.call('ZREM', KEYS[1], due[i])
    redis.call('ZADD', KEYS[2], ARGV[2], due[i])
end
return due
",
);

/// KEYS: delay, doing. Returns the total number of payloads.
pub(crate) static LENGTH: Script = Script::new(
    "delay-length",
    r"
return redis.call('ZCARD', KEYS[1]) + redis.call('ZCARD', KEYS[2])
",
);

/// KEYS: delay. ARGV: payload, fire time.
pub(crate) static ADD: Script = Script::new(
    "delay-add",
    r"
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return {true}
",
);

/// KEYS: doing. ARGV: payload.
pub(crate) static ACK_OK: Script = Script::new(
    "delay-ack-ok",
    r"
redis.call('ZREM', KEYS[1], ARGV[1])
return {true}
",
);

/// KEYS: delay, doing. ARGV: payload, retry score.
///
/// Releases the lease and parks the payload one attempt deeper.
pub(crate) static ACK_FAIL: Script = Script::new(
    "delay-ack-fail",
    r"
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[1], tonumber(ARGV[2]) - 1, ARGV[1])
return {true}
",
);

/// KEYS: delay, doing. ARGV: payload.
///
/// Removes a dead payload from whichever set holds it.
pub(crate) static DISCARD: Script = Script::new(
    "delay-discard",
    r"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return {true}
",
);
