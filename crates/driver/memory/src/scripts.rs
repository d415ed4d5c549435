//! Native stand-ins for the Lua scripts the mock server can run.
//!
//! The mock has no Lua interpreter; scripts are looked up by
//! [`Script::name`](redix_driver::Script::name) and executed against the
//! keyspace while the keyspace lock is held, so each is atomic.

use bytes::Bytes;
use redix_driver::{DriverError, Value};

use crate::keyspace::{Keyspace, parse_f64};

type ScriptFn = fn(&mut Keyspace, &[String], &[Bytes]) -> Result<Value, DriverError>;

const BUILTINS: &[(&str, ScriptFn)] = &[
    ("delay-move", delay_move),
    ("delay-length", delay_length),
    ("delay-add", delay_add),
    ("delay-ack-ok", delay_ack_ok),
    ("delay-ack-fail", delay_ack_fail),
    ("delay-discard", delay_discard),
    ("conformance-zadd", conformance_zadd),
];

pub(crate) fn lookup(name: &str) -> Option<ScriptFn> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
}

fn key(keys: &[String], i: usize) -> Result<Bytes, DriverError> {
    keys.get(i)
        .map(|k| Bytes::copy_from_slice(k.as_bytes()))
        .ok_or_else(|| DriverError::Server(format!("ERR script expects at least {} keys", i + 1)))
}

fn arg(args: &[Bytes], i: usize) -> Result<Bytes, DriverError> {
    args.get(i)
        .cloned()
        .ok_or_else(|| DriverError::Server(format!("ERR script expects at least {} args", i + 1)))
}

fn call(ks: &mut Keyspace, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
    ks.execute(name, args)
}

fn lua_true() -> Value {
    Value::Array(vec![Value::Int(1)])
}

/// KEYS: source, target. ARGV: max score, new score.
/// Moves every member scored at or below max and returns `[member, original score, ...]`.
fn delay_move(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    let (src, dst) = (key(keys, 0)?, key(keys, 1)?);
    let (max, score) = (arg(args, 0)?, arg(args, 1)?);
    let due = call(
        ks,
        "ZRANGEBYSCORE",
        &[src.clone(), Bytes::from_static(b"-inf"), max, Bytes::from_static(b"WITHSCORES")],
    )?;
    let Value::Array(items) = due else {
        return Ok(Value::Array(Vec::new()));
    };
    for pair in items.chunks_exact(2) {
        if let Value::Bulk(member) = &pair[0] {
            call(ks, "ZREM", &[src.clone(), member.clone()])?;
            call(ks, "ZADD", &[dst.clone(), score.clone(), member.clone()])?;
        }
    }
    Ok(Value::Array(items))
}

fn delay_length(ks: &mut Keyspace, keys: &[String], _args: &[Bytes]) -> Result<Value, DriverError> {
    let mut total = 0;
    for i in 0..2 {
        total += call(ks, "ZCARD", &[key(keys, i)?])?.decode::<i64>()?;
    }
    Ok(Value::Int(total))
}

fn delay_add(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    call(ks, "ZADD", &[key(keys, 0)?, arg(args, 1)?, arg(args, 0)?])?;
    Ok(lua_true())
}

fn delay_ack_ok(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    call(ks, "ZREM", &[key(keys, 0)?, arg(args, 0)?])?;
    Ok(lua_true())
}

fn delay_ack_fail(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    let payload = arg(args, 0)?;
    let score = parse_f64(&arg(args, 1)?)? - 1.0;
    call(ks, "ZREM", &[key(keys, 1)?, payload.clone()])?;
    call(ks, "ZADD", &[key(keys, 0)?, Bytes::from(score.to_string()), payload])?;
    Ok(lua_true())
}

fn delay_discard(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    let payload = arg(args, 0)?;
    call(ks, "ZREM", &[key(keys, 0)?, payload.clone()])?;
    call(ks, "ZREM", &[key(keys, 1)?, payload])?;
    Ok(lua_true())
}

fn conformance_zadd(ks: &mut Keyspace, keys: &[String], args: &[Bytes]) -> Result<Value, DriverError> {
    call(ks, "ZADD", &[key(keys, 0)?, arg(args, 0)?, arg(args, 1)?])
}
