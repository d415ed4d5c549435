use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use redix_driver::{DriverError, Value};
use tokio::time::Instant;

use crate::geo;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

fn err(message: impl Into<String>) -> DriverError {
    DriverError::Server(message.into())
}

fn arity(name: &str, args: &[Bytes], min: usize) -> Result<(), DriverError> {
    if args.len() < min {
        return Err(err(format!(
            "ERR wrong number of arguments for '{}' command",
            name.to_ascii_lowercase()
        )));
    }
    Ok(())
}

fn parse_i64(raw: &[u8]) -> Result<i64, DriverError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| err("ERR value is not an integer or out of range"))
}

pub(crate) fn parse_f64(raw: &[u8]) -> Result<f64, DriverError> {
    match raw.to_ascii_lowercase().as_slice() {
        b"inf" | b"+inf" => Ok(f64::INFINITY),
        b"-inf" => Ok(f64::NEG_INFINITY),
        other => std::str::from_utf8(other)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|f| !f.is_nan())
            .ok_or_else(|| err("ERR value is not a valid float")),
    }
}

/// Render a score the way the server does (`3`, `2.5`, `-inf`).
pub(crate) fn format_score(score: f64) -> String {
    score.to_string()
}

/// Glob matching with `*`, `?`, `[...]` classes and `\` escapes.
pub(crate) fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `c` against the class starting at `pattern[start] == b'['`.
/// Returns whether it matched and the index just past the class.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }
    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

/// A score range endpoint as written in `ZRANGEBYSCORE` (`(5`, `-inf`, `10`).
#[derive(Debug, Clone, Copy)]
struct ScoreBound {
    value: f64,
    exclusive: bool,
}

impl ScoreBound {
    fn parse(raw: &[u8]) -> Result<Self, DriverError> {
        let (exclusive, digits) = match raw.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, raw),
        };
        let value = parse_f64(digits).map_err(|_| err("ERR min or max is not a float"))?;
        Ok(Self { value, exclusive })
    }

    fn above_min(self, score: f64) -> bool {
        if self.exclusive { score > self.value } else { score >= self.value }
    }

    fn below_max(self, score: f64) -> bool {
        if self.exclusive { score < self.value } else { score <= self.value }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SortedSet {
    scores: HashMap<Bytes, f64>,
}

impl SortedSet {
    fn insert(&mut self, member: Bytes, score: f64) -> bool {
        self.scores.insert(member, score).is_none()
    }

    fn remove(&mut self, member: &[u8]) -> bool {
        self.scores.remove(member).is_some()
    }

    fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    /// Members within the bounds, ordered by score then member bytes.
    fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<(Bytes, f64)> {
        let mut out: Vec<(Bytes, f64)> = self
            .scores
            .iter()
            .filter(|(_, s)| min.above_min(**s) && max.below_max(**s))
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

#[derive(Debug, Clone)]
enum Data {
    Str(Bytes),
    ZSet(SortedSet),
}

#[derive(Debug, Clone)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Commands that never change the keyspace.
pub(crate) fn is_readonly(name: &str) -> bool {
    matches!(
        name,
        "PING" | "GET" | "EXISTS" | "TTL" | "KEYS" | "ZCARD" | "ZSCORE" | "ZRANGEBYSCORE" | "GEODIST"
    )
}

/// The data held by a mock server. Expired keys are evicted lazily on access.
#[derive(Debug, Default)]
pub(crate) struct Keyspace {
    entries: HashMap<Bytes, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &[u8]) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(Entry::is_expired) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn zset(&mut self, key: &[u8]) -> Result<Option<&mut SortedSet>, DriverError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { data: Data::ZSet(z), .. }) => Ok(Some(z)),
            Some(_) => Err(err(WRONGTYPE)),
        }
    }

    fn zset_or_create(&mut self, key: &Bytes) -> Result<&mut SortedSet, DriverError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.clone(),
                Entry {
                    data: Data::ZSet(SortedSet::default()),
                    expires_at: None,
                },
            );
        }
        self.zset(key)?.ok_or_else(|| err("ERR key vanished"))
    }

    /// Drop a sorted set that has become empty.
    fn prune(&mut self, key: &[u8]) {
        if matches!(self.entries.get(key), Some(Entry { data: Data::ZSet(z), .. }) if z.scores.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn string(&mut self, key: &[u8]) -> Result<Option<Bytes>, DriverError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry { data: Data::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(err(WRONGTYPE)),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Execute one data command. `name` is the upper-cased command name.
    pub(crate) fn execute(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        match name {
            "PING" => Ok(args
                .first()
                .map_or_else(|| Value::Status("PONG".to_owned()), |m| Value::Bulk(m.clone()))),
            "GET" => {
                arity(name, args, 1)?;
                Ok(self.string(&args[0])?.map_or(Value::Nil, Value::Bulk))
            }
            "SET" => self.set(name, args),
            "GETDEL" => {
                arity(name, args, 1)?;
                let value = self.string(&args[0])?;
                if value.is_some() {
                    self.entries.remove(&args[0]);
                }
                Ok(value.map_or(Value::Nil, Value::Bulk))
            }
            "DEL" => {
                arity(name, args, 1)?;
                let mut removed = 0;
                for key in args {
                    if self.live(key).is_some() {
                        self.entries.remove(key);
                        removed += 1;
                    }
                }
                Ok(Value::Int(removed))
            }
            "EXISTS" => {
                arity(name, args, 1)?;
                let mut found = 0;
                for key in args {
                    if self.live(key).is_some() {
                        found += 1;
                    }
                }
                Ok(Value::Int(found))
            }
            "INCRBY" => {
                arity(name, args, 2)?;
                let delta = parse_i64(&args[1])?;
                self.incr_by(&args[0], delta)
            }
            "EXPIRE" => {
                arity(name, args, 2)?;
                let secs = parse_i64(&args[1])?;
                Ok(Value::Int(i64::from(self.expire(&args[0], secs))))
            }
            "TTL" => {
                arity(name, args, 1)?;
                Ok(Value::Int(self.ttl(&args[0])))
            }
            "KEYS" => {
                arity(name, args, 1)?;
                let now = Instant::now();
                let mut keys: Vec<Bytes> = self
                    .entries
                    .iter()
                    .filter(|(k, e)| e.expires_at.is_none_or(|d| now < d) && glob_match(&args[0], k))
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.sort();
                Ok(Value::Array(keys.into_iter().map(Value::Bulk).collect()))
            }
            "FLUSHALL" | "FLUSHDB" => {
                self.clear();
                Ok(Value::ok())
            }
            "ZADD" => self.zadd(name, args),
            "ZREM" => {
                arity(name, args, 2)?;
                let Some(z) = self.zset(&args[0])? else {
                    return Ok(Value::Int(0));
                };
                let removed = args[1..].iter().filter(|m| z.remove(m)).count();
                self.prune(&args[0]);
                Ok(Value::Int(i64::try_from(removed).unwrap_or(i64::MAX)))
            }
            "ZCARD" => {
                arity(name, args, 1)?;
                let len = self.zset(&args[0])?.map_or(0, |z| z.len());
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            "ZSCORE" => {
                arity(name, args, 2)?;
                Ok(self
                    .zset(&args[0])?
                    .and_then(|z| z.score(&args[1]))
                    .map_or(Value::Nil, |s| Value::bulk(format_score(s))))
            }
            "ZRANGEBYSCORE" => self.zrange_by_score(name, args),
            "GEOADD" => self.geo_add(name, args),
            "GEODIST" => self.geo_dist(name, args),
            other => Err(err(format!("ERR unknown command '{other}'"))),
        }
    }

    fn set(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        arity(name, args, 2)?;
        let mut ttl = None;
        let mut nx = false;
        let mut xx = false;
        let mut i = 2;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_slice() {
                b"EX" | b"PX" => {
                    let raw = args.get(i + 1).ok_or_else(|| err("ERR syntax error"))?;
                    let n = u64::try_from(parse_i64(raw)?)
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| err("ERR invalid expire time in 'set' command"))?;
                    ttl = Some(if args[i].eq_ignore_ascii_case(b"EX") {
                        Duration::from_secs(n)
                    } else {
                        Duration::from_millis(n)
                    });
                    i += 2;
                }
                b"NX" => {
                    nx = true;
                    i += 1;
                }
                b"XX" => {
                    xx = true;
                    i += 1;
                }
                _ => return Err(err("ERR syntax error")),
            }
        }
        let exists = self.live(&args[0]).is_some();
        if (nx && exists) || (xx && !exists) {
            return Ok(Value::Nil);
        }
        self.entries.insert(
            args[0].clone(),
            Entry {
                data: Data::Str(args[1].clone()),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(Value::ok())
    }

    fn incr_by(&mut self, key: &Bytes, delta: i64) -> Result<Value, DriverError> {
        let current = match self.string(key)? {
            Some(raw) => parse_i64(&raw)?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| err("ERR increment or decrement would overflow"))?;
        let expires_at = self.live(key).and_then(|e| e.expires_at);
        self.entries.insert(
            key.clone(),
            Entry {
                data: Data::Str(Bytes::from(next.to_string())),
                expires_at,
            },
        );
        Ok(Value::Int(next))
    }

    fn expire(&mut self, key: &[u8], secs: i64) -> bool {
        if self.live(key).is_none() {
            return false;
        }
        match u64::try_from(secs) {
            Ok(s) if s > 0 => {
                if let Some(e) = self.entries.get_mut(key) {
                    e.expires_at = Some(Instant::now() + Duration::from_secs(s));
                }
            }
            _ => {
                self.entries.remove(key);
            }
        }
        true
    }

    fn ttl(&mut self, key: &[u8]) -> i64 {
        match self.live(key) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                let ms = deadline.saturating_duration_since(Instant::now()).as_millis();
                i64::try_from((ms + 500) / 1000).unwrap_or(i64::MAX)
            }
        }
    }

    fn zadd(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        arity(name, args, 3)?;
        if (args.len() - 1) % 2 != 0 {
            return Err(err("ERR syntax error"));
        }
        let pairs = args[1..]
            .chunks_exact(2)
            .map(|p| Ok((parse_f64(&p[0])?, p[1].clone())))
            .collect::<Result<Vec<_>, DriverError>>()?;
        let z = self.zset_or_create(&args[0])?;
        let added = pairs.into_iter().filter(|(s, m)| z.insert(m.clone(), *s)).count();
        Ok(Value::Int(i64::try_from(added).unwrap_or(i64::MAX)))
    }

    fn zrange_by_score(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        arity(name, args, 3)?;
        let min = ScoreBound::parse(&args[1])?;
        let max = ScoreBound::parse(&args[2])?;
        let mut with_scores = false;
        let mut limit: Option<(usize, Option<usize>)> = None;
        let mut i = 3;
        while i < args.len() {
            match args[i].to_ascii_uppercase().as_slice() {
                b"WITHSCORES" => {
                    with_scores = true;
                    i += 1;
                }
                b"LIMIT" => {
                    let (Some(off), Some(count)) = (args.get(i + 1), args.get(i + 2)) else {
                        return Err(err("ERR syntax error"));
                    };
                    let off = usize::try_from(parse_i64(off)?).unwrap_or(0);
                    let count = usize::try_from(parse_i64(count)?).ok();
                    limit = Some((off, count));
                    i += 3;
                }
                _ => return Err(err("ERR syntax error")),
            }
        }
        let Some(z) = self.zset(&args[0])? else {
            return Ok(Value::Array(Vec::new()));
        };
        let mut members = z.range(min, max);
        if let Some((off, count)) = limit {
            members = members
                .into_iter()
                .skip(off)
                .take(count.unwrap_or(usize::MAX))
                .collect();
        }
        let mut out = Vec::with_capacity(members.len() * if with_scores { 2 } else { 1 });
        for (m, s) in members {
            out.push(Value::Bulk(m));
            if with_scores {
                out.push(Value::bulk(format_score(s)));
            }
        }
        Ok(Value::Array(out))
    }

    fn geo_add(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        arity(name, args, 4)?;
        if (args.len() - 1) % 3 != 0 {
            return Err(err("ERR syntax error"));
        }
        let mut points = Vec::with_capacity((args.len() - 1) / 3);
        for t in args[1..].chunks_exact(3) {
            let (lon, lat) = (parse_f64(&t[0])?, parse_f64(&t[1])?);
            if !geo::valid(lon, lat) {
                return Err(err(format!("ERR invalid longitude,latitude pair {lon},{lat}")));
            }
            points.push((geo::encode(lon, lat), t[2].clone()));
        }
        let z = self.zset_or_create(&args[0])?;
        let added = points.into_iter().filter(|(s, m)| z.insert(m.clone(), *s)).count();
        Ok(Value::Int(i64::try_from(added).unwrap_or(i64::MAX)))
    }

    fn geo_dist(&mut self, name: &str, args: &[Bytes]) -> Result<Value, DriverError> {
        arity(name, args, 3)?;
        let unit = match args.get(3) {
            None => geo::Unit::Meters,
            Some(raw) => geo::Unit::parse(raw)
                .ok_or_else(|| err("ERR unsupported unit provided. please use M, KM, FT, MI"))?,
        };
        let Some(z) = self.zset(&args[0])? else {
            return Ok(Value::Nil);
        };
        let (Some(a), Some(b)) = (z.score(&args[1]), z.score(&args[2])) else {
            return Ok(Value::Nil);
        };
        let meters = geo::distance(geo::decode(a), geo::decode(b));
        Ok(Value::bulk(format!("{:.4}", unit.from_meters(meters))))
    }
}
