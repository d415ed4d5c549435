use std::collections::HashMap;
use std::hash::Hash;

use bytes::Bytes;

use crate::error::DriverError;

/// A decoded server reply.
///
/// This is the single tagged result shape every command produces; typed
/// accessors are provided through [`FromValue`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Bulk(Bytes),
    Status(String),
    Double(f64),
    Bool(bool),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Shorthand for the `+OK` status reply.
    pub fn ok() -> Self {
        Self::Status("OK".to_owned())
    }

    /// Build a bulk reply from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Rough in-memory size, used to weigh client-side cache entries.
    pub fn approximate_size(&self) -> usize {
        match self {
            Self::Nil | Self::Int(_) | Self::Double(_) | Self::Bool(_) => 8,
            Self::Bulk(b) => b.len(),
            Self::Status(s) => s.len(),
            Self::Array(items) => items.iter().map(Self::approximate_size).sum::<usize>() + 8,
            Self::Map(pairs) => {
                pairs
                    .iter()
                    .map(|(k, v)| k.approximate_size() + v.approximate_size())
                    .sum::<usize>()
                    + 8
            }
        }
    }

    /// Decode into a typed result.
    pub fn decode<T: FromValue>(self) -> Result<T, DriverError> {
        T::from_value(self)
    }

    /// The textual form of a scalar reply.
    fn into_text(self) -> Result<String, DriverError> {
        match self {
            Self::Nil => Err(DriverError::Nil),
            Self::Bulk(b) => String::from_utf8(b.to_vec())
                .map_err(|e| DriverError::UnexpectedReply(format!("non-utf8 bulk string: {e}"))),
            Self::Status(s) => Ok(s),
            Self::Int(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::Bool(b) => Ok(if b { "1" } else { "0" }.to_owned()),
            other => Err(unexpected("string", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Value) -> DriverError {
    DriverError::UnexpectedReply(format!("expected {wanted}, got {got:?}"))
}

/// Typed decoding of a [`Value`].
///
/// A nil reply decodes to `Err(DriverError::Nil)` unless the target is an
/// `Option`, a collection, `bool` (false), or `Value` itself.
pub trait FromValue: Sized {
    fn from_value(v: Value) -> Result<Self, DriverError>;
}

impl FromValue for Value {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        Ok(v)
    }
}

impl FromValue for () {
    fn from_value(_: Value) -> Result<Self, DriverError> {
        Ok(())
    }
}

impl FromValue for String {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        v.into_text()
    }
}

impl FromValue for Bytes {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Nil => Err(DriverError::Nil),
            Value::Bulk(b) => Ok(b),
            Value::Status(s) => Ok(Bytes::from(s)),
            other => other.into_text().map(Bytes::from),
        }
    }
}

impl FromValue for i64 {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Int(i) => Ok(i),
            Value::Bool(b) => Ok(i64::from(b)),
            Value::Nil => Err(DriverError::Nil),
            other => {
                let text = other.into_text()?;
                text.trim()
                    .parse()
                    .map_err(|_| DriverError::UnexpectedReply(format!("not an integer: {text}")))
            }
        }
    }
}

impl FromValue for u64 {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        let i = i64::from_value(v)?;
        u64::try_from(i).map_err(|_| DriverError::UnexpectedReply(format!("negative count: {i}")))
    }
}

impl FromValue for usize {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        let i = i64::from_value(v)?;
        usize::try_from(i).map_err(|_| DriverError::UnexpectedReply(format!("negative count: {i}")))
    }
}

impl FromValue for f64 {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Double(d) => Ok(d),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(i as f64),
            Value::Nil => Err(DriverError::Nil),
            other => {
                let text = other.into_text()?;
                match text.trim() {
                    "inf" | "+inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    t => t
                        .parse()
                        .map_err(|_| DriverError::UnexpectedReply(format!("not a float: {text}"))),
                }
            }
        }
    }
}

impl FromValue for bool {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Bool(b) => Ok(b),
            Value::Int(i) => Ok(i != 0),
            Value::Status(s) => Ok(s == "OK"),
            Value::Nil => Ok(false),
            Value::Array(items) if items.len() == 1 => {
                bool::from_value(items.into_iter().next().unwrap_or(Value::Nil))
            }
            other => Err(unexpected("boolean", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Nil => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Nil => Ok(Vec::new()),
            Value::Array(items) => items.into_iter().map(T::from_value).collect(),
            other => Err(unexpected("array", &other)),
        }
    }
}

impl<K, V> FromValue for HashMap<K, V>
where
    K: FromValue + Eq + Hash,
    V: FromValue,
{
    fn from_value(v: Value) -> Result<Self, DriverError> {
        match v {
            Value::Nil => Ok(HashMap::new()),
            Value::Map(pairs) => pairs
                .into_iter()
                .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            // RESP2 flattens maps into alternating arrays.
            Value::Array(items) => {
                if items.len() % 2 != 0 {
                    return Err(DriverError::UnexpectedReply(
                        "odd number of elements for a map".into(),
                    ));
                }
                let mut out = HashMap::with_capacity(items.len() / 2);
                let mut it = items.into_iter();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    out.insert(K::from_value(k)?, V::from_value(v)?);
                }
                Ok(out)
            }
            other => Err(unexpected("map", &other)),
        }
    }
}

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Bytes,
    pub score: f64,
}

impl ScoredMember {
    /// Decode a `WITHSCORES` reply, which is either flat
    /// (`[m1, s1, m2, s2]`, RESP2) or nested (`[[m1, s1], ...]`, RESP3).
    pub fn decode_list(v: Value) -> Result<Vec<Self>, DriverError> {
        let items = match v {
            Value::Nil => return Ok(Vec::new()),
            Value::Array(items) => items,
            other => return Err(unexpected("array", &other)),
        };
        if items.iter().all(|i| matches!(i, Value::Array(_))) {
            return items
                .into_iter()
                .map(|pair| {
                    let (member, score): (Bytes, f64) = match pair {
                        Value::Array(mut p) if p.len() == 2 => {
                            let s = p.pop().unwrap_or(Value::Nil);
                            let m = p.pop().unwrap_or(Value::Nil);
                            (Bytes::from_value(m)?, f64::from_value(s)?)
                        }
                        other => return Err(unexpected("member/score pair", &other)),
                    };
                    Ok(Self { member, score })
                })
                .collect();
        }
        if items.len() % 2 != 0 {
            return Err(DriverError::UnexpectedReply(
                "odd number of elements in WITHSCORES reply".into(),
            ));
        }
        let mut out = Vec::with_capacity(items.len() / 2);
        let mut it = items.into_iter();
        while let (Some(m), Some(s)) = (it.next(), it.next()) {
            out.push(Self {
                member: Bytes::from_value(m)?,
                score: f64::from_value(s)?,
            });
        }
        Ok(out)
    }
}
