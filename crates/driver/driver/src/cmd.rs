use bytes::{BufMut, Bytes, BytesMut};

/// Conversion into a single command argument.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

macro_rules! display_arg {
    ($($t:ty),*) => {
        $(
            impl IntoArg for $t {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

display_arg!(i32, i64, u32, u64, usize, f64);

/// A command ready to be sent: a flat list of argument tokens.
///
/// The first token(s) name the command. Multi-word commands such as
/// `CLIENT SETNAME` are split on whitespace by [`Cmd::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Start a command from its (possibly multi-word) name.
    pub fn new(name: &str) -> Self {
        Self {
            args: name.split_whitespace().map(IntoArg::into_arg).collect(),
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl IntoArg) -> Self {
        self.args.push(arg.into_arg());
        self
    }

    /// Append every argument of `args`.
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.args.extend(args.into_iter().map(IntoArg::into_arg));
        self
    }

    /// Append an argument in place.
    pub fn push(&mut self, arg: impl IntoArg) {
        self.args.push(arg.into_arg());
    }

    /// All tokens, command name included.
    pub fn tokens(&self) -> &[Bytes] {
        &self.args
    }

    /// The first token, upper-cased.
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|t| String::from_utf8_lossy(t).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// A byte string uniquely identifying this command and its arguments,
    /// used as the client-side cache key.
    pub fn cache_key(&self) -> Bytes {
        let len = self.args.iter().map(|a| a.len() + 4).sum();
        let mut buf = BytesMut::with_capacity(len);
        for a in &self.args {
            buf.put_u32(u32::try_from(a.len()).unwrap_or(u32::MAX));
            buf.put_slice(a);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_word_names() {
        let cmd = Cmd::new("client setname").arg("worker-1");
        assert_eq!(cmd.tokens().len(), 3);
        assert_eq!(cmd.name(), "CLIENT");
    }

    #[test]
    fn formats_numeric_args() {
        let cmd = Cmd::new("ZADD").arg("k").arg(-3i64).arg(1.5f64).arg("m");
        let tokens: Vec<&[u8]> = cmd.tokens().iter().map(AsRef::as_ref).collect();
        assert_eq!(tokens, [&b"ZADD"[..], b"k", b"-3", b"1.5", b"m"]);
    }

    #[test]
    fn cache_keys_distinguish_token_boundaries() {
        let a = Cmd::new("GET").arg("ab").arg("c");
        let b = Cmd::new("GET").arg("a").arg("bc");
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
    }
}
