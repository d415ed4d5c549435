use std::fmt;

use thiserror::Error;

/// Errors raised while building or parsing core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration value was rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// A TOML configuration document could not be parsed.
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A version string could not be parsed.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// `INFO` output did not contain a required field.
    #[error("missing field in INFO reply: {0}")]
    MissingInfoField(&'static str),
}

/// Collects the errors of a fan-out operation.
///
/// Successful branches contribute nothing; [`into_result`](Self::into_result)
/// yields `Ok(())` when no branch failed.
#[derive(Debug)]
pub struct MultiError<E> {
    errors: Vec<E>,
}

impl<E> Default for MultiError<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E> MultiError<E> {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn push(&mut self, err: E) {
        self.errors.push(err);
    }

    /// Record the error of `result`, if any.
    pub fn push_result<T>(&mut self, result: Result<T, E>) {
        if let Err(e) = result {
            self.errors.push(e);
        }
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` when nothing failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The recorded errors, in push order.
    pub fn errors(&self) -> &[E] {
        &self.errors
    }

    /// Consume the container and return the recorded errors.
    pub fn into_inner(self) -> Vec<E> {
        self.errors
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => f.write_str("no errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for e in &self.errors {
                    write!(f, "\n\t* {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for MultiError<E> {}

impl<E> FromIterator<E> for MultiError<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_ok() {
        let errs: MultiError<CoreError> = MultiError::new();
        assert!(errs.is_empty());
        assert!(errs.into_result().is_ok());
    }

    #[test]
    fn push_result_skips_successes() {
        let mut errs = MultiError::new();
        errs.push_result::<()>(Ok(()));
        errs.push_result::<()>(Err(CoreError::Config("bad".into())));
        errs.push_result::<u8>(Ok(3));
        assert_eq!(errs.len(), 1);
        let err = errs.into_result().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: bad");
    }

    #[test]
    fn display_lists_every_error() {
        let errs: MultiError<CoreError> = vec![
            CoreError::Config("a".into()),
            CoreError::InvalidVersion("b".into()),
        ]
        .into_iter()
        .collect();
        let rendered = errs.to_string();
        assert!(rendered.starts_with("2 errors occurred:"));
        assert!(rendered.contains("configuration error: a"));
        assert!(rendered.contains("invalid version: b"));
    }
}
