//! Server version and topology probing.
//!
//! The client learns what it is talking to by issuing `INFO cluster server`
//! and reading two fields out of the reply: `redis_version` and
//! `cluster_enabled`.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A semantic version triple, as reported in `redis_version:`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Construct a version from its parts.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Parse the leading digits of a version component (`"4-rc1"` -> 4).
fn leading_number(component: &str) -> Option<u32> {
    let end = component
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(component.len());
    component[..end].parse().ok()
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(leading_number)
            .ok_or_else(|| CoreError::InvalidVersion(s.to_owned()))?;
        // Missing minor / patch components default to zero.
        let minor = parts.next().and_then(leading_number).unwrap_or(0);
        let patch = parts.next().and_then(leading_number).unwrap_or(0);
        Ok(Self::new(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The facts the client extracts from `INFO cluster server`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: Version,
    pub cluster_enabled: bool,
}

impl ServerInfo {
    /// Parse the text of an `INFO` reply.
    ///
    /// `redis_version` is required. A missing `cluster_enabled` line is read
    /// as standalone, which is what servers built without cluster support
    /// report.
    pub fn parse(info: &str) -> Result<Self, CoreError> {
        let mut version = None;
        let mut cluster_enabled = false;
        for line in info.lines() {
            let Some((field, value)) = line.trim().split_once(':') else {
                continue;
            };
            match field {
                "redis_version" => version = Some(value.parse::<Version>()?),
                "cluster_enabled" => cluster_enabled = value.trim() == "1",
                _ => {}
            }
        }
        let version = version.ok_or(CoreError::MissingInfoField("redis_version"))?;
        Ok(Self {
            version,
            cluster_enabled,
        })
    }
}
