use std::fmt;

use redix_driver::{Cmd, IntoArg};

use super::spec;
use crate::{Client, ClientError};

/// A named point for `GEOADD`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoLocation {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl GeoLocation {
    pub fn new(name: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        Self {
            name: name.into(),
            longitude,
            latitude,
        }
    }
}

/// Distance unit accepted by `GEODIST`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoUnit {
    #[default]
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl GeoUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Kilometers => "km",
            Self::Miles => "mi",
            Self::Feet => "ft",
        }
    }
}

impl fmt::Display for GeoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Client {
    /// `GEOADD key lon lat name [lon lat name ...]`, returning how many
    /// members were newly added.
    pub async fn geo_add(&self, key: &str, locations: &[GeoLocation]) -> Result<i64, ClientError> {
        let mut cmd = Cmd::new("GEOADD").arg(key);
        for loc in locations {
            cmd.push(loc.longitude);
            cmd.push(loc.latitude);
            cmd.push(loc.name.as_str());
        }
        self.call(&spec::GEOADD, cmd, &[key]).await
    }

    /// `GEODIST key a b unit`; the nil error when either member is absent.
    pub async fn geo_dist(
        &self,
        key: &str,
        a: impl IntoArg,
        b: impl IntoArg,
        unit: GeoUnit,
    ) -> Result<f64, ClientError> {
        let cmd = Cmd::new("GEODIST").arg(key).arg(a).arg(b).arg(unit.as_str());
        self.call(&spec::GEODIST, cmd, &[key]).await
    }
}
