//! 52-bit geohash scores and great-circle distances, matching the server's
//! own encoding so that distances agree to the reported precision.

const LAT_MIN: f64 = -85.051_128_78;
const LAT_MAX: f64 = 85.051_128_78;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;
const STEP: u32 = 26;

const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

/// Distance unit accepted by `GEODIST`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Unit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl Unit {
    pub(crate) fn parse(raw: &[u8]) -> Option<Self> {
        match raw.to_ascii_lowercase().as_slice() {
            b"m" => Some(Self::Meters),
            b"km" => Some(Self::Kilometers),
            b"mi" => Some(Self::Miles),
            b"ft" => Some(Self::Feet),
            _ => None,
        }
    }

    fn meters(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Kilometers => 1000.0,
            Self::Miles => 1609.34,
            Self::Feet => 0.3048,
        }
    }

    pub(crate) fn from_meters(self, d: f64) -> f64 {
        d / self.meters()
    }
}

pub(crate) fn valid(lon: f64, lat: f64) -> bool {
    (LON_MIN..=LON_MAX).contains(&lon) && (LAT_MIN..=LAT_MAX).contains(&lat)
}

fn spread(v: u32) -> u64 {
    let mut out = 0u64;
    for i in 0..STEP {
        out |= u64::from((v >> i) & 1) << (2 * i);
    }
    out
}

fn squash(v: u64) -> u32 {
    let mut out = 0u32;
    for i in 0..STEP {
        out |= u32::try_from((v >> (2 * i)) & 1).unwrap_or(0) << i;
    }
    out
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(v: f64, min: f64, max: f64) -> u32 {
    let offset = (v - min) / (max - min);
    ((offset * f64::from(1u32 << STEP)) as u32).min((1u32 << STEP) - 1)
}

/// Encode a coordinate as the sorted-set score of a geo member.
/// Latitude occupies the even bits and longitude the odd bits.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn encode(lon: f64, lat: f64) -> f64 {
    let lat_bits = spread(quantize(lat, LAT_MIN, LAT_MAX));
    let lon_bits = spread(quantize(lon, LON_MIN, LON_MAX));
    (lat_bits | (lon_bits << 1)) as f64
}

/// Decode a geo score back to the centre of its cell as `(lon, lat)`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn decode(score: f64) -> (f64, f64) {
    let bits = score as u64;
    let lat_cell = f64::from(squash(bits));
    let lon_cell = f64::from(squash(bits >> 1));
    let cells = f64::from(1u32 << STEP);

    let lat_lo = LAT_MIN + (lat_cell / cells) * (LAT_MAX - LAT_MIN);
    let lat_hi = LAT_MIN + ((lat_cell + 1.0) / cells) * (LAT_MAX - LAT_MIN);
    let lon_lo = LON_MIN + (lon_cell / cells) * (LON_MAX - LON_MIN);
    let lon_hi = LON_MIN + ((lon_cell + 1.0) / cells) * (LON_MAX - LON_MIN);

    let lon = ((lon_lo + lon_hi) / 2.0).clamp(LON_MIN, LON_MAX);
    let lat = ((lat_lo + lat_hi) / 2.0).clamp(LAT_MIN, LAT_MAX);
    (lon, lat)
}

/// Haversine distance in meters.
pub(crate) fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lon2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let u = ((lat2 - lat1) / 2.0).sin();
    let v = ((lon2 - lon1) / 2.0).sin();
    2.0 * EARTH_RADIUS_M * (u * u + lat1.cos() * lat2.cos() * v * v).sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_within_cell_precision() {
        let (lon, lat) = decode(encode(13.361_389, 38.115_556));
        assert!((lon - 13.361_389).abs() < 1e-4);
        assert!((lat - 38.115_556).abs() < 1e-4);
    }

    #[test]
    fn palermo_to_catania() {
        let palermo = decode(encode(13.361_389, 38.115_556));
        let catania = decode(encode(15.087_269, 37.502_669));
        let km = Unit::Kilometers.from_meters(distance(palermo, catania));
        assert!((km - 166.2742).abs() < 1e-3, "got {km}");
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(valid(0.0, 0.0));
        assert!(!valid(181.0, 0.0));
        assert!(!valid(0.0, 86.0));
        assert_eq!(Unit::parse(b"KM"), Some(Unit::Kilometers));
        assert_eq!(Unit::parse(b"yd"), None);
    }
}
