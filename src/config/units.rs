//! Size and duration value parsing for configuration attributes.
//!
//! Buffer limits are written as size strings (`8m`, `256k`, `1g`) and
//! intervals as seconds with an optional unit suffix (`0.5`, `30s`, `250ms`,
//! `10m`). Both forms are parsed leniently from strings; `ByteSize` also
//! deserializes from either a string or a plain integer so it can sit in
//! serde-backed configuration structs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};

/// A byte count parsed from a human-readable size string.
///
/// Accepted forms: a bare integer (`1048576`), or a number with a `k`, `m`,
/// or `g` suffix (case-insensitive, optional trailing `b`): `8m`, `256K`,
/// `1gb`, `1.5m`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub usize);

impl ByteSize {
    pub const KIB: usize = 1024;
    pub const MIB: usize = 1024 * 1024;
    pub const GIB: usize = 1024 * 1024 * 1024;

    #[must_use]
    pub fn bytes(self) -> usize {
        self.0
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 > 0 && self.0 % Self::GIB == 0 {
            write!(f, "{}g", self.0 / Self::GIB)
        } else if self.0 > 0 && self.0 % Self::MIB == 0 {
            write!(f, "{}m", self.0 / Self::MIB)
        } else if self.0 > 0 && self.0 % Self::KIB == 0 {
            write!(f, "{}k", self.0 / Self::KIB)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err("empty size string".to_string());
        }
        let lower = raw.to_ascii_lowercase();
        let body = lower.strip_suffix('b').unwrap_or(&lower);
        let (digits, multiplier) = match body.as_bytes().last() {
            Some(b'k') => (&body[..body.len() - 1], Self::KIB),
            Some(b'm') => (&body[..body.len() - 1], Self::MIB),
            Some(b'g') => (&body[..body.len() - 1], Self::GIB),
            _ => (body, 1),
        };
        let value: f64 = digits
            .parse()
            .map_err(|_| format!("`{raw}` is not a valid size"))?;
        if value < 0.0 {
            return Err(format!("`{raw}` is negative"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(ByteSize((value * multiplier as f64) as usize))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ByteSizeVisitor;

        impl Visitor<'_> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte count or size string such as \"8m\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                usize::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom("size out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

/// Parses a duration attribute. A bare number is seconds; `ms`, `s`, `m`,
/// and `h` suffixes select the unit.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let raw = s.trim();
    if raw.is_empty() {
        return Err("empty duration string".to_string());
    }
    let (digits, scale_secs) = if let Some(d) = raw.strip_suffix("ms") {
        (d, 0.001)
    } else if let Some(d) = raw.strip_suffix('s') {
        (d, 1.0)
    } else if let Some(d) = raw.strip_suffix('m') {
        (d, 60.0)
    } else if let Some(d) = raw.strip_suffix('h') {
        (d, 3600.0)
    } else {
        (raw, 1.0)
    };
    let value: f64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a valid duration"))?;
    if value < 0.0 || !value.is_finite() {
        return Err(format!("`{raw}` is not a valid duration"));
    }
    Ok(Duration::from_secs_f64(value * scale_secs))
}
