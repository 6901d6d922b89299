//! Exact byte counts with decimal (SI) and binary (IEC) conversions.
//!
//! [`ByteSize`] is signed on purpose: usable space is computed as
//! `available - reserved` and goes negative when reservations overshoot the
//! free space actually left on a disk.

use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

const KB: f64 = 1e3;
const MB: f64 = 1e6;
const GB: f64 = 1e9;
const TB: f64 = 1e12;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;
const TIB: f64 = GIB * 1024.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ByteSize(i64);

impl ByteSize {
    pub const ZERO: ByteSize = ByteSize(0);

    pub const fn new(bytes: i64) -> Self {
        Self(bytes)
    }

    pub fn from_mb(mb: f64) -> Self {
        Self((mb * MB) as i64)
    }

    pub fn from_gb(gb: f64) -> Self {
        Self((gb * GB) as i64)
    }

    pub fn from_mib(mib: f64) -> Self {
        Self((mib * MIB) as i64)
    }

    pub fn from_gib(gib: f64) -> Self {
        Self((gib * GIB) as i64)
    }

    /// Clamp an unsigned count (as reported by the kernel) into range.
    pub fn from_u64(bytes: u64) -> Self {
        Self(i64::try_from(bytes).unwrap_or(i64::MAX))
    }

    pub const fn bytes(self) -> i64 {
        self.0
    }

    pub fn kb(self) -> f64 {
        self.0 as f64 / KB
    }

    pub fn kib(self) -> f64 {
        self.0 as f64 / KIB
    }

    pub fn mb(self) -> f64 {
        self.0 as f64 / MB
    }

    pub fn mib(self) -> f64 {
        self.0 as f64 / MIB
    }

    pub fn gb(self) -> f64 {
        self.0 as f64 / GB
    }

    pub fn gib(self) -> f64 {
        self.0 as f64 / GIB
    }

    pub fn tb(self) -> f64 {
        self.0 as f64 / TB
    }

    pub fn tib(self) -> f64 {
        self.0 as f64 / TIB
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for ByteSize {
    type Output = ByteSize;

    fn add(self, rhs: ByteSize) -> ByteSize {
        ByteSize(self.0.saturating_add(rhs.0))
    }
}

impl Sub for ByteSize {
    type Output = ByteSize;

    fn sub(self, rhs: ByteSize) -> ByteSize {
        ByteSize(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<i64> for ByteSize {
    type Output = ByteSize;

    fn mul(self, rhs: i64) -> ByteSize {
        ByteSize(self.0.saturating_mul(rhs))
    }
}

/// How many whole `rhs` units fit in `self`, truncated toward zero.
impl Div for ByteSize {
    type Output = i64;

    fn div(self, rhs: ByteSize) -> i64 {
        if rhs.0 == 0 {
            return 0;
        }
        self.0 / rhs.0
    }
}

impl std::iter::Sum for ByteSize {
    fn sum<I: Iterator<Item = ByteSize>>(iter: I) -> ByteSize {
        iter.fold(ByteSize::ZERO, Add::add)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs() as f64;
        if magnitude >= TB {
            write!(f, "{:.6} TB", self.tb())
        } else if magnitude >= GB {
            write!(f, "{:.6} GB", self.gb())
        } else if magnitude >= MB {
            write!(f, "{:.6} MB", self.mb())
        } else if magnitude >= KB {
            write!(f, "{:.6} KB", self.kb())
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid byte size `{0}`")]
pub struct ParseByteSizeError(String);

impl FromStr for ByteSize {
    type Err = ParseByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| ParseByteSizeError(s.to_string()))?;

        let factor = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1.0,
            "kb" => KB,
            "mb" => MB,
            "gb" => GB,
            "tb" => TB,
            "kib" => KIB,
            "mib" => MIB,
            "gib" => GIB,
            "tib" => TIB,
            _ => return Err(ParseByteSizeError(s.to_string())),
        };

        Ok(ByteSize((value * factor) as i64))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(b) => Ok(ByteSize(b)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
