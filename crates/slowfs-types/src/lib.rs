#![forbid(unsafe_code)]
//! Byte counts, transfer rates, and timestamps for SlowFS.
//!
//! Device configurations carry values like `"4KiB"` and `"50MB/s"`; this
//! crate owns that grammar and the unit-carrying wrappers the scheduler
//! computes with. All rate/duration conversions round half-to-even at
//! nanosecond resolution.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Add;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Errors produced by the byte-count / rate grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("empty value")]
    Empty,
    #[error("missing unit suffix in {input:?}")]
    MissingSuffix { input: String },
    #[error("unknown unit suffix {suffix:?} in {input:?}")]
    UnknownSuffix { input: String, suffix: String },
    #[error("invalid number {number:?} in {input:?}")]
    InvalidNumber { input: String, number: String },
    #[error("negative values are not allowed: {input:?}")]
    Negative { input: String },
    #[error("rate suffix \"/s\" is not allowed here: {input:?}")]
    RateSuffixNotAllowed { input: String },
    #[error("value out of range: {input:?}")]
    Overflow { input: String },
}

// ── Suffix table ────────────────────────────────────────────────────────────

/// Recognized suffixes, longest first so `KiB` wins over `B`.
const SUFFIXES: &[(&str, u64)] = &[
    ("KiB", 1 << 10),
    ("MiB", 1 << 20),
    ("GiB", 1 << 30),
    ("TiB", 1 << 40),
    ("KB", 1_000),
    ("MB", 1_000_000),
    ("GB", 1_000_000_000),
    ("TB", 1_000_000_000_000),
    ("B", 1),
];

/// Round `numerator / denominator` to the nearest integer, ties to even.
fn div_round_half_even(numerator: u128, denominator: u128) -> u128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    match (remainder * 2).cmp(&denominator) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    }
}

/// Parse `<number><suffix>` with an optional trailing `/s`.
///
/// Returns the byte value and whether the `/s` rate marker was present.
/// The number may carry a fractional part; the result is rounded
/// half-to-even to integer bytes.
fn parse_scaled(input: &str) -> Result<(u64, bool), UnitParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UnitParseError::Empty);
    }
    if trimmed.starts_with('-') {
        return Err(UnitParseError::Negative {
            input: input.to_owned(),
        });
    }

    let (body, is_rate) = match trimmed.strip_suffix("/s") {
        Some(rest) => (rest.trim_end(), true),
        None => (trimmed, false),
    };

    let digits_end = body
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(body.len());
    let (number, suffix) = body.split_at(digits_end);
    let suffix = suffix.trim_start();

    if number.is_empty() {
        return Err(UnitParseError::InvalidNumber {
            input: input.to_owned(),
            number: number.to_owned(),
        });
    }
    if suffix.is_empty() {
        return Err(UnitParseError::MissingSuffix {
            input: input.to_owned(),
        });
    }

    let multiplier = SUFFIXES
        .iter()
        .find(|(name, _)| *name == suffix)
        .map(|(_, mult)| *mult)
        .ok_or_else(|| UnitParseError::UnknownSuffix {
            input: input.to_owned(),
            suffix: suffix.to_owned(),
        })?;

    let (int_part, frac_part) = match number.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (number, ""),
    };
    if frac_part.contains('.') || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(UnitParseError::InvalidNumber {
            input: input.to_owned(),
            number: number.to_owned(),
        });
    }

    // Evaluate (int.frac × multiplier) exactly in u128, then round to bytes.
    let digits = format!("{int_part}{frac_part}");
    if digits.len() > 30 {
        return Err(UnitParseError::Overflow {
            input: input.to_owned(),
        });
    }
    let mantissa: u128 = if digits.is_empty() {
        0
    } else {
        digits
            .parse()
            .map_err(|_| UnitParseError::InvalidNumber {
                input: input.to_owned(),
                number: number.to_owned(),
            })?
    };
    let scale = 10_u128.pow(u32::try_from(frac_part.len()).unwrap_or(u32::MAX));
    let scaled = mantissa
        .checked_mul(u128::from(multiplier))
        .ok_or_else(|| UnitParseError::Overflow {
            input: input.to_owned(),
        })?;
    let bytes = u64::try_from(div_round_half_even(scaled, scale)).map_err(|_| {
        UnitParseError::Overflow {
            input: input.to_owned(),
        }
    })?;

    Ok((bytes, is_rate))
}

/// Format `value` bytes using the largest suffix that divides it exactly.
fn format_scaled(value: u64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if value == 0 {
        return write!(f, "0B");
    }
    for (name, mult) in [
        ("TiB", 1_u64 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
        ("TB", 1_000_000_000_000),
        ("GB", 1_000_000_000),
        ("MB", 1_000_000),
        ("KB", 1_000),
    ] {
        if value % mult == 0 {
            return write!(f, "{}{}", value / mult, name);
        }
    }
    write!(f, "{value}B")
}

// ── ByteCount ───────────────────────────────────────────────────────────────

/// A non-negative count of bytes.
///
/// Unit-carrying wrapper to keep byte offsets/sizes from mixing with other
/// integers; arithmetic is via the checked/saturating helpers.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ByteCount(pub u64);

impl ByteCount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for ByteCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(self.0, f)
    }
}

impl FromStr for ByteCount {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bytes, is_rate) = parse_scaled(s)?;
        if is_rate {
            return Err(UnitParseError::RateSuffixNotAllowed {
                input: s.to_owned(),
            });
        }
        Ok(Self(bytes))
    }
}

// ── ByteRate ────────────────────────────────────────────────────────────────

/// A transfer rate in bytes per second.
///
/// Parses the same suffix grammar as [`ByteCount`] with an optional trailing
/// `/s` marker. Zero is representable; configurations reject it where a
/// strategy would divide by it.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct ByteRate(pub u64);

impl ByteRate {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Time to transfer `bytes` at this rate, rounded half-to-even to
    /// nanoseconds. A zero rate yields a zero duration.
    #[must_use]
    pub fn duration_for(self, bytes: ByteCount) -> Duration {
        if self.0 == 0 {
            return Duration::ZERO;
        }
        let nanos =
            div_round_half_even(u128::from(bytes.0) * NANOS_PER_SEC, u128::from(self.0));
        u64::try_from(nanos).map_or(Duration::MAX, Duration::from_nanos)
    }

    /// Bytes transferred in `budget` at this rate, rounded half-to-even.
    #[must_use]
    pub fn bytes_in(self, budget: Duration) -> ByteCount {
        let bytes = div_round_half_even(u128::from(self.0) * budget.as_nanos(), NANOS_PER_SEC);
        ByteCount(u64::try_from(bytes).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for ByteRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_scaled(self.0, f)?;
        write!(f, "/s")
    }
}

impl FromStr for ByteRate {
    type Err = UnitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bytes, _is_rate) = parse_scaled(s)?;
        Ok(Self(bytes))
    }
}

// ── Serde (string grammar on both sides) ────────────────────────────────────

impl Serialize for ByteCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteCount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(UnitVisitor::<Self>::new("a byte count like \"4KiB\""))
    }
}

impl Serialize for ByteRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(UnitVisitor::<Self>::new("a rate like \"50MB/s\""))
    }
}

struct UnitVisitor<T> {
    expecting: &'static str,
    _marker: std::marker::PhantomData<T>,
}

impl<T> UnitVisitor<T> {
    fn new(expecting: &'static str) -> Self {
        Self {
            expecting,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Visitor<'_> for UnitVisitor<T>
where
    T: FromStr<Err = UnitParseError>,
{
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.expecting)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<T, E> {
        value.parse().map_err(de::Error::custom)
    }
}

// ── Timestamp ───────────────────────────────────────────────────────────────

/// A wall-clock instant, expressed as the offset from a process-local epoch
/// at nanosecond resolution.
///
/// The device context initializes its busy-until clock to
/// [`Timestamp::ZERO`], so the first request never waits on prior work.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub Duration);

impl Timestamp {
    pub const ZERO: Self = Self(Duration::ZERO);

    /// Elapsed time since `earlier`, or `None` if `earlier` is later.
    #[must_use]
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        self.0.checked_sub(earlier.0)
    }

    /// Elapsed time since `earlier`, clamped to zero.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:?}", self.0)
    }
}
