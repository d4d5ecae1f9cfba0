#![forbid(unsafe_code)]
//! Device configurations for SlowFS.
//!
//! A [`DeviceConfig`] describes the simulated device: seek geometry,
//! read/write/allocate bandwidths, metadata cost, and the fsync/write
//! strategies. Configs load from a JSON document (a top-level array) and
//! merge with the built-ins; validation happens before any request is
//! scheduled.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use slowfs_types::{ByteCount, ByteRate};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Name of the always-present built-in configuration.
pub const HDD_7200_RPM: &str = "hdd7200rpm";

/// Errors from loading or validating device configurations.
///
/// All of these are fatal at startup; the scheduler only ever sees a
/// validated config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed device config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate device config with name {0:?}")]
    DuplicateName(String),

    #[error("unknown device config {0:?}")]
    UnknownConfig(String),

    #[error("unknown fsync strategy {0:?} (choices: none, dumb, writeback)")]
    UnknownFsyncStrategy(String),

    #[error("unknown write strategy {0:?} (choices: fast, simulate)")]
    UnknownWriteStrategy(String),

    #[error("device config {name:?}: {reason}")]
    Invalid { name: String, reason: &'static str },
}

// ── Strategies ──────────────────────────────────────────────────────────────

/// How fsync is charged against the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FsyncStrategy {
    /// Fsync is free.
    #[default]
    None,
    /// A flat `10 × seekTime` worst-case approximation.
    Dumb,
    /// Dirty bytes accumulate in a write-back cache and are paid on fsync
    /// or drained during device idle time.
    WriteBack,
}

impl FromStr for FsyncStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "no" => Ok(Self::None),
            "dumb" => Ok(Self::Dumb),
            "writeback" | "writebackcache" | "wbc" => Ok(Self::WriteBack),
            other => Err(ConfigError::UnknownFsyncStrategy(other.to_owned())),
        }
    }
}

impl fmt::Display for FsyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Dumb => "dumb",
            Self::WriteBack => "writeback",
        })
    }
}

/// How writes are charged at submission time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WriteStrategy {
    /// Writes are free when submitted; bytes enter the write-back cache
    /// and are paid for later.
    #[default]
    Fast,
    /// Writes are charged synchronously with seek + bandwidth cost.
    Simulate,
}

impl FromStr for WriteStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "simulate" => Ok(Self::Simulate),
            other => Err(ConfigError::UnknownWriteStrategy(other.to_owned())),
        }
    }
}

impl fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Simulate => "simulate",
        })
    }
}

// Serde routes through FromStr/Display so the JSON document and the CLI
// flag surface accept the same grammar.
macro_rules! string_serde {
    ($ty:ty, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct V;
                impl Visitor<'_> for V {
                    type Value = $ty;

                    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                        f.write_str($expecting)
                    }

                    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                        value.parse().map_err(de::Error::custom)
                    }
                }
                deserializer.deserialize_str(V)
            }
        }
    };
}

string_serde!(FsyncStrategy, "one of \"none\", \"dumb\", \"writeback\"");
string_serde!(WriteStrategy, "one of \"fast\", \"simulate\"");

// ── Duration fields ─────────────────────────────────────────────────────────

/// Serde bridge for duration fields using the humantime grammar
/// (`"5ms"`, `"1h 30m"`).
pub mod duration_str {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        struct V;
        impl Visitor<'_> for V {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration like \"5ms\"")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
                humantime::parse_duration(value).map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_str(V)
    }
}

// ── DeviceConfig ────────────────────────────────────────────────────────────

/// Parameters of one simulated device.
///
/// Field names in the JSON document are camelCase; byte counts, rates, and
/// durations are strings (`"4KiB"`, `"50MB/s"`, `"5ms"`). Unknown fields are
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeviceConfig {
    /// Unique name within the merged config set.
    pub name: String,

    /// Maximum forward gap that still counts as sequential. Zero disables
    /// locality: every access after the first seeks.
    pub seek_window: ByteCount,

    /// Penalty paid when an access is not sequential.
    #[serde(with = "duration_str")]
    pub seek_time: Duration,

    pub read_bytes_per_second: ByteRate,
    pub write_bytes_per_second: ByteRate,
    pub allocate_bytes_per_second: ByteRate,

    /// Parsed, stored, and validated but not consulted by the scheduler;
    /// request reordering is not currently modeled.
    #[serde(with = "duration_str", default)]
    pub request_reorder_max_delay: Duration,

    /// Flat cost of metadata operations (stat, rename, open, close, ...).
    #[serde(with = "duration_str")]
    pub metadata_op_time: Duration,

    pub fsync_strategy: FsyncStrategy,
    pub write_strategy: WriteStrategy,
}

impl DeviceConfig {
    /// Time to read `size` bytes at the configured read bandwidth.
    #[must_use]
    pub fn read_time(&self, size: ByteCount) -> Duration {
        self.read_bytes_per_second.duration_for(size)
    }

    /// Time to write `size` bytes at the configured write bandwidth.
    #[must_use]
    pub fn write_time(&self, size: ByteCount) -> Duration {
        self.write_bytes_per_second.duration_for(size)
    }

    /// Time to allocate `size` bytes at the configured allocate bandwidth.
    #[must_use]
    pub fn allocate_time(&self, size: ByteCount) -> Duration {
        self.allocate_bytes_per_second.duration_for(size)
    }

    /// Check the config invariants, returning the first violation.
    ///
    /// Durations are `std::time::Duration` and therefore non-negative by
    /// construction; what remains is name presence and bandwidth positivity
    /// for every strategy that divides by a bandwidth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: "name must not be empty",
            });
        }
        if self.read_bytes_per_second.is_zero() {
            return Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: "readBytesPerSecond must be positive",
            });
        }
        if self.allocate_bytes_per_second.is_zero() {
            return Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: "allocateBytesPerSecond must be positive",
            });
        }
        let write_rate_used = self.write_strategy == WriteStrategy::Simulate
            || self.fsync_strategy == FsyncStrategy::WriteBack;
        if write_rate_used && self.write_bytes_per_second.is_zero() {
            return Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: "writeBytesPerSecond must be positive under a simulating strategy",
            });
        }
        Ok(())
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: seekWindow={} seekTime={} read={} write={} allocate={} \
             metadataOpTime={} fsync={} write-strategy={}",
            self.name,
            self.seek_window,
            humantime::format_duration(self.seek_time),
            self.read_bytes_per_second,
            self.write_bytes_per_second,
            self.allocate_bytes_per_second,
            humantime::format_duration(self.metadata_op_time),
            self.fsync_strategy,
            self.write_strategy,
        )
    }
}

// ── Built-ins and loading ───────────────────────────────────────────────────

/// The built-in 7200 RPM spinning-disk profile.
#[must_use]
pub fn hdd_7200_rpm() -> DeviceConfig {
    DeviceConfig {
        name: HDD_7200_RPM.to_owned(),
        seek_window: ByteCount(4 << 10),
        seek_time: Duration::from_millis(10),
        read_bytes_per_second: ByteRate(100_000_000),
        write_bytes_per_second: ByteRate(100_000_000),
        allocate_bytes_per_second: ByteRate(4_000_000_000),
        request_reorder_max_delay: Duration::from_micros(175),
        metadata_op_time: Duration::from_millis(10),
        fsync_strategy: FsyncStrategy::WriteBack,
        write_strategy: WriteStrategy::Fast,
    }
}

/// The built-in configurations, keyed by name.
#[must_use]
pub fn built_in_configs() -> BTreeMap<String, DeviceConfig> {
    let hdd = hdd_7200_rpm();
    BTreeMap::from([(hdd.name.clone(), hdd)])
}

/// Parse a JSON document holding a top-level array of device configs.
pub fn parse_device_configs(json: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Parse `json`, validate every entry, and merge the result with the
/// built-ins.
///
/// A name collision — between two entries in the document, or between an
/// entry and a built-in — is fatal, as is any entry that fails
/// [`DeviceConfig::validate`].
pub fn load_device_configs(json: &str) -> Result<BTreeMap<String, DeviceConfig>, ConfigError> {
    let mut configs = built_in_configs();
    for config in parse_device_configs(json)? {
        config.validate()?;
        let name = config.name.clone();
        if configs.insert(name.clone(), config).is_some() {
            return Err(ConfigError::DuplicateName(name));
        }
    }
    Ok(configs)
}
