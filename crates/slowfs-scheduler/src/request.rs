//! Request descriptors handed to the scheduler by an adapter.

use slowfs_types::{ByteCount, Timestamp};
use std::fmt;
use std::path::PathBuf;

/// What kind of file operation a request models.
///
/// Marked non-exhaustive: the scheduler charges nothing for kinds it does
/// not recognize and keeps going (it backs a live filesystem and must never
/// panic the host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RequestKind {
    Read,
    Write,
    Open,
    Close,
    Fsync,
    Allocate,
    Metadata,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Fsync => "FSYNC",
            Self::Allocate => "ALLOCATE",
            Self::Metadata => "METADATA",
        })
    }
}

/// An immutable descriptor of one intercepted file operation.
///
/// `path` is opaque to the scheduler; it is only an identity key for
/// sequentiality tracking and write-back accounting. `start` and `size`
/// are meaningful for data requests and zero otherwise. `timestamp` must be
/// sampled at the call boundary, before the real operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub timestamp: Timestamp,
    pub path: PathBuf,
    pub start: ByteCount,
    pub size: ByteCount,
}

impl Request {
    #[must_use]
    pub fn read(
        timestamp: Timestamp,
        path: impl Into<PathBuf>,
        start: ByteCount,
        size: ByteCount,
    ) -> Self {
        Self {
            kind: RequestKind::Read,
            timestamp,
            path: path.into(),
            start,
            size,
        }
    }

    #[must_use]
    pub fn write(
        timestamp: Timestamp,
        path: impl Into<PathBuf>,
        start: ByteCount,
        size: ByteCount,
    ) -> Self {
        Self {
            kind: RequestKind::Write,
            timestamp,
            path: path.into(),
            start,
            size,
        }
    }

    #[must_use]
    pub fn allocate(
        timestamp: Timestamp,
        path: impl Into<PathBuf>,
        start: ByteCount,
        size: ByteCount,
    ) -> Self {
        Self {
            kind: RequestKind::Allocate,
            timestamp,
            path: path.into(),
            start,
            size,
        }
    }

    #[must_use]
    pub fn close(timestamp: Timestamp, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RequestKind::Close,
            timestamp,
            path: path.into(),
            start: ByteCount::ZERO,
            size: ByteCount::ZERO,
        }
    }

    #[must_use]
    pub fn fsync(timestamp: Timestamp, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: RequestKind::Fsync,
            timestamp,
            path: path.into(),
            start: ByteCount::ZERO,
            size: ByteCount::ZERO,
        }
    }

    /// A metadata request. Metadata timing does not depend on the file, so
    /// no path is carried.
    #[must_use]
    pub fn metadata(timestamp: Timestamp) -> Self {
        Self {
            kind: RequestKind::Metadata,
            timestamp,
            path: PathBuf::new(),
            start: ByteCount::ZERO,
            size: ByteCount::ZERO,
        }
    }
}
