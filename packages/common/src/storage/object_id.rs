use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Engine-assigned identifier of a server-side large object.
///
/// PostgreSQL hands these out as `oid` values, which are unsigned 32-bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LargeObjectId(u32);

impl LargeObjectId {
    pub const fn new(oid: u32) -> Self {
        Self(oid)
    }

    /// Convert from the signed 64-bit form used to move `oid`s through SQL.
    pub fn from_i64(value: i64) -> Result<Self, StorageError> {
        u32::try_from(value)
            .map(Self)
            .map_err(|_| StorageError::InvalidObjectId(value))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Signed 64-bit form, lossless for every `oid`.
    pub fn as_i64(self) -> i64 {
        i64::from(self.0)
    }
}

impl fmt::Display for LargeObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of a large object opened inside the current transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LargeObjectFd(i32);

impl LargeObjectFd {
    pub const fn new(fd: i32) -> Self {
        Self(fd)
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for LargeObjectFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd:{}", self.0)
    }
}

/// Access mode passed to `lo_open`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    /// `INV_READ` / `INV_WRITE` flag values understood by the server.
    pub fn flags(self) -> i32 {
        match self {
            Self::Read => 0x0004_0000,
            Self::Write => 0x0002_0000,
        }
    }
}
