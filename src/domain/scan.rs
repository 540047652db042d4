//! Scan records, tag codes and presence status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic the computed presence status is published on.
pub const STATUS_TOPIC: &str = "RFID_LOGIN";

/// Identifier read from a physical RFID tag.
///
/// Readers report the UID as upper-case hex, but the code is treated as an
/// opaque string. The only requirement is that it is non-empty once
/// surrounding whitespace is removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCode(String);

impl TagCode {
    /// Parse a raw tag code, trimming surrounding whitespace.
    pub fn parse(raw: &str) -> Result<Self, InvalidTagCode> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InvalidTagCode);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TagCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Returned when a tag code is empty or whitespace only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rfid_number must be a non-empty string")]
pub struct InvalidTagCode;

/// Presence status recorded for a scan.
///
/// Serialized as the bare integer so readers can parse `"status":1` directly.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    serde_repr::Serialize_repr,
    serde_repr::Deserialize_repr,
)]
#[repr(u8)]
pub enum ScanStatus {
    /// Absent / not found
    #[default]
    Absent = 0,
    /// Present / found
    Present = 1,
}

impl ScanStatus {
    /// Binary flip of the status.
    pub fn toggled(self) -> Self {
        match self {
            ScanStatus::Absent => ScanStatus::Present,
            ScanStatus::Present => ScanStatus::Absent,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(ScanStatus::Absent),
            1 => Some(ScanStatus::Present),
            _ => None,
        }
    }

    /// Payload published on [`STATUS_TOPIC`].
    pub fn as_payload(self) -> &'static str {
        match self {
            ScanStatus::Absent => "0",
            ScanStatus::Present => "1",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

/// A stored scan.
///
/// Created once per scan submission. Only the administrative status update
/// touches `status` and `updated_at` afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: i64,
    pub rfid_number: String,
    pub status: ScanStatus,
    pub registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scan about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScan {
    pub tag: TagCode,
    pub status: ScanStatus,
    pub registered: bool,
}

impl NewScan {
    pub fn new(tag: TagCode, status: ScanStatus, registered: bool) -> Self {
        Self {
            tag,
            status,
            registered,
        }
    }

    /// The seed record that marks a tag as registered.
    pub fn registration(tag: TagCode) -> Self {
        Self::new(tag, ScanStatus::Absent, true)
    }
}
