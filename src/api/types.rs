//! Shared request and response types for REST API handlers.

use serde::{Deserialize, Serialize};

use crate::domain::ScanRecord;

// ============================================================================
// Scan types
// ============================================================================

/// Request body for a reader scan.
///
/// `rfid_number` is optional at the serde level so a missing field is
/// reported with the structured error body rather than a bare rejection.
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub rfid_number: Option<String>,
}

/// Response for a recorded scan.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub message: String,
    pub rfid: ScanRecord,
}

/// `message` for a tag that was registered at scan time.
pub const RFID_FOUND: &str = "RFID FOUND";
/// `message` for a tag that was not registered at scan time.
pub const RFID_NOT_FOUND: &str = "RFID NOT FOUND";

impl ScanResponse {
    pub fn new(rfid: ScanRecord, registered: bool) -> Self {
        let message = if registered { RFID_FOUND } else { RFID_NOT_FOUND };
        Self {
            message: message.to_string(),
            rfid,
        }
    }
}

// ============================================================================
// Record administration types
// ============================================================================

/// Request body for a manual status correction.
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: i64,
    /// Publish the new status on the status topic
    #[serde(default)]
    pub notify: bool,
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
