//! # Telemetry Frame Constants and Types
//!
//! Core definitions for the ground-station text protocol:
//!
//! ```text
//! $FLT,<lat>,<lon>,<alt>,<speed>,<sats>[,...][*<checksum>][|<rssi>,<snr>]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Telemetry frame marker (always the first five characters)
pub const FRAME_MARKER: &str = "$FLT,";

/// Out-of-band line sent by the receiver when the radio link drops
pub const SIGNAL_LOST_SENTINEL: &str = "$SIGNAL_LOST";

/// Separates the payload from the receiver's signal-quality segment
pub const SIGNAL_DELIMITER: char = '|';

/// Separates the payload from its checksum
pub const CHECKSUM_DELIMITER: char = '*';

/// Payload field separator
pub const FIELD_DELIMITER: char = ',';

/// Minimum payload fields: latitude, longitude, altitude, speed, satellites
pub const MIN_PAYLOAD_FIELDS: usize = 5;

/// Longest line accepted as a frame, in bytes
pub const MAX_FRAME_LEN: usize = 512;

/// One decoded observation from the aircraft
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Latitude in decimal degrees
    pub latitude: f64,

    /// Longitude in decimal degrees
    pub longitude: f64,

    /// Altitude in meters
    pub altitude: f64,

    /// Ground speed in mph
    pub speed: f64,

    /// Satellites used in the GPS fix
    pub satellites: u32,

    /// Received signal strength reported by the ground receiver (dBm)
    pub rssi: i32,

    /// Signal-to-noise ratio reported by the ground receiver (dB)
    pub snr: f64,

    /// Capture time, stamped when the line was decoded
    pub timestamp: DateTime<Utc>,
}

/// Why a line was not turned into a [`TelemetrySample`]
///
/// Rejections are expected on a noisy link and never stop ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Line is longer than [`MAX_FRAME_LEN`]
    #[error("line of {len} bytes exceeds the frame limit")]
    Oversized { len: usize },

    /// Line does not start with [`FRAME_MARKER`]
    #[error("missing $FLT frame marker")]
    MissingMarker,

    /// Fewer than [`MIN_PAYLOAD_FIELDS`] payload fields
    #[error("expected at least 5 fields, found {found}")]
    TooFewFields { found: usize },

    /// A payload field was not a finite number
    #[error("field '{field}' is not a valid number")]
    InvalidNumber { field: &'static str },

    /// The `|rssi,snr` segment was malformed
    #[error("malformed signal segment")]
    InvalidSignal,

    /// Checksum verification was enabled and failed
    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Classification of one raw transport line
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A valid telemetry sample
    Telemetry(TelemetrySample),

    /// The receiver reported loss of the radio link
    SignalLost,

    /// Anything else
    Rejected(Rejection),
}
