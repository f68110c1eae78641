//! # Telemetry Frame Decoder
//!
//! Turns one line from the ground receiver into a [`TelemetrySample`], or a
//! [`Rejection`] explaining why it could not.

use chrono::{DateTime, Utc};

use super::checksum;
use super::protocol::*;

/// Decode one telemetry line, tolerating an unverified checksum segment
///
/// # Arguments
///
/// * `line` - One line from the transport, already trimmed
///
/// # Returns
///
/// * `Result<TelemetrySample, Rejection>` - Fully populated sample, or the reason it was rejected
///
/// # Examples
///
/// ```
/// use flight_tracker::packet::decoder::decode;
///
/// let sample = decode("$FLT,37.7,-122.4,100.0,12.5,8*AB|-80,5.2").unwrap();
/// assert_eq!(sample.satellites, 8);
/// assert_eq!(sample.rssi, -80);
/// ```
pub fn decode(line: &str) -> Result<TelemetrySample, Rejection> {
    decode_at(line, false, Utc::now())
}

/// Decode one telemetry line, rejecting it if its checksum does not match
///
/// Frames without a checksum segment are still accepted.
pub fn decode_verified(line: &str) -> Result<TelemetrySample, Rejection> {
    decode_at(line, true, Utc::now())
}

/// Classify a transport line
///
/// The signal-lost sentinel is recognised before any decode is attempted.
///
/// # Arguments
///
/// * `line` - One line from the transport, already trimmed
/// * `verify_checksum` - Reject frames whose checksum segment does not match
pub fn classify(line: &str, verify_checksum: bool) -> Frame {
    if line == SIGNAL_LOST_SENTINEL {
        return Frame::SignalLost;
    }

    match decode_at(line, verify_checksum, Utc::now()) {
        Ok(sample) => Frame::Telemetry(sample),
        Err(rejection) => Frame::Rejected(rejection),
    }
}

/// Decode a line with an explicit capture timestamp
pub(crate) fn decode_at(
    line: &str,
    verify_checksum: bool,
    timestamp: DateTime<Utc>,
) -> Result<TelemetrySample, Rejection> {
    if line.len() > MAX_FRAME_LEN {
        return Err(Rejection::Oversized { len: line.len() });
    }
    if !line.starts_with(FRAME_MARKER) {
        return Err(Rejection::MissingMarker);
    }

    // Split off the receiver's signal-quality segment
    let mut segments = line.split(SIGNAL_DELIMITER);
    let packet = segments.next().unwrap_or_default();
    let (rssi, snr) = match segments.next() {
        Some(signal) => parse_signal(signal)?,
        None => (0, 0.0),
    };

    if verify_checksum && !checksum::verify(packet) {
        return Err(Rejection::ChecksumMismatch);
    }

    // Strip checksum, then the marker
    let payload = packet
        .split(CHECKSUM_DELIMITER)
        .next()
        .unwrap_or_default();
    let payload = &payload[FRAME_MARKER.len()..];

    let fields: Vec<&str> = payload.split(FIELD_DELIMITER).collect();
    if fields.len() < MIN_PAYLOAD_FIELDS {
        return Err(Rejection::TooFewFields { found: fields.len() });
    }

    Ok(TelemetrySample {
        latitude: parse_float(fields[0], "latitude")?,
        longitude: parse_float(fields[1], "longitude")?,
        altitude: parse_float(fields[2], "altitude")?,
        speed: parse_float(fields[3], "speed")?,
        satellites: parse_satellites(fields[4])?,
        rssi,
        snr,
        timestamp,
    })
}

/// Parse `rssi[,snr]`; snr defaults to 0.0 when absent
fn parse_signal(signal: &str) -> Result<(i32, f64), Rejection> {
    let mut parts = signal.split(FIELD_DELIMITER);

    let rssi = parts
        .next()
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .ok_or(Rejection::InvalidSignal)?;

    let snr = match parts.next() {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or(Rejection::InvalidSignal)?,
        None => 0.0,
    };

    Ok((rssi, snr))
}

/// Satellite count; receivers report negative counts without a fix, clamped to 0
fn parse_satellites(raw: &str) -> Result<u32, Rejection> {
    raw.trim()
        .parse::<i64>()
        .map(|count| count.clamp(0, i64::from(u32::MAX)) as u32)
        .map_err(|_| Rejection::InvalidNumber { field: "satellites" })
}

fn parse_float(raw: &str, field: &'static str) -> Result<f64, Rejection> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or(Rejection::InvalidNumber { field })
}
