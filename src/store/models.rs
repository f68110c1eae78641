//! Persisted flight records, as returned by the store's query surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::protocol::TelemetrySample;

/// One bounded interval of flight activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    /// Absent while the session is open
    pub end_time: Option<DateTime<Utc>>,
    /// Set together with `end_time`
    pub duration_seconds: Option<u64>,
    /// mph
    pub peak_speed: f64,
    /// meters
    pub peak_altitude: f64,
    /// meters, great-circle sum over consecutive points
    pub total_distance: f64,
    pub start_lat: Option<f64>,
    pub start_lon: Option<f64>,
    pub end_lat: Option<f64>,
    pub end_lon: Option<f64>,
}

impl FlightSession {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

/// One logged sample attributed to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPoint {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub satellites: u32,
    pub rssi: i32,
    pub snr: f64,
}

impl FlightPoint {
    pub fn from_sample(session_id: &str, sample: &TelemetrySample) -> Self {
        Self {
            session_id: session_id.to_string(),
            timestamp: sample.timestamp,
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            speed: sample.speed,
            satellites: sample.satellites,
            rssi: sample.rssi,
            snr: sample.snr,
        }
    }
}

/// A session together with its points in insertion order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightRecord {
    #[serde(flatten)]
    pub session: FlightSession,
    pub points: Vec<FlightPoint>,
}
