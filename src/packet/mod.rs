//! # Telemetry Packet Module
//!
//! Implementation of the `$FLT` text protocol spoken by the LoRa ground receiver.
//!
//! This module handles:
//! - Frame marker and signal-lost sentinel recognition
//! - Payload field parsing into validated samples
//! - Optional signal-quality (`|rssi,snr`) segment
//! - Optional checksum segment (stripped, verified only on request)

pub mod protocol;
pub mod decoder;
pub mod checksum;
