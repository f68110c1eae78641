//! # Flight Tracker Library
//!
//! Track RC plane flights from LoRa ground-station telemetry.
//!
//! This library decodes telemetry lines from a USB serial receiver, detects
//! takeoff and landing from ground speed, records each flight as a session in
//! SQLite, and keeps a live view that observers can subscribe to.

pub mod config;
pub mod detector;
pub mod error;
pub mod ingest;
pub mod live;
pub mod packet;
pub mod serial;
pub mod store;
