//! # Serial Communication Module
//!
//! Handles the USB serial link to the LoRa ground receiver.
//!
//! This module handles:
//! - Auto-detecting the receiver among USB serial adapters
//! - Opening the port at the configured baud rate (8N1)
//! - Line-oriented reads via [`LineReader`]

pub mod port_trait;

use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{FlightTrackerError, Result};

pub use port_trait::{BufferedLineReader, LineReader, TransportConnector};

/// Default receiver baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Device paths to try when discovery finds nothing (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // CP210x / CH340 USB-to-serial bridges
    "/dev/ttyACM0", // USB CDC devices
];

/// Name fragments that identify a likely receiver
const RECEIVER_HINTS: &[&str] = &["USB", "ACM", "CP210", "CH340"];

/// Opens the ground receiver's serial port
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Fixed device path; empty means auto-detect
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud_rate: config.baud_rate,
        }
    }

    /// Device paths to try, in order
    fn candidates(&self) -> Vec<String> {
        if !self.port.is_empty() {
            return vec![self.port.clone()];
        }

        let discovered = discover_ports();
        if discovered.is_empty() {
            debug!("No USB serial adapters discovered, trying default paths");
            DEFAULT_DEVICE_PATHS.iter().map(|p| p.to_string()).collect()
        } else {
            discovered
        }
    }

    /// Open a specific serial port (8N1, no flow control)
    fn open_port(&self, path: &str) -> Result<tokio_serial::SerialStream> {
        tokio_serial::new(path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| FlightTrackerError::Serial(format!("Failed to open {}: {}", path, e)))
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    async fn connect(&mut self) -> Result<Box<dyn LineReader>> {
        let candidates = self.candidates();

        for path in &candidates {
            debug!("Trying to open serial port: {}", path);

            match self.open_port(path) {
                Ok(port) => {
                    info!("Connected to receiver at {} ({} baud)", path, self.baud_rate);
                    return Ok(Box::new(BufferedLineReader::new(port)));
                }
                Err(e) => {
                    warn!("{}", e);
                }
            }
        }

        Err(FlightTrackerError::SerialPortNotFound(candidates.join(", ")))
    }
}

/// List serial ports that look like a USB receiver
fn discover_ports() -> Vec<String> {
    let ports = match tokio_serial::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Failed to enumerate serial ports: {}", e);
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .filter(|port| {
            let mut descriptions = vec![port.port_name.as_str()];
            if let SerialPortType::UsbPort(usb) = &port.port_type {
                descriptions.extend(usb.product.as_deref());
                descriptions.extend(usb.manufacturer.as_deref());
            }
            looks_like_receiver(&descriptions)
        })
        .map(|port| port.port_name)
        .collect()
}

fn looks_like_receiver(descriptions: &[&str]) -> bool {
    descriptions.iter().any(|text| {
        let upper = text.to_uppercase();
        RECEIVER_HINTS.iter().any(|hint| upper.contains(hint))
    })
}
