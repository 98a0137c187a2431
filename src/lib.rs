//! MX10 library: drive MX10 thermal printers over BLE.
//!
//! Main modules:
//! - protocol: frame codec, CRC-8, bit order, notification decoding
//! - printer: transport contract and the device session
//! - ble: btleplug transport, scanning
//! - raster: grayscale images to printable rows
//! - error: error types

pub mod ble;
pub mod error;
pub mod printer;
pub mod protocol;
pub mod raster;

/// BLE API: scan for printers, connect a session
pub use ble::{connect, scan, BleTransport, DeviceInfo};
pub use error::{DecodeError, Error, RasterError, Result, TransportError};
/// Session API
pub use printer::*;
/// Protocol utilities (frames, checksum, bit order)
pub use protocol::*;
