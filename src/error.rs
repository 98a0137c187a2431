//! Error types for the MX10 driver

use std::time::Duration;

use uuid::Uuid;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`DeviceSession`](crate::printer::DeviceSession) commands.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Discovery or link setup failed; the session stays disconnected.
    #[error("connection to {address} failed: {source}")]
    Connection {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("not connected to a printer")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Failures reported by a [`Transport`](crate::printer::Transport) implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("device {address} not found within {timeout:?}")]
    DeviceNotFound { address: String, timeout: Duration },

    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("link dropped by device")]
    Disconnected,

    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

impl TransportError {
    /// True when the link is gone and the session must reconnect.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::NotConnected
                | Self::Ble(btleplug::Error::NotConnected)
                | Self::Ble(btleplug::Error::DeviceNotFound)
        )
    }
}

/// Malformed inbound notification bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes, need at least 8")]
    TooShort { len: usize },

    #[error("bad sync bytes {found:02X?}, expected [51, 78]")]
    BadSync { found: [u8; 2] },

    #[error("frame truncated: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Pixel buffer could not be packed into rows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    #[error("width and height must be > 0")]
    EmptyImage,

    #[error("not enough pixels: need {expected}, got {actual}")]
    NotEnoughPixels { expected: usize, actual: usize },
}
