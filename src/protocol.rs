//! MX10 wire protocol: frame codec, CRC-8 and bitmap bit order.
//!
//! ```text
//! ┌──────┬──────┬─────────┬──────┬────────────┬─────────┬───────┬──────┐
//! │ 0x51 │ 0x78 │ command │ type │ len (LE16) │ payload │ crc-8 │ 0xFF │
//! └──────┴──────┴─────────┴──────┴────────────┴─────────┴───────┴──────┘
//! ```
//!
//! The CRC covers the payload only and is `0x00` for an empty payload.

use tracing::{trace, warn};

use crate::error::DecodeError;

/// Frame start marker.
pub const SYNC: [u8; 2] = [0x51, 0x78];

/// Frame terminator.
pub const END_MARKER: u8 = 0xFF;

/// Sync (2) + command + type + length (2).
pub const HEADER_LEN: usize = 6;

/// Header plus checksum and end marker, i.e. a zero-length payload frame.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 2;

/// Type byte used by every known command.
pub const DEFAULT_TYPE: u8 = 0x00;

/// Steps fed or retracted when the caller has no preference.
pub const DEFAULT_FEED_STEPS: u16 = 0x10;

/// Feed issued after the last bitmap row to clear the print head.
pub const TRAILING_FEED_STEPS: u16 = 32;

/// Print density for [`Command::SetDpi`] when the caller has no preference.
pub const DEFAULT_DPI: u8 = 200;

/// Known command codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Retract = 0xA0,
    Feed = 0xA1,
    PrintRow = 0xA2,
    GetStatus = 0xA3,
    SetDpi = 0xA4,
    GetInfo = 0xA8,
    SetEnergy = 0xAF,
    SetSpeed = 0xBD,
    ApplyEnergy = 0xBE,
}

impl Command {
    /// Wire value of the command byte.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a command byte.
    ///
    /// Returns `None` for codes outside the table above.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0xA0 => Self::Retract,
            0xA1 => Self::Feed,
            0xA2 => Self::PrintRow,
            0xA3 => Self::GetStatus,
            0xA4 => Self::SetDpi,
            0xA8 => Self::GetInfo,
            0xAF => Self::SetEnergy,
            0xBD => Self::SetSpeed,
            0xBE => Self::ApplyEnergy,
            _ => return None,
        })
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> u8 {
        cmd.code()
    }
}

/// CRC-8, polynomial 0x07, init 0x00, MSB first, no reflection.
///
/// ```
/// assert_eq!(mx10::crc8(&[]), 0x00);
/// assert_eq!(mx10::crc8(&[0x01]), 0x07);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    const POLY: u8 = 0x07;

    data.iter().fold(0u8, |acc, &byte| {
        (0..8).fold(acc ^ byte, |crc, _| {
            if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            }
        })
    })
}

/// Mirror the bit order of one byte (bit 7 <-> bit 0).
pub fn reverse_bits(b: u8) -> u8 {
    let b = ((b & 0b1010_1010) >> 1) | ((b & 0b0101_0101) << 1);
    let b = ((b & 0b1100_1100) >> 2) | ((b & 0b0011_0011) << 2);
    (b >> 4) | (b << 4)
}

/// Convert an MSB-first (leftmost pixel in bit 7) row to the device's wire order.
pub fn reverse_row(row: &[u8]) -> Vec<u8> {
    row.iter().copied().map(reverse_bits).collect()
}

/// Build a frame with the default type byte.
///
/// Payload length is not checked against the characteristic's write limit;
/// that is the transport's concern. Lengths beyond `u16::MAX` are truncated
/// in the length field.
pub fn encode(command: u8, payload: &[u8]) -> Vec<u8> {
    encode_with_type(command, DEFAULT_TYPE, payload)
}

/// Build a frame with an explicit type byte.
pub fn encode_with_type(command: u8, type_byte: u8, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u16;
    let crc = if payload.is_empty() { 0 } else { crc8(payload) };

    let mut out = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    out.extend_from_slice(&SYNC);
    out.push(command);
    out.push(type_byte);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    out.push(crc);
    out.push(END_MARKER);

    trace!(command = format!("0x{command:02X}"), frame = %hex::encode(&out), "encoded frame");
    out
}

/// A decoded inbound frame.
///
/// A checksum mismatch does not reject the frame; it is flagged in
/// `crc_valid` and the payload is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u8,
    pub type_byte: u8,
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
    /// Recorded as received; never used to reject a frame.
    pub end_marker: u8,
    pub crc_valid: bool,
}

impl Frame {
    /// The command code as a known [`Command`], if it is one.
    pub fn known_command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }
}

/// Parse and validate one notification.
///
/// Bytes after the end marker are ignored.
pub fn decode(raw: &[u8]) -> Result<Frame, DecodeError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort { len: raw.len() });
    }
    if raw[..2] != SYNC {
        return Err(DecodeError::BadSync {
            found: [raw[0], raw[1]],
        });
    }

    let command = raw[2];
    let type_byte = raw[3];
    let payload_len = u16::from_le_bytes([raw[4], raw[5]]) as usize;

    let expected = HEADER_LEN + payload_len + 2;
    if raw.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: raw.len(),
        });
    }

    let payload = raw[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
    let checksum = raw[HEADER_LEN + payload_len];
    let end_marker = raw[HEADER_LEN + payload_len + 1];
    let computed = crc8(&payload);
    let crc_valid = computed == checksum;

    if !crc_valid {
        warn!(
            command = format!("0x{command:02X}"),
            computed = format!("0x{computed:02X}"),
            received = format!("0x{checksum:02X}"),
            "checksum mismatch"
        );
    }

    Ok(Frame {
        command,
        type_byte,
        payload,
        checksum,
        end_marker,
        crc_valid,
    })
}

/// Decoded reply to [`Command::GetStatus`].
///
/// Only bit 0 of the first byte is understood; the raw bytes are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedStatus {
    pub paper_present: bool,
    pub raw_byte0: u8,
    pub raw_byte1: u8,
    pub raw_byte2: u8,
    pub crc_valid: bool,
}

impl ParsedStatus {
    /// Interpret a status payload. Returns `None` if it has fewer than 3 bytes.
    pub fn from_payload(payload: &[u8], crc_valid: bool) -> Option<Self> {
        match *payload {
            [b0, b1, b2, ..] => Some(Self {
                paper_present: b0 & 0x01 != 0,
                raw_byte0: b0,
                raw_byte1: b1,
                raw_byte2: b2,
                crc_valid,
            }),
            _ => None,
        }
    }
}

/// Everything the notify path can hand to a status handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A status reply, with the frame it came from.
    Status { status: ParsedStatus, frame: Frame },
    /// Any other well-formed frame (info replies, unknown commands).
    Frame(Frame),
    /// Bytes that could not be decoded.
    DecodeFailed { error: DecodeError, raw: Vec<u8> },
}

impl Notification {
    /// Decode raw notification bytes and classify the result.
    pub fn from_raw(raw: &[u8]) -> Self {
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, raw = %hex::encode(raw), "undecodable notification");
                return Self::DecodeFailed {
                    error,
                    raw: raw.to_vec(),
                };
            }
        };

        if frame.command == Command::GetStatus.code() {
            if let Some(status) = ParsedStatus::from_payload(&frame.payload, frame.crc_valid) {
                return Self::Status { status, frame };
            }
            trace!(len = frame.payload.len(), "short status payload, passing through");
        }
        Self::Frame(frame)
    }
}
