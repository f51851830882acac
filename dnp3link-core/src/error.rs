//! Error types for codec and link-layer operations

use thiserror::Error;

/// Errors that can occur while decoding or formatting an LPDU
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// First two bytes are not the 0x05 0x64 sync pair
    #[error("Bad start bytes: expected 05 64, got {0:02X?}")]
    BadStartBytes([u8; 2]),

    /// Length field below the header-only minimum of 5
    #[error("Bad length field: {0}")]
    BadLength(u8),

    /// A CRC field did not match the computed value
    #[error("Bad CRC in {location}: expected {expected:#06x}, got {actual:#06x}")]
    BadCrc {
        /// Which CRC failed: the header block or a numbered body block
        location: CrcLocation,
        /// The CRC carried on the wire
        expected: u16,
        /// The CRC computed over the received bytes
        actual: u16,
    },

    /// Function code not in the recognized PRI/SEC set
    #[error("Unknown function code: {0:#04x}")]
    UnknownFunction(u8),

    /// Not enough bytes to hold a complete frame
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame {
        /// The number of bytes the length field implies
        expected: usize,
        /// The number of bytes actually available
        actual: usize,
    },

    /// Payload exceeds the 250-byte LPDU maximum
    #[error("Payload size {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),

    /// Caller-supplied buffer cannot hold the encoded frame
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes the encoded frame requires
        needed: usize,
        /// Bytes the caller supplied
        available: usize,
    },
}

/// Identifies which CRC field of a frame failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcLocation {
    /// The CRC terminating the 10-byte header block
    Header,
    /// The CRC terminating the given zero-based body block
    Body(usize),
}

impl core::fmt::Display for CrcLocation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CrcLocation::Header => write!(f, "header block"),
            CrcLocation::Body(n) => write!(f, "body block {}", n),
        }
    }
}

/// Errors returned by the link layer's send path
///
/// Protocol-level anomalies on *receive* are never surfaced this way; they
/// are logged with a discard code and counted in [`crate::link::LinkStatistics`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The lower layer has not come up, or has gone down
    #[error("Link layer is not online")]
    NotOnline,

    /// A send is already in progress; the link is single-outstanding
    #[error("Send requested while a transaction is already in progress")]
    SendWhileBusy,

    /// Payload exceeds the 250-byte LPDU maximum
    #[error("Payload size {0} exceeds maximum {1}")]
    PayloadTooLarge(usize, usize),
}
