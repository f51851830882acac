//! Core types for DNP3 link frames and link configuration

use crate::constants::{control, MAX_PAYLOAD_SIZE};
use crate::error::FrameError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Link-layer function codes
///
/// Partitioned into primary-to-secondary (`Pri*`) and secondary-to-primary
/// (`Sec*`) families. The wire representation is the four-bit function field
/// of the control byte, qualified by the PRM bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    /// Reset the receiver's frame-count bit and begin a confirmed session
    PriResetLinkStates,
    /// Ping the peer using the current expected frame-count bit
    PriTestLinkStates,
    /// User payload requiring an ACK
    PriConfirmedUserData,
    /// Fire-and-forget user payload
    PriUnconfirmedUserData,
    /// Query peer liveness
    PriRequestLinkStatus,
    /// Positive confirmation
    SecAck,
    /// Negative confirmation
    SecNack,
    /// Response to a link status request
    SecLinkStatus,
    /// Peer refuses the request
    SecNotSupported,
}

impl LinkFunction {
    /// Whether this is a primary-to-secondary function
    pub const fn is_primary(self) -> bool {
        matches!(
            self,
            LinkFunction::PriResetLinkStates
                | LinkFunction::PriTestLinkStates
                | LinkFunction::PriConfirmedUserData
                | LinkFunction::PriUnconfirmedUserData
                | LinkFunction::PriRequestLinkStatus
        )
    }

    /// The four-bit function field carried in the control byte
    pub const fn code(self) -> u8 {
        match self {
            LinkFunction::PriResetLinkStates => 0x0,
            LinkFunction::PriTestLinkStates => 0x2,
            LinkFunction::PriConfirmedUserData => 0x3,
            LinkFunction::PriUnconfirmedUserData => 0x4,
            LinkFunction::PriRequestLinkStatus => 0x9,
            LinkFunction::SecAck => 0x0,
            LinkFunction::SecNack => 0x1,
            LinkFunction::SecLinkStatus => 0xB,
            LinkFunction::SecNotSupported => 0xF,
        }
    }

    /// Look up a function from the PRM bit and the function field
    pub const fn from_code(primary: bool, code: u8) -> Result<Self, FrameError> {
        if primary {
            match code {
                0x0 => Ok(LinkFunction::PriResetLinkStates),
                0x2 => Ok(LinkFunction::PriTestLinkStates),
                0x3 => Ok(LinkFunction::PriConfirmedUserData),
                0x4 => Ok(LinkFunction::PriUnconfirmedUserData),
                0x9 => Ok(LinkFunction::PriRequestLinkStatus),
                _ => Err(FrameError::UnknownFunction(control::PRM | code)),
            }
        } else {
            match code {
                0x0 => Ok(LinkFunction::SecAck),
                0x1 => Ok(LinkFunction::SecNack),
                0xB => Ok(LinkFunction::SecLinkStatus),
                0xF => Ok(LinkFunction::SecNotSupported),
                _ => Err(FrameError::UnknownFunction(code)),
            }
        }
    }

    /// Whether frames with this function carry user data
    pub const fn carries_user_data(self) -> bool {
        matches!(
            self,
            LinkFunction::PriConfirmedUserData | LinkFunction::PriUnconfirmedUserData
        )
    }
}

/// Decoded control byte of an LPDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField {
    /// Direction bit: the sender is a master
    pub master: bool,
    /// Frame-count bit
    pub fcb: bool,
    /// Frame-count-valid bit (primary frames only; DFC on secondary frames)
    pub fcv: bool,
    /// Function code, which also fixes the PRM bit
    pub function: LinkFunction,
}

impl ControlField {
    /// Control byte for a primary frame
    pub const fn primary(master: bool, fcb: bool, fcv: bool, function: LinkFunction) -> Self {
        Self {
            master,
            fcb,
            fcv,
            function,
        }
    }

    /// Control byte for a secondary frame (FCB and DFC clear)
    pub const fn secondary(master: bool, function: LinkFunction) -> Self {
        Self {
            master,
            fcb: false,
            fcv: false,
            function,
        }
    }

    /// Encode to the wire byte
    pub fn to_byte(self) -> u8 {
        let mut byte = self.function.code();
        if self.master {
            byte |= control::DIR;
        }
        if self.function.is_primary() {
            byte |= control::PRM;
        }
        if self.fcb {
            byte |= control::FCB;
        }
        if self.fcv {
            byte |= control::FCV;
        }
        byte
    }

    /// Decode from the wire byte
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        let primary = byte & control::PRM != 0;
        let function = LinkFunction::from_code(primary, byte & control::FUNC_MASK)?;
        Ok(Self {
            master: byte & control::DIR != 0,
            fcb: byte & control::FCB != 0,
            fcv: byte & control::FCV != 0,
            function,
        })
    }
}

/// Link frame header: everything but the user data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    /// Decoded control byte
    pub control: ControlField,
    /// Destination link address
    pub dest: u16,
    /// Source link address
    pub src: u16,
}

impl LinkHeader {
    /// Create a header
    pub const fn new(control: ControlField, dest: u16, src: u16) -> Self {
        Self { control, dest, src }
    }
}

/// Complete decoded LPDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    /// Frame header
    pub header: LinkHeader,
    /// User data (empty for header-only functions)
    pub payload: Bytes,
}

impl LinkFrame {
    /// Create a frame, validating the payload size
    pub fn new(header: LinkHeader, payload: Bytes) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
        }
        Ok(Self { header, payload })
    }

    /// Total on-wire size of this frame
    pub fn wire_size(&self) -> usize {
        crate::constants::frame_size(self.payload.len())
    }
}

/// Link-layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Operate as a master (sets the direction bit on everything we emit)
    pub is_master: bool,
    /// Our link address
    pub local_addr: u16,
    /// The single remote peer's link address
    pub remote_addr: u16,
    /// Send user data as confirmed LPDUs with the reset/ACK handshake
    pub use_confirms: bool,
    /// Extra attempts after the first transmission of each phase
    pub num_retry: usize,
    /// Response timer duration for ACK-of-reset and ACK-of-data waits
    pub response_timeout: Duration,
}

impl LinkConfig {
    /// Master-side defaults used throughout the conformance tests:
    /// local address 1, remote address 1024, confirms off, one-second timeout
    pub fn master_default() -> Self {
        Self {
            is_master: true,
            local_addr: 1,
            remote_addr: 1024,
            use_confirms: false,
            num_retry: 0,
            response_timeout: Duration::from_secs(1),
        }
    }
}
