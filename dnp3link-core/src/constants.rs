//! Constants and limits for the DNP3 link-layer wire format

use crc::{Crc, CRC_16_DNP};

/// Frame synchronization bytes - every LPDU begins with this pair
pub const START_BYTES: &[u8; 2] = b"\x05\x64";

/// Maximum user payload carried by a single LPDU
pub const MAX_PAYLOAD_SIZE: usize = 250;

/// Size of the link header block on the wire:
/// start (2) + length (1) + control (1) + destination (2) + source (2) + CRC (2)
pub const HEADER_BLOCK_SIZE: usize = 10;

/// User data is chunked into blocks of this many bytes, each followed by a CRC
pub const BODY_BLOCK_SIZE: usize = 16;

/// Size of each CRC field on the wire (CRC-16/DNP, little-endian)
pub const CRC_SIZE: usize = 2;

/// Value of the length field for a header-only frame
pub const MIN_LENGTH_FIELD: u8 = 5;

/// Maximum on-wire frame size: header block plus a 250-byte payload in
/// sixteen CRC-terminated blocks (10 + 250 + 16 * 2 = 292)
pub const MAX_FRAME_SIZE: usize = frame_size(MAX_PAYLOAD_SIZE);

/// CRC-16/DNP: poly 0x3D65 reflected, xorout 0xFFFF, check value 0xEA82
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_DNP);

/// Control byte masks
pub mod control {
    /// Direction bit: set when the frame was sent by a master
    pub const DIR: u8 = 0x80;

    /// Primary bit: set on primary-to-secondary functions
    pub const PRM: u8 = 0x40;

    /// Frame-count bit
    pub const FCB: u8 = 0x20;

    /// Frame-count-valid bit on primary frames; data-flow-control bit on
    /// secondary frames
    pub const FCV: u8 = 0x10;

    /// Function code mask
    pub const FUNC_MASK: u8 = 0x0F;
}

/// Number of CRC-terminated body blocks needed for a payload
pub const fn num_body_blocks(payload_len: usize) -> usize {
    (payload_len + BODY_BLOCK_SIZE - 1) / BODY_BLOCK_SIZE
}

/// Total on-wire size of a frame carrying `payload_len` bytes of user data
pub const fn frame_size(payload_len: usize) -> usize {
    HEADER_BLOCK_SIZE + payload_len + num_body_blocks(payload_len) * CRC_SIZE
}

/// Value of the length field for a payload: the user data plus the five
/// non-CRC header bytes that follow the length field itself
pub const fn length_field(payload_len: usize) -> u8 {
    (payload_len + MIN_LENGTH_FIELD as usize) as u8
}
