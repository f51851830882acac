//! LPDU encoding
//!
//! Pure, stateless formatters. Each writes one complete frame into a
//! caller-supplied buffer and returns the filled subslice:
//!
//! 1. Start bytes (2): `05 64`
//! 2. Length (1): payload length plus the 5 header bytes after this field
//! 3. Control (1): direction, primary, FCB, FCV, function code
//! 4. Destination (2, little-endian)
//! 5. Source (2, little-endian)
//! 6. Header CRC (2, little-endian CRC-16/DNP over bytes 1-8)
//! 7. User data chunked into 16-byte blocks, each followed by its CRC

use crate::constants::{
    frame_size, length_field, BODY_BLOCK_SIZE, CRC16, CRC_SIZE, HEADER_BLOCK_SIZE,
    MAX_PAYLOAD_SIZE, START_BYTES,
};
use crate::error::FrameError;
use crate::types::{ControlField, LinkFunction};

/// Format a positive confirmation
pub fn format_ack(buffer: &mut [u8], is_master: bool, dest: u16, src: u16) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::secondary(is_master, LinkFunction::SecAck),
        dest,
        src,
    )
}

/// Format a negative confirmation
pub fn format_nack(buffer: &mut [u8], is_master: bool, dest: u16, src: u16) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::secondary(is_master, LinkFunction::SecNack),
        dest,
        src,
    )
}

/// Format a response to a link status request
pub fn format_link_status(
    buffer: &mut [u8],
    is_master: bool,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::secondary(is_master, LinkFunction::SecLinkStatus),
        dest,
        src,
    )
}

/// Format a refusal of an unsupported request
pub fn format_not_supported(
    buffer: &mut [u8],
    is_master: bool,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::secondary(is_master, LinkFunction::SecNotSupported),
        dest,
        src,
    )
}

/// Format a link reset, the opening move of every confirmed session
pub fn format_reset_link_states(
    buffer: &mut [u8],
    is_master: bool,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::primary(is_master, false, false, LinkFunction::PriResetLinkStates),
        dest,
        src,
    )
}

/// Format a liveness query
pub fn format_request_link_status(
    buffer: &mut [u8],
    is_master: bool,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::primary(is_master, false, false, LinkFunction::PriRequestLinkStatus),
        dest,
        src,
    )
}

/// Format a ping carrying the expected frame-count bit
pub fn format_test_link_states(
    buffer: &mut [u8],
    is_master: bool,
    fcb: bool,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_header_only(
        buffer,
        ControlField::primary(is_master, fcb, true, LinkFunction::PriTestLinkStates),
        dest,
        src,
    )
}

/// Format a user payload requiring an ACK
pub fn format_confirmed_user_data<'a>(
    buffer: &'a mut [u8],
    is_master: bool,
    fcb: bool,
    dest: u16,
    src: u16,
    payload: &[u8],
) -> Result<&'a [u8], FrameError> {
    format_frame(
        buffer,
        ControlField::primary(is_master, fcb, true, LinkFunction::PriConfirmedUserData),
        dest,
        src,
        payload,
    )
}

/// Format a fire-and-forget user payload
pub fn format_unconfirmed_user_data<'a>(
    buffer: &'a mut [u8],
    is_master: bool,
    dest: u16,
    src: u16,
    payload: &[u8],
) -> Result<&'a [u8], FrameError> {
    format_frame(
        buffer,
        ControlField::primary(is_master, false, false, LinkFunction::PriUnconfirmedUserData),
        dest,
        src,
        payload,
    )
}

fn format_header_only(
    buffer: &mut [u8],
    control: ControlField,
    dest: u16,
    src: u16,
) -> Result<&[u8], FrameError> {
    format_frame(buffer, control, dest, src, &[])
}

/// Format an arbitrary frame from its decoded parts
pub fn format_frame<'a>(
    buffer: &'a mut [u8],
    control: ControlField,
    dest: u16,
    src: u16,
    payload: &[u8],
) -> Result<&'a [u8], FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len(), MAX_PAYLOAD_SIZE));
    }

    let needed = frame_size(payload.len());
    if buffer.len() < needed {
        return Err(FrameError::BufferTooSmall {
            needed,
            available: buffer.len(),
        });
    }

    buffer[0..2].copy_from_slice(START_BYTES);
    buffer[2] = length_field(payload.len());
    buffer[3] = control.to_byte();
    buffer[4..6].copy_from_slice(&dest.to_le_bytes());
    buffer[6..8].copy_from_slice(&src.to_le_bytes());

    let header_crc = CRC16.checksum(&buffer[0..HEADER_BLOCK_SIZE - CRC_SIZE]);
    buffer[8..10].copy_from_slice(&header_crc.to_le_bytes());

    let mut write = HEADER_BLOCK_SIZE;
    for block in payload.chunks(BODY_BLOCK_SIZE) {
        buffer[write..write + block.len()].copy_from_slice(block);
        write += block.len();

        let block_crc = CRC16.checksum(block);
        buffer[write..write + CRC_SIZE].copy_from_slice(&block_crc.to_le_bytes());
        write += CRC_SIZE;
    }

    Ok(&buffer[..needed])
}
