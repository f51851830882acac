//! LPDU decoding: strict single-frame decode and damaged-stream scanning
//!
//! The strict decoder validates start bytes, length field and every CRC.
//! The scanner walks arbitrary input, resynchronizing on the next valid
//! start-byte pair after corruption, so valid frames are recovered even when
//! the head of the stream is garbage or frames are damaged in the middle.

use crate::constants::{
    frame_size, BODY_BLOCK_SIZE, CRC16, CRC_SIZE, HEADER_BLOCK_SIZE, MIN_LENGTH_FIELD,
    START_BYTES,
};
use crate::error::{CrcLocation, FrameError};
use crate::types::{ControlField, LinkFrame, LinkHeader};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// A frame found at a specific offset in a scanned stream
#[derive(Debug, Clone)]
pub struct LocatedFrame {
    /// Byte offset where the start bytes were found
    pub offset: usize,

    /// The decoded frame
    pub frame: LinkFrame,

    /// Total on-wire size of the frame in bytes
    pub size: usize,
}

/// Decode one frame from the front of `data`
///
/// Returns the frame and the number of bytes it occupied. Fails on anything
/// short of a fully valid frame; use [`scan_stream`] for damaged input.
pub fn decode_frame(data: &[u8]) -> Result<(LinkFrame, usize), FrameError> {
    if data.len() < 2 {
        return Err(FrameError::IncompleteFrame {
            expected: HEADER_BLOCK_SIZE,
            actual: data.len(),
        });
    }

    if &data[0..2] != START_BYTES {
        return Err(FrameError::BadStartBytes([data[0], data[1]]));
    }

    if data.len() < HEADER_BLOCK_SIZE {
        return Err(FrameError::IncompleteFrame {
            expected: HEADER_BLOCK_SIZE,
            actual: data.len(),
        });
    }

    let length = data[2];
    if length < MIN_LENGTH_FIELD {
        return Err(FrameError::BadLength(length));
    }

    let payload_len = (length - MIN_LENGTH_FIELD) as usize;
    let total_size = frame_size(payload_len);
    if data.len() < total_size {
        return Err(FrameError::IncompleteFrame {
            expected: total_size,
            actual: data.len(),
        });
    }

    let expected = u16::from_le_bytes([data[8], data[9]]);
    let actual = CRC16.checksum(&data[0..HEADER_BLOCK_SIZE - CRC_SIZE]);
    if expected != actual {
        return Err(FrameError::BadCrc {
            location: CrcLocation::Header,
            expected,
            actual,
        });
    }

    let control = ControlField::from_byte(data[3])?;
    let dest = u16::from_le_bytes([data[4], data[5]]);
    let src = u16::from_le_bytes([data[6], data[7]]);

    let mut payload = BytesMut::with_capacity(payload_len);
    let mut read = HEADER_BLOCK_SIZE;
    let mut remaining = payload_len;
    let mut block_index = 0;

    while remaining > 0 {
        let block_len = remaining.min(BODY_BLOCK_SIZE);
        let block = &data[read..read + block_len];
        read += block_len;

        let expected = u16::from_le_bytes([data[read], data[read + 1]]);
        let actual = CRC16.checksum(block);
        if expected != actual {
            return Err(FrameError::BadCrc {
                location: CrcLocation::Body(block_index),
                expected,
                actual,
            });
        }
        read += CRC_SIZE;

        payload.put_slice(block);
        remaining -= block_len;
        block_index += 1;
    }

    let frame = LinkFrame::new(LinkHeader::new(control, dest, src), payload.freeze())?;
    Ok((frame, total_size))
}

/// Find the next start-byte pair at or after the front of `data`
fn find_start_bytes(data: &[u8]) -> Option<usize> {
    memchr::memmem::find(data, START_BYTES)
}

/// Scan a byte stream for valid frames, even if the stream is damaged
///
/// Searches for the 0x05 0x64 sync pair, attempts a strict decode at each
/// candidate position, and continues past each frame or failed attempt. A
/// failed decode advances past the sync pair so frames after corruption are
/// still recovered.
pub fn scan_stream(data: &[u8]) -> Vec<LocatedFrame> {
    scan_stream_with_stats(data).0
}

/// Scan statistics
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    /// Total bytes scanned
    pub bytes_scanned: usize,

    /// Number of candidate start-byte pairs found
    pub sync_marks_found: usize,

    /// Number of valid frames decoded
    pub frames_found: usize,

    /// Number of decode failures at candidate positions
    pub decode_failures: usize,

    /// Total bytes recovered (sum of all valid frame sizes)
    pub bytes_recovered: usize,
}

impl ScanStats {
    /// Recovery rate as a percentage of the scanned bytes
    pub fn recovery_rate(&self) -> f64 {
        if self.bytes_scanned == 0 {
            0.0
        } else {
            (self.bytes_recovered as f64 / self.bytes_scanned as f64) * 100.0
        }
    }
}

/// Scan a stream, also reporting statistics about the scan
pub fn scan_stream_with_stats(data: &[u8]) -> (Vec<LocatedFrame>, ScanStats) {
    let mut stats = ScanStats {
        bytes_scanned: data.len(),
        ..Default::default()
    };
    let mut results = Vec::new();
    let mut pos = 0;

    debug!("starting stream scan of {} bytes", data.len());

    while pos < data.len() {
        let Some(rel) = find_start_bytes(&data[pos..]) else {
            break;
        };
        let at = pos + rel;
        stats.sync_marks_found += 1;

        match decode_frame(&data[at..]) {
            Ok((frame, size)) => {
                debug!(offset = at, size, "decoded frame");
                stats.bytes_recovered += size;
                results.push(LocatedFrame {
                    offset: at,
                    frame,
                    size,
                });
                pos = at + size;
            }
            Err(err) => {
                warn!(offset = at, %err, "failed to decode frame, resyncing");
                stats.decode_failures += 1;
                pos = at + START_BYTES.len();
            }
        }
    }

    stats.frames_found = results.len();
    (results, stats)
}

/// Re-encode a decoded frame, yielding its exact wire bytes
///
/// `encode(decode(f)) == f` for every well-formed frame.
pub fn encode_frame(frame: &LinkFrame) -> Result<Bytes, FrameError> {
    let mut buffer = vec![0u8; frame.wire_size()];
    let written = crate::encoder::format_frame(
        &mut buffer,
        frame.header.control,
        frame.header.dest,
        frame.header.src,
        &frame.payload,
    )?
    .len();
    buffer.truncate(written);
    Ok(Bytes::from(buffer))
}
