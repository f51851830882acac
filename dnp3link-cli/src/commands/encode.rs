use crate::FrameKind;
use anyhow::{bail, Context, Result};
use dnp3link_core::constants::MAX_FRAME_SIZE;
use dnp3link_core::encoder;
use std::fs;
use tracing::info;

/// Options for one encoded frame
pub struct EncodeOptions<'a> {
    /// Which frame type to build
    pub kind: FrameKind,
    /// Set the direction bit (frame sent by a master)
    pub master: bool,
    /// Frame-count bit for test and confirmed frames
    pub fcb: bool,
    /// Destination link address
    pub dest: u16,
    /// Source link address
    pub src: u16,
    /// Hex-encoded user payload for data frames
    pub payload_hex: Option<&'a str>,
}

/// Build one frame; returns its wire bytes
pub fn build(options: &EncodeOptions<'_>) -> Result<Vec<u8>> {
    let payload = match options.payload_hex {
        Some(text) => hex::decode(text.trim()).context("payload is not valid hex")?,
        None => Vec::new(),
    };

    if !payload.is_empty()
        && !matches!(options.kind, FrameKind::Confirmed | FrameKind::Unconfirmed)
    {
        bail!("only confirmed/unconfirmed frames carry a payload");
    }

    let mut buffer = [0u8; MAX_FRAME_SIZE];
    let (master, fcb, dest, src) = (options.master, options.fcb, options.dest, options.src);
    let frame = match options.kind {
        FrameKind::Ack => encoder::format_ack(&mut buffer, master, dest, src),
        FrameKind::Nack => encoder::format_nack(&mut buffer, master, dest, src),
        FrameKind::LinkStatus => encoder::format_link_status(&mut buffer, master, dest, src),
        FrameKind::NotSupported => encoder::format_not_supported(&mut buffer, master, dest, src),
        FrameKind::Reset => encoder::format_reset_link_states(&mut buffer, master, dest, src),
        FrameKind::RequestStatus => {
            encoder::format_request_link_status(&mut buffer, master, dest, src)
        }
        FrameKind::Test => encoder::format_test_link_states(&mut buffer, master, fcb, dest, src),
        FrameKind::Confirmed => {
            encoder::format_confirmed_user_data(&mut buffer, master, fcb, dest, src, &payload)
        }
        FrameKind::Unconfirmed => {
            encoder::format_unconfirmed_user_data(&mut buffer, master, dest, src, &payload)
        }
    }?;

    Ok(frame.to_vec())
}

/// Build one frame, print it as hex, optionally write the raw bytes
pub fn execute(options: &EncodeOptions<'_>, output: Option<&str>) -> Result<()> {
    let frame = build(options)?;

    println!("{}", hex::encode_upper(&frame));
    info!(bytes = frame.len(), "encoded frame");

    if let Some(path) = output {
        fs::write(path, &frame).with_context(|| format!("Failed to write {}", path))?;
        info!("raw frame written to {}", path);
    }

    Ok(())
}
