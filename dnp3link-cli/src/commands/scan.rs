use anyhow::{Context, Result};
use dnp3link_core::decoder::scan_stream_with_stats;
use dnp3link_core::types::LinkFunction;
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::info;

#[derive(Serialize, Deserialize)]
struct RecoveredFrame {
    offset: usize,
    function: LinkFunction,
    master: bool,
    fcb: bool,
    dest: u16,
    src: u16,
    size: usize,
    payload: String,
}

pub fn execute(input: &str, output: Option<&str>, stats_only: bool) -> Result<()> {
    info!("Scanning capture: {}", input);

    let data = fs::read(input).with_context(|| format!("Failed to read input file: {}", input))?;

    info!("Capture size: {} bytes", data.len());

    let (located_frames, stats) = scan_stream_with_stats(&data);

    println!("\n=== Scan Results ===");
    println!("Bytes scanned:     {} bytes", stats.bytes_scanned);
    println!("Sync marks found:  {}", stats.sync_marks_found);
    println!("Valid frames:      {}", stats.frames_found);
    println!("Decode failures:   {}", stats.decode_failures);
    println!("Bytes recovered:   {} bytes", stats.bytes_recovered);
    println!("Recovery rate:     {:.2}%", stats.recovery_rate());
    println!();

    if stats_only {
        return Ok(());
    }

    let recovered: Vec<RecoveredFrame> = located_frames
        .iter()
        .map(|lf| RecoveredFrame {
            offset: lf.offset,
            function: lf.frame.header.control.function,
            master: lf.frame.header.control.master,
            fcb: lf.frame.header.control.fcb,
            dest: lf.frame.header.dest,
            src: lf.frame.header.src,
            size: lf.size,
            payload: hex::encode_upper(&lf.frame.payload),
        })
        .collect();

    if let Some(output_path) = output {
        let json = serde_json::to_string_pretty(&recovered)
            .context("Failed to serialize recovered frames")?;

        fs::write(output_path, json)
            .with_context(|| format!("Failed to write output file: {}", output_path))?;

        info!("Recovered frames written to: {}", output_path);
    } else {
        println!("=== Recovered Frames ===");
        for frame in &recovered {
            println!(
                "{:?} @ offset {}: {} -> {}, {} bytes",
                frame.function, frame.offset, frame.src, frame.dest, frame.size
            );
        }
    }

    Ok(())
}
