//! Fuzzing entry points for the dnp3link-core decoder
//!
//! To use with cargo-fuzz:
//! 1. Install cargo-fuzz: cargo install cargo-fuzz
//! 2. Run fuzzer: cargo fuzz run fuzz_decoder

/// Strict decode must never panic, whatever the input
pub fn fuzz_decode(data: &[u8]) {
    use dnp3link_core::decoder::decode_frame;

    let _ = decode_frame(data);
}

/// The resyncing scanner must never panic, whatever the input
pub fn fuzz_scan(data: &[u8]) {
    use dnp3link_core::decoder::scan_stream;

    let _ = scan_stream(data);
}
