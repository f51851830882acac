//! Library entry for dnp3link-cli used by integration tests and embedding.

pub mod commands;

// Re-export commands for convenience
pub use commands::*;

/// Frame types the encode command can build
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FrameKind {
    /// Positive confirmation
    Ack,
    /// Negative confirmation
    Nack,
    /// Response to a status request
    LinkStatus,
    /// Refusal of an unsupported request
    NotSupported,
    /// Link reset, opening a confirmed session
    Reset,
    /// Liveness query
    RequestStatus,
    /// Ping with the current frame-count bit
    Test,
    /// User payload requiring an ACK
    Confirmed,
    /// Fire-and-forget user payload
    Unconfirmed,
}
