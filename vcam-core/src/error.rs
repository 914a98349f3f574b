//! Domain-specific error types for the preview pipeline.
//!
//! All fallible operations return `Result<T, VcamError>`.
//! No panics on invalid input — every error is typed, and the service
//! loop decides per variant whether it is transient or session-fatal.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the preview pipeline.
#[derive(Debug, Error)]
pub enum VcamError {
    // ── Session Errors ───────────────────────────────────────────
    /// The handshake with the daemon failed. Session-fatal; requires
    /// an explicit restart by the caller.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// The shared region could not be mapped. Treated like a connect
    /// failure.
    #[error("map error: {0}")]
    Map(#[from] MapError),

    // ── Per-frame Errors ─────────────────────────────────────────
    /// The ring header presented a write index outside the slot range.
    /// Transient: a producer mid-initialization may expose a zeroed or
    /// garbage header momentarily.
    #[error("corrupt ring header: write_index {index} not in [0, {slot_count})")]
    CorruptHeader { index: u32, slot_count: u32 },

    /// A frame could not be decoded. The frame is skipped; the stream
    /// continues.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The render surface rejected a frame (typically because it is
    /// being torn down). Treated as a stop signal.
    #[error("render error: {0}")]
    Render(String),

    // ── Infrastructure Errors ────────────────────────────────────
    /// A lifecycle method was called in the wrong phase.
    #[error("invalid phase transition: {0}")]
    InvalidTransition(&'static str),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A spawned worker task failed to join.
    #[error("worker task failed: {0}")]
    Worker(String),
}

// ── ConnectError ─────────────────────────────────────────────────

/// Typed failure modes of the descriptor handshake.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// None of the configured socket paths accepted a connection.
    #[error("daemon socket unavailable: {0}")]
    AddressUnavailable(std::io::Error),

    /// The peer closed the socket before sending the handshake byte.
    #[error("peer closed before descriptor handoff")]
    PeerClosed,

    /// The handshake byte arrived without an ancillary descriptor.
    #[error("handshake message carried no file descriptor")]
    NoDescriptorReceived,

    /// No handshake message arrived within the deadline.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The receive itself failed at the socket layer.
    #[error("handshake I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── MapError ─────────────────────────────────────────────────────

/// Typed failure modes of mapping the shared region.
#[derive(Debug, Error)]
pub enum MapError {
    /// The descriptor's backing object is smaller than the layout
    /// requires.
    #[error("shared region size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The mmap call itself failed.
    #[error("failed to map shared region: {0}")]
    MapFailed(std::io::Error),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Typed failure modes of frame decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer length does not match `width * height * 3 / 2`.
    #[error("invalid frame geometry: expected {expected} bytes for {width}x{height}, got {actual}")]
    InvalidGeometry {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for VcamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        VcamError::ChannelClosed
    }
}

impl VcamError {
    /// Whether the service loop may absorb this error and continue
    /// streaming. Session-level errors return `false` and terminate.
    pub fn is_transient(&self) -> bool {
        matches!(self, VcamError::CorruptHeader { .. } | VcamError::Decode(_))
    }
}
