//! # vcam-core
//!
//! Consumer-side library for the virtual-camera preview pipeline.
//!
//! A privileged daemon captures frames and publishes them in a
//! shared-memory ring; this crate is the display client's half of the
//! protocol:
//!
//! ```text
//! DAEMON (producer)                          PREVIEW CLIENT (this crate)
//! ┌─────────────────────────┐               ┌──────────────────────────┐
//! │ capture → NV21 frames   │               │ channel: byte + fd       │
//! │   ↓                     │  Unix socket  │   ↓                      │
//! │ shared ring (3 slots)   │ ──SCM_RIGHTS─►│ region: mmap read-only   │
//! │   ↓                     │               │   ↓                      │
//! │ write_index publish     │  shared mem   │ ring: copy + revalidate  │
//! └─────────────────────────┘ ◄─(no locks)─►│   ↓                      │
//!                                           │ decode: NV21 → RGBA      │
//!                                           │   ↓                      │
//!                                           │ sink: scale + present    │
//!                                           └──────────────────────────┘
//! ```
//!
//! This crate contains:
//! - **Channel**: `receive_shared_fd` — descriptor handshake over a
//!   Unix-domain socket
//! - **Layout**: `FrameGeometry`, `RingHeader` — the shared protocol
//!   constants
//! - **Region**: `SharedRegion` — read-only mapping with guaranteed
//!   release
//! - **Ring**: `RingReader` — tear-free latest-frame acquisition
//! - **Decode**: `Nv21Decoder` — table-driven NV21 → RGBA conversion
//! - **Sink**: `RenderSurface` / `RenderSink` — presentation seam
//! - **Service**: `PreviewService` — the paced background worker
//! - **Controller**: `PreviewController` — surface lifecycle adapter
//! - **Error**: `VcamError` — typed, `thiserror`-based error hierarchy

pub mod channel;
pub mod controller;
pub mod decode;
pub mod error;
pub mod layout;
pub mod region;
pub mod ring;
pub mod service;
pub mod sink;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{DEFAULT_SOCKET_PATH, FALLBACK_SOCKET_PATH, receive_shared_fd};
pub use controller::{PreviewController, SurfaceEvent};
pub use decode::{DecodedImage, Nv21Decoder, ScaleMode};
pub use error::{ConnectError, DecodeError, MapError, VcamError};
pub use layout::{FrameGeometry, HEADER_SIZE, RingHeader};
pub use region::SharedRegion;
pub use ring::{RawFrame, RingReader};
pub use service::{FrameStats, PreviewConfig, PreviewService, PreviewStatus, StreamPhase};
pub use sink::{RenderSink, RenderSurface};
