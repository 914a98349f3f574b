//! Preview service — the background worker driving the frame loop.
//!
//! Orchestrates the full consumer pipeline:
//!
//! 1. [`channel`] receives the shared-memory descriptor.
//! 2. [`SharedRegion`] maps it read-only.
//! 3. [`RingReader`] copies out the latest complete frame.
//! 4. [`Nv21Decoder`] converts it to RGBA.
//! 5. [`RenderSink`] scales and presents it.
//!
//! The loop is paced to a target frame rate and must run off the
//! surface's UI thread; decode and copy-out are not guaranteed to fit
//! a single display refresh. Cancellation is cooperative through a
//! `CancellationToken`, observed at every suspension point, so a stop
//! takes effect within one frame period and every exit path drops the
//! reader (unmapping the region and closing the descriptor).

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel;
use crate::decode::{Nv21Decoder, ScaleMode};
use crate::error::VcamError;
use crate::layout::FrameGeometry;
use crate::region::SharedRegion;
use crate::ring::RingReader;
use crate::sink::{RenderSink, RenderSurface};

// ── PreviewConfig ────────────────────────────────────────────────

/// Configuration for [`PreviewService`].
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Daemon socket paths, tried in order.
    pub socket_paths: Vec<PathBuf>,
    /// Deadline for the descriptor handshake.
    pub handshake_timeout: Duration,
    /// Protocol-constant ring geometry shared with the daemon.
    pub geometry: FrameGeometry,
    /// Target presentation rate (1..=60).
    pub target_fps: u8,
    /// Decode resolution policy.
    pub scale: ScaleMode,
    /// Consecutive corrupt-header reads tolerated before the session
    /// fails. Covers a producer that is still zero-initializing.
    pub corrupt_header_limit: u32,
    /// Loop iterations without producer timestamp movement before the
    /// stream is flagged as signal-lost. 0 disables the check.
    pub stale_after_intervals: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            socket_paths: channel::default_socket_paths(),
            handshake_timeout: channel::DEFAULT_HANDSHAKE_TIMEOUT,
            geometry: FrameGeometry::default(),
            target_fps: 30,
            scale: ScaleMode::Full,
            corrupt_header_limit: 30,
            stale_after_intervals: 90,
        }
    }
}

// ── StreamPhase ──────────────────────────────────────────────────

/// The current phase of a preview session.
///
/// ```text
///  Idle ──► Connecting ──► Streaming ──► Stopped
///              │                            ▲
///              └────────────────────────────┘
/// ```
///
/// `Stopped` is terminal; restarting means building a new service
/// (no automatic reconnection).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamPhase {
    /// Not started. Initial state.
    #[default]
    Idle,

    /// Waiting for the descriptor handshake.
    Connecting,

    /// Mapped and rendering frames.
    Streaming,

    /// Terminal: cancelled, surface destroyed, or session error.
    Stopped,
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl StreamPhase {
    /// Whether frames are currently flowing.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Whether the session has terminated.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Transition to `Connecting`. Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), VcamError> {
        match self {
            Self::Idle => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(VcamError::InvalidTransition(
                "cannot connect: not in Idle state",
            )),
        }
    }

    /// Transition to `Streaming`. Valid from: `Connecting`.
    pub fn begin_streaming(&mut self) -> Result<(), VcamError> {
        match self {
            Self::Connecting => {
                *self = Self::Streaming;
                Ok(())
            }
            _ => Err(VcamError::InvalidTransition(
                "cannot stream: not in Connecting state",
            )),
        }
    }

    /// Transition to `Stopped`. Valid from any state.
    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }
}

// ── FrameStats / PreviewStatus ───────────────────────────────────

/// Per-session statistics exposed to the presentation layer.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Smoothed presented frames per second.
    pub fps: f64,
    /// Frames presented since streaming started.
    pub frames_presented: u64,
    /// Frames dropped to decode errors.
    pub frames_skipped: u64,
    /// Corrupt-header reads absorbed.
    pub corrupt_reads: u64,
    /// The producer's header timestamp has stopped advancing; the
    /// last good frame is still being shown.
    pub signal_lost: bool,
    /// Decoded output width.
    pub width: u32,
    /// Decoded output height.
    pub height: u32,
}

/// Snapshot published through the status watch channel.
#[derive(Debug, Clone, Default)]
pub struct PreviewStatus {
    pub phase: StreamPhase,
    pub stats: FrameStats,
    /// Set once when a session-level error terminates the stream.
    pub last_error: Option<String>,
}

// ── PreviewService ───────────────────────────────────────────────

/// Background worker that streams daemon frames to a render surface.
///
/// # Lifetime
///
/// Spawn [`run`](Self::run) on the runtime and keep the
/// [`cancel_token`](Self::cancel_token) to stop it:
///
/// ```no_run
/// # use vcam_core::service::PreviewService;
/// # async fn example(mut svc: PreviewService) {
/// let cancel = svc.cancel_token();
/// tokio::spawn(async move { svc.run().await });
/// // … later …
/// cancel.cancel();
/// # }
/// ```
pub struct PreviewService {
    config: PreviewConfig,
    sink: RenderSink,
    cancel: CancellationToken,
    status: PreviewStatus,
    status_tx: watch::Sender<PreviewStatus>,
    status_rx: watch::Receiver<PreviewStatus>,
}

impl PreviewService {
    /// Create a service rendering to the given surface.
    pub fn new(config: PreviewConfig, surface: Box<dyn RenderSurface>) -> Self {
        let (status_tx, status_rx) = watch::channel(PreviewStatus::default());
        Self {
            config,
            sink: RenderSink::new(surface),
            cancel: CancellationToken::new(),
            status: PreviewStatus::default(),
            status_tx,
            status_rx,
        }
    }

    /// A cloneable handle that stops the service from another task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Obtain a `watch::Receiver` for phase and statistics updates.
    pub fn status_receiver(&self) -> watch::Receiver<PreviewStatus> {
        self.status_rx.clone()
    }

    /// Run the preview loop.
    ///
    /// Returns `Ok(())` on cancellation or surface teardown; returns
    /// the error for session-level failures (connect, map, persistent
    /// header corruption), which are surfaced once through the status
    /// channel as well.
    pub async fn run(&mut self) -> Result<(), VcamError> {
        self.status.phase.begin_connect()?;
        self.publish();

        let cancel = self.cancel.clone();
        let fd = tokio::select! {
            _ = cancel.cancelled() => {
                info!("preview cancelled during connect");
                return self.finish();
            }
            result = channel::receive_shared_fd(
                self.config.socket_paths.clone(),
                self.config.handshake_timeout,
            ) => match result {
                Ok(fd) => fd,
                Err(e) => return self.fail(e.into()),
            },
        };

        let region = match SharedRegion::map(fd, &self.config.geometry) {
            Ok(region) => region,
            Err(e) => return self.fail(e.into()),
        };
        let geometry = self.config.geometry;
        let mut reader = RingReader::new(region, geometry);

        let header = reader.header();
        if !header.matches_geometry(&geometry) {
            warn!(
                "producer header disagrees with configured geometry \
                 (got {}x{} / {} slots); continuing with the protocol constant",
                header.width, header.height, header.num_frames
            );
        }

        let mut decoder = Nv21Decoder::new(geometry.width, geometry.height, self.config.scale);
        let (out_w, out_h) = decoder.output_dimensions();

        self.status.phase.begin_streaming()?;
        self.status.stats.width = out_w;
        self.status.stats.height = out_h;
        self.publish();
        info!(
            "streaming {}x{} at target {} fps",
            out_w, out_h, self.config.target_fps
        );

        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64);
        let mut fps_samples: Vec<Duration> = Vec::with_capacity(60);
        let mut last_present = Instant::now();
        let mut corrupt_streak = 0u32;
        let mut last_producer_ms = header.last_update_ms;
        let mut stale_ticks = 0u32;

        while !self.cancel.is_cancelled() {
            let loop_start = Instant::now();

            match reader.acquire_latest() {
                Ok(frame) => {
                    corrupt_streak = 0;
                    match decoder.decode(frame.bytes) {
                        Ok(image) => match self.sink.present(&image) {
                            Ok(()) => {
                                self.status.stats.frames_presented += 1;

                                let now = Instant::now();
                                fps_samples.push(now.duration_since(last_present));
                                last_present = now;
                                if fps_samples.len() > 60 {
                                    fps_samples.remove(0);
                                }
                                let avg: f64 = fps_samples
                                    .iter()
                                    .map(|d| d.as_secs_f64())
                                    .sum::<f64>()
                                    / fps_samples.len() as f64;
                                self.status.stats.fps =
                                    if avg > 0.0 { 1.0 / avg } else { 0.0 };
                            }
                            Err(VcamError::Render(reason)) => {
                                info!("surface rejected frame ({reason}); stopping");
                                break;
                            }
                            Err(e) => return self.fail(e),
                        },
                        Err(e) => {
                            // One bad frame never terminates the stream.
                            warn!("frame skipped: {e}");
                            self.status.stats.frames_skipped += 1;
                        }
                    }
                }
                Err(e @ VcamError::CorruptHeader { .. }) => {
                    corrupt_streak += 1;
                    self.status.stats.corrupt_reads += 1;
                    debug!("corrupt header ({corrupt_streak} consecutive): {e}");
                    if corrupt_streak >= self.config.corrupt_header_limit {
                        return self.fail(e);
                    }
                }
                Err(e) => return self.fail(e),
            }

            if self.config.stale_after_intervals > 0 {
                let producer_ms = reader.header().last_update_ms;
                if producer_ms != 0 && producer_ms == last_producer_ms {
                    stale_ticks += 1;
                } else {
                    stale_ticks = 0;
                }
                last_producer_ms = producer_ms;
                self.status.stats.signal_lost =
                    stale_ticks >= self.config.stale_after_intervals;
            }

            self.publish();

            // Sleep the remainder of the frame interval; a cancel
            // during the wait stops the loop immediately.
            let elapsed = loop_start.elapsed();
            if elapsed < interval {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            }
        }

        self.finish()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn publish(&mut self) {
        let _ = self.status_tx.send(self.status.clone());
    }

    /// Clean termination: cancellation or surface teardown.
    fn finish(&mut self) -> Result<(), VcamError> {
        self.status.phase.stop();
        self.publish();
        Ok(())
    }

    /// Session-level failure: surfaced once, then terminal.
    fn fail(&mut self, error: VcamError) -> Result<(), VcamError> {
        warn!("preview session failed: {error}");
        self.status.phase.stop();
        self.status.last_error = Some(error.to_string());
        self.publish();
        Err(error)
    }
}

// ── Tests ────────────────────────────────────────────────────────
