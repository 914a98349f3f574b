//! Surface lifecycle adapter.
//!
//! The presentation layer owns window/permission plumbing and only
//! reports surface events. This controller turns those events into
//! service lifecycle: a created surface starts a preview session, a
//! destroyed surface (or an explicit stop) cancels it and waits for
//! the worker to release the socket and mapping.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::VcamError;
use crate::service::{PreviewConfig, PreviewService, PreviewStatus};
use crate::sink::RenderSurface;

/// Events delivered by the surface lifecycle provider.
pub enum SurfaceEvent {
    /// A drawable surface is available; begin streaming to it.
    Created(Box<dyn RenderSurface>),
    /// The surface is gone; the worker must stop within one frame
    /// period.
    Destroyed,
    /// Explicit stop request from the control surface.
    Stop,
}

struct ActiveSession {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), VcamError>>,
    status_rx: watch::Receiver<PreviewStatus>,
}

/// Maps surface events onto preview sessions.
///
/// At most one session exists at a time; a new surface replaces any
/// running session. Restart after an error is the caller's decision,
/// made by delivering a fresh `Created` event.
pub struct PreviewController {
    config: PreviewConfig,
    active: Option<ActiveSession>,
}

impl PreviewController {
    /// Create a controller; sessions use the given config.
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Whether a session is currently running.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Status channel of the running session, if any.
    pub fn status_receiver(&self) -> Option<watch::Receiver<PreviewStatus>> {
        self.active.as_ref().map(|s| s.status_rx.clone())
    }

    /// Apply one lifecycle event.
    pub async fn handle_event(&mut self, event: SurfaceEvent) -> Result<(), VcamError> {
        match event {
            SurfaceEvent::Created(surface) => {
                self.stop_active().await?;

                let mut service = PreviewService::new(self.config.clone(), surface);
                let cancel = service.cancel_token();
                let status_rx = service.status_receiver();
                let task = tokio::spawn(async move { service.run().await });

                info!("preview session started");
                self.active = Some(ActiveSession {
                    cancel,
                    task,
                    status_rx,
                });
                Ok(())
            }
            SurfaceEvent::Destroyed | SurfaceEvent::Stop => self.stop_active().await,
        }
    }

    /// Cancel the running session and wait for resource release.
    pub async fn stop_active(&mut self) -> Result<(), VcamError> {
        let Some(mut session) = self.active.take() else {
            return Ok(());
        };

        session.cancel.cancel();

        // The worker observes cancellation at every suspension point,
        // so one frame period plus join slack bounds the wait.
        let interval = Duration::from_secs_f64(1.0 / self.config.target_fps.max(1) as f64);
        let deadline = interval + Duration::from_millis(250);

        match tokio::time::timeout(deadline, &mut session.task).await {
            Ok(Ok(Ok(()))) => {
                info!("preview session stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                // The session had already failed; the error was
                // surfaced through the status channel when it happened.
                debug!("session had ended with error before stop: {e}");
                Ok(())
            }
            Ok(Err(join_err)) => Err(VcamError::Worker(join_err.to_string())),
            Err(_) => {
                session.task.abort();
                Err(VcamError::Worker(
                    "worker missed the stop deadline".into(),
                ))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
