//! Virtual-camera preview client — entry point.
//!
//! ```text
//! vcam-preview                     Connect with defaults
//! vcam-preview --config <path>     Use custom config TOML
//! vcam-preview --socket <path>     Override the daemon socket
//! vcam-preview --gen-config        Dump default config and exit
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vcam_core::controller::{PreviewController, SurfaceEvent};
use vcam_core::service::StreamPhase;

use vcam_preview::config::AppConfig;
use vcam_preview::surface::build_surface;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vcam-preview", about = "Virtual camera preview client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vcam-preview.toml")]
    config: PathBuf,

    /// Daemon socket path (overrides config).
    #[arg(short, long)]
    socket: Option<String>,

    /// Output mode (overrides config): null or ppm.
    #[arg(short, long)]
    output: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = AppConfig::load(&cli.config);
    if let Some(socket) = cli.socket {
        config.daemon.socket_paths = vec![socket];
    }
    if let Some(output) = cli.output {
        config.output.mode = output;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("vcam-preview v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Build the surface ────────────────────────────────────

    let surface = build_surface(&config.output)?;

    // ── 2. Start the preview session ────────────────────────────

    let mut controller = PreviewController::new(config.preview_config());
    controller
        .handle_event(SurfaceEvent::Created(surface))
        .await?;
    let mut status_rx = controller
        .status_receiver()
        .expect("session just started");

    // ── 3. Watch status until stop ──────────────────────────────

    let mut last_phase = StreamPhase::Idle;
    let mut last_stats_log = Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; stopping");
                controller.handle_event(SurfaceEvent::Stop).await?;
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();

                if status.phase != last_phase {
                    info!("phase: {}", status.phase);
                    last_phase = status.phase.clone();
                }
                if last_stats_log.elapsed() > Duration::from_secs(5)
                    && status.phase.is_streaming()
                {
                    if status.stats.signal_lost {
                        info!("producer signal lost; showing last frame");
                    }
                    info!(
                        "{:.1} fps, {} presented, {} skipped",
                        status.stats.fps,
                        status.stats.frames_presented,
                        status.stats.frames_skipped,
                    );
                    last_stats_log = Instant::now();
                }

                if status.phase.is_stopped() {
                    if let Some(err) = &status.last_error {
                        error!("session ended: {err}");
                    }
                    // Reap the worker task.
                    controller.stop_active().await?;
                    break;
                }
            }
        }
    }

    info!("shutting down");
    Ok(())
}
