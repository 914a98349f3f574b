//! Preview client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vcam_core::decode::ScaleMode;
use vcam_core::layout::FrameGeometry;
use vcam_core::service::PreviewConfig;

/// Top-level configuration for the preview client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Daemon connection settings.
    pub daemon: DaemonConfig,
    /// Frame stream settings.
    pub stream: StreamConfig,
    /// Output surface settings.
    pub output: OutputConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Daemon connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket paths tried in order.
    pub socket_paths: Vec<String>,
    /// Handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
}

/// Frame stream settings. Geometry must match the daemon build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Ring slot count.
    pub slot_count: u32,
    /// Presentation rate cap.
    pub target_fps: u8,
    /// Decode resolution: "full" or "half".
    pub scale: String,
    /// Consecutive corrupt-header reads before the session fails.
    pub corrupt_header_limit: u32,
    /// Intervals without producer progress before signal-lost.
    pub stale_after_intervals: u32,
}

/// Output surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Surface kind: "null" or "ppm".
    pub mode: String,
    /// Snapshot path for the "ppm" surface.
    pub ppm_path: String,
    /// Frames between snapshots for the "ppm" surface.
    pub snapshot_interval: u32,
    /// Surface width in pixels.
    pub width: u32,
    /// Surface height in pixels.
    pub height: u32,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            stream: StreamConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_paths: vec![
                vcam_core::DEFAULT_SOCKET_PATH.into(),
                vcam_core::FALLBACK_SOCKET_PATH.into(),
            ],
            handshake_timeout_ms: 5000,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            slot_count: 3,
            target_fps: 30,
            scale: "full".into(),
            corrupt_header_limit: 30,
            stale_after_intervals: 90,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: "null".into(),
            ppm_path: "vcam-preview.ppm".into(),
            snapshot_interval: 30,
            width: 960,
            height: 540,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AppConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Translate into the core service configuration.
    pub fn preview_config(&self) -> PreviewConfig {
        PreviewConfig {
            socket_paths: self
                .daemon
                .socket_paths
                .iter()
                .map(PathBuf::from)
                .collect(),
            handshake_timeout: Duration::from_millis(self.daemon.handshake_timeout_ms),
            geometry: FrameGeometry {
                width: self.stream.width,
                height: self.stream.height,
                slot_count: self.stream.slot_count,
            },
            target_fps: self.stream.target_fps,
            scale: self.scale_mode(),
            corrupt_header_limit: self.stream.corrupt_header_limit,
            stale_after_intervals: self.stream.stale_after_intervals,
        }
    }

    /// Parse the configured scale mode; unknown values fall back to
    /// full resolution with a warning.
    pub fn scale_mode(&self) -> ScaleMode {
        match self.stream.scale.as_str() {
            "half" => ScaleMode::Half,
            "full" => ScaleMode::Full,
            other => {
                tracing::warn!("unknown scale mode {other:?}; using full");
                ScaleMode::Full
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
