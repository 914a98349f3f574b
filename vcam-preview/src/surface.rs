//! Headless render surfaces.
//!
//! The real overlay window belongs to the platform presentation
//! layer; these surfaces let the binary exercise the full pipeline
//! without one. `NullSurface` just counts frames; `PpmSurface`
//! additionally writes a periodic snapshot for eyeballing the stream.

use std::path::PathBuf;

use tracing::debug;

use vcam_core::sink::RenderSurface;

use crate::config::OutputConfig;

/// Build the surface the config asks for.
pub fn build_surface(config: &OutputConfig) -> Result<Box<dyn RenderSurface>, String> {
    match config.mode.as_str() {
        "null" => Ok(Box::new(NullSurface::new(config.width, config.height))),
        "ppm" => Ok(Box::new(PpmSurface::new(
            PathBuf::from(&config.ppm_path),
            config.width,
            config.height,
            config.snapshot_interval.max(1),
        ))),
        other => Err(format!("unknown output mode {other:?}")),
    }
}

// ── NullSurface ──────────────────────────────────────────────────

/// Accepts every frame and discards it.
pub struct NullSurface {
    width: u32,
    height: u32,
    frames: u64,
}

impl NullSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: 0,
        }
    }
}

impl RenderSurface for NullSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, _rgba: &[u8], width: u32, height: u32) -> Result<(), String> {
        self.frames += 1;
        debug!("frame {} ({width}x{height}) discarded", self.frames);
        Ok(())
    }
}

// ── PpmSurface ───────────────────────────────────────────────────

/// Writes every Nth frame to a binary PPM file.
///
/// The snapshot is written to a sibling temp file and renamed into
/// place, so a reader never observes a partial image.
pub struct PpmSurface {
    path: PathBuf,
    width: u32,
    height: u32,
    interval: u32,
    frames: u64,
    /// Reused RGB scratch (PPM has no alpha channel).
    rgb: Vec<u8>,
}

impl PpmSurface {
    pub fn new(path: PathBuf, width: u32, height: u32, interval: u32) -> Self {
        Self {
            path,
            width,
            height,
            interval,
            frames: 0,
            rgb: Vec::new(),
        }
    }

    fn write_snapshot(&mut self, rgba: &[u8], width: u32, height: u32) -> std::io::Result<()> {
        self.rgb.clear();
        self.rgb.reserve(width as usize * height as usize * 3);
        for px in rgba.chunks_exact(4) {
            self.rgb.extend_from_slice(&px[..3]);
        }

        let mut contents = format!("P6\n{width} {height}\n255\n").into_bytes();
        contents.extend_from_slice(&self.rgb);

        let tmp = self.path.with_extension("ppm.tmp");
        std::fs::write(&tmp, &contents)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl RenderSurface for PpmSurface {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn present(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), String> {
        self.frames += 1;
        if self.frames % self.interval as u64 == 0 {
            self.write_snapshot(rgba, width, height)
                .map_err(|e| format!("snapshot write failed: {e}"))?;
            debug!("snapshot written to {}", self.path.display());
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
