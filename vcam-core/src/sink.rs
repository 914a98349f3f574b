//! Render sink — pushes decoded frames to a display surface.
//!
//! The surface is the seam to the presentation layer (overlay window,
//! test harness, snapshot writer). The sink scales each decoded frame
//! to the surface's current dimensions and presents it. It holds no
//! queue: a frame that is not presented before the next one decodes
//! is simply gone, and the pull rate is capped by the service loop,
//! not here.

use tracing::debug;

use crate::decode::DecodedImage;
use crate::error::VcamError;

// ── RenderSurface ────────────────────────────────────────────────

/// A presentation target for decoded RGBA frames.
///
/// Implementations must tolerate `present` racing surface teardown:
/// returning an error is the signal that the surface is gone, and the
/// service treats it as a stop request rather than a failure.
pub trait RenderSurface: Send {
    /// Current drawable size in pixels. May change between frames.
    fn dimensions(&self) -> (u32, u32);

    /// Present one frame of `width * height * 4` RGBA bytes.
    fn present(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), String>;
}

// ── RenderSink ───────────────────────────────────────────────────

/// Scales decoded frames to the surface and presents them.
pub struct RenderSink {
    surface: Box<dyn RenderSurface>,
    /// Scratch buffer for the scaled frame.
    scaled: Vec<u8>,
    /// Source-column byte offsets for the current (src, dst) pair.
    col_map: Vec<usize>,
    /// (src_w, src_h, dst_w, dst_h) the column map was built for.
    map_dims: (u32, u32, u32, u32),
    frames_presented: u64,
}

impl RenderSink {
    /// Wrap a surface.
    pub fn new(surface: Box<dyn RenderSurface>) -> Self {
        Self {
            surface,
            scaled: Vec::new(),
            col_map: Vec::new(),
            map_dims: (0, 0, 0, 0),
            frames_presented: 0,
        }
    }

    /// Frames handed to the surface since construction.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Scale `image` to the surface's current size and present it.
    ///
    /// A surface error maps to [`VcamError::Render`]; the caller
    /// treats it as a stop signal.
    pub fn present(&mut self, image: &DecodedImage<'_>) -> Result<(), VcamError> {
        let (dst_w, dst_h) = self.surface.dimensions();
        if dst_w == 0 || dst_h == 0 {
            return Err(VcamError::Render("surface has no drawable area".into()));
        }

        let result = if (dst_w, dst_h) == (image.width, image.height) {
            self.surface.present(image.data, dst_w, dst_h)
        } else {
            self.rescale(image, dst_w, dst_h);
            self.surface.present(&self.scaled, dst_w, dst_h)
        };

        result.map_err(VcamError::Render)?;
        self.frames_presented += 1;
        Ok(())
    }

    /// Nearest-neighbour scale into the scratch buffer.
    fn rescale(&mut self, image: &DecodedImage<'_>, dst_w: u32, dst_h: u32) {
        let dims = (image.width, image.height, dst_w, dst_h);
        if self.map_dims != dims {
            debug!(
                "rebuilding scale map: {}x{} -> {}x{}",
                image.width, image.height, dst_w, dst_h
            );
            self.col_map = (0..dst_w as usize)
                .map(|dx| (dx * image.width as usize / dst_w as usize) * 4)
                .collect();
            self.scaled = vec![0u8; dst_w as usize * dst_h as usize * 4];
            self.map_dims = dims;
        }

        let src_stride = image.width as usize * 4;
        let dst_stride = dst_w as usize * 4;

        for dy in 0..dst_h as usize {
            let sy = dy * image.height as usize / dst_h as usize;
            let src_row = &image.data[sy * src_stride..(sy + 1) * src_stride];
            let dst_row = &mut self.scaled[dy * dst_stride..(dy + 1) * dst_stride];

            for (dx, &src_off) in self.col_map.iter().enumerate() {
                dst_row[dx * 4..dx * 4 + 4].copy_from_slice(&src_row[src_off..src_off + 4]);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
