//! Read-only mapping of the daemon's shared frame region.
//!
//! The mapper takes ownership of the descriptor received during the
//! handshake; the connector must not retain it. Dropping the region
//! unmaps the memory and closes the descriptor, on every exit path.

use std::fs::File;
use std::os::fd::OwnedFd;

use memmap2::{Mmap, MmapOptions};
use tracing::info;

use crate::error::MapError;
use crate::layout::FrameGeometry;

/// The mapped shared region.
///
/// Read-only by construction: the producer owns the bytes, the
/// consumer only ever copies out of them.
#[derive(Debug)]
pub struct SharedRegion {
    map: Mmap,
    // Keeps the descriptor open for the lifetime of the mapping.
    _file: File,
}

impl SharedRegion {
    /// Map the received descriptor for the given protocol geometry.
    ///
    /// The backing object must be at least `geometry.region_size()`
    /// bytes — the size is a protocol constant, not discovered from
    /// the descriptor.
    pub fn map(fd: OwnedFd, geometry: &FrameGeometry) -> Result<Self, MapError> {
        geometry.validate()?;
        let expected = geometry.region_size();

        let stat = rustix::fs::fstat(&fd).map_err(|e| MapError::MapFailed(e.into()))?;
        let actual = stat.st_size as usize;
        if actual < expected {
            return Err(MapError::SizeMismatch { expected, actual });
        }

        let file = File::from(fd);
        let map = unsafe {
            MmapOptions::new()
                .len(expected)
                .map(&file)
                .map_err(MapError::MapFailed)?
        };

        info!(
            "mapped shared region: {} bytes ({}x{}, {} slots)",
            expected, geometry.width, geometry.height, geometry.slot_count
        );

        Ok(Self { map, _file: file })
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Always false for a successfully mapped region.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The region's bytes.
    ///
    /// The producer mutates these concurrently; any multi-byte read
    /// must be copied out and revalidated by the ring reader.
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    /// Base pointer, for volatile header reads.
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }
}

// ── Tests ────────────────────────────────────────────────────────
