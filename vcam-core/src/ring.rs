//! Tear-free reads from the daemon's frame ring.
//!
//! The producer fills slot `(write_index + 1) % slot_count` and then
//! publishes it by storing the new index, so the slot named by
//! `write_index` is always the newest complete frame. There is no lock
//! in either direction: the consumer copies the published slot out and
//! revalidates the index afterwards. A read is possibly torn only if
//! the producer wrapped back onto the slot mid-copy, which the
//! post-copy check detects by adjacency; one retry bounds the cost.
//!
//! This is a best-effort freshness scheme. It never blocks the
//! producer and never yields bytes that failed revalidation, but a
//! full producer lap between the two index reads is indistinguishable
//! from no movement — accepted, with `slot_count >= 3` making it
//! unreachable at sane frame rates.

use std::sync::atomic::{Ordering, fence};

use bytes::BytesMut;

use crate::error::VcamError;
use crate::layout::{FrameGeometry, RingHeader, WRITE_INDEX_OFFSET};
use crate::region::SharedRegion;

/// One copied-out frame, valid until the next acquire.
#[derive(Debug)]
pub struct RawFrame<'a> {
    /// Slot the bytes were copied from.
    pub slot: u32,
    /// Exactly `width * height * 3 / 2` NV21 bytes.
    pub bytes: &'a [u8],
}

/// Reader half of the shared ring.
///
/// Owns the mapped region exclusively; dropping the reader unmaps it
/// and closes the descriptor.
pub struct RingReader {
    region: SharedRegion,
    geometry: FrameGeometry,
    scratch: BytesMut,
}

impl RingReader {
    /// Take ownership of a mapped region.
    pub fn new(region: SharedRegion, geometry: FrameGeometry) -> Self {
        let scratch = BytesMut::with_capacity(geometry.frame_size());
        Self {
            region,
            geometry,
            scratch,
        }
    }

    /// The geometry this reader was built with.
    pub fn geometry(&self) -> &FrameGeometry {
        &self.geometry
    }

    /// Snapshot of the producer's header, for diagnostics only.
    pub fn header(&self) -> RingHeader {
        RingHeader::decode(&self.region.as_bytes()[..RingHeader::SIZE])
    }

    /// Copy out the latest complete frame.
    ///
    /// Returns [`VcamError::CorruptHeader`] when the published index is
    /// outside `[0, slot_count)` — transient while the producer is
    /// still initializing, so callers retry with backoff rather than
    /// tearing the session down.
    pub fn acquire_latest(&mut self) -> Result<RawFrame<'_>, VcamError> {
        let slot_count = self.geometry.slot_count;
        let mut index = self.load_write_index();
        if index >= slot_count {
            return Err(VcamError::CorruptHeader { index, slot_count });
        }

        for attempt in 0..2 {
            self.copy_slot(index);
            fence(Ordering::Acquire);

            let after = self.load_write_index();
            if after >= slot_count {
                return Err(VcamError::CorruptHeader {
                    index: after,
                    slot_count,
                });
            }

            // The producer fills (after + 1) % slot_count next; if that
            // is the slot just copied, the copy may have raced the
            // overwrite. Re-read the freshest published slot once.
            if attempt == 0 && (after + 1) % slot_count == index {
                index = after;
                continue;
            }
            break;
        }

        Ok(RawFrame {
            slot: index,
            bytes: &self.scratch,
        })
    }

    /// Volatile load of the producer's published index.
    ///
    /// The mapping is page-aligned, so the u32 at offset 0 is aligned.
    fn load_write_index(&self) -> u32 {
        let ptr = unsafe { self.region.as_ptr().add(WRITE_INDEX_OFFSET) } as *const u32;
        let index = unsafe { std::ptr::read_volatile(ptr) };
        fence(Ordering::Acquire);
        index
    }

    /// Copy the slot's bytes into the private scratch buffer.
    ///
    /// The index must already be validated.
    fn copy_slot(&mut self, index: u32) {
        let offset = self.geometry.slot_offset(index);
        let frame_size = self.geometry.frame_size();
        self.scratch.clear();
        self.scratch
            .extend_from_slice(&self.region.as_bytes()[offset..offset + frame_size]);
    }
}

// ── Tests ────────────────────────────────────────────────────────
