//! Transient ring allocator.
//!
//! A single fixed-capacity byte block backs all per-call scratch data. Offsets
//! are handed out by a write cursor that wraps at the end of the block, and a
//! range only becomes reusable once the command buffer that last wrote it has
//! completed on the GPU.
//!
//! Internally both cursors are monotonically increasing byte counters; the
//! ring offset is the counter modulo the capacity. `head - tail` is always the
//! number of bytes the GPU may still read, which makes "full" and "empty"
//! unambiguous even when the two offsets coincide.

use std::fmt;
use std::ops::Range;

use smallvec::SmallVec;

use crate::backend::Device;
use crate::error::RingError;
use crate::util::{align_up, wrapped_ranges};

/// Byte written over reclaimed ranges when scribbling is enabled.
pub const SCRIBBLE_BYTE: u8 = 0xCD;

/// Position of the write cursor captured when a command buffer is committed.
///
/// Once that command buffer completes, everything allocated before the mark
/// can be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RingWatermark(pub(crate) u64);

/// Point-in-time view of the allocator, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub capacity: u64,
    pub write_cursor: u64,
    pub last_consumed_offset: u64,
    pub in_flight_bytes: u64,
}

#[derive(Clone)]
pub struct RingAllocator {
    capacity: u64,
    head: u64,
    tail: u64,
}

impl RingAllocator {
    pub fn new(capacity: u64) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            head: 0,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Ring offset the next allocation starts from (before alignment).
    pub fn write_cursor(&self) -> u64 {
        self.head % self.capacity
    }

    /// Ring offset up to which the GPU has finished reading.
    pub fn last_consumed_offset(&self) -> u64 {
        self.tail % self.capacity
    }

    /// Bytes handed out (including alignment and wrap padding) not yet reclaimed.
    pub fn in_flight_bytes(&self) -> u64 {
        self.head - self.tail
    }

    pub fn available(&self) -> u64 {
        self.capacity - self.in_flight_bytes()
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            write_cursor: self.write_cursor(),
            last_consumed_offset: self.last_consumed_offset(),
            in_flight_bytes: self.in_flight_bytes(),
        }
    }

    /// Reserves `size` bytes aligned to `alignment` and returns their ring offset.
    ///
    /// A request that does not fit before the end of the block wraps to offset 0;
    /// the skipped tail counts as in flight until it is reclaimed with the rest.
    /// Nothing changes when the request is rejected. Zero-sized requests are
    /// rejected so every returned offset lies inside the block.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64, RingError> {
        if size == 0 {
            return Err(RingError::ZeroSizedRequest);
        }
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(RingError::InvalidAlignment(alignment));
        }
        if size > self.capacity {
            return Err(RingError::RequestExceedsCapacity {
                requested: size,
                capacity: self.capacity,
            });
        }

        let cursor = self.write_cursor();
        let aligned = align_up(cursor, alignment);
        let offset = if aligned.saturating_add(size) > self.capacity {
            0
        } else {
            aligned
        };
        let mut skipped = if offset >= cursor {
            offset - cursor
        } else {
            self.capacity - cursor
        };

        let mut head = self.head;
        let mut tail = self.tail;
        if head == tail && skipped > 0 {
            // Nothing is in flight, so the skipped bytes can be treated as consumed.
            head += skipped;
            tail = head;
            skipped = 0;
        }

        let end = head + skipped + size;
        if end - tail > self.capacity {
            return Err(RingError::Exhausted {
                requested: size,
                alignment,
                available: self.available(),
                capacity: self.capacity,
            });
        }

        self.head = end;
        self.tail = tail;
        Ok(offset)
    }

    pub fn high_water_mark(&self) -> RingWatermark {
        RingWatermark(self.head)
    }

    /// Marks everything allocated before `mark` as consumed by the GPU.
    ///
    /// Returns the ring ranges that became free. Marks older than the current
    /// consumed position are ignored.
    pub fn reclaim(&mut self, mark: RingWatermark) -> SmallVec<[Range<u64>; 2]> {
        let target = mark.0.min(self.head);
        if target <= self.tail {
            return SmallVec::new();
        }
        let reclaimed = wrapped_ranges(self.tail..target, self.capacity);
        self.tail = target;
        reclaimed
    }

    /// Forgets every allocation. Only valid once the GPU is idle.
    pub fn reset(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}

impl fmt::Debug for RingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingAllocator")
            .field("capacity", &self.capacity)
            .field("write_cursor", &self.write_cursor())
            .field("last_consumed_offset", &self.last_consumed_offset())
            .field("in_flight_bytes", &self.in_flight_bytes())
            .finish()
    }
}

/// The allocator paired with the device buffer it sub-allocates.
pub(crate) struct TransientRing<D: Device> {
    allocator: RingAllocator,
    buffer: D::Buffer,
    scribble_on_reclaim: bool,
}

impl<D: Device> TransientRing<D> {
    pub(crate) fn new(allocator: RingAllocator, buffer: D::Buffer, scribble_on_reclaim: bool) -> Self {
        Self {
            allocator,
            buffer,
            scribble_on_reclaim,
        }
    }

    pub(crate) fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub(crate) fn allocator(&self) -> &RingAllocator {
        &self.allocator
    }

    pub(crate) fn allocate(&mut self, size: u64, alignment: u64) -> Result<u64, RingError> {
        self.allocator.allocate(size, alignment)
    }

    pub(crate) fn high_water_mark(&self) -> RingWatermark {
        self.allocator.high_water_mark()
    }

    /// Advances the consumed position and, if enabled, overwrites the freed
    /// bytes so a stale read of reclaimed scratch data is easy to spot.
    pub(crate) fn reclaim(&mut self, device: &D, mark: RingWatermark) -> u64 {
        let ranges = self.allocator.reclaim(mark);
        let mut reclaimed = 0;
        for range in ranges {
            reclaimed += range.end - range.start;
            if self.scribble_on_reclaim {
                let pattern = vec![SCRIBBLE_BYTE; (range.end - range.start) as usize];
                device.write_buffer(&self.buffer, range.start, &pattern);
            }
        }
        if reclaimed > 0 {
            tracing::trace!(
                reclaimed,
                last_consumed = self.allocator.last_consumed_offset(),
                "reclaimed transient ring bytes"
            );
        }
        reclaimed
    }

    pub(crate) fn reset(&mut self) {
        self.allocator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_allocations_fill_the_ring_then_fail() {
        let mut ring = RingAllocator::new(1024).unwrap();

        let offsets: Vec<u64> = (0..4).map(|_| ring.allocate(256, 1).unwrap()).collect();
        assert_eq!(offsets, vec![0, 256, 512, 768]);

        assert_eq!(
            ring.allocate(256, 1),
            Err(RingError::Exhausted {
                requested: 256,
                alignment: 1,
                available: 0,
                capacity: 1024,
            })
        );
    }

    #[test]
    fn reclaim_releases_space_up_to_the_watermark() {
        let mut ring = RingAllocator::new(1024).unwrap();
        for _ in 0..4 {
            ring.allocate(256, 1).unwrap();
        }
        let mark = ring.high_water_mark();

        let reclaimed = ring.reclaim(mark);

        assert_eq!(reclaimed.as_slice(), &[0..1024]);
        assert_eq!(ring.in_flight_bytes(), 0);
        assert_eq!(ring.allocate(256, 1).unwrap(), 0);
    }

    #[test]
    fn full_capacity_request_succeeds_only_when_fully_reclaimed() {
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(300, 1).unwrap();

        assert!(matches!(
            ring.allocate(1024, 1),
            Err(RingError::Exhausted { .. })
        ));

        let mark = ring.high_water_mark();
        ring.reclaim(mark);
        assert_eq!(ring.write_cursor(), ring.last_consumed_offset());

        assert_eq!(ring.allocate(1024, 1).unwrap(), 0);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn requests_larger_than_capacity_are_rejected_up_front() {
        let mut ring = RingAllocator::new(512).unwrap();
        assert_eq!(
            ring.allocate(513, 1),
            Err(RingError::RequestExceedsCapacity {
                requested: 513,
                capacity: 512,
            })
        );
    }

    #[test]
    fn alignment_must_be_a_power_of_two() {
        let mut ring = RingAllocator::new(512).unwrap();
        assert_eq!(ring.allocate(16, 0), Err(RingError::InvalidAlignment(0)));
        assert_eq!(ring.allocate(16, 24), Err(RingError::InvalidAlignment(24)));
    }

    #[test]
    fn zero_sized_requests_are_rejected() {
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(1000, 1).unwrap();
        assert_eq!(ring.allocate(0, 256), Err(RingError::ZeroSizedRequest));
        assert_eq!(ring.in_flight_bytes(), 1000);

        // The aligned cursor lands exactly on the end; the request wraps.
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(1000, 1).unwrap();
        ring.reclaim(ring.high_water_mark());
        assert_eq!(ring.allocate(1, 256), Ok(0));
    }

    #[test]
    fn aligned_allocations_skip_padding() {
        let mut ring = RingAllocator::new(1024).unwrap();
        assert_eq!(ring.allocate(10, 1).unwrap(), 0);
        assert_eq!(ring.allocate(16, 256).unwrap(), 256);
        assert_eq!(ring.in_flight_bytes(), 272);
    }

    #[test]
    fn wrap_never_overlaps_unreclaimed_data() {
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(512, 1).unwrap();
        let first_frame = ring.high_water_mark();
        ring.allocate(400, 1).unwrap();

        // 112 bytes remain before the end, and [0, 512) is still in flight.
        assert!(matches!(
            ring.allocate(200, 1),
            Err(RingError::Exhausted { .. })
        ));

        ring.reclaim(first_frame);
        let offset = ring.allocate(200, 1).unwrap();
        assert_eq!(offset, 0);
        // The skipped tail [912, 1024) stays in flight with the wrapped request.
        assert_eq!(ring.in_flight_bytes(), 400 + 112 + 200);
    }

    #[test]
    fn reclaim_reports_wrapped_ranges() {
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(900, 1).unwrap();
        ring.reclaim(ring.high_water_mark());

        ring.allocate(100, 1).unwrap();
        ring.allocate(100, 1).unwrap();
        let reclaimed = ring.reclaim(ring.high_water_mark());

        assert_eq!(reclaimed.as_slice(), &[900..1024, 0..100]);
    }

    #[test]
    fn stale_watermarks_are_ignored() {
        let mut ring = RingAllocator::new(1024).unwrap();
        ring.allocate(128, 1).unwrap();
        let early = ring.high_water_mark();
        ring.allocate(128, 1).unwrap();
        let late = ring.high_water_mark();

        ring.reclaim(late);
        assert!(ring.reclaim(early).is_empty());
        assert_eq!(ring.in_flight_bytes(), 0);
    }
}
