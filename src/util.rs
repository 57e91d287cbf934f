use std::ops::Range;

use smallvec::SmallVec;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    let add = alignment - 1;
    match value.checked_add(add) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

/// Maps a linear byte range onto a ring of `capacity` bytes.
///
/// Yields one segment, or two when the range crosses the end of the ring.
pub(crate) fn wrapped_ranges(linear: Range<u64>, capacity: u64) -> SmallVec<[Range<u64>; 2]> {
    let mut ranges = SmallVec::new();
    let len = linear.end.saturating_sub(linear.start);
    if len == 0 || capacity == 0 {
        return ranges;
    }
    if len >= capacity {
        ranges.push(0..capacity);
        return ranges;
    }

    let start = linear.start % capacity;
    let end = start + len;
    if end <= capacity {
        ranges.push(start..end);
    } else {
        ranges.push(start..capacity);
        ranges.push(0..end - capacity);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
    }

    #[test]
    fn align_up_saturates_instead_of_overflowing() {
        assert_eq!(align_up(u64::MAX, 16), u64::MAX / 16 * 16);
    }

    #[test]
    fn wrapped_ranges_splits_at_the_ring_end() {
        assert_eq!(wrapped_ranges(0..256, 1024).as_slice(), &[0..256]);
        assert_eq!(wrapped_ranges(1024..1280, 1024).as_slice(), &[0..256]);
        assert_eq!(
            wrapped_ranges(900..1100, 1024).as_slice(),
            &[900..1024, 0..76]
        );
        assert_eq!(wrapped_ranges(10..2000, 1024).as_slice(), &[0..1024]);
        assert!(wrapped_ranges(64..64, 1024).is_empty());
    }
}
