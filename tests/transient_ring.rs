/// Transient ring behaviour, both on the bare allocator and through `set_bytes`.
///
/// Run with:   cargo test --test transient_ring
use std::collections::VecDeque;
use std::ops::Range;

use proptest::prelude::*;
use stratum::backend::mock::{MockCommand, MockDevice};
use stratum::{
    BufferBinding, CommitFlags, Context, ContextConfig, DebugVerbosity, DeviceCapabilities,
    EncoderError, ResourceId, RingAllocator, RingError, RingWatermark, ShaderStage, SCRIBBLE_BYTE,
};

/// Device that never uploads bytes inline, so every `set_bytes` hits the ring.
fn ring_only_device() -> MockDevice {
    MockDevice::with_capabilities(DeviceCapabilities {
        max_inline_bytes: 0,
        ..DeviceCapabilities::default()
    })
}

fn context_with_ring(device: &MockDevice, capacity: u64, scribble: bool) -> Context<MockDevice> {
    Context::new(
        device.clone(),
        ContextConfig::default()
            .with_ring_capacity(capacity)
            .with_verbosity(DebugVerbosity::Off)
            .with_scribble_on_reclaim(scribble),
    )
    .unwrap()
}

fn transient_binding(context: &Context<MockDevice>, slot: usize) -> (ResourceId, u64, usize) {
    match context.bound_buffer(ShaderStage::Compute, slot).unwrap() {
        Some(BufferBinding::TransientBytes {
            resource,
            offset,
            len,
        }) => (resource, offset, len),
        other => panic!("expected a transient binding in slot {slot}, found {other:?}"),
    }
}

#[test]
fn ring_hands_out_sequential_offsets_until_exhausted() {
    let mut ring = RingAllocator::new(1024).unwrap();
    let offsets: Vec<u64> = (0..4).map(|_| ring.allocate(256, 256).unwrap()).collect();
    assert_eq!(offsets, vec![0, 256, 512, 768]);
    assert!(matches!(
        ring.allocate(256, 256),
        Err(RingError::Exhausted { available: 0, .. })
    ));

    // Completing the first two allocations makes room at the start again.
    let mut ring = RingAllocator::new(1024).unwrap();
    ring.allocate(512, 256).unwrap();
    let mark = ring.high_water_mark();
    ring.allocate(256, 256).unwrap();
    assert_eq!(ring.reclaim(mark).as_slice(), &[0..512]);
    assert_eq!(ring.allocate(256, 256), Ok(768));
    assert_eq!(ring.allocate(512, 256), Ok(0));
}

#[test]
fn set_bytes_fills_the_ring_then_reports_exhaustion() {
    let device = ring_only_device();
    let mut context = context_with_ring(&device, 1024, false);

    let mut compute = context.begin_compute("uploads").unwrap();
    for slot in 0..4 {
        compute.set_bytes(slot, &[slot as u8; 256]).unwrap();
    }
    drop(compute);
    let offsets: Vec<u64> = (0..4)
        .map(|slot| transient_binding(&context, slot).1)
        .collect();
    assert_eq!(offsets, vec![0, 256, 512, 768]);

    let mut compute = context.resume_compute().unwrap();
    let error = compute.set_bytes(4, &[4; 256]).unwrap_err();
    assert!(matches!(
        error,
        EncoderError::Ring(RingError::Exhausted {
            requested: 256,
            capacity: 1024,
            ..
        })
    ));
    compute.end_encoding().unwrap();
}

#[test]
fn exhausted_ring_recovers_once_earlier_work_completes() {
    let device = ring_only_device();
    let mut context = context_with_ring(&device, 1024, false);

    {
        let mut compute = context.begin_compute("first frame").unwrap();
        compute.set_bytes(0, &[1; 768]).unwrap();
        compute.end_encoding().unwrap();
    }
    context.commit(CommitFlags::empty()).unwrap();
    assert_eq!(context.ring_stats().in_flight_bytes, 768);

    let mut compute = context.begin_compute("second frame").unwrap();
    assert!(compute.set_bytes(0, &[2; 512]).is_err());

    // The GPU finishes the first frame; the next allocation polls and retries.
    device.complete_all();
    compute.set_bytes(0, &[2; 512]).unwrap();
    compute.end_encoding().unwrap();

    assert_eq!(context.in_flight_count(), 0);
    let (_, offset, len) = {
        let mut compute = context.begin_compute("after reclaim").unwrap();
        compute.set_bytes(0, &[3; 16]).unwrap();
        drop(compute);
        let binding = transient_binding(&context, 0);
        context.resume_compute().unwrap().end_encoding().unwrap();
        binding
    };
    assert_eq!((offset, len), (512, 16));
}

#[test]
fn inline_and_transient_uploads_expose_the_same_bytes() {
    let payload: Vec<u8> = (0..200u8).collect();

    let inline_device = MockDevice::new();
    let mut inline = context_with_ring(&inline_device, 4096, false);
    {
        let mut compute = inline.begin_compute("inline").unwrap();
        compute.set_bytes(3, &payload).unwrap();
        assert_eq!(
            compute.set_bytes(4, &[]),
            Ok(()),
            "empty blobs are accepted"
        );
        drop(compute);
        assert_eq!(
            inline.bound_buffer(ShaderStage::Compute, 3).unwrap(),
            Some(BufferBinding::InlineBytes { len: 200 })
        );
        inline.resume_compute().unwrap().end_encoding().unwrap();
    }
    inline.commit(CommitFlags::empty()).unwrap();
    let inline_bytes = inline_device.submissions()[0]
        .commands
        .iter()
        .find_map(|command| match command {
            MockCommand::SetBytes { slot: 3, bytes, .. } => Some(bytes.clone()),
            _ => None,
        })
        .unwrap();

    let ring_device = ring_only_device();
    let mut ring = context_with_ring(&ring_device, 4096, false);
    let (resource, offset, len) = {
        let mut compute = ring.begin_compute("transient").unwrap();
        compute.set_bytes(3, &payload).unwrap();
        drop(compute);
        let binding = transient_binding(&ring, 3);
        ring.resume_compute().unwrap().end_encoding().unwrap();
        binding
    };
    let stats = ring.current_stats().unwrap();
    assert_eq!(stats.inline_bytes, 0);
    assert_eq!(stats.transient_bytes, 200);
    ring.commit(CommitFlags::empty()).unwrap();

    assert!(ring_device.submissions()[0]
        .commands
        .contains(&MockCommand::SetBuffer {
            stage: ShaderStage::Compute,
            slot: 3,
            buffer: resource,
            offset,
        }));
    let contents = ring_device.buffer_contents(resource).unwrap();
    let transient_bytes = contents[offset as usize..offset as usize + len].to_vec();

    assert_eq!(inline_bytes, payload);
    assert_eq!(transient_bytes, payload);
}

#[test]
fn reclaimed_ranges_are_scribbled() {
    let device = ring_only_device();
    let mut context = context_with_ring(&device, 1024, true);

    let (resource, offset, len) = {
        let mut compute = context.begin_compute("scratch").unwrap();
        compute.set_bytes(0, &[0x11; 300]).unwrap();
        drop(compute);
        let binding = transient_binding(&context, 0);
        context.resume_compute().unwrap().end_encoding().unwrap();
        binding
    };
    context.commit(CommitFlags::empty()).unwrap();

    let before = device.buffer_contents(resource).unwrap();
    assert!(before[offset as usize..][..len].iter().all(|byte| *byte == 0x11));

    device.complete_all();
    assert_eq!(context.poll_completions(), 1);
    let after = device.buffer_contents(resource).unwrap();
    assert!(after[offset as usize..][..len]
        .iter()
        .all(|byte| *byte == SCRIBBLE_BYTE));
    assert_eq!(context.ring_stats().in_flight_bytes, 0);
}

proptest! {
    /// Live allocations never overlap and never cross the end of the ring.
    #[test]
    fn live_allocations_are_disjoint(
        requests in prop::collection::vec((1u64..=300, 0u32..4, any::<bool>()), 1..64),
    ) {
        let capacity = 1024;
        let mut ring = RingAllocator::new(capacity).unwrap();
        // (watermark, ranges allocated before it) per simulated submission.
        let mut submissions: VecDeque<(RingWatermark, Vec<Range<u64>>)> = VecDeque::new();
        let mut pending: Vec<Range<u64>> = Vec::new();

        for (size, alignment_shift, complete_oldest) in requests {
            let alignment = 1u64 << (alignment_shift * 2);
            match ring.allocate(size, alignment) {
                Ok(offset) => {
                    prop_assert_eq!(offset % alignment, 0);
                    prop_assert!(offset + size <= capacity);
                    let range = offset..offset + size;
                    let live = submissions
                        .iter()
                        .flat_map(|(_, ranges)| ranges.iter())
                        .chain(pending.iter());
                    for other in live {
                        prop_assert!(
                            range.end <= other.start || other.end <= range.start,
                            "{:?} overlaps {:?}",
                            range,
                            other
                        );
                    }
                    pending.push(range);
                }
                Err(RingError::Exhausted { .. }) => {}
                Err(error) => prop_assert!(false, "unexpected error {}", error),
            }

            if complete_oldest {
                submissions.push_back((ring.high_water_mark(), std::mem::take(&mut pending)));
                if let Some((mark, _)) = submissions.pop_front() {
                    ring.reclaim(mark);
                }
            }
            prop_assert!(ring.in_flight_bytes() <= capacity);
        }
    }
}
