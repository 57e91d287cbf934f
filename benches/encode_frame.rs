use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratum::backend::mock::MockDevice;
use stratum::{CommitFlags, Context, ContextConfig, DebugVerbosity, DeviceCapabilities};
use stratum_test_scenes::{build_frame_scene, FrameResources, DRAW_BATCHES};

fn context(device: &MockDevice, verbosity: DebugVerbosity) -> Context<MockDevice> {
    // STRATUM_RING_CAPACITY and STRATUM_SCRIBBLE apply; verbosity is per benchmark.
    let config = ContextConfig::from_env()
        .unwrap_or_default()
        .with_verbosity(verbosity);
    match Context::new(device.clone(), config) {
        Ok(context) => context,
        Err(error) => panic!("failed to create context: {error}"),
    }
}

/// Encodes, commits and retires one particle frame per iteration.
fn bench_frame_by_verbosity(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    group.throughput(Throughput::Elements(u64::from(DRAW_BATCHES)));

    for verbosity in [
        DebugVerbosity::Off,
        DebugVerbosity::Validate,
        DebugVerbosity::LogOperations,
    ] {
        let device = MockDevice::new();
        let resources = FrameResources::new(&device);
        let mut context = context(&device, verbosity);
        let mut frame = 0u32;
        let mut previous = None;

        group.bench_with_input(
            BenchmarkId::from_parameter(verbosity),
            &verbosity,
            |b, _| {
                b.iter(|| {
                    let scene = build_frame_scene(&mut context, &resources, frame, previous)
                        .unwrap_or_else(|error| panic!("frame {frame} failed: {error}"));
                    context
                        .commit(CommitFlags::empty())
                        .unwrap_or_else(|error| panic!("commit failed: {error}"));
                    device.complete_all();
                    black_box(context.poll_completions());
                    previous = Some(scene.fences);
                    frame = frame.wrapping_add(1);
                });
            },
        );
    }
    group.finish();
}

/// Transient uploads of increasing size through `set_bytes`.
fn bench_transient_uploads(c: &mut Criterion) {
    let mut group = c.benchmark_group("transient_upload");
    let device = MockDevice::with_capabilities(DeviceCapabilities {
        max_inline_bytes: 0,
        ..DeviceCapabilities::default()
    });
    let pipeline = device.create_compute_pipeline("consume");
    let mut context = context(&device, DebugVerbosity::Off);

    for size in [64usize, 1024, 16 * 1024] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64 * 16));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                {
                    let mut compute = context
                        .begin_compute("uploads")
                        .unwrap_or_else(|error| panic!("begin failed: {error}"));
                    let _ = compute.set_pipeline(&pipeline);
                    for slot in 0..16 {
                        compute
                            .set_bytes(slot, black_box(payload))
                            .unwrap_or_else(|error| panic!("upload failed: {error}"));
                    }
                    let _ = compute.dispatch([1, 1, 1]);
                    let _ = compute.end_encoding();
                }
                let _ = context.commit(CommitFlags::empty());
                device.complete_all();
                context.poll_completions();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_frame_by_verbosity, bench_transient_uploads);
criterion_main!(benches);
