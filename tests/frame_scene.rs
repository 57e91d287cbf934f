/// Scene-level regression tests.
///
/// These tests encode the particle frame from `stratum-test-scenes` against the
/// recording device, then validate the debug trace, the fence timeline and the
/// resulting buffer contents.
///
/// Run with:   cargo test --test frame_scene
use stratum::backend::mock::{FenceEvent, MockCommand, MockDevice};
use stratum::{
    CommitFlags, CompletionStatus, Context, ContextConfig, DebugVerbosity, Device, NativeResource,
};
use stratum_test_scenes::{build_frame_scene, check_trace, FrameResources, PARTICLE_COUNT};

fn context(device: &MockDevice, verbosity: DebugVerbosity) -> Context<MockDevice> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Context::new(
        device.clone(),
        ContextConfig::default()
            .with_ring_capacity(64 * 1024)
            .with_verbosity(verbosity),
    )
    .unwrap()
}

fn fail_on(failures: Vec<String>) {
    if !failures.is_empty() {
        panic!(
            "{} trace expectation(s) failed:\n{}",
            failures.len(),
            failures.join("\n"),
        );
    }
}

/// Main regression test: one frame produces the expected trace and no warnings.
#[test]
fn single_frame_trace_expectations() {
    let device = MockDevice::new();
    let resources = FrameResources::new(&device);
    let mut context = context(&device, DebugVerbosity::LogOperations);

    let scene = build_frame_scene(&mut context, &resources, 0, None).unwrap();
    fail_on(check_trace(context.debug_trace(), &scene.expectations));
    assert!(context.debug_warnings().is_empty(), "{:?}", context.debug_warnings());

    let stats = context.current_stats().unwrap();
    assert_eq!(stats.encoders, 4);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.draws, 8);
    assert_eq!(stats.blits, 3);

    context.commit(CommitFlags::empty()).unwrap();
    device.complete_all();
    assert_eq!(context.poll_completions(), 1);
    assert_eq!(device.completed(), vec![(1, CompletionStatus::Completed)]);
}

/// Overlapping frames chain on the previous frame's fences and stay free of
/// validation warnings and GPU hangs.
#[test]
fn overlapping_frames_stay_hazard_free() {
    let device = MockDevice::new();
    let resources = FrameResources::new(&device);
    let mut context = context(&device, DebugVerbosity::LogOperations);

    let mut previous = None;
    for frame in 0..4 {
        let scene = build_frame_scene(&mut context, &resources, frame, previous).unwrap();
        fail_on(check_trace(context.debug_trace(), &scene.expectations));
        context.commit(CommitFlags::empty()).unwrap();
        previous = Some(scene.fences);
    }
    assert!(context.debug_warnings().is_empty(), "{:?}", context.debug_warnings());
    assert_eq!(context.in_flight_count(), 4);

    device.complete_all();
    context.poll_completions();
    assert!(context.device_faults().is_empty(), "{:?}", context.device_faults());
    assert_eq!(context.in_flight_count(), 0);

    for event in device.fence_timeline() {
        if let FenceEvent::Wait {
            fence,
            encoder,
            signaled_by,
            ..
        } = event
        {
            assert!(
                signaled_by.is_some(),
                "encoder '{encoder}' waited on unsignalled fence {fence}"
            );
        }
    }
}

fn count_commands(device: &MockDevice, pick: impl Fn(&MockCommand) -> bool) -> usize {
    device.submissions()[0]
        .commands
        .iter()
        .filter(|command| pick(command))
        .count()
}

/// Frames encoded without tracing still produce the same native work.
#[test]
fn verbosity_does_not_change_encoded_work() {
    let quiet_device = MockDevice::new();
    let quiet_resources = FrameResources::new(&quiet_device);
    let mut quiet = context(&quiet_device, DebugVerbosity::Off);
    build_frame_scene(&mut quiet, &quiet_resources, 0, None).unwrap();
    assert!(quiet.debug_trace().is_empty());
    quiet.commit(CommitFlags::empty()).unwrap();

    let loud_device = MockDevice::new();
    let loud_resources = FrameResources::new(&loud_device);
    let mut loud = context(&loud_device, DebugVerbosity::LogOperations);
    build_frame_scene(&mut loud, &loud_resources, 0, None).unwrap();
    loud.commit(CommitFlags::empty()).unwrap();

    let draws = |command: &MockCommand| matches!(command, MockCommand::DrawIndexed { .. });
    let dispatches = |command: &MockCommand| matches!(command, MockCommand::Dispatch(_));
    let fences = |command: &MockCommand| matches!(command, MockCommand::UpdateFence(_));
    let groups = |command: &MockCommand| matches!(command, MockCommand::PushDebugGroup(_));

    assert_eq!(count_commands(&quiet_device, draws), 8);
    assert_eq!(count_commands(&loud_device, draws), 8);
    assert_eq!(count_commands(&quiet_device, dispatches), 1);
    assert_eq!(count_commands(&loud_device, dispatches), 1);
    assert_eq!(count_commands(&quiet_device, fences), 4);
    assert_eq!(count_commands(&loud_device, fences), 4);
    // Group markers only reach the device when groups are recorded.
    assert_eq!(count_commands(&quiet_device, groups), 0);
    assert_eq!(count_commands(&loud_device, groups), 1);
}

/// The readback blit copies the particle buffer after clearing the target.
#[test]
fn readback_copies_particle_state() {
    let device = MockDevice::new();
    let resources = FrameResources::new(&device);
    let mut context = context(&device, DebugVerbosity::Validate);

    let pattern: Vec<u8> = (0..PARTICLE_COUNT as usize * 32).map(|i| (i % 251) as u8).collect();
    device.write_buffer(&resources.particles, 0, &pattern);
    device.write_buffer(&resources.readback, 0, &vec![0xFF; pattern.len()]);

    build_frame_scene(&mut context, &resources, 0, None).unwrap();
    context.commit(CommitFlags::WAIT_ON_SUBMIT).unwrap();

    let readback = device
        .buffer_contents(resources.readback.resource_id())
        .unwrap();
    assert_eq!(readback, pattern);
}
