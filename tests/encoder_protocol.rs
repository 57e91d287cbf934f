/// Encoder state machine tests against the recording device.
///
/// Run with:   cargo test --test encoder_protocol
use stratum::backend::mock::{MockCommand, MockDevice};
use stratum::{
    AttachmentSlot, ColorAttachment, CommitFlags, Context, ContextConfig, DebugCommandKind,
    DebugVerbosity, DepthAttachment, DeviceCapabilities, EncoderError, EncoderKind,
    LoadAction, RenderPassDescriptor, ResolvedStoreActions, ResourceUsage, ShaderStage,
    StencilAttachment, StoreAction,
};

fn context_on(device: &MockDevice, verbosity: DebugVerbosity) -> Context<MockDevice> {
    Context::new(
        device.clone(),
        ContextConfig::default()
            .with_ring_capacity(4096)
            .with_verbosity(verbosity),
    )
    .unwrap()
}

fn last_submission_commands(device: &MockDevice) -> Vec<MockCommand> {
    device
        .submissions()
        .last()
        .map(|submission| submission.commands.clone())
        .unwrap_or_default()
}

#[test]
fn render_then_compute_records_independent_encoders() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::LogOperations);
    let color = device.create_texture("color");
    let draw_pipeline = device.create_render_pipeline("triangle");
    let compute_pipeline = device.create_compute_pipeline("blur");

    let descriptor = RenderPassDescriptor::<MockDevice>::new("main pass")
        .with_color(ColorAttachment::new(color).with_store(StoreAction::Store));
    let render_fence = {
        let mut render = context.begin_render(&descriptor).unwrap();
        render.set_pipeline(&draw_pipeline).unwrap();
        render.draw(0..3, 0..1).unwrap();
        render.end_encoding().unwrap()
    };
    let compute_fence = {
        let mut compute = context.begin_compute("post").unwrap();
        compute.set_pipeline(&compute_pipeline).unwrap();
        compute.dispatch([8, 8, 1]).unwrap();
        compute.end_encoding().unwrap()
    };
    assert_ne!(render_fence, compute_fence);
    assert_eq!(context.active_encoder(), None);

    let kinds: Vec<DebugCommandKind> = context
        .debug_trace()
        .iter()
        .map(|command| command.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            DebugCommandKind::RenderEncoder,
            DebugCommandKind::Pipeline,
            DebugCommandKind::Draw,
            DebugCommandKind::EndEncoder,
            DebugCommandKind::ComputeEncoder,
            DebugCommandKind::Pipeline,
            DebugCommandKind::Dispatch,
            DebugCommandKind::EndEncoder,
        ]
    );
    assert_eq!(context.debug_trace()[0].label, "main pass");
    assert_eq!(context.debug_trace()[6].label, "dispatch 8x8x1");

    context.commit(CommitFlags::empty()).unwrap();
    let commands = last_submission_commands(&device);
    let begins = commands
        .iter()
        .filter(|command| {
            matches!(
                command,
                MockCommand::BeginRender { .. } | MockCommand::BeginCompute { .. }
            )
        })
        .count();
    let ends = commands
        .iter()
        .filter(|command| matches!(command, MockCommand::EndEncoding))
        .count();
    assert_eq!((begins, ends), (2, 2));
}

#[test]
fn only_one_encoder_may_be_open() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);

    // Dropping the handle leaves the encoder open.
    drop(context.begin_blit("copies").unwrap());
    assert_eq!(context.active_encoder(), Some(EncoderKind::Blit));

    assert_eq!(
        context.begin_compute("second").err(),
        Some(EncoderError::EncoderActive {
            active: EncoderKind::Blit,
            requested: EncoderKind::Compute,
        })
    );
    assert_eq!(
        context.resume_compute().err(),
        Some(EncoderError::NotEncoding {
            expected: EncoderKind::Compute,
            found: Some(EncoderKind::Blit),
        })
    );
    assert_eq!(
        context.commit(CommitFlags::empty()),
        Err(EncoderError::CommitWithOpenEncoder {
            active: EncoderKind::Blit
        })
    );

    context.resume_blit().unwrap().end_encoding().unwrap();
    assert_eq!(
        context.resume_blit().err(),
        Some(EncoderError::NotEncoding {
            expected: EncoderKind::Blit,
            found: None,
        })
    );
    context.commit(CommitFlags::empty()).unwrap();
}

#[test]
fn bindings_are_checked_against_the_open_encoder() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);
    let buffer = device.create_buffer("data", 64);
    let color = device.create_texture("color");

    let descriptor = RenderPassDescriptor::<MockDevice>::new("pass")
        .with_color(ColorAttachment::new(color).with_store(StoreAction::Store));
    let mut render = context.begin_render(&descriptor).unwrap();
    assert_eq!(
        render.set_buffer(ShaderStage::Compute, 0, &buffer, 0, ResourceUsage::Read),
        Err(EncoderError::InvalidStage {
            stage: ShaderStage::Compute,
            kind: EncoderKind::Render,
        })
    );
    assert!(matches!(
        render.set_buffer(ShaderStage::Vertex, 31, &buffer, 0, ResourceUsage::Read),
        Err(EncoderError::SlotOutOfRange {
            slot: 31,
            capacity: 31,
            ..
        })
    ));
    assert_eq!(
        render.draw(0..3, 0..1),
        Err(EncoderError::PipelineNotSet {
            kind: EncoderKind::Render
        })
    );
    render
        .set_buffer(ShaderStage::Vertex, 30, &buffer, 16, ResourceUsage::Read)
        .unwrap();
    render.end_encoding().unwrap();

    context.commit(CommitFlags::empty()).unwrap();
    assert!(last_submission_commands(&device).contains(&MockCommand::SetBuffer {
        stage: ShaderStage::Vertex,
        slot: 30,
        buffer: stratum::NativeResource::resource_id(&buffer),
        offset: 16,
    }));
}

#[test]
fn rebinding_an_identical_resource_skips_the_native_call() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);
    let buffer = device.create_buffer("params", 64);
    let texture = device.create_texture("noise");
    let sampler = device.create_sampler("linear");

    let mut compute = context.begin_compute("binds").unwrap();
    for _ in 0..2 {
        compute.set_buffer(0, &buffer, 0, ResourceUsage::Read).unwrap();
        compute.set_texture(1, &texture, ResourceUsage::Read).unwrap();
        compute.set_sampler(2, &sampler).unwrap();
        compute.set_bytes(3, &[1, 2, 3, 4]).unwrap();
    }
    // A different offset is a new binding.
    compute.set_buffer(0, &buffer, 32, ResourceUsage::Read).unwrap();
    compute.end_encoding().unwrap();

    assert_eq!(context.current_stats().unwrap().redundant_binds, 3);
    context.commit(CommitFlags::empty()).unwrap();

    let commands = last_submission_commands(&device);
    let count = |pick: fn(&MockCommand) -> bool| commands.iter().filter(|command| pick(command)).count();
    assert_eq!(count(|command| matches!(command, MockCommand::SetBuffer { offset: 0, .. })), 1);
    assert_eq!(count(|command| matches!(command, MockCommand::SetBuffer { offset: 32, .. })), 1);
    assert_eq!(count(|command| matches!(command, MockCommand::SetTexture { .. })), 1);
    assert_eq!(count(|command| matches!(command, MockCommand::SetSampler { .. })), 1);
    // Inline bytes are uploaded every time.
    assert_eq!(count(|command| matches!(command, MockCommand::SetBytes { .. })), 2);
}

#[test]
fn bindings_start_empty_in_every_encoder() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);
    let buffer = device.create_buffer("params", 64);

    for label in ["first", "second"] {
        let mut compute = context.begin_compute(label).unwrap();
        compute.set_buffer(0, &buffer, 0, ResourceUsage::Read).unwrap();
        compute.end_encoding().unwrap();
    }
    assert_eq!(context.current_stats().unwrap().redundant_binds, 0);
    context.commit(CommitFlags::empty()).unwrap();

    let binds = last_submission_commands(&device)
        .iter()
        .filter(|command| matches!(command, MockCommand::SetBuffer { .. }))
        .count();
    assert_eq!(binds, 2);
}

#[test]
fn too_many_color_attachments_are_rejected() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);

    let mut descriptor = RenderPassDescriptor::<MockDevice>::new("wide");
    for index in 0..9 {
        descriptor = descriptor.with_color(
            ColorAttachment::new(device.create_texture(&format!("target {index}")))
                .with_store(StoreAction::Store),
        );
    }
    assert_eq!(
        context.begin_render(&descriptor).err(),
        Some(EncoderError::TooManyColorAttachments { count: 9, max: 8 })
    );
    assert_eq!(context.active_encoder(), None);
}

#[test]
fn unresolved_store_action_fails_end_encoding_and_keeps_the_encoder_open() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);
    let color = device.create_texture("color");
    let depth = device.create_texture("depth");

    let descriptor = RenderPassDescriptor::<MockDevice>::new("deferred")
        .with_color(ColorAttachment::new(color))
        .with_depth(DepthAttachment::new(depth).with_store(StoreAction::DontCare));
    let mut render = context.begin_render(&descriptor).unwrap();

    assert_eq!(
        render.end_encoding(),
        Err(EncoderError::UnresolvedStoreAction {
            attachment: AttachmentSlot::Color(0)
        })
    );
    assert!(render.id().is_some());

    assert_eq!(
        render.set_render_pass_store_actions(&[StoreAction::MultisampleResolve], None, None),
        Err(EncoderError::MissingResolveTarget {
            attachment: AttachmentSlot::Color(0)
        })
    );
    assert_eq!(
        render.set_render_pass_store_actions(&[], None, Some(StoreAction::Store)),
        Err(EncoderError::UnknownAttachment {
            attachment: AttachmentSlot::Stencil
        })
    );
    render
        .set_render_pass_store_actions(&[StoreAction::Store], None, None)
        .unwrap();
    render.end_encoding().unwrap();
    context.commit(CommitFlags::empty()).unwrap();

    let expected = ResolvedStoreActions {
        colors: [StoreAction::Store].into_iter().collect(),
        depth: Some(StoreAction::DontCare),
        stencil: None,
    };
    assert!(last_submission_commands(&device).contains(&MockCommand::SetStoreActions(expected)));
}

#[test]
fn stencil_store_action_can_be_supplied_after_resuming() {
    let device = MockDevice::new();
    let mut context = Context::with_defaults(device.clone()).unwrap();
    let stencil = device.create_texture("stencil");

    let descriptor = RenderPassDescriptor::<MockDevice>::new("mask")
        .with_stencil(StencilAttachment::new(stencil).with_load(LoadAction::Clear(0)));
    drop(context.begin_render(&descriptor).unwrap());
    assert_eq!(context.active_encoder(), Some(EncoderKind::Render));

    let mut render = context.resume_render().unwrap();
    assert_eq!(
        render.end_encoding(),
        Err(EncoderError::UnresolvedStoreAction {
            attachment: AttachmentSlot::Stencil
        })
    );
    render
        .set_render_pass_store_actions(&[], None, Some(StoreAction::DontCare))
        .unwrap();
    render.end_encoding().unwrap();
    assert_eq!(context.active_encoder(), None);
}

#[test]
fn devices_without_deferred_store_actions_need_them_at_begin() {
    let device = MockDevice::with_capabilities(DeviceCapabilities {
        deferred_store_actions: false,
        ..DeviceCapabilities::default()
    });
    let mut context = context_on(&device, DebugVerbosity::Off);
    let color = device.create_texture("color");

    let open = RenderPassDescriptor::<MockDevice>::new("open").with_color(ColorAttachment::new(color.clone()));
    assert_eq!(
        context.begin_render(&open).err(),
        Some(EncoderError::UnresolvedStoreAction {
            attachment: AttachmentSlot::Color(0)
        })
    );
    assert_eq!(context.active_encoder(), None);

    let fixed = RenderPassDescriptor::<MockDevice>::new("fixed")
        .with_color(ColorAttachment::new(color).with_store(StoreAction::Store));
    let mut render = context.begin_render(&fixed).unwrap();
    assert_eq!(
        render.set_render_pass_store_actions(&[StoreAction::DontCare], None, None),
        Err(EncoderError::StoreActionsNotDeferrable)
    );
    render.end_encoding().unwrap();
    context.commit(CommitFlags::empty()).unwrap();

    assert!(!last_submission_commands(&device)
        .iter()
        .any(|command| matches!(command, MockCommand::SetStoreActions(_))));
}

#[test]
fn fences_are_updated_once_per_encoder() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);

    let mut compute = context.begin_compute("early signal").unwrap();
    let fence = compute.update_fence().unwrap();
    assert_eq!(compute.fence(), Some(fence));
    assert!(matches!(
        compute.update_fence(),
        Err(EncoderError::FenceAlreadyUpdated { fence: f, .. }) if f == fence
    ));
    assert_eq!(
        compute.wait_for_fence(fence),
        Err(EncoderError::WaitWithoutSignal { fence })
    );
    assert_eq!(compute.end_encoding(), Ok(fence));
    context.commit(CommitFlags::empty()).unwrap();

    let updates = last_submission_commands(&device)
        .iter()
        .filter(|command| matches!(command, MockCommand::UpdateFence(_)))
        .count();
    assert_eq!(updates, 1);
}

#[test]
fn unknown_fences_are_rejected() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::Off);

    let mut blit = context.begin_blit("reader").unwrap();
    let bogus = stratum::FenceHandle(10_000);
    assert_eq!(
        blit.wait_for_fence(bogus),
        Err(EncoderError::UnknownFence(bogus))
    );
    blit.end_encoding().unwrap();
}

#[test]
fn debug_groups_must_balance_before_commit() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::LogGroups);

    assert_eq!(context.pop_debug_group(), Err(EncoderError::DebugGroupUnderflow));
    context.push_debug_group("outer").unwrap();
    context.push_debug_group("inner").unwrap();
    context.insert_signpost("checkpoint").unwrap();
    context.pop_debug_group().unwrap();
    assert_eq!(
        context.commit(CommitFlags::empty()),
        Err(EncoderError::UnbalancedDebugGroups { open: 1 })
    );
    context.pop_debug_group().unwrap();
    context.commit(CommitFlags::empty()).unwrap();

    assert_eq!(
        last_submission_commands(&device),
        vec![
            MockCommand::PushDebugGroup("outer".to_owned()),
            MockCommand::PushDebugGroup("inner".to_owned()),
            MockCommand::Signpost("checkpoint".to_owned()),
            MockCommand::PopDebugGroup,
            MockCommand::PopDebugGroup,
        ]
    );
}

#[test]
fn group_markers_are_recorded_below_operation_verbosity() {
    let device = MockDevice::new();
    let mut context = context_on(&device, DebugVerbosity::LogGroups);
    let pipeline = device.create_compute_pipeline("kernel");

    context.push_debug_group("frame").unwrap();
    {
        let mut compute = context.begin_compute("work").unwrap();
        compute.set_pipeline(&pipeline).unwrap();
        compute.dispatch([1, 1, 1]).unwrap();
        compute.end_encoding().unwrap();
    }
    context.pop_debug_group().unwrap();

    let kinds: Vec<DebugCommandKind> = context
        .debug_trace()
        .iter()
        .map(|command| command.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![DebugCommandKind::PushGroup, DebugCommandKind::PopGroup]
    );
}
