use std::ops::Range;

use smallvec::SmallVec;

use super::handles::{BlitEncoder, ComputeEncoder, RenderEncoder};
use super::Context;
use crate::backend::{BlitOp, Device, IndexedDraw, NativeCommandBuffer, NativeResource};
use crate::command_buffer::CommandBufferWrapper;
use crate::debug_trace::{DebugCommandKind, DebugWarning};
use crate::encoder::{
    ActiveEncoder, BufferBinding, ComputeState, EncoderKind, OpenEncoder, PendingStoreActions,
    RenderPassDescriptor, RenderState, ResourceUsage, ShaderStage, StageBindings, StoreAction,
    TextureBinding, MAX_COLOR_ATTACHMENTS,
};
use crate::error::{EncoderError, RingError};
use crate::fence::WaitTarget;
use crate::hazards::{Accessor, HazardTracker};
use crate::id::{EncoderId, FenceHandle, ResourceId};
use crate::util::align_up;

type Accesses = SmallVec<[(ResourceId, ResourceUsage); 8]>;

fn expect_kind(
    encoder: &mut Option<OpenEncoder>,
    expected: EncoderKind,
) -> Result<&mut OpenEncoder, EncoderError> {
    let found = encoder.as_ref().map(|open| open.state.kind());
    match encoder {
        Some(open) if found == Some(expected) => Ok(open),
        _ => Err(EncoderError::NotEncoding { expected, found }),
    }
}

/// Runs the hazard checks for `accesses` made by `encoder` and files any
/// warning with both the command buffer and the context.
fn check_accesses<D: Device>(
    hazards: &mut HazardTracker,
    encoder: &OpenEncoder,
    command_buffer: &mut CommandBufferWrapper<D>,
    warnings: &mut Vec<DebugWarning>,
    accesses: &[(ResourceId, ResourceUsage)],
) {
    if !command_buffer.recorder.verbosity().validates() {
        return;
    }
    let accessor = Accessor {
        encoder: encoder.id,
        label: &encoder.label,
        fence: encoder.fence,
        command_buffer: command_buffer.id,
        waited: &encoder.waited,
    };
    for (resource, usage) in accesses {
        let label = command_buffer.resources.label(*resource);
        if let Some(warning) = hazards.access(*resource, label, *usage, &accessor) {
            tracing::warn!("{warning}");
            command_buffer.recorder.warn(warning.clone());
            warnings.push(warning);
        }
    }
}

/// Resources bound to the stages of `state` plus, the first time around,
/// the render pass attachments.
fn pending_accesses(state: &mut ActiveEncoder) -> Accesses {
    let mut accesses = Accesses::new();
    match state {
        ActiveEncoder::Render(render) => {
            if !render.attachments_checked {
                accesses.extend(render.attachments.iter().copied());
                render.attachments_checked = true;
            }
            accesses.extend(render.vertex.resource_accesses());
            accesses.extend(render.fragment.resource_accesses());
        }
        ActiveEncoder::Compute(compute) => accesses.extend(compute.bindings.resource_accesses()),
        ActiveEncoder::Blit => {}
    }
    accesses
}

impl<D: Device> Context<D> {
    fn ensure_idle(&self, requested: EncoderKind) -> Result<(), EncoderError> {
        if self.command_buffer.is_none() {
            return Err(EncoderError::NoCommandBuffer);
        }
        if let Some(open) = &self.encoder {
            return Err(EncoderError::EncoderActive {
                active: open.state.kind(),
                requested,
            });
        }
        Ok(())
    }

    fn open_encoder(&mut self, label: String, state: ActiveEncoder) -> Result<EncoderId, EncoderError> {
        let kind = state.kind();
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        self.next_encoder += 1;
        let id = EncoderId(self.next_encoder);
        let device = &self.device;
        let fence = self
            .fences
            .acquire(id, format!("{label} fence"), |fence_label| {
                device.create_fence(fence_label)
            });

        let debug_kind = match kind {
            EncoderKind::Render => DebugCommandKind::RenderEncoder,
            EncoderKind::Compute => DebugCommandKind::ComputeEncoder,
            EncoderKind::Blit => DebugCommandKind::BlitEncoder,
        };
        command_buffer.recorder.record(debug_kind, label.as_str());
        command_buffer.stats.encoders += 1;

        tracing::debug!(encoder = %id, %kind, %label, %fence, command_buffer = %command_buffer.id, "began encoder");
        self.encoder = Some(OpenEncoder {
            id,
            label,
            fence,
            fence_updated: false,
            waited: SmallVec::new(),
            state,
        });
        Ok(id)
    }

    /// Opens a render encoder for `descriptor`.
    ///
    /// On devices that cannot defer store actions every attachment's store
    /// action must already be set on the descriptor.
    pub fn begin_render(
        &mut self,
        descriptor: &RenderPassDescriptor<D>,
    ) -> Result<RenderEncoder<'_, D>, EncoderError> {
        self.ensure_idle(EncoderKind::Render)?;
        let count = descriptor.color_attachments.len();
        if count > MAX_COLOR_ATTACHMENTS {
            return Err(EncoderError::TooManyColorAttachments {
                count,
                max: MAX_COLOR_ATTACHMENTS,
            });
        }
        let store_actions = PendingStoreActions::from_descriptor(descriptor)?;
        if !self.capabilities.deferred_store_actions {
            store_actions.resolve()?;
        }

        let label = descriptor
            .label
            .clone()
            .unwrap_or_else(|| "render encoder".to_owned());
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.native.begin_render(&label, descriptor)?;
        for attachment in &descriptor.color_attachments {
            command_buffer.resources.track(&attachment.texture);
            if let Some(resolve) = &attachment.resolve_texture {
                command_buffer.resources.track(resolve);
            }
        }
        if let Some(depth) = &descriptor.depth_attachment {
            command_buffer.resources.track(&depth.texture);
            if let Some(resolve) = &depth.resolve_texture {
                command_buffer.resources.track(resolve);
            }
        }
        if let Some(stencil) = &descriptor.stencil_attachment {
            command_buffer.resources.track(&stencil.texture);
        }

        let state = ActiveEncoder::Render(RenderState {
            store_actions,
            attachments: descriptor.attachment_accesses(),
            attachments_checked: false,
            vertex: StageBindings::new(&self.capabilities),
            fragment: StageBindings::new(&self.capabilities),
            pipeline: None,
        });
        self.open_encoder(label, state)?;
        Ok(RenderEncoder::new(self))
    }

    pub fn begin_compute(&mut self, label: &str) -> Result<ComputeEncoder<'_, D>, EncoderError> {
        self.ensure_idle(EncoderKind::Compute)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.native.begin_compute(label)?;

        let state = ActiveEncoder::Compute(ComputeState {
            bindings: StageBindings::new(&self.capabilities),
            pipeline: None,
        });
        self.open_encoder(label.to_owned(), state)?;
        Ok(ComputeEncoder::new(self))
    }

    pub fn begin_blit(&mut self, label: &str) -> Result<BlitEncoder<'_, D>, EncoderError> {
        self.ensure_idle(EncoderKind::Blit)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.native.begin_blit(label)?;

        self.open_encoder(label.to_owned(), ActiveEncoder::Blit)?;
        Ok(BlitEncoder::new(self))
    }

    /// Handle to the render encoder that is already open, e.g. after an
    /// earlier handle was dropped.
    pub fn resume_render(&mut self) -> Result<RenderEncoder<'_, D>, EncoderError> {
        expect_kind(&mut self.encoder, EncoderKind::Render)?;
        Ok(RenderEncoder::new(self))
    }

    pub fn resume_compute(&mut self) -> Result<ComputeEncoder<'_, D>, EncoderError> {
        expect_kind(&mut self.encoder, EncoderKind::Compute)?;
        Ok(ComputeEncoder::new(self))
    }

    pub fn resume_blit(&mut self) -> Result<BlitEncoder<'_, D>, EncoderError> {
        expect_kind(&mut self.encoder, EncoderKind::Blit)?;
        Ok(BlitEncoder::new(self))
    }

    pub(super) fn set_render_pipeline(
        &mut self,
        pipeline: &D::RenderPipeline,
    ) -> Result<(), EncoderError> {
        let encoder = expect_kind(&mut self.encoder, EncoderKind::Render)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        let id = command_buffer.resources.track(pipeline);
        if let ActiveEncoder::Render(render) = &mut encoder.state {
            render.pipeline = Some(id);
        }
        command_buffer.native.set_render_pipeline(pipeline);
        command_buffer.recorder.record(
            DebugCommandKind::Pipeline,
            pipeline.label().unwrap_or("render pipeline"),
        );
        tracing::trace!(encoder = %encoder.id, pipeline = %id, "set render pipeline");
        Ok(())
    }

    pub(super) fn set_compute_pipeline(
        &mut self,
        pipeline: &D::ComputePipeline,
    ) -> Result<(), EncoderError> {
        let encoder = expect_kind(&mut self.encoder, EncoderKind::Compute)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        let id = command_buffer.resources.track(pipeline);
        if let ActiveEncoder::Compute(compute) = &mut encoder.state {
            compute.pipeline = Some(id);
        }
        command_buffer.native.set_compute_pipeline(pipeline);
        command_buffer.recorder.record(
            DebugCommandKind::Pipeline,
            pipeline.label().unwrap_or("compute pipeline"),
        );
        tracing::trace!(encoder = %encoder.id, pipeline = %id, "set compute pipeline");
        Ok(())
    }

    pub(super) fn set_buffer(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        buffer: &D::Buffer,
        offset: u64,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let bindings = encoder.state.stage_bindings_mut(stage)?;
        bindings.check_buffer_slot(stage, slot)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        let resource = command_buffer.resources.track(buffer);
        let binding = BufferBinding::Buffer {
            resource,
            offset,
            usage,
        };
        if !bindings.bind_buffer(slot, binding) {
            command_buffer.stats.redundant_binds += 1;
            tracing::trace!(encoder = %encoder.id, %stage, slot, buffer = %resource, "buffer already bound");
            return Ok(());
        }
        command_buffer.native.set_buffer(stage, slot, buffer, offset);
        tracing::trace!(encoder = %encoder.id, %stage, slot, buffer = %resource, offset, "set buffer");
        Ok(())
    }

    /// Binds raw bytes. Small blobs go inline when the device allows it;
    /// everything else is copied into the transient ring and bound as a
    /// buffer, so the shader sees the same bytes either way.
    pub(super) fn set_bytes(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        bytes: &[u8],
    ) -> Result<(), EncoderError> {
        {
            let encoder = self.encoder.as_ref().ok_or(EncoderError::NoOpenEncoder)?;
            encoder
                .state
                .stage_bindings(stage)?
                .check_buffer_slot(stage, slot)?;
        }
        if self.command_buffer.is_none() {
            return Err(EncoderError::NoCommandBuffer);
        }

        let transient_size = align_up(
            (bytes.len() as u64).max(1),
            self.capabilities.transient_size_granularity.max(1),
        );
        let binding = if !bytes.is_empty() && bytes.len() <= self.capabilities.max_inline_bytes {
            BufferBinding::InlineBytes { len: bytes.len() }
        } else {
            let offset = self.allocate_transient(transient_size)?;
            self.device.write_buffer(self.ring.buffer(), offset, bytes);
            BufferBinding::TransientBytes {
                resource: self.ring.buffer().resource_id(),
                offset,
                len: bytes.len(),
            }
        };

        let (Some(encoder), Some(command_buffer)) =
            (self.encoder.as_mut(), self.command_buffer.as_mut())
        else {
            return Err(EncoderError::NoOpenEncoder);
        };
        match binding {
            BufferBinding::InlineBytes { len } => {
                command_buffer.native.set_bytes(stage, slot, bytes);
                command_buffer.stats.inline_bytes += len as u64;
            }
            BufferBinding::TransientBytes { offset, .. } => {
                command_buffer.resources.track(self.ring.buffer());
                command_buffer
                    .native
                    .set_buffer(stage, slot, self.ring.buffer(), offset);
                command_buffer.stats.transient_bytes += transient_size;
            }
            BufferBinding::Buffer { .. } => {}
        }
        encoder
            .state
            .stage_bindings_mut(stage)?
            .bind_buffer(slot, binding);
        tracing::trace!(encoder = %encoder.id, %stage, slot, len = bytes.len(), ?binding, "set bytes");
        Ok(())
    }

    /// Reserves transient ring space, first folding in finished command
    /// buffers if the ring looks full.
    fn allocate_transient(&mut self, size: u64) -> Result<u64, EncoderError> {
        let alignment = self.capabilities.transient_alignment.max(1);
        match self.ring.allocate(size, alignment) {
            Ok(offset) => Ok(offset),
            Err(RingError::Exhausted { .. }) => {
                self.poll_completions();
                self.ring.allocate(size, alignment).map_err(|error| {
                    tracing::error!(%error, "transient ring exhausted");
                    EncoderError::from(error)
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    pub(super) fn set_texture(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        texture: &D::Texture,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let bindings = encoder.state.stage_bindings_mut(stage)?;
        bindings.check_texture_slot(stage, slot)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        let resource = command_buffer.resources.track(texture);
        if !bindings.bind_texture(slot, TextureBinding { resource, usage }) {
            command_buffer.stats.redundant_binds += 1;
            tracing::trace!(encoder = %encoder.id, %stage, slot, texture = %resource, "texture already bound");
            return Ok(());
        }
        command_buffer.native.set_texture(stage, slot, texture);
        tracing::trace!(encoder = %encoder.id, %stage, slot, texture = %resource, "set texture");
        Ok(())
    }

    pub(super) fn set_sampler(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        sampler: &D::Sampler,
    ) -> Result<(), EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let bindings = encoder.state.stage_bindings_mut(stage)?;
        bindings.check_sampler_slot(stage, slot)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        let resource = command_buffer.resources.track(sampler);
        if !bindings.bind_sampler(slot, resource) {
            command_buffer.stats.redundant_binds += 1;
            tracing::trace!(encoder = %encoder.id, %stage, slot, sampler = %resource, "sampler already bound");
            return Ok(());
        }
        command_buffer.native.set_sampler(stage, slot, sampler);
        tracing::trace!(encoder = %encoder.id, %stage, slot, sampler = %resource, "set sampler");
        Ok(())
    }

    pub(super) fn set_render_pass_store_actions(
        &mut self,
        colors: &[StoreAction],
        depth: Option<StoreAction>,
        stencil: Option<StoreAction>,
    ) -> Result<(), EncoderError> {
        let encoder = expect_kind(&mut self.encoder, EncoderKind::Render)?;
        if !self.capabilities.deferred_store_actions {
            return Err(EncoderError::StoreActionsNotDeferrable);
        }
        if let ActiveEncoder::Render(render) = &mut encoder.state {
            render.store_actions.apply(colors, depth, stencil)?;
        }
        tracing::trace!(encoder = %encoder.id, ?colors, ?depth, ?stencil, "set store actions");
        Ok(())
    }

    /// Shared prologue of draw and dispatch: checks the pipeline and runs
    /// hazard validation over everything bound.
    fn prepare_work(
        &mut self,
        kind: EncoderKind,
        extra: &[(ResourceId, ResourceUsage)],
    ) -> Result<(), EncoderError> {
        let encoder = expect_kind(&mut self.encoder, kind)?;
        let pipeline = match &encoder.state {
            ActiveEncoder::Render(render) => render.pipeline,
            ActiveEncoder::Compute(compute) => compute.pipeline,
            ActiveEncoder::Blit => None,
        };
        if pipeline.is_none() {
            return Err(EncoderError::PipelineNotSet { kind });
        }
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        if command_buffer.recorder.verbosity().validates() {
            let mut accesses = pending_accesses(&mut encoder.state);
            accesses.extend(extra.iter().copied());
            check_accesses(
                &mut self.hazards,
                encoder,
                command_buffer,
                &mut self.warnings,
                &accesses,
            );
        }
        Ok(())
    }

    pub(super) fn draw(
        &mut self,
        vertices: Range<u32>,
        instances: Range<u32>,
    ) -> Result<(), EncoderError> {
        self.prepare_work(EncoderKind::Render, &[])?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer
            .native
            .draw(vertices.clone(), instances.clone())?;
        command_buffer.stats.draws += 1;
        command_buffer.recorder.record(
            DebugCommandKind::Draw,
            format!("draw vertices {vertices:?} instances {instances:?}"),
        );
        tracing::trace!(?vertices, ?instances, "draw");
        Ok(())
    }

    pub(super) fn draw_indexed(&mut self, draw: &IndexedDraw<'_, D>) -> Result<(), EncoderError> {
        let index_buffer = draw.index_buffer.resource_id();
        self.prepare_work(EncoderKind::Render, &[(index_buffer, ResourceUsage::Read)])?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.resources.track(draw.index_buffer);
        command_buffer.native.draw_indexed(draw)?;
        command_buffer.stats.draws += 1;
        command_buffer.recorder.record(
            DebugCommandKind::Draw,
            format!(
                "draw indexed {:?} instances {:?} from {index_buffer}",
                draw.indices, draw.instances
            ),
        );
        tracing::trace!(indices = ?draw.indices, instances = ?draw.instances, %index_buffer, "draw indexed");
        Ok(())
    }

    pub(super) fn dispatch(&mut self, workgroups: [u32; 3]) -> Result<(), EncoderError> {
        self.prepare_work(EncoderKind::Compute, &[])?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.native.dispatch(workgroups)?;
        command_buffer.stats.dispatches += 1;
        command_buffer.recorder.record(
            DebugCommandKind::Dispatch,
            format!(
                "dispatch {}x{}x{}",
                workgroups[0], workgroups[1], workgroups[2]
            ),
        );
        tracing::trace!(?workgroups, "dispatch");
        Ok(())
    }

    pub(super) fn copy(&mut self, op: &BlitOp<'_, D>) -> Result<(), EncoderError> {
        let encoder = expect_kind(&mut self.encoder, EncoderKind::Blit)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        match op {
            BlitOp::BufferToBuffer {
                source,
                destination,
                ..
            } => {
                command_buffer.resources.track(*source);
                command_buffer.resources.track(*destination);
            }
            BlitOp::TextureToTexture {
                source,
                destination,
                ..
            } => {
                command_buffer.resources.track(*source);
                command_buffer.resources.track(*destination);
            }
            BlitOp::BufferToTexture {
                source,
                destination,
                ..
            } => {
                command_buffer.resources.track(*source);
                command_buffer.resources.track(*destination);
            }
            BlitOp::FillBuffer { buffer, .. } => {
                command_buffer.resources.track(*buffer);
            }
        }

        let mut accesses = Accesses::new();
        if let Some(source) = op.source() {
            accesses.push((source, ResourceUsage::Read));
        }
        accesses.push((op.destination(), ResourceUsage::Write));
        check_accesses(
            &mut self.hazards,
            encoder,
            command_buffer,
            &mut self.warnings,
            &accesses,
        );

        command_buffer.native.copy(op)?;
        command_buffer.stats.blits += 1;
        command_buffer.recorder.record(
            DebugCommandKind::Blit,
            format!("{} -> {}", op.name(), op.destination()),
        );
        tracing::trace!(encoder = %encoder.id, op = op.name(), destination = %op.destination(), "blit");
        Ok(())
    }

    /// Makes the open encoder's subsequent work wait for `fence`.
    pub(super) fn wait_for_fence(&mut self, fence: FenceHandle) -> Result<(), EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        let pending = match self.fences.check_wait(fence, encoder.id)? {
            WaitTarget::Pending(native) => {
                command_buffer.native.wait_for_fence(native);
                true
            }
            WaitTarget::Retired => false,
        };
        if pending {
            self.fences.add_waiter(fence, command_buffer.id);
            tracing::trace!(encoder = %encoder.id, %fence, "wait for fence");
        } else {
            tracing::trace!(encoder = %encoder.id, %fence, "fence already retired, wait skipped");
        }
        if !encoder.waited.contains(&fence) {
            encoder.waited.push(fence);
        }
        Ok(())
    }

    /// Signals the open encoder's fence now instead of at `end_encoding`.
    pub(super) fn update_fence(&mut self) -> Result<FenceHandle, EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        if encoder.fence_updated {
            return Err(EncoderError::FenceAlreadyUpdated {
                fence: encoder.fence,
                updater: encoder.id,
            });
        }
        let native = self
            .fences
            .signal(encoder.fence, encoder.id, command_buffer.id)?;
        command_buffer.native.update_fence(native);
        encoder.fence_updated = true;
        tracing::trace!(encoder = %encoder.id, fence = %encoder.fence, "update fence");
        Ok(encoder.fence)
    }

    /// Finishes the open encoder and returns the fence dependents wait on.
    ///
    /// Fails without closing the encoder if a render attachment's store action
    /// is still unresolved.
    pub(super) fn end_encoding(&mut self) -> Result<FenceHandle, EncoderError> {
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NoOpenEncoder)?;
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;

        let store_actions = match &encoder.state {
            ActiveEncoder::Render(render) => Some(render.store_actions.resolve()?),
            ActiveEncoder::Compute(_) | ActiveEncoder::Blit => None,
        };

        if command_buffer.recorder.verbosity().validates() {
            if let ActiveEncoder::Render(render) = &mut encoder.state {
                if !render.attachments_checked {
                    render.attachments_checked = true;
                    let attachments = render.attachments.clone();
                    check_accesses(
                        &mut self.hazards,
                        encoder,
                        command_buffer,
                        &mut self.warnings,
                        &attachments,
                    );
                }
            }
        }

        if !encoder.fence_updated {
            let native = self
                .fences
                .signal(encoder.fence, encoder.id, command_buffer.id)?;
            command_buffer.native.update_fence(native);
            encoder.fence_updated = true;
        }
        if let Some(actions) = &store_actions {
            if self.capabilities.deferred_store_actions {
                command_buffer.native.set_store_actions(actions);
            }
        }
        command_buffer.native.end_encoding()?;

        let kind = encoder.state.kind();
        let (id, fence) = (encoder.id, encoder.fence);
        command_buffer
            .recorder
            .record(DebugCommandKind::EndEncoder, encoder.label.as_str());
        tracing::debug!(encoder = %id, %kind, %fence, "ended encoder");
        self.encoder = None;
        Ok(fence)
    }

    pub(super) fn current_fence(&self) -> Option<FenceHandle> {
        self.encoder.as_ref().map(|encoder| encoder.fence)
    }

    pub(super) fn current_encoder_id(&self) -> Option<EncoderId> {
        self.encoder.as_ref().map(|encoder| encoder.id)
    }
}
