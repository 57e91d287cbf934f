//! `wgpu` implementation of the device boundary.
//!
//! wgpu has no inline constants and no deferred store actions, so the device
//! reports `max_inline_bytes = 0` and `deferred_store_actions = false`: every
//! `set_bytes` goes through the transient ring and render passes need their
//! store actions up front. Passes within one queue already execute in order,
//! so fences only leave debug markers behind.
//!
//! Shader-visible bindings are assembled into bind groups right before each
//! draw or dispatch. Vertex bindings live in group 0 and fragment bindings in
//! group 1; compute bindings use group 0. Within a group, buffer slot `n` is
//! binding `n`, texture slot `n` is binding `32 + n` and sampler slot `n` is
//! binding `160 + n`.

use std::collections::BTreeMap;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{
    BlitOp, CompletionHandler, CompletionStatus, Device, DeviceCapabilities, IndexFormat,
    IndexedDraw, NativeCommandBuffer, NativeResource,
};
use crate::encoder::{
    LoadAction, RenderPassDescriptor, ResolvedStoreActions, ShaderStage, StoreAction,
};
use crate::error::DeviceError;
use crate::id::ResourceId;

pub const TEXTURE_BINDING_BASE: u32 = 32;
pub const SAMPLER_BINDING_BASE: u32 = 160;

/// Granularity of transient allocations. WGSL sizes uniform structs in 16 byte steps.
const TRANSIENT_SIZE_GRANULARITY: u64 = 16;

static NEXT_WGPU_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> ResourceId {
    ResourceId(NEXT_WGPU_ID.fetch_add(1, Ordering::Relaxed))
}

fn label_of(label: Option<&str>) -> Option<Arc<str>> {
    label.map(Arc::from)
}

#[derive(Debug, Clone)]
pub struct WgpuBuffer {
    id: ResourceId,
    label: Option<Arc<str>>,
    buffer: Arc<wgpu::Buffer>,
    transient: bool,
}

impl WgpuBuffer {
    pub fn new(buffer: wgpu::Buffer, label: Option<&str>) -> Self {
        Self {
            id: next_id(),
            label: label_of(label),
            buffer: Arc::new(buffer),
            transient: false,
        }
    }

    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl NativeResource for WgpuBuffer {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

/// A texture together with the view used for binding and attachments.
#[derive(Debug, Clone)]
pub struct WgpuTexture {
    id: ResourceId,
    label: Option<Arc<str>>,
    texture: Arc<wgpu::Texture>,
    view: Arc<wgpu::TextureView>,
}

impl WgpuTexture {
    pub fn new(texture: wgpu::Texture, label: Option<&str>) -> Self {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            id: next_id(),
            label: label_of(label),
            texture: Arc::new(texture),
            view: Arc::new(view),
        }
    }

    pub fn raw(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

impl NativeResource for WgpuTexture {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

macro_rules! wgpu_resource {
    ($name:ident, $raw:ty) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            id: ResourceId,
            label: Option<Arc<str>>,
            raw: Arc<$raw>,
        }

        impl $name {
            pub fn new(raw: $raw, label: Option<&str>) -> Self {
                Self {
                    id: next_id(),
                    label: label_of(label),
                    raw: Arc::new(raw),
                }
            }

            pub fn raw(&self) -> &$raw {
                &self.raw
            }
        }

        impl NativeResource for $name {
            fn resource_id(&self) -> ResourceId {
                self.id
            }

            fn label(&self) -> Option<&str> {
                self.label.as_deref()
            }
        }
    };
}

wgpu_resource!(WgpuSampler, wgpu::Sampler);
wgpu_resource!(WgpuRenderPipeline, wgpu::RenderPipeline);
wgpu_resource!(WgpuComputePipeline, wgpu::ComputePipeline);

/// Fences only exist as debug markers on wgpu.
#[derive(Debug, Clone)]
pub struct WgpuFence {
    label: Arc<str>,
}

pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    errors: Arc<Mutex<Vec<String>>>,
}

fn lock_errors(errors: &Mutex<Vec<String>>) -> MutexGuard<'_, Vec<String>> {
    errors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WgpuDevice {
    /// Wraps an existing device and routes its uncaptured errors into
    /// [`Device::drain_errors`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
            lock_errors(&sink).push(error.to_string());
        }));
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            errors,
        }
    }

    /// Creates a device on the default adapter without a surface.
    ///
    /// Returns `None` if no suitable GPU adapter is available, so tests can
    /// skip on machines without a GPU.
    pub async fn try_new_headless() -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok()?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("stratum device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .ok()?;

        Some(Self::new(device, queue))
    }

    pub fn raw_device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn create_buffer(&self, descriptor: &wgpu::BufferDescriptor<'_>) -> WgpuBuffer {
        WgpuBuffer::new(self.device.create_buffer(descriptor), descriptor.label)
    }

    pub fn create_texture(&self, descriptor: &wgpu::TextureDescriptor<'_>) -> WgpuTexture {
        WgpuTexture::new(self.device.create_texture(descriptor), descriptor.label)
    }

    pub fn create_sampler(&self, descriptor: &wgpu::SamplerDescriptor<'_>) -> WgpuSampler {
        WgpuSampler::new(self.device.create_sampler(descriptor), descriptor.label)
    }

    pub fn create_render_pipeline(
        &self,
        descriptor: &wgpu::RenderPipelineDescriptor<'_>,
    ) -> WgpuRenderPipeline {
        WgpuRenderPipeline::new(
            self.device.create_render_pipeline(descriptor),
            descriptor.label,
        )
    }

    pub fn create_compute_pipeline(
        &self,
        descriptor: &wgpu::ComputePipelineDescriptor<'_>,
    ) -> WgpuComputePipeline {
        WgpuComputePipeline::new(
            self.device.create_compute_pipeline(descriptor),
            descriptor.label,
        )
    }
}

impl Device for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;
    type Sampler = WgpuSampler;
    type RenderPipeline = WgpuRenderPipeline;
    type ComputePipeline = WgpuComputePipeline;
    type Fence = WgpuFence;
    type CommandBuffer = WgpuCommandBuffer;

    fn capabilities(&self) -> DeviceCapabilities {
        let limits = self.device.limits();
        let alignment = limits
            .min_uniform_buffer_offset_alignment
            .max(limits.min_storage_buffer_offset_alignment);
        DeviceCapabilities {
            max_inline_bytes: 0,
            transient_alignment: u64::from(alignment),
            transient_size_granularity: TRANSIENT_SIZE_GRANULARITY,
            deferred_store_actions: false,
            ..DeviceCapabilities::default()
        }
    }

    fn create_transient_buffer(&self, label: &str, size: u64) -> Result<WgpuBuffer, DeviceError> {
        if size > self.device.limits().max_buffer_size {
            return Err(DeviceError::InvalidUsage(
                "transient ring exceeds the device's max_buffer_size",
            ));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDEX
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let mut buffer = WgpuBuffer::new(buffer, Some(label));
        buffer.transient = true;
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            tracing::warn!(offset, buffer = %buffer.id, "unaligned buffer write skipped");
            return;
        }
        let remainder = data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize;
        if remainder == 0 {
            self.queue.write_buffer(&buffer.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len() + wgpu::COPY_BUFFER_ALIGNMENT as usize - remainder, 0);
            self.queue.write_buffer(&buffer.buffer, offset, &padded);
        }
    }

    fn create_fence(&self, label: &str) -> WgpuFence {
        WgpuFence {
            label: Arc::from(label),
        }
    }

    fn new_command_buffer(&self, label: &str) -> Result<WgpuCommandBuffer, DeviceError> {
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Ok(WgpuCommandBuffer {
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
            encoder: Some(encoder),
            pass: None,
            encoder_groups: 0,
            handlers: Vec::new(),
            submission: None,
            completed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn poll(&self) {
        let _ = self.device.poll(wgpu::MaintainBase::Poll);
    }

    fn drain_errors(&self) -> Vec<String> {
        std::mem::take(&mut *lock_errors(&self.errors))
    }
}

/// Bindings of one shader stage, turned into a bind group on demand.
#[derive(Default)]
struct StageTable {
    buffers: BTreeMap<u32, (WgpuBuffer, u64)>,
    textures: BTreeMap<u32, WgpuTexture>,
    samplers: BTreeMap<u32, WgpuSampler>,
    cached: Option<wgpu::BindGroup>,
}

impl StageTable {
    fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty() && self.samplers.is_empty()
    }

    fn invalidate(&mut self) {
        self.cached = None;
    }

    fn bind_group(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> Option<&wgpu::BindGroup> {
        if self.is_empty() {
            return None;
        }
        if self.cached.is_none() {
            let max_binding = u64::from(device.limits().max_uniform_buffer_binding_size);
            let mut entries = Vec::with_capacity(
                self.buffers.len() + self.textures.len() + self.samplers.len(),
            );
            for (slot, (buffer, offset)) in &self.buffers {
                // The ring is far larger than any single binding may be.
                let size = if buffer.transient {
                    NonZeroU64::new(buffer.buffer.size().saturating_sub(*offset).min(max_binding))
                } else {
                    None
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: *slot,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer.buffer,
                        offset: *offset,
                        size,
                    }),
                });
            }
            for (slot, texture) in &self.textures {
                entries.push(wgpu::BindGroupEntry {
                    binding: TEXTURE_BINDING_BASE + slot,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                });
            }
            for (slot, sampler) in &self.samplers {
                entries.push(wgpu::BindGroupEntry {
                    binding: SAMPLER_BINDING_BASE + slot,
                    resource: wgpu::BindingResource::Sampler(&sampler.raw),
                });
            }
            self.cached = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout,
                entries: &entries,
            }));
        }
        self.cached.as_ref()
    }
}

struct RenderPassState {
    pass: wgpu::RenderPass<'static>,
    pipeline: Option<WgpuRenderPipeline>,
    vertex: StageTable,
    fragment: StageTable,
    groups: u32,
}

struct ComputePassState {
    pass: wgpu::ComputePass<'static>,
    pipeline: Option<WgpuComputePipeline>,
    bindings: StageTable,
    groups: u32,
}

enum ActivePass {
    Render(Box<RenderPassState>),
    Compute(Box<ComputePassState>),
    Blit,
}

pub struct WgpuCommandBuffer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<ActivePass>,
    encoder_groups: u32,
    handlers: Vec<CompletionHandler>,
    submission: Option<wgpu::SubmissionIndex>,
    completed: Arc<AtomicBool>,
}

fn color_load(load: &LoadAction<[f64; 4]>) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: *r,
            g: *g,
            b: *b,
            a: *a,
        }),
        LoadAction::DontCare => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
    }
}

fn depth_load(load: &LoadAction<f32>) -> wgpu::LoadOp<f32> {
    match load {
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear(depth) => wgpu::LoadOp::Clear(*depth),
        LoadAction::DontCare => wgpu::LoadOp::Clear(1.0),
    }
}

fn stencil_load(load: &LoadAction<u32>) -> wgpu::LoadOp<u32> {
    match load {
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear(stencil) => wgpu::LoadOp::Clear(*stencil),
        LoadAction::DontCare => wgpu::LoadOp::Clear(0),
    }
}

fn store_op(action: StoreAction) -> wgpu::StoreOp {
    if action.stores() {
        wgpu::StoreOp::Store
    } else {
        wgpu::StoreOp::Discard
    }
}

fn stage_group(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex | ShaderStage::Compute => 0,
        ShaderStage::Fragment => 1,
    }
}

impl WgpuCommandBuffer {
    fn encoder(&mut self) -> Result<&mut wgpu::CommandEncoder, DeviceError> {
        self.encoder
            .as_mut()
            .ok_or(DeviceError::InvalidUsage("command buffer already committed"))
    }

    fn stage_table(&mut self, stage: ShaderStage) -> Option<&mut StageTable> {
        match (self.pass.as_mut()?, stage) {
            (ActivePass::Render(render), ShaderStage::Vertex) => Some(&mut render.vertex),
            (ActivePass::Render(render), ShaderStage::Fragment) => Some(&mut render.fragment),
            (ActivePass::Compute(compute), ShaderStage::Compute) => Some(&mut compute.bindings),
            _ => None,
        }
    }

    fn render_pass(&mut self) -> Result<&mut RenderPassState, DeviceError> {
        match self.pass.as_mut() {
            Some(ActivePass::Render(render)) => Ok(&mut **render),
            _ => Err(DeviceError::InvalidUsage("no render pass open")),
        }
    }

    /// Binds the bind groups of both render stages for the next draw.
    fn flush_render_bindings(&mut self) -> Result<(), DeviceError> {
        let device = Arc::clone(&self.device);
        let render = self.render_pass()?;
        let pipeline = render
            .pipeline
            .clone()
            .ok_or(DeviceError::InvalidUsage("draw without a render pipeline"))?;
        for (stage, table) in [
            (ShaderStage::Vertex, &mut render.vertex),
            (ShaderStage::Fragment, &mut render.fragment),
        ] {
            if table.is_empty() {
                continue;
            }
            let group = stage_group(stage);
            let layout = pipeline.raw.get_bind_group_layout(group);
            if let Some(bind_group) = table.bind_group(&device, &layout) {
                render.pass.set_bind_group(group, bind_group, &[]);
            }
        }
        Ok(())
    }

    fn marker(&mut self, label: &str) {
        match self.pass.as_mut() {
            Some(ActivePass::Render(render)) => render.pass.insert_debug_marker(label),
            Some(ActivePass::Compute(compute)) => compute.pass.insert_debug_marker(label),
            Some(ActivePass::Blit) | None => {
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.insert_debug_marker(label);
                }
            }
        }
    }
}

impl NativeCommandBuffer<WgpuDevice> for WgpuCommandBuffer {
    fn begin_render(
        &mut self,
        label: &str,
        descriptor: &RenderPassDescriptor<WgpuDevice>,
    ) -> Result<(), DeviceError> {
        let color_attachments = descriptor
            .color_attachments
            .iter()
            .map(|attachment| {
                let store = attachment.store.unwrap_or(StoreAction::Store);
                Some(wgpu::RenderPassColorAttachment {
                    view: &attachment.texture.view,
                    resolve_target: if store.resolves() {
                        attachment
                            .resolve_texture
                            .as_ref()
                            .map(|resolve| &*resolve.view)
                    } else {
                        None
                    },
                    ops: wgpu::Operations {
                        load: color_load(&attachment.load),
                        store: store_op(store),
                    },
                })
            })
            .collect::<Vec<_>>();

        let depth_stencil_attachment = match (
            &descriptor.depth_attachment,
            &descriptor.stencil_attachment,
        ) {
            (None, None) => None,
            (Some(depth), stencil) => {
                if depth.resolve_texture.is_some() {
                    return Err(DeviceError::Unsupported("depth resolve"));
                }
                if stencil
                    .as_ref()
                    .is_some_and(|stencil| stencil.texture.id != depth.texture.id)
                {
                    return Err(DeviceError::Unsupported(
                        "separate depth and stencil textures",
                    ));
                }
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load(&depth.load),
                        store: store_op(depth.store.unwrap_or(StoreAction::Store)),
                    }),
                    stencil_ops: stencil.as_ref().map(|stencil| wgpu::Operations {
                        load: stencil_load(&stencil.load),
                        store: store_op(stencil.store.unwrap_or(StoreAction::Store)),
                    }),
                })
            }
            (None, Some(stencil)) => Some(wgpu::RenderPassDepthStencilAttachment {
                view: &stencil.texture.view,
                depth_ops: None,
                stencil_ops: Some(wgpu::Operations {
                    load: stencil_load(&stencil.load),
                    store: store_op(stencil.store.unwrap_or(StoreAction::Store)),
                }),
            }),
        };

        let pass = self
            .encoder()?
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            })
            .forget_lifetime();
        self.pass = Some(ActivePass::Render(Box::new(RenderPassState {
            pass,
            pipeline: None,
            vertex: StageTable::default(),
            fragment: StageTable::default(),
            groups: 0,
        })));
        Ok(())
    }

    fn begin_compute(&mut self, label: &str) -> Result<(), DeviceError> {
        let pass = self
            .encoder()?
            .begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            })
            .forget_lifetime();
        self.pass = Some(ActivePass::Compute(Box::new(ComputePassState {
            pass,
            pipeline: None,
            bindings: StageTable::default(),
            groups: 0,
        })));
        Ok(())
    }

    fn begin_blit(&mut self, label: &str) -> Result<(), DeviceError> {
        self.encoder()?.insert_debug_marker(label);
        self.pass = Some(ActivePass::Blit);
        Ok(())
    }

    fn set_render_pipeline(&mut self, pipeline: &WgpuRenderPipeline) {
        if let Some(ActivePass::Render(render)) = self.pass.as_mut() {
            render.pass.set_pipeline(&pipeline.raw);
            render.pipeline = Some(pipeline.clone());
            render.vertex.invalidate();
            render.fragment.invalidate();
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: &WgpuComputePipeline) {
        if let Some(ActivePass::Compute(compute)) = self.pass.as_mut() {
            compute.pass.set_pipeline(&pipeline.raw);
            compute.pipeline = Some(pipeline.clone());
            compute.bindings.invalidate();
        }
    }

    fn set_buffer(&mut self, stage: ShaderStage, slot: usize, buffer: &WgpuBuffer, offset: u64) {
        if let Some(table) = self.stage_table(stage) {
            table.buffers.insert(slot as u32, (buffer.clone(), offset));
            table.invalidate();
        }
    }

    fn set_bytes(&mut self, stage: ShaderStage, slot: usize, bytes: &[u8]) {
        tracing::warn!(%stage, slot, len = bytes.len(), "inline bytes are not supported by wgpu, ignored");
    }

    fn set_texture(&mut self, stage: ShaderStage, slot: usize, texture: &WgpuTexture) {
        if let Some(table) = self.stage_table(stage) {
            table.textures.insert(slot as u32, texture.clone());
            table.invalidate();
        }
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: usize, sampler: &WgpuSampler) {
        if let Some(table) = self.stage_table(stage) {
            table.samplers.insert(slot as u32, sampler.clone());
            table.invalidate();
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<(), DeviceError> {
        self.flush_render_bindings()?;
        self.render_pass()?.pass.draw(vertices, instances);
        Ok(())
    }

    fn draw_indexed(&mut self, draw: &IndexedDraw<'_, WgpuDevice>) -> Result<(), DeviceError> {
        self.flush_render_bindings()?;
        let format = match draw.index_format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        };
        let render = self.render_pass()?;
        render
            .pass
            .set_index_buffer(draw.index_buffer.buffer.slice(draw.index_offset..), format);
        render
            .pass
            .draw_indexed(draw.indices.clone(), draw.base_vertex, draw.instances.clone());
        Ok(())
    }

    fn dispatch(&mut self, workgroups: [u32; 3]) -> Result<(), DeviceError> {
        let device = Arc::clone(&self.device);
        let Some(ActivePass::Compute(compute)) = self.pass.as_mut() else {
            return Err(DeviceError::InvalidUsage("no compute pass open"));
        };
        let pipeline = compute
            .pipeline
            .clone()
            .ok_or(DeviceError::InvalidUsage("dispatch without a compute pipeline"))?;
        if !compute.bindings.is_empty() {
            let group = stage_group(ShaderStage::Compute);
            let layout = pipeline.raw.get_bind_group_layout(group);
            if let Some(bind_group) = compute.bindings.bind_group(&device, &layout) {
                compute.pass.set_bind_group(group, bind_group, &[]);
            }
        }
        compute
            .pass
            .dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        Ok(())
    }

    fn copy(&mut self, op: &BlitOp<'_, WgpuDevice>) -> Result<(), DeviceError> {
        if !matches!(self.pass, Some(ActivePass::Blit)) {
            return Err(DeviceError::InvalidUsage("copy outside of a blit encoder"));
        }
        let encoder = self.encoder()?;
        match op {
            BlitOp::BufferToBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => encoder.copy_buffer_to_buffer(
                &source.buffer,
                *source_offset,
                &destination.buffer,
                *destination_offset,
                *size,
            ),
            BlitOp::TextureToTexture {
                source,
                source_region,
                destination,
                destination_origin,
            } => encoder.copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &source.texture,
                    mip_level: source_region.mip_level,
                    origin: wgpu::Origin3d {
                        x: source_region.origin[0],
                        y: source_region.origin[1],
                        z: source_region.origin[2],
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &destination.texture,
                    mip_level: source_region.mip_level,
                    origin: wgpu::Origin3d {
                        x: destination_origin[0],
                        y: destination_origin[1],
                        z: destination_origin[2],
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: source_region.extent[0],
                    height: source_region.extent[1],
                    depth_or_array_layers: source_region.extent[2],
                },
            ),
            BlitOp::BufferToTexture {
                source,
                source_offset,
                bytes_per_row,
                rows_per_image,
                destination,
                destination_region,
            } => encoder.copy_buffer_to_texture(
                wgpu::TexelCopyBufferInfo {
                    buffer: &source.buffer,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: *source_offset,
                        bytes_per_row: Some(*bytes_per_row),
                        rows_per_image: Some(*rows_per_image),
                    },
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &destination.texture,
                    mip_level: destination_region.mip_level,
                    origin: wgpu::Origin3d {
                        x: destination_region.origin[0],
                        y: destination_region.origin[1],
                        z: destination_region.origin[2],
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: destination_region.extent[0],
                    height: destination_region.extent[1],
                    depth_or_array_layers: destination_region.extent[2],
                },
            ),
            BlitOp::FillBuffer {
                buffer,
                range,
                value,
            } => {
                if *value != 0 {
                    return Err(DeviceError::Unsupported("fill_buffer with a non-zero value"));
                }
                encoder.clear_buffer(&buffer.buffer, range.start, Some(range.end - range.start));
            }
        }
        Ok(())
    }

    fn update_fence(&mut self, fence: &WgpuFence) {
        self.marker(&format!("signal {}", fence.label));
    }

    fn wait_for_fence(&mut self, fence: &WgpuFence) {
        self.marker(&format!("wait {}", fence.label));
    }

    fn set_store_actions(&mut self, actions: &ResolvedStoreActions) {
        tracing::warn!(?actions, "wgpu cannot defer store actions, ignored");
    }

    fn end_encoding(&mut self) -> Result<(), DeviceError> {
        match self.pass.take() {
            Some(ActivePass::Render(mut render)) => {
                for _ in 0..render.groups {
                    render.pass.pop_debug_group();
                }
            }
            Some(ActivePass::Compute(mut compute)) => {
                for _ in 0..compute.groups {
                    compute.pass.pop_debug_group();
                }
            }
            Some(ActivePass::Blit) => {}
            None => return Err(DeviceError::InvalidUsage("no pass open")),
        }
        Ok(())
    }

    fn push_debug_group(&mut self, label: &str) {
        match self.pass.as_mut() {
            Some(ActivePass::Render(render)) => {
                render.pass.push_debug_group(label);
                render.groups += 1;
            }
            Some(ActivePass::Compute(compute)) => {
                compute.pass.push_debug_group(label);
                compute.groups += 1;
            }
            Some(ActivePass::Blit) | None => {
                if let Some(encoder) = self.encoder.as_mut() {
                    encoder.push_debug_group(label);
                    self.encoder_groups += 1;
                }
            }
        }
    }

    fn pop_debug_group(&mut self) {
        // Groups opened outside a pass cannot be closed from inside one.
        match self.pass.as_mut() {
            Some(ActivePass::Render(render)) if render.groups > 0 => {
                render.pass.pop_debug_group();
                render.groups -= 1;
            }
            Some(ActivePass::Compute(compute)) if compute.groups > 0 => {
                compute.pass.pop_debug_group();
                compute.groups -= 1;
            }
            Some(ActivePass::Render(_)) | Some(ActivePass::Compute(_)) => {}
            Some(ActivePass::Blit) | None => {
                if self.encoder_groups > 0 {
                    if let Some(encoder) = self.encoder.as_mut() {
                        encoder.pop_debug_group();
                        self.encoder_groups -= 1;
                    }
                }
            }
        }
    }

    fn insert_signpost(&mut self, label: &str) {
        self.marker(label);
    }

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handlers.push(handler);
    }

    fn commit(&mut self) -> Result<(), DeviceError> {
        if self.pass.is_some() {
            return Err(DeviceError::InvalidUsage("commit with an open pass"));
        }
        let mut encoder = self
            .encoder
            .take()
            .ok_or(DeviceError::InvalidUsage("command buffer committed twice"))?;
        for _ in 0..self.encoder_groups {
            encoder.pop_debug_group();
        }
        self.encoder_groups = 0;

        let index = self.queue.submit(std::iter::once(encoder.finish()));
        let handlers = std::mem::take(&mut self.handlers);
        let completed = Arc::clone(&self.completed);
        // Fires once everything submitted so far, this buffer included, finished.
        self.queue.on_submitted_work_done(move || {
            completed.store(true, Ordering::Release);
            for handler in handlers {
                handler(CompletionStatus::Completed);
            }
        });
        self.submission = Some(index);
        Ok(())
    }

    fn wait_until_completed(&mut self, timeout: Option<Duration>) -> Result<(), DeviceError> {
        let Some(index) = self.submission.clone() else {
            return Err(DeviceError::InvalidUsage(
                "wait_until_completed called before commit",
            ));
        };
        match timeout {
            None => {
                let _ = self
                    .device
                    .poll(wgpu::MaintainBase::WaitForSubmissionIndex(index));
                let _ = self.device.poll(wgpu::MaintainBase::Poll);
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !self.completed.load(Ordering::Acquire) {
                    let _ = self.device.poll(wgpu::MaintainBase::Poll);
                    if self.completed.load(Ordering::Acquire) {
                        break;
                    }
                    if Instant::now() >= deadline {
                        return Err(DeviceError::Timeout(timeout));
                    }
                    std::thread::sleep(Duration::from_micros(250));
                }
            }
        }
        Ok(())
    }
}
