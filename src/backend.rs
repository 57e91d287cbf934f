//! Boundary between the encoder layer and a native graphics API.
//!
//! The encoder never talks to a GPU directly. It drives a [`Device`] and the
//! [`NativeCommandBuffer`]s it hands out, so the same state machine runs on
//! top of `wgpu` ([`wgpu_backend::WgpuDevice`]) and on top of the recording
//! [`mock::MockDevice`] used by the tests.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use crate::encoder::{RenderPassDescriptor, ResolvedStoreActions, ShaderStage};
use crate::error::DeviceError;
use crate::id::ResourceId;

pub mod mock;
pub mod wgpu_backend;

/// A native object the encoder can bind and keep alive.
pub trait NativeResource: Clone + fmt::Debug + Send + 'static {
    /// Stable identity used for lifetime and hazard tracking.
    fn resource_id(&self) -> ResourceId;

    fn label(&self) -> Option<&str> {
        None
    }
}

/// What the native API can do, as far as the encoder layer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Largest byte blob `set_bytes` may hand to the device directly.
    /// Anything larger goes through the transient ring. `0` means never inline.
    pub max_inline_bytes: usize,
    /// Offset alignment for buffers bound from the transient ring.
    pub transient_alignment: u64,
    /// Transient allocations are rounded up to a multiple of this.
    pub transient_size_granularity: u64,
    /// Whether render pass store actions can be supplied after `begin_render`.
    pub deferred_store_actions: bool,
    pub max_buffer_slots: usize,
    pub max_texture_slots: usize,
    pub max_sampler_slots: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_inline_bytes: 4096,
            transient_alignment: 256,
            transient_size_granularity: 1,
            deferred_store_actions: true,
            max_buffer_slots: 31,
            max_texture_slots: 128,
            max_sampler_slots: 16,
        }
    }
}

/// Outcome of a committed command buffer as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Error(String),
}

impl CompletionStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, CompletionStatus::Error(_))
    }
}

/// Callback run by the device once a command buffer finished executing.
/// May be invoked on any thread.
pub type CompletionHandler = Box<dyn FnOnce(CompletionStatus) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

pub struct IndexedDraw<'a, D: Device> {
    pub index_buffer: &'a D::Buffer,
    pub index_format: IndexFormat,
    /// Byte offset of the first index in `index_buffer`.
    pub index_offset: u64,
    pub indices: Range<u32>,
    pub base_vertex: i32,
    pub instances: Range<u32>,
}

/// A texture sub-region addressed by a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip_level: u32,
    pub origin: [u32; 3],
    pub extent: [u32; 3],
}

impl TextureRegion {
    pub fn whole_2d(width: u32, height: u32) -> Self {
        Self {
            mip_level: 0,
            origin: [0; 3],
            extent: [width, height, 1],
        }
    }
}

pub enum BlitOp<'a, D: Device> {
    BufferToBuffer {
        source: &'a D::Buffer,
        source_offset: u64,
        destination: &'a D::Buffer,
        destination_offset: u64,
        size: u64,
    },
    TextureToTexture {
        source: &'a D::Texture,
        source_region: TextureRegion,
        destination: &'a D::Texture,
        destination_origin: [u32; 3],
    },
    BufferToTexture {
        source: &'a D::Buffer,
        source_offset: u64,
        bytes_per_row: u32,
        rows_per_image: u32,
        destination: &'a D::Texture,
        destination_region: TextureRegion,
    },
    FillBuffer {
        buffer: &'a D::Buffer,
        range: Range<u64>,
        value: u8,
    },
}

impl<D: Device> BlitOp<'_, D> {
    /// The resource read by the copy, if any.
    pub fn source(&self) -> Option<ResourceId> {
        match self {
            BlitOp::BufferToBuffer { source, .. } | BlitOp::BufferToTexture { source, .. } => {
                Some(source.resource_id())
            }
            BlitOp::TextureToTexture { source, .. } => Some(source.resource_id()),
            BlitOp::FillBuffer { .. } => None,
        }
    }

    /// The resource written by the copy.
    pub fn destination(&self) -> ResourceId {
        match self {
            BlitOp::BufferToBuffer { destination, .. } => destination.resource_id(),
            BlitOp::TextureToTexture { destination, .. }
            | BlitOp::BufferToTexture { destination, .. } => destination.resource_id(),
            BlitOp::FillBuffer { buffer, .. } => buffer.resource_id(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlitOp::BufferToBuffer { .. } => "copy_buffer_to_buffer",
            BlitOp::TextureToTexture { .. } => "copy_texture_to_texture",
            BlitOp::BufferToTexture { .. } => "copy_buffer_to_texture",
            BlitOp::FillBuffer { .. } => "fill_buffer",
        }
    }
}

/// A native graphics device.
pub trait Device: Sized + 'static {
    type Buffer: NativeResource;
    type Texture: NativeResource;
    type Sampler: NativeResource;
    type RenderPipeline: NativeResource;
    type ComputePipeline: NativeResource;
    type Fence: fmt::Debug + Send + 'static;
    type CommandBuffer: NativeCommandBuffer<Self>;

    fn capabilities(&self) -> DeviceCapabilities;

    /// Creates the GPU-visible block backing the transient ring.
    fn create_transient_buffer(&self, label: &str, size: u64) -> Result<Self::Buffer, DeviceError>;

    /// Copies `data` into `buffer` before any command buffer committed afterwards runs.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    fn create_fence(&self, label: &str) -> Self::Fence;

    fn new_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, DeviceError>;

    /// Gives the device a chance to run completion handlers without blocking.
    fn poll(&self) {}

    /// Errors the device reported outside of any command buffer's completion.
    fn drain_errors(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Per-buffer calls the encoder layer issues, in recording order.
///
/// The encoder guarantees the protocol (one open pass at a time, binds only
/// inside a pass, fences only between begin and end) before calling through,
/// so implementations only translate.
pub trait NativeCommandBuffer<D: Device>: Send {
    fn begin_render(
        &mut self,
        label: &str,
        descriptor: &RenderPassDescriptor<D>,
    ) -> Result<(), DeviceError>;
    fn begin_compute(&mut self, label: &str) -> Result<(), DeviceError>;
    fn begin_blit(&mut self, label: &str) -> Result<(), DeviceError>;

    fn set_render_pipeline(&mut self, pipeline: &D::RenderPipeline);
    fn set_compute_pipeline(&mut self, pipeline: &D::ComputePipeline);

    fn set_buffer(&mut self, stage: ShaderStage, slot: usize, buffer: &D::Buffer, offset: u64);
    /// Only called for blobs no larger than `max_inline_bytes`.
    fn set_bytes(&mut self, stage: ShaderStage, slot: usize, bytes: &[u8]);
    fn set_texture(&mut self, stage: ShaderStage, slot: usize, texture: &D::Texture);
    fn set_sampler(&mut self, stage: ShaderStage, slot: usize, sampler: &D::Sampler);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<(), DeviceError>;
    fn draw_indexed(&mut self, draw: &IndexedDraw<'_, D>) -> Result<(), DeviceError>;
    fn dispatch(&mut self, workgroups: [u32; 3]) -> Result<(), DeviceError>;
    fn copy(&mut self, op: &BlitOp<'_, D>) -> Result<(), DeviceError>;

    fn update_fence(&mut self, fence: &D::Fence);
    fn wait_for_fence(&mut self, fence: &D::Fence);

    /// Only called on devices reporting `deferred_store_actions`.
    fn set_store_actions(&mut self, actions: &ResolvedStoreActions);
    fn end_encoding(&mut self) -> Result<(), DeviceError>;

    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);
    fn insert_signpost(&mut self, label: &str);

    /// Registers a handler to run once the buffer finished executing.
    /// Handlers must be registered before `commit`.
    fn add_completed_handler(&mut self, handler: CompletionHandler);
    fn commit(&mut self) -> Result<(), DeviceError>;

    /// Blocks until the committed buffer finished. `None` waits forever.
    fn wait_until_completed(&mut self, timeout: Option<Duration>) -> Result<(), DeviceError>;
}
