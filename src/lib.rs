pub use wgpu;

pub mod backend;
mod command_buffer;
mod config;
mod context;
mod debug_trace;
mod encoder;
mod error;
mod fence;
mod hazards;
mod id;
mod metrics;
mod ring;
mod util;

pub use backend::{
    BlitOp, CompletionStatus, Device, DeviceCapabilities, IndexFormat, IndexedDraw,
    NativeCommandBuffer, NativeResource, TextureRegion,
};
pub use config::{
    ContextConfig, DEFAULT_RING_CAPACITY, ENV_DEBUG_LEVEL, ENV_RING_CAPACITY, ENV_SCRIBBLE,
};
pub use context::{
    BlitEncoder, CommitFlags, ComputeEncoder, Context, DeviceFault, RenderEncoder,
};
pub use debug_trace::{DebugCommand, DebugCommandKind, DebugVerbosity, DebugWarning};
pub use encoder::{
    AttachmentSlot, BindingKind, BufferBinding, ColorAttachment, DepthAttachment, EncoderKind,
    LoadAction, RenderPassDescriptor, ResolvedStoreActions, ResourceUsage, ShaderStage,
    StencilAttachment, StoreAction, MAX_COLOR_ATTACHMENTS,
};
pub use error::{ConfigError, DeviceError, EncoderError, RingError};
pub use id::{CommandBufferId, EncoderId, FenceHandle, ResourceId};
#[cfg(feature = "encoder_metrics")]
pub use metrics::SubmissionMetrics;
pub use metrics::CommandBufferStats;
pub use ring::{RingAllocator, RingStats, RingWatermark, SCRIBBLE_BYTE};
