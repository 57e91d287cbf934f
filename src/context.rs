//! The encoder context: one active command buffer, at most one open encoder,
//! the transient ring, the fence registry and the completion queue.
//!
//! All methods run on the producer thread. The only data crossing threads
//! is the owned [`CompletionEvent`] a device posts when a command buffer
//! finishes; [`Context::poll_completions`] folds those back in.

use std::collections::VecDeque;
use std::sync::mpsc;

use crate::backend::{Device, DeviceCapabilities};
use crate::command_buffer::CommandBufferWrapper;
use crate::config::ContextConfig;
use crate::debug_trace::{DebugCommand, DebugVerbosity, DebugWarning};
use crate::encoder::{BufferBinding, EncoderKind, OpenEncoder, ShaderStage};
use crate::error::EncoderError;
use crate::fence::FenceRegistry;
use crate::hazards::HazardTracker;
use crate::id::CommandBufferId;
#[cfg(feature = "encoder_metrics")]
use crate::metrics::{SubmissionMetrics, SubmissionMetricsTracker};
use crate::metrics::CommandBufferStats;
use crate::ring::{RingStats, RingWatermark, TransientRing};

mod commit;
mod completion;
mod construction;
mod encoders;
mod handles;
mod types;

pub use handles::{BlitEncoder, ComputeEncoder, RenderEncoder};
pub use types::{CommitFlags, DeviceFault};
pub(crate) use types::{CompletionEvent, InFlightCommandBuffer};

pub struct Context<D: Device> {
    device: D,
    capabilities: DeviceCapabilities,
    config: ContextConfig,

    ring: TransientRing<D>,
    fences: FenceRegistry<D::Fence>,
    hazards: HazardTracker,

    /// The buffer currently being recorded. `None` only after a
    /// `BREAK_BUFFER` commit until the next `start_command_buffer`.
    command_buffer: Option<CommandBufferWrapper<D>>,
    encoder: Option<OpenEncoder>,
    in_flight: VecDeque<InFlightCommandBuffer<D>>,
    /// Ring bytes of a buffer that failed to commit. Reclaimed once every
    /// buffer committed before it has completed.
    abandoned_ring: Option<(CommandBufferId, RingWatermark)>,

    completion_sender: mpsc::Sender<CompletionEvent>,
    completion_receiver: mpsc::Receiver<CompletionEvent>,

    faults: Vec<DeviceFault>,
    warnings: Vec<DebugWarning>,
    last_commit_stats: Option<CommandBufferStats>,

    next_command_buffer: u64,
    next_encoder: u64,

    #[cfg(feature = "encoder_metrics")]
    metrics: SubmissionMetricsTracker,
}

impl<D: Device> Context<D> {
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn verbosity(&self) -> DebugVerbosity {
        self.config.verbosity
    }

    pub fn has_command_buffer(&self) -> bool {
        self.command_buffer.is_some()
    }

    /// Kind of the encoder currently open, if any.
    pub fn active_encoder(&self) -> Option<EncoderKind> {
        self.encoder.as_ref().map(|encoder| encoder.state.kind())
    }

    /// What the open encoder has bound at `slot` of `stage`.
    pub fn bound_buffer(
        &self,
        stage: ShaderStage,
        slot: usize,
    ) -> Result<Option<BufferBinding>, EncoderError> {
        let encoder = self.encoder.as_ref().ok_or(EncoderError::NoOpenEncoder)?;
        Ok(encoder.state.stage_bindings(stage)?.buffer(slot))
    }

    /// Ordered log of the command buffer being recorded. Empty unless the
    /// verbosity records groups or operations.
    pub fn debug_trace(&self) -> &[DebugCommand] {
        match &self.command_buffer {
            Some(command_buffer) => command_buffer.recorder.commands(),
            None => &[],
        }
    }

    /// Validation warnings raised since the context was created or last reset.
    pub fn debug_warnings(&self) -> &[DebugWarning] {
        &self.warnings
    }

    pub fn take_debug_warnings(&mut self) -> Vec<DebugWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Post-mortem description of the command buffer being recorded.
    pub fn debug_description(&self) -> Option<String> {
        self.command_buffer
            .as_ref()
            .map(|command_buffer| command_buffer.to_string())
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.allocator().stats()
    }

    /// Counters of the command buffer being recorded.
    pub fn current_stats(&self) -> Option<CommandBufferStats> {
        self.command_buffer
            .as_ref()
            .map(|command_buffer| command_buffer.stats)
    }

    /// Counters of the most recently committed command buffer.
    pub fn last_commit_stats(&self) -> Option<CommandBufferStats> {
        self.last_commit_stats
    }

    /// Committed command buffers whose completion has not been processed yet.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Fences still referenced by open encoders or unfinished GPU work.
    pub fn live_fence_count(&self) -> usize {
        self.fences.live_count()
    }

    /// Native fences ready for reuse.
    pub fn recycled_fence_count(&self) -> usize {
        self.fences.free_count()
    }

    /// Resources with a write not yet known to be finished on the GPU.
    /// Only populated at [`DebugVerbosity::Validate`] and above.
    pub fn hazard_tracked_resources(&self) -> usize {
        self.hazards.tracked_resources()
    }

    #[cfg(feature = "encoder_metrics")]
    pub fn submission_metrics(&self) -> SubmissionMetrics {
        self.metrics.snapshot()
    }

    #[cfg(feature = "encoder_metrics")]
    pub fn reset_submission_metrics(&mut self) {
        self.metrics.reset();
    }
}
