use std::time::Instant;

use crate::backend::{CompletionStatus, Device};
use crate::command_buffer::CommandBufferWrapper;
use crate::id::CommandBufferId;
use crate::ring::RingWatermark;

bitflags::bitflags! {
    /// Options for [`Context::commit`](super::Context::commit).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommitFlags: u8 {
        /// Do not start a new command buffer after committing.
        const BREAK_BUFFER = 1 << 0;
        /// Block until the GPU finished the committed buffer.
        const WAIT_ON_SUBMIT = 1 << 1;
    }
}

/// Posted by a device's completion handler. Owns everything it carries so
/// the handler never touches context state.
#[derive(Debug)]
pub(crate) struct CompletionEvent {
    pub(crate) command_buffer: CommandBufferId,
    pub(crate) ring_watermark: RingWatermark,
    pub(crate) status: CompletionStatus,
    #[cfg_attr(not(feature = "encoder_metrics"), allow(dead_code))]
    pub(crate) completed_at: Instant,
}

pub(crate) struct InFlightCommandBuffer<D: Device> {
    pub(crate) wrapper: CommandBufferWrapper<D>,
    #[cfg_attr(not(feature = "encoder_metrics"), allow(dead_code))]
    pub(crate) committed_at: Instant,
}

/// A fault the device reported after submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    /// `None` for errors not attributed to a particular command buffer.
    pub command_buffer: Option<CommandBufferId>,
    pub label: String,
    pub message: String,
    /// The command buffer's debug description at commit time.
    pub description: String,
}
