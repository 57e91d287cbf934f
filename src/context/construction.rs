use std::collections::VecDeque;
use std::sync::mpsc;

use super::Context;
use crate::backend::Device;
use crate::config::ContextConfig;
use crate::error::EncoderError;
use crate::fence::FenceRegistry;
use crate::hazards::HazardTracker;
use crate::ring::{RingAllocator, TransientRing};
use crate::util::align_up;

impl<D: Device> Context<D> {
    /// Creates the transient ring on `device` and starts the first command buffer.
    pub fn new(device: D, config: ContextConfig) -> Result<Self, EncoderError> {
        config.validate()?;
        let capabilities = device.capabilities();

        let capacity = align_up(
            config.ring_capacity,
            capabilities.transient_alignment.max(1),
        );
        let allocator = RingAllocator::new(capacity)?;
        let buffer =
            device.create_transient_buffer(&format!("{} transient ring", config.label), capacity)?;
        let ring = TransientRing::new(allocator, buffer, config.scribble_on_reclaim);

        let (completion_sender, completion_receiver) = mpsc::channel();

        tracing::debug!(
            label = %config.label,
            ring_capacity = capacity,
            verbosity = %config.verbosity,
            scribble_on_reclaim = config.scribble_on_reclaim,
            deferred_store_actions = capabilities.deferred_store_actions,
            max_inline_bytes = capabilities.max_inline_bytes,
            "created encoder context"
        );

        let mut context = Self {
            device,
            capabilities,
            config,
            ring,
            fences: FenceRegistry::default(),
            hazards: HazardTracker::default(),
            command_buffer: None,
            encoder: None,
            in_flight: VecDeque::new(),
            abandoned_ring: None,
            completion_sender,
            completion_receiver,
            faults: Vec::new(),
            warnings: Vec::new(),
            last_commit_stats: None,
            next_command_buffer: 0,
            next_encoder: 0,
            #[cfg(feature = "encoder_metrics")]
            metrics: Default::default(),
        };
        context.start_command_buffer()?;
        Ok(context)
    }

    /// [`Context::new`] with [`ContextConfig::default`].
    pub fn with_defaults(device: D) -> Result<Self, EncoderError> {
        Self::new(device, ContextConfig::default())
    }
}
