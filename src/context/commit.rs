use std::time::Instant;

use super::{CommitFlags, CompletionEvent, Context, InFlightCommandBuffer};
use crate::backend::{CompletionStatus, Device, NativeCommandBuffer};
use crate::command_buffer::CommandBufferWrapper;
use crate::debug_trace::{DebugCommandKind, DebugRecorder};
use crate::error::EncoderError;
use crate::id::CommandBufferId;
use crate::ring::RingWatermark;

impl<D: Device> Context<D> {
    /// Starts recording a new command buffer. Only needed after a commit with
    /// [`CommitFlags::BREAK_BUFFER`]; every other commit starts the next
    /// buffer itself.
    pub fn start_command_buffer(&mut self) -> Result<CommandBufferId, EncoderError> {
        if self.command_buffer.is_some() {
            return Err(EncoderError::CommandBufferActive);
        }

        let id = CommandBufferId(self.next_command_buffer + 1);
        let label = format!("{} {}", self.config.label, id);
        let native = self.device.new_command_buffer(&label)?;
        self.next_command_buffer += 1;

        tracing::debug!(command_buffer = %id, "started command buffer");
        self.command_buffer = Some(CommandBufferWrapper::new(
            id,
            label,
            native,
            DebugRecorder::new(self.config.verbosity),
        ));
        Ok(id)
    }

    /// Submits the active command buffer.
    ///
    /// Captures the ring's write position so the bytes this buffer used are
    /// reclaimed once it completes. With [`CommitFlags::WAIT_ON_SUBMIT`] (or
    /// at [`DebugVerbosity::WaitForComplete`](crate::DebugVerbosity::WaitForComplete))
    /// blocks for at most the configured `wait_timeout`.
    pub fn commit(&mut self, flags: CommitFlags) -> Result<CommandBufferId, EncoderError> {
        let Some(command_buffer) = self.command_buffer.as_ref() else {
            return Err(EncoderError::NoCommandBuffer);
        };
        if let Some(encoder) = &self.encoder {
            return Err(EncoderError::CommitWithOpenEncoder {
                active: encoder.state.kind(),
            });
        }
        let open_groups = command_buffer.recorder.open_groups().len();
        if open_groups > 0 {
            return Err(EncoderError::UnbalancedDebugGroups { open: open_groups });
        }

        let Some(mut wrapper) = self.command_buffer.take() else {
            return Err(EncoderError::NoCommandBuffer);
        };
        let id = wrapper.id;
        let ring_watermark = self.ring.high_water_mark();
        let sender = self.completion_sender.clone();
        wrapper
            .native
            .add_completed_handler(Box::new(move |status: CompletionStatus| {
                let event = CompletionEvent {
                    command_buffer: id,
                    ring_watermark,
                    status,
                    completed_at: Instant::now(),
                };
                if sender.send(event).is_err() {
                    tracing::warn!(command_buffer = %id, "completion arrived after its context was dropped");
                }
            }));

        if let Err(error) = wrapper.native.commit() {
            tracing::error!(command_buffer = %id, %error, "failed to commit command buffer");
            self.abandon_command_buffer(wrapper, ring_watermark);
            if !flags.contains(CommitFlags::BREAK_BUFFER) {
                self.start_command_buffer()?;
            }
            return Err(error.into());
        }

        tracing::debug!(
            command_buffer = %id,
            encoders = wrapper.stats.encoders,
            draws = wrapper.stats.draws,
            dispatches = wrapper.stats.dispatches,
            blits = wrapper.stats.blits,
            transient_bytes = wrapper.stats.transient_bytes,
            ?flags,
            "committed command buffer"
        );
        self.last_commit_stats = Some(wrapper.stats);
        self.in_flight.push_back(InFlightCommandBuffer {
            wrapper,
            committed_at: Instant::now(),
        });

        let wait = flags.contains(CommitFlags::WAIT_ON_SUBMIT) || self.config.verbosity.waits_on_commit();
        let waited = if wait {
            self.wait_for_completion_of(id, self.config.wait_timeout)
        } else {
            Ok(())
        };

        if !flags.contains(CommitFlags::BREAK_BUFFER) {
            self.start_command_buffer()?;
        }
        waited?;
        Ok(id)
    }

    /// Rolls back the bookkeeping of a command buffer the device refused.
    /// Its fence signals will never run, so waits on them are rejected from
    /// now on, and its ring bytes are reclaimed once earlier work finishes.
    fn abandon_command_buffer(&mut self, wrapper: CommandBufferWrapper<D>, ring_watermark: RingWatermark) {
        let id = wrapper.id;
        let fences = self.fences.abandon(id);
        self.hazards.abandon(id);
        self.abandoned_ring = Some((id, ring_watermark));
        self.reclaim_abandoned_ring();
        tracing::warn!(command_buffer = %id, fences, "abandoned uncommitted command buffer");
        // Dropping the wrapper releases the resources it kept alive.
    }

    /// Opens a nested debug group on the active command buffer.
    pub fn push_debug_group(&mut self, label: &str) -> Result<(), EncoderError> {
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer.recorder.push_group(label);
        if self.config.verbosity.records_groups() {
            command_buffer.native.push_debug_group(label);
        }
        tracing::trace!(label, "push debug group");
        Ok(())
    }

    pub fn pop_debug_group(&mut self) -> Result<(), EncoderError> {
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        let label = command_buffer.recorder.pop_group()?;
        if self.config.verbosity.records_groups() {
            command_buffer.native.pop_debug_group();
        }
        tracing::trace!(label, "pop debug group");
        Ok(())
    }

    /// Records a point-in-time marker.
    pub fn insert_signpost(&mut self, label: &str) -> Result<(), EncoderError> {
        let command_buffer = self
            .command_buffer
            .as_mut()
            .ok_or(EncoderError::NoCommandBuffer)?;
        command_buffer
            .recorder
            .record(DebugCommandKind::Signpost, label);
        if self.config.verbosity.records_groups() {
            command_buffer.native.insert_signpost(label);
        }
        tracing::trace!(label, "signpost");
        Ok(())
    }
}
