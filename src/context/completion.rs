use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use super::{CompletionEvent, Context, DeviceFault};
use crate::backend::{CompletionStatus, Device, NativeCommandBuffer};
use crate::error::{DeviceError, EncoderError};
use crate::id::CommandBufferId;

impl<D: Device> Context<D> {
    /// Processes every completion the device has posted so far, without blocking.
    ///
    /// For each finished command buffer this reclaims its transient ring bytes,
    /// retires fences and hazard records it was the last user of, releases the
    /// resources it kept alive and records a [`DeviceFault`] if it failed.
    /// Returns the number of command buffers processed.
    pub fn poll_completions(&mut self) -> usize {
        self.device.poll();
        for message in self.device.drain_errors() {
            tracing::error!(%message, "device reported an error");
            self.faults.push(DeviceFault {
                command_buffer: None,
                label: self.config.label.clone(),
                message,
                description: String::new(),
            });
        }

        let mut processed = 0;
        while let Ok(event) = self.completion_receiver.try_recv() {
            self.process_completion(event);
            processed += 1;
        }
        processed
    }

    fn process_completion(&mut self, event: CompletionEvent) {
        let Some(index) = self
            .in_flight
            .iter()
            .position(|in_flight| in_flight.wrapper.id == event.command_buffer)
        else {
            tracing::warn!(command_buffer = %event.command_buffer, "completion for unknown command buffer");
            return;
        };
        let Some(in_flight) = self.in_flight.remove(index) else {
            return;
        };

        let reclaimed = self.ring.reclaim(&self.device, event.ring_watermark)
            + self.reclaim_abandoned_ring();
        let retired_fences = self.fences.retire_completed(event.command_buffer);
        self.hazards.retire_completed(event.command_buffer);

        if let CompletionStatus::Error(message) = &event.status {
            let description = in_flight.wrapper.to_string();
            tracing::error!(
                command_buffer = %event.command_buffer,
                %message,
                "command buffer faulted on the GPU\n{description}"
            );
            self.faults.push(DeviceFault {
                command_buffer: Some(event.command_buffer),
                label: in_flight.wrapper.label.clone(),
                message: message.clone(),
                description,
            });
        }

        #[cfg(feature = "encoder_metrics")]
        self.metrics.record_completion(
            in_flight.committed_at,
            event.completed_at,
            &in_flight.wrapper.stats,
        );

        tracing::debug!(
            command_buffer = %event.command_buffer,
            reclaimed,
            retired_fences,
            "command buffer completed"
        );
        // Dropping the wrapper releases the resources it kept alive.
    }

    /// Reclaims the ring bytes of an abandoned command buffer once no buffer
    /// committed before it is still in flight.
    pub(super) fn reclaim_abandoned_ring(&mut self) -> u64 {
        let Some((abandoned, mark)) = self.abandoned_ring else {
            return 0;
        };
        if self
            .in_flight
            .front()
            .is_some_and(|in_flight| in_flight.wrapper.id < abandoned)
        {
            return 0;
        }
        self.abandoned_ring = None;
        self.ring.reclaim(&self.device, mark)
    }

    /// Device faults recorded since the last call.
    pub fn take_device_faults(&mut self) -> Vec<DeviceFault> {
        std::mem::take(&mut self.faults)
    }

    pub fn device_faults(&self) -> &[DeviceFault] {
        &self.faults
    }

    /// Blocks until every committed command buffer finished and its completion
    /// was processed. `None` waits forever; `Some(timeout)` bounds the whole
    /// call and fails with [`DeviceError::Timeout`].
    ///
    /// Intended for teardown and tests, not for frame pacing.
    pub fn wait_until_idle(&mut self, timeout: Option<Duration>) -> Result<(), EncoderError> {
        match self.in_flight.back() {
            Some(last) => {
                let last = last.wrapper.id;
                self.wait_for_completion_of(last, timeout)
            }
            None => {
                self.poll_completions();
                Ok(())
            }
        }
    }

    /// Waits for every in-flight buffer up to and including `target`.
    pub(super) fn wait_for_completion_of(
        &mut self,
        target: CommandBufferId,
        timeout: Option<Duration>,
    ) -> Result<(), EncoderError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let remaining = |deadline: Option<Instant>| -> Result<Option<Duration>, DeviceError> {
            match deadline {
                None => Ok(None),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        Err(DeviceError::Timeout(timeout.unwrap_or_default()))
                    } else {
                        Ok(Some(deadline - now))
                    }
                }
            }
        };

        for in_flight in self
            .in_flight
            .iter_mut()
            .filter(|in_flight| in_flight.wrapper.id <= target)
        {
            let wait = remaining(deadline)?;
            in_flight.wrapper.native.wait_until_completed(wait)?;
        }
        self.poll_completions();

        // Handlers may run on a driver thread after the native wait returns.
        while self
            .in_flight
            .front()
            .is_some_and(|in_flight| in_flight.wrapper.id <= target)
        {
            let event = match remaining(deadline)? {
                None => self.completion_receiver.recv().map_err(|_| {
                    DeviceError::Lost("completion channel closed".to_owned())
                })?,
                Some(wait) => match self.completion_receiver.recv_timeout(wait) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(DeviceError::Timeout(timeout.unwrap_or_default()).into())
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(DeviceError::Lost("completion channel closed".to_owned()).into())
                    }
                },
            };
            self.process_completion(event);
        }
        Ok(())
    }

    /// Waits for the GPU, then drops the command buffer being recorded, any
    /// open encoder, all fences, hazard records and ring allocations, and
    /// starts a fresh command buffer.
    pub fn reset(&mut self, timeout: Option<Duration>) -> Result<(), EncoderError> {
        self.wait_until_idle(timeout)?;

        if let Some(encoder) = self.encoder.take() {
            tracing::warn!(encoder = %encoder.id, label = %encoder.label, "discarding open encoder on reset");
        }
        self.command_buffer = None;
        self.ring.reset();
        self.abandoned_ring = None;
        self.fences.reset();
        self.hazards.reset();
        self.warnings.clear();
        self.last_commit_stats = None;

        tracing::debug!("reset encoder context");
        self.start_command_buffer()?;
        Ok(())
    }
}
