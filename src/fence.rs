//! Fence registry owned by a context.
//!
//! Every encoder acquires one fence when it begins and signals it when it
//! ends. Handles stay valid after the GPU finished with them: retired handles
//! are remembered as tombstones so a late wait is recognised as already
//! satisfied instead of being encoded against a recycled native fence.
//! Fences signalled into a command buffer that failed to commit are
//! remembered separately, since no GPU work will ever signal them.

use std::num::NonZeroUsize;

use ahash::AHashMap;
use lru::LruCache;
use smallvec::SmallVec;

use crate::error::EncoderError;
use crate::id::{CommandBufferId, EncoderId, FenceHandle};

const RETIRED_FENCE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FenceState {
    /// Owned by an open encoder that has not signalled it yet.
    Acquired { encoder: EncoderId },
    /// Signalled by `encoder`, recorded into `command_buffer`.
    Signaled {
        encoder: EncoderId,
        command_buffer: CommandBufferId,
    },
}

#[derive(Debug)]
struct FenceEntry<F> {
    label: String,
    native: F,
    state: FenceState,
    waiters: SmallVec<[CommandBufferId; 4]>,
}

/// What a wait on a handle has to encode.
#[derive(Debug)]
pub(crate) enum WaitTarget<'a, F> {
    /// The signal is still pending on the GPU.
    Pending(&'a F),
    /// The signalling work already completed; nothing to encode.
    Retired,
}

#[derive(Debug)]
pub(crate) struct FenceRegistry<F> {
    next_handle: u64,
    live: AHashMap<FenceHandle, FenceEntry<F>>,
    free: Vec<F>,
    retired: LruCache<FenceHandle, String>,
    abandoned: LruCache<FenceHandle, String>,
    completed_through: Option<CommandBufferId>,
}

impl<F> Default for FenceRegistry<F> {
    fn default() -> Self {
        Self {
            next_handle: 0,
            live: AHashMap::new(),
            free: Vec::new(),
            retired: LruCache::new(RETIRED_FENCE_CAPACITY),
            abandoned: LruCache::new(RETIRED_FENCE_CAPACITY),
            completed_through: None,
        }
    }
}

impl<F> FenceRegistry<F> {
    /// Hands out a fresh handle for `encoder`, reusing a recycled native fence
    /// when one is available.
    pub(crate) fn acquire(
        &mut self,
        encoder: EncoderId,
        label: String,
        create: impl FnOnce(&str) -> F,
    ) -> FenceHandle {
        self.next_handle += 1;
        let handle = FenceHandle(self.next_handle);
        let native = match self.free.pop() {
            Some(native) => native,
            None => create(&label),
        };
        self.live.insert(
            handle,
            FenceEntry {
                label,
                native,
                state: FenceState::Acquired { encoder },
                waiters: SmallVec::new(),
            },
        );
        handle
    }

    #[cfg(test)]
    fn state(&self, handle: FenceHandle) -> Option<FenceState> {
        self.live.get(&handle).map(|entry| entry.state)
    }

    #[cfg(test)]
    fn label(&self, handle: FenceHandle) -> Option<&str> {
        match self.live.get(&handle) {
            Some(entry) => Some(&entry.label),
            None => self.retired.peek(&handle).map(String::as_str),
        }
    }

    /// Marks `handle` as signalled by `encoder` and returns the native fence
    /// to encode the update with.
    pub(crate) fn signal(
        &mut self,
        handle: FenceHandle,
        encoder: EncoderId,
        command_buffer: CommandBufferId,
    ) -> Result<&F, EncoderError> {
        let entry = self
            .live
            .get_mut(&handle)
            .ok_or(EncoderError::UnknownFence(handle))?;
        match entry.state {
            FenceState::Acquired { encoder: owner } if owner == encoder => {
                entry.state = FenceState::Signaled {
                    encoder,
                    command_buffer,
                };
                Ok(&entry.native)
            }
            FenceState::Acquired { encoder: owner } => Err(EncoderError::FenceAlreadyUpdated {
                fence: handle,
                updater: owner,
            }),
            FenceState::Signaled {
                encoder: updater, ..
            } => Err(EncoderError::FenceAlreadyUpdated {
                fence: handle,
                updater,
            }),
        }
    }

    /// Checks that waiting on `handle` from `reader` can be satisfied.
    pub(crate) fn check_wait(
        &self,
        handle: FenceHandle,
        reader: EncoderId,
    ) -> Result<WaitTarget<'_, F>, EncoderError> {
        match self.live.get(&handle) {
            Some(entry) => match entry.state {
                FenceState::Signaled { encoder, .. } if encoder != reader => {
                    Ok(WaitTarget::Pending(&entry.native))
                }
                FenceState::Signaled { .. } | FenceState::Acquired { .. } => {
                    Err(EncoderError::WaitWithoutSignal { fence: handle })
                }
            },
            None if self.abandoned.contains(&handle) => {
                Err(EncoderError::WaitWithoutSignal { fence: handle })
            }
            None if self.retired.contains(&handle) => Ok(WaitTarget::Retired),
            None if handle.0 > 0 && handle.0 <= self.next_handle => {
                // Retired long enough ago to have fallen out of the tombstone cache.
                Ok(WaitTarget::Retired)
            }
            None => Err(EncoderError::UnknownFence(handle)),
        }
    }

    pub(crate) fn add_waiter(&mut self, handle: FenceHandle, command_buffer: CommandBufferId) {
        if let Some(entry) = self.live.get_mut(&handle) {
            if !entry.waiters.contains(&command_buffer) {
                entry.waiters.push(command_buffer);
            }
        }
    }

    /// Records that every command buffer up to and including `command_buffer`
    /// finished, and retires the fences no in-flight work refers to anymore.
    ///
    /// Command buffers complete in submission order.
    pub(crate) fn retire_completed(&mut self, command_buffer: CommandBufferId) -> usize {
        if self
            .completed_through
            .is_some_and(|completed| completed >= command_buffer)
        {
            return 0;
        }
        self.completed_through = Some(command_buffer);

        let retirable: SmallVec<[FenceHandle; 16]> = self
            .live
            .iter()
            .filter(|(_, entry)| match entry.state {
                FenceState::Signaled {
                    command_buffer: signaler,
                    ..
                } => {
                    signaler <= command_buffer
                        && entry.waiters.iter().all(|waiter| *waiter <= command_buffer)
                }
                FenceState::Acquired { .. } => false,
            })
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &retirable {
            if let Some(entry) = self.live.remove(handle) {
                self.free.push(entry.native);
                self.retired.put(*handle, entry.label);
            }
        }
        retirable.len()
    }

    /// Forgets the signals and waits recorded into `command_buffer`, which
    /// never reached the GPU. Later waits on its fences fail with
    /// [`EncoderError::WaitWithoutSignal`]. Returns the number of fences dropped.
    pub(crate) fn abandon(&mut self, command_buffer: CommandBufferId) -> usize {
        let abandoned: SmallVec<[FenceHandle; 16]> = self
            .live
            .iter()
            .filter(|(_, entry)| {
                matches!(
                    entry.state,
                    FenceState::Signaled { command_buffer: signaler, .. } if signaler == command_buffer
                )
            })
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &abandoned {
            if let Some(entry) = self.live.remove(handle) {
                tracing::debug!(fence = %handle, label = %entry.label, %command_buffer, "abandoned fence");
                self.free.push(entry.native);
                self.abandoned.put(*handle, entry.label);
            }
        }
        for entry in self.live.values_mut() {
            entry.waiters.retain(|waiter| *waiter != command_buffer);
        }
        abandoned.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Forgets every fence. Only valid once the GPU is idle and no encoder is open.
    pub(crate) fn reset(&mut self) {
        let live = std::mem::take(&mut self.live);
        self.free.extend(live.into_values().map(|entry| entry.native));
        self.retired.clear();
        self.abandoned.clear();
        self.completed_through = None;
    }
}
