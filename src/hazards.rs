use ahash::{AHashMap, AHashSet};

use crate::debug_trace::DebugWarning;
use crate::encoder::ResourceUsage;
use crate::id::{CommandBufferId, EncoderId, FenceHandle, ResourceId};

#[derive(Debug, Clone)]
struct LastWrite {
    encoder: EncoderId,
    encoder_label: String,
    fence: FenceHandle,
    command_buffer: CommandBufferId,
}

/// The encoder performing an access, with the fences it has waited on so far.
pub(crate) struct Accessor<'a> {
    pub(crate) encoder: EncoderId,
    pub(crate) label: &'a str,
    pub(crate) fence: FenceHandle,
    pub(crate) command_buffer: CommandBufferId,
    pub(crate) waited: &'a [FenceHandle],
}

/// Tracks the last writer of every resource to spot accesses that are not
/// ordered after that write by a fence wait.
#[derive(Debug, Default)]
pub(crate) struct HazardTracker {
    last_writes: AHashMap<ResourceId, LastWrite>,
    reported: AHashSet<(ResourceId, EncoderId)>,
}

impl HazardTracker {
    /// Checks one access and records it if it writes. Each (resource, reader)
    /// pair is reported at most once.
    pub(crate) fn access(
        &mut self,
        resource: ResourceId,
        resource_label: Option<&str>,
        usage: ResourceUsage,
        accessor: &Accessor<'_>,
    ) -> Option<DebugWarning> {
        let warning = match self.last_writes.get(&resource) {
            Some(write)
                if write.encoder != accessor.encoder
                    && !accessor.waited.contains(&write.fence)
                    && self.reported.insert((resource, accessor.encoder)) =>
            {
                Some(DebugWarning::MissingDependency {
                    resource,
                    resource_label: resource_label.map(str::to_owned),
                    writer: write.encoder,
                    writer_label: write.encoder_label.clone(),
                    reader: accessor.encoder,
                    reader_label: accessor.label.to_owned(),
                })
            }
            _ => None,
        };

        if usage.writes() {
            self.last_writes.insert(
                resource,
                LastWrite {
                    encoder: accessor.encoder,
                    encoder_label: accessor.label.to_owned(),
                    fence: accessor.fence,
                    command_buffer: accessor.command_buffer,
                },
            );
        }
        warning
    }

    /// Drops writes recorded by command buffers up to `command_buffer`; the GPU
    /// has finished them, so later readers cannot race them.
    pub(crate) fn retire_completed(&mut self, command_buffer: CommandBufferId) {
        self.last_writes
            .retain(|_, write| write.command_buffer > command_buffer);
    }

    /// Drops writes recorded into a command buffer that never reached the GPU.
    pub(crate) fn abandon(&mut self, command_buffer: CommandBufferId) {
        self.last_writes
            .retain(|_, write| write.command_buffer != command_buffer);
    }

    pub(crate) fn tracked_resources(&self) -> usize {
        self.last_writes.len()
    }

    pub(crate) fn reset(&mut self) {
        self.last_writes.clear();
        self.reported.clear();
    }
}
