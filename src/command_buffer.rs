use std::any::Any;
use std::fmt;

use ahash::AHashMap;

use crate::backend::{Device, NativeResource};
use crate::debug_trace::DebugRecorder;
use crate::id::{CommandBufferId, ResourceId};
use crate::metrics::CommandBufferStats;

/// A resource bound into a command buffer. The clone keeps the native object
/// alive until the buffer's completion has been processed.
struct TrackedResource {
    label: Option<String>,
    _keep_alive: Box<dyn Any + Send>,
}

/// Resources referenced by a command buffer, in first-use order.
#[derive(Default)]
pub(crate) struct TrackedResources {
    order: Vec<ResourceId>,
    entries: AHashMap<ResourceId, TrackedResource>,
}

impl TrackedResources {
    pub(crate) fn track<R: NativeResource>(&mut self, resource: &R) -> ResourceId {
        let id = resource.resource_id();
        if !self.entries.contains_key(&id) {
            self.order.push(id);
            self.entries.insert(
                id,
                TrackedResource {
                    label: resource.label().map(str::to_owned),
                    _keep_alive: Box::new(resource.clone()),
                },
            );
        }
        id
    }

    pub(crate) fn label(&self, id: ResourceId) -> Option<&str> {
        self.entries.get(&id).and_then(|entry| entry.label.as_deref())
    }

    #[cfg(test)]
    fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    fn iter(&self) -> impl Iterator<Item = (ResourceId, Option<&str>)> + '_ {
        self.order.iter().map(|id| (*id, self.label(*id)))
    }
}

/// A native command buffer plus everything that has to live as long as it does.
pub(crate) struct CommandBufferWrapper<D: Device> {
    pub(crate) id: CommandBufferId,
    pub(crate) label: String,
    pub(crate) native: D::CommandBuffer,
    pub(crate) recorder: DebugRecorder,
    pub(crate) resources: TrackedResources,
    pub(crate) stats: CommandBufferStats,
}

impl<D: Device> CommandBufferWrapper<D> {
    pub(crate) fn new(
        id: CommandBufferId,
        label: String,
        native: D::CommandBuffer,
        recorder: DebugRecorder,
    ) -> Self {
        Self {
            id,
            label,
            native,
            recorder,
            resources: TrackedResources::default(),
            stats: CommandBufferStats::default(),
        }
    }
}

/// The post-mortem description: command log, open groups, warnings and the
/// resources the buffer kept alive.
impl<D: Device> fmt::Display for CommandBufferWrapper<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Command buffer {} '{}' (verbosity {})",
            self.id,
            self.label,
            self.recorder.verbosity()
        )?;

        let groups = self.recorder.open_groups();
        if !groups.is_empty() {
            writeln!(f, "Open debug groups: {}", groups.join(" > "))?;
        }

        let commands = self.recorder.commands();
        writeln!(f, "Commands ({}):", commands.len())?;
        for (index, command) in commands.iter().enumerate() {
            writeln!(f, "  {index:>4}: {command}")?;
        }

        let warnings = self.recorder.warnings();
        if !warnings.is_empty() {
            writeln!(f, "Warnings ({}):", warnings.len())?;
            for warning in warnings {
                writeln!(f, "  {warning}")?;
            }
        }

        writeln!(f, "Tracked resources ({}):", self.resources.len())?;
        for (id, label) in self.resources.iter() {
            match label {
                Some(label) => writeln!(f, "  {id} '{label}'")?,
                None => writeln!(f, "  {id}")?,
            }
        }
        Ok(())
    }
}
