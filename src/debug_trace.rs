use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, EncoderError};
use crate::id::{EncoderId, ResourceId};

/// Diagnostic instrumentation level. Each level includes everything the
/// levels below it do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum DebugVerbosity {
    #[default]
    Off,
    /// Debug groups and signposts are recorded and forwarded to the device.
    LogGroups,
    /// Missing fence dependencies between encoders are detected.
    Validate,
    /// Every encoder, pipeline, draw, dispatch and copy is recorded.
    LogOperations,
    /// Every commit blocks until the GPU finished the buffer.
    WaitForComplete,
}

impl DebugVerbosity {
    pub fn records_groups(self) -> bool {
        self >= DebugVerbosity::LogGroups
    }

    pub fn validates(self) -> bool {
        self >= DebugVerbosity::Validate
    }

    pub fn records_operations(self) -> bool {
        self >= DebugVerbosity::LogOperations
    }

    pub fn waits_on_commit(self) -> bool {
        self >= DebugVerbosity::WaitForComplete
    }
}

impl fmt::Display for DebugVerbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DebugVerbosity::Off => "off",
            DebugVerbosity::LogGroups => "log-groups",
            DebugVerbosity::Validate => "validate",
            DebugVerbosity::LogOperations => "log-operations",
            DebugVerbosity::WaitForComplete => "wait-for-complete",
        };
        f.write_str(name)
    }
}

impl FromStr for DebugVerbosity {
    type Err = ConfigError;

    /// Accepts the level names (`-` or `_` separated, any case) or `0`..`4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "0" | "off" | "none" => Ok(DebugVerbosity::Off),
            "1" | "log-groups" | "groups" => Ok(DebugVerbosity::LogGroups),
            "2" | "validate" | "validation" => Ok(DebugVerbosity::Validate),
            "3" | "log-operations" | "operations" => Ok(DebugVerbosity::LogOperations),
            "4" | "wait-for-complete" | "wait" => Ok(DebugVerbosity::WaitForComplete),
            _ => Err(ConfigError::UnknownVerbosity(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugCommandKind {
    RenderEncoder,
    ComputeEncoder,
    BlitEncoder,
    EndEncoder,
    Pipeline,
    Draw,
    Dispatch,
    Blit,
    Signpost,
    PushGroup,
    PopGroup,
}

impl DebugCommandKind {
    fn is_group_marker(self) -> bool {
        matches!(
            self,
            DebugCommandKind::Signpost | DebugCommandKind::PushGroup | DebugCommandKind::PopGroup
        )
    }
}

/// One entry of the ordered command log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugCommand {
    pub kind: DebugCommandKind,
    pub label: String,
}

impl fmt::Display for DebugCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.label)
    }
}

/// Problems found by validation that do not abort encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugWarning {
    /// `reader` accessed `resource` after `writer` wrote it, without waiting
    /// on `writer`'s fence.
    MissingDependency {
        resource: ResourceId,
        resource_label: Option<String>,
        writer: EncoderId,
        writer_label: String,
        reader: EncoderId,
        reader_label: String,
    },
}

impl fmt::Display for DebugWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugWarning::MissingDependency {
                resource,
                resource_label,
                writer,
                writer_label,
                reader,
                reader_label,
            } => {
                write!(f, "missing dependency: {reader} '{reader_label}' uses {resource}")?;
                if let Some(label) = resource_label {
                    write!(f, " '{label}'")?;
                }
                write!(
                    f,
                    " written by {writer} '{writer_label}' without waiting on its fence"
                )
            }
        }
    }
}

/// Per command buffer log of encoded work and open debug groups.
#[derive(Debug, Clone)]
pub(crate) struct DebugRecorder {
    verbosity: DebugVerbosity,
    commands: Vec<DebugCommand>,
    warnings: Vec<DebugWarning>,
    groups: Vec<String>,
}

impl DebugRecorder {
    pub(crate) fn new(verbosity: DebugVerbosity) -> Self {
        Self {
            verbosity,
            commands: Vec::new(),
            warnings: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub(crate) fn verbosity(&self) -> DebugVerbosity {
        self.verbosity
    }

    pub(crate) fn record(&mut self, kind: DebugCommandKind, label: impl Into<String>) {
        let enabled = if kind.is_group_marker() {
            self.verbosity.records_groups()
        } else {
            self.verbosity.records_operations()
        };
        if enabled {
            self.commands.push(DebugCommand {
                kind,
                label: label.into(),
            });
        }
    }

    /// The group stack is tracked at every level so unbalanced pops are
    /// always caught; only the log entry depends on the verbosity.
    pub(crate) fn push_group(&mut self, label: &str) {
        self.groups.push(label.to_owned());
        self.record(DebugCommandKind::PushGroup, label);
    }

    pub(crate) fn pop_group(&mut self) -> Result<String, EncoderError> {
        let label = self.groups.pop().ok_or(EncoderError::DebugGroupUnderflow)?;
        self.record(DebugCommandKind::PopGroup, label.as_str());
        Ok(label)
    }

    pub(crate) fn open_groups(&self) -> &[String] {
        &self.groups
    }

    pub(crate) fn warn(&mut self, warning: DebugWarning) {
        self.warnings.push(warning);
    }

    pub(crate) fn commands(&self) -> &[DebugCommand] {
        &self.commands
    }

    pub(crate) fn warnings(&self) -> &[DebugWarning] {
        &self.warnings
    }
}
