use std::time::Duration;

use crate::encoder::{AttachmentSlot, BindingKind, EncoderKind, ShaderStage};
use crate::id::{EncoderId, FenceHandle};

/// Transient ring capacity violations.
///
/// These indicate that the ring is sized too small for the scratch traffic of
/// the frames in flight; they are not expected to be recovered from at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("transient ring capacity must be greater than zero")]
    ZeroCapacity,
    #[error("transient allocations must be at least one byte")]
    ZeroSizedRequest,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(u64),
    #[error("transient allocation of {requested} bytes exceeds the ring capacity of {capacity} bytes")]
    RequestExceedsCapacity { requested: u64, capacity: u64 },
    #[error(
        "transient ring exhausted: requested {requested} bytes (alignment {alignment}), \
         {available} of {capacity} bytes not in flight"
    )]
    Exhausted {
        requested: u64,
        alignment: u64,
        available: u64,
        capacity: u64,
    },
}

/// Failures reported by a native device backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("timed out after {0:?} waiting for the GPU")]
    Timeout(Duration),
    #[error("device lost: {0}")]
    Lost(String),
    #[error("not supported by this device: {0}")]
    Unsupported(&'static str),
    #[error("invalid command buffer usage: {0}")]
    InvalidUsage(&'static str),
}

/// Rejected [`ContextConfig`](crate::ContextConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnvVar { key: &'static str, value: String },
    #[error("unknown debug verbosity: {0:?}")]
    UnknownVerbosity(String),
    #[error("validation error: {0}")]
    Validation(&'static str),
}

/// Protocol violations of the encoder layer.
///
/// Every variant is returned by the call that violated the protocol, before
/// that call changed any state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncoderError {
    #[error("no command buffer is active; call start_command_buffer first")]
    NoCommandBuffer,
    #[error("a command buffer is already active")]
    CommandBufferActive,
    #[error("cannot begin a {requested} encoder while a {active} encoder is open")]
    EncoderActive {
        active: EncoderKind,
        requested: EncoderKind,
    },
    #[error("cannot commit while a {active} encoder is open")]
    CommitWithOpenEncoder { active: EncoderKind },
    #[error("no encoder is open")]
    NoOpenEncoder,
    #[error("operation requires an open {expected} encoder, but {}", describe_open(.found))]
    NotEncoding {
        expected: EncoderKind,
        found: Option<EncoderKind>,
    },
    #[error("{kind} encoders have no {stage} stage")]
    InvalidStage {
        stage: ShaderStage,
        kind: EncoderKind,
    },
    #[error("{binding} slot {slot} is out of range for the {stage} stage (capacity {capacity})")]
    SlotOutOfRange {
        stage: ShaderStage,
        slot: usize,
        capacity: usize,
        binding: BindingKind,
    },
    #[error("render pass has {count} color attachments, at most {max} are supported")]
    TooManyColorAttachments { count: usize, max: usize },
    #[error("store action for {attachment} is unresolved")]
    UnresolvedStoreAction { attachment: AttachmentSlot },
    #[error("render pass has no {attachment} attachment")]
    UnknownAttachment { attachment: AttachmentSlot },
    #[error("resolve store action on {attachment} needs a resolve texture")]
    MissingResolveTarget { attachment: AttachmentSlot },
    #[error("store actions were fixed at begin_render; this device cannot defer them")]
    StoreActionsNotDeferrable,
    #[error("no {kind} pipeline is bound")]
    PipelineNotSet { kind: EncoderKind },
    #[error("{fence} was already updated by {updater}")]
    FenceAlreadyUpdated {
        fence: FenceHandle,
        updater: EncoderId,
    },
    #[error("{fence} has no pending update to wait on; the GPU would hang")]
    WaitWithoutSignal { fence: FenceHandle },
    #[error("{0} is not known to this context")]
    UnknownFence(FenceHandle),
    #[error("pop_debug_group called with no open debug group")]
    DebugGroupUnderflow,
    #[error("{open} debug group(s) still open at commit")]
    UnbalancedDebugGroups { open: usize },
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn describe_open(found: &Option<EncoderKind>) -> String {
    match found {
        Some(kind) => format!("a {kind} encoder is open"),
        None => "no encoder is open".to_owned(),
    }
}
