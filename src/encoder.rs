//! Encoder state machine types.
//!
//! A context owns at most one [`ActiveEncoder`] at a time. Each variant carries
//! the binding tables for the shader stages it can address, so "binding outside
//! the matching state" is answered by a single `match`.

use std::fmt;

use smallvec::SmallVec;

use crate::backend::{Device, DeviceCapabilities, NativeResource};
use crate::error::EncoderError;
use crate::id::{EncoderId, FenceHandle, ResourceId};

/// Maximum number of color attachments in one render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Render,
    Compute,
    Blit,
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncoderKind::Render => "render",
            EncoderKind::Compute => "compute",
            EncoderKind::Blit => "blit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// How a bound resource is accessed by the shaders of the current encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    Read,
    Write,
    ReadWrite,
}

impl ResourceUsage {
    pub fn writes(self) -> bool {
        matches!(self, ResourceUsage::Write | ResourceUsage::ReadWrite)
    }
}

/// What the GPU does with an attachment's contents when the render pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreAction {
    DontCare,
    Store,
    MultisampleResolve,
    StoreAndMultisampleResolve,
}

impl StoreAction {
    /// Whether the action writes into the attachment's resolve texture.
    pub fn resolves(self) -> bool {
        matches!(
            self,
            StoreAction::MultisampleResolve | StoreAction::StoreAndMultisampleResolve
        )
    }

    /// Whether the attachment texture itself keeps its contents.
    pub fn stores(self) -> bool {
        matches!(
            self,
            StoreAction::Store | StoreAction::StoreAndMultisampleResolve
        )
    }
}

/// What the GPU does with an attachment's contents when the render pass starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadAction<V> {
    DontCare,
    Load,
    Clear(V),
}

impl<V> LoadAction<V> {
    pub fn loads(&self) -> bool {
        matches!(self, LoadAction::Load)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentSlot {
    Color(usize),
    Depth,
    Stencil,
}

impl fmt::Display for AttachmentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentSlot::Color(index) => write!(f, "color[{index}]"),
            AttachmentSlot::Depth => f.write_str("depth"),
            AttachmentSlot::Stencil => f.write_str("stencil"),
        }
    }
}

pub struct ColorAttachment<D: Device> {
    pub texture: D::Texture,
    pub resolve_texture: Option<D::Texture>,
    pub load: LoadAction<[f64; 4]>,
    /// `None` leaves the store action unresolved until `end_encoding`.
    pub store: Option<StoreAction>,
}

impl<D: Device> ColorAttachment<D> {
    pub fn new(texture: D::Texture) -> Self {
        Self {
            texture,
            resolve_texture: None,
            load: LoadAction::DontCare,
            store: None,
        }
    }

    pub fn with_resolve_texture(mut self, texture: D::Texture) -> Self {
        self.resolve_texture = Some(texture);
        self
    }

    pub fn with_load(mut self, load: LoadAction<[f64; 4]>) -> Self {
        self.load = load;
        self
    }

    pub fn with_store(mut self, store: StoreAction) -> Self {
        self.store = Some(store);
        self
    }
}

pub struct DepthAttachment<D: Device> {
    pub texture: D::Texture,
    pub resolve_texture: Option<D::Texture>,
    pub load: LoadAction<f32>,
    pub store: Option<StoreAction>,
}

impl<D: Device> DepthAttachment<D> {
    pub fn new(texture: D::Texture) -> Self {
        Self {
            texture,
            resolve_texture: None,
            load: LoadAction::DontCare,
            store: None,
        }
    }

    pub fn with_load(mut self, load: LoadAction<f32>) -> Self {
        self.load = load;
        self
    }

    pub fn with_store(mut self, store: StoreAction) -> Self {
        self.store = Some(store);
        self
    }
}

pub struct StencilAttachment<D: Device> {
    pub texture: D::Texture,
    pub load: LoadAction<u32>,
    pub store: Option<StoreAction>,
}

impl<D: Device> StencilAttachment<D> {
    pub fn new(texture: D::Texture) -> Self {
        Self {
            texture,
            load: LoadAction::DontCare,
            store: None,
        }
    }

    pub fn with_load(mut self, load: LoadAction<u32>) -> Self {
        self.load = load;
        self
    }

    pub fn with_store(mut self, store: StoreAction) -> Self {
        self.store = Some(store);
        self
    }
}

/// Attachments of one render pass.
pub struct RenderPassDescriptor<D: Device> {
    pub label: Option<String>,
    pub color_attachments: SmallVec<[ColorAttachment<D>; 4]>,
    pub depth_attachment: Option<DepthAttachment<D>>,
    pub stencil_attachment: Option<StencilAttachment<D>>,
}

impl<D: Device> Default for RenderPassDescriptor<D> {
    fn default() -> Self {
        Self {
            label: None,
            color_attachments: SmallVec::new(),
            depth_attachment: None,
            stencil_attachment: None,
        }
    }
}

impl<D: Device> RenderPassDescriptor<D> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn with_color(mut self, attachment: ColorAttachment<D>) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    pub fn with_depth(mut self, attachment: DepthAttachment<D>) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    pub fn with_stencil(mut self, attachment: StencilAttachment<D>) -> Self {
        self.stencil_attachment = Some(attachment);
        self
    }

    /// Every texture the pass writes, paired with whether its previous contents are loaded.
    pub(crate) fn attachment_accesses(&self) -> SmallVec<[(ResourceId, ResourceUsage); 8]> {
        let mut accesses = SmallVec::new();
        let usage = |loads: bool| {
            if loads {
                ResourceUsage::ReadWrite
            } else {
                ResourceUsage::Write
            }
        };
        for attachment in &self.color_attachments {
            accesses.push((
                attachment.texture.resource_id(),
                usage(attachment.load.loads()),
            ));
            if let Some(resolve) = &attachment.resolve_texture {
                accesses.push((resolve.resource_id(), ResourceUsage::Write));
            }
        }
        if let Some(depth) = &self.depth_attachment {
            accesses.push((depth.texture.resource_id(), usage(depth.load.loads())));
            if let Some(resolve) = &depth.resolve_texture {
                accesses.push((resolve.resource_id(), ResourceUsage::Write));
            }
        }
        if let Some(stencil) = &self.stencil_attachment {
            accesses.push((stencil.texture.resource_id(), usage(stencil.load.loads())));
        }
        accesses
    }
}

impl<D: Device> fmt::Debug for RenderPassDescriptor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassDescriptor")
            .field("label", &self.label)
            .field(
                "color_attachments",
                &self
                    .color_attachments
                    .iter()
                    .map(|attachment| (attachment.texture.resource_id(), attachment.store))
                    .collect::<Vec<_>>(),
            )
            .field(
                "depth_attachment",
                &self
                    .depth_attachment
                    .as_ref()
                    .map(|attachment| (attachment.texture.resource_id(), attachment.store)),
            )
            .field(
                "stencil_attachment",
                &self
                    .stencil_attachment
                    .as_ref()
                    .map(|attachment| (attachment.texture.resource_id(), attachment.store)),
            )
            .finish()
    }
}

/// Concrete store actions handed to the device when a render encoder ends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedStoreActions {
    pub colors: SmallVec<[StoreAction; MAX_COLOR_ATTACHMENTS]>,
    pub depth: Option<StoreAction>,
    pub stencil: Option<StoreAction>,
}

#[derive(Debug, Clone, Copy)]
struct AttachmentStore {
    action: Option<StoreAction>,
    has_resolve_target: bool,
}

impl AttachmentStore {
    fn set(&mut self, slot: AttachmentSlot, action: StoreAction) -> Result<(), EncoderError> {
        if action.resolves() && !self.has_resolve_target {
            return Err(EncoderError::MissingResolveTarget { attachment: slot });
        }
        self.action = Some(action);
        Ok(())
    }
}

/// Store actions of the open render pass, some of which may still be unknown.
#[derive(Debug, Clone)]
pub(crate) struct PendingStoreActions {
    colors: SmallVec<[AttachmentStore; MAX_COLOR_ATTACHMENTS]>,
    depth: Option<AttachmentStore>,
    stencil: Option<AttachmentStore>,
}

impl PendingStoreActions {
    pub(crate) fn from_descriptor<D: Device>(
        descriptor: &RenderPassDescriptor<D>,
    ) -> Result<Self, EncoderError> {
        let mut pending = Self {
            colors: descriptor
                .color_attachments
                .iter()
                .map(|attachment| AttachmentStore {
                    action: None,
                    has_resolve_target: attachment.resolve_texture.is_some(),
                })
                .collect(),
            depth: descriptor
                .depth_attachment
                .as_ref()
                .map(|attachment| AttachmentStore {
                    action: None,
                    has_resolve_target: attachment.resolve_texture.is_some(),
                }),
            stencil: descriptor
                .stencil_attachment
                .as_ref()
                .map(|_| AttachmentStore {
                    action: None,
                    has_resolve_target: false,
                }),
        };

        for (index, attachment) in descriptor.color_attachments.iter().enumerate() {
            if let Some(action) = attachment.store {
                pending.colors[index].set(AttachmentSlot::Color(index), action)?;
            }
        }
        if let (Some(store), Some(action)) = (
            pending.depth.as_mut(),
            descriptor.depth_attachment.as_ref().and_then(|a| a.store),
        ) {
            store.set(AttachmentSlot::Depth, action)?;
        }
        if let (Some(store), Some(action)) = (
            pending.stencil.as_mut(),
            descriptor.stencil_attachment.as_ref().and_then(|a| a.store),
        ) {
            store.set(AttachmentSlot::Stencil, action)?;
        }

        Ok(pending)
    }

    /// Applies caller-supplied store actions. Validates everything before
    /// changing anything so a rejected call leaves the pass untouched.
    pub(crate) fn apply(
        &mut self,
        colors: &[StoreAction],
        depth: Option<StoreAction>,
        stencil: Option<StoreAction>,
    ) -> Result<(), EncoderError> {
        let mut updated = self.clone();
        for (index, action) in colors.iter().enumerate() {
            let store = updated
                .colors
                .get_mut(index)
                .ok_or(EncoderError::UnknownAttachment {
                    attachment: AttachmentSlot::Color(index),
                })?;
            store.set(AttachmentSlot::Color(index), *action)?;
        }
        if let Some(action) = depth {
            updated
                .depth
                .as_mut()
                .ok_or(EncoderError::UnknownAttachment {
                    attachment: AttachmentSlot::Depth,
                })?
                .set(AttachmentSlot::Depth, action)?;
        }
        if let Some(action) = stencil {
            updated
                .stencil
                .as_mut()
                .ok_or(EncoderError::UnknownAttachment {
                    attachment: AttachmentSlot::Stencil,
                })?
                .set(AttachmentSlot::Stencil, action)?;
        }
        *self = updated;
        Ok(())
    }

    /// Returns the concrete store actions, or the first attachment still unresolved.
    pub(crate) fn resolve(&self) -> Result<ResolvedStoreActions, EncoderError> {
        let mut resolved = ResolvedStoreActions::default();
        for (index, store) in self.colors.iter().enumerate() {
            let action = store.action.ok_or(EncoderError::UnresolvedStoreAction {
                attachment: AttachmentSlot::Color(index),
            })?;
            resolved.colors.push(action);
        }
        if let Some(store) = &self.depth {
            resolved.depth = Some(store.action.ok_or(EncoderError::UnresolvedStoreAction {
                attachment: AttachmentSlot::Depth,
            })?);
        }
        if let Some(store) = &self.stencil {
            resolved.stencil = Some(store.action.ok_or(EncoderError::UnresolvedStoreAction {
                attachment: AttachmentSlot::Stencil,
            })?);
        }
        Ok(resolved)
    }
}

/// What a shader stage sees in one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBinding {
    Buffer {
        resource: ResourceId,
        offset: u64,
        usage: ResourceUsage,
    },
    /// Bytes uploaded inline with the command stream.
    InlineBytes { len: usize },
    /// Bytes copied into the transient ring and bound as a buffer.
    TransientBytes {
        resource: ResourceId,
        offset: u64,
        len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TextureBinding {
    pub(crate) resource: ResourceId,
    pub(crate) usage: ResourceUsage,
}

/// Slot tables for one shader stage.
#[derive(Debug, Clone)]
pub(crate) struct StageBindings {
    buffers: Vec<Option<BufferBinding>>,
    textures: Vec<Option<TextureBinding>>,
    samplers: Vec<Option<ResourceId>>,
}

impl StageBindings {
    pub(crate) fn new(caps: &DeviceCapabilities) -> Self {
        Self {
            buffers: vec![None; caps.max_buffer_slots],
            textures: vec![None; caps.max_texture_slots],
            samplers: vec![None; caps.max_sampler_slots],
        }
    }

    pub(crate) fn check_buffer_slot(
        &self,
        stage: ShaderStage,
        slot: usize,
    ) -> Result<(), EncoderError> {
        check_slot(stage, slot, self.buffers.len(), BindingKind::Buffer)
    }

    pub(crate) fn check_texture_slot(
        &self,
        stage: ShaderStage,
        slot: usize,
    ) -> Result<(), EncoderError> {
        check_slot(stage, slot, self.textures.len(), BindingKind::Texture)
    }

    pub(crate) fn check_sampler_slot(
        &self,
        stage: ShaderStage,
        slot: usize,
    ) -> Result<(), EncoderError> {
        check_slot(stage, slot, self.samplers.len(), BindingKind::Sampler)
    }

    /// Stores `binding` in `slot`. Returns `false` if the slot already held
    /// exactly this binding and the native bind can be skipped. Inline bytes
    /// always count as a change since their contents are not compared.
    pub(crate) fn bind_buffer(&mut self, slot: usize, binding: BufferBinding) -> bool {
        let unchanged = !matches!(binding, BufferBinding::InlineBytes { .. })
            && self.buffers[slot] == Some(binding);
        self.buffers[slot] = Some(binding);
        !unchanged
    }

    pub(crate) fn bind_texture(&mut self, slot: usize, binding: TextureBinding) -> bool {
        replace_slot(&mut self.textures[slot], binding)
    }

    pub(crate) fn bind_sampler(&mut self, slot: usize, sampler: ResourceId) -> bool {
        replace_slot(&mut self.samplers[slot], sampler)
    }

    pub(crate) fn buffer(&self, slot: usize) -> Option<BufferBinding> {
        self.buffers.get(slot).copied().flatten()
    }

    /// Caller-owned resources bound to this stage with their access mode.
    /// Transient bytes are excluded: the ring is never written by the GPU.
    pub(crate) fn resource_accesses(&self) -> impl Iterator<Item = (ResourceId, ResourceUsage)> + '_ {
        let buffers = self.buffers.iter().flatten().filter_map(|binding| match binding {
            BufferBinding::Buffer {
                resource, usage, ..
            } => Some((*resource, *usage)),
            BufferBinding::InlineBytes { .. } | BufferBinding::TransientBytes { .. } => None,
        });
        let textures = self
            .textures
            .iter()
            .flatten()
            .map(|binding| (binding.resource, binding.usage));
        buffers.chain(textures)
    }
}

fn replace_slot<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Buffer,
    Texture,
    Sampler,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingKind::Buffer => "buffer",
            BindingKind::Texture => "texture",
            BindingKind::Sampler => "sampler",
        };
        f.write_str(name)
    }
}

fn check_slot(
    stage: ShaderStage,
    slot: usize,
    capacity: usize,
    binding: BindingKind,
) -> Result<(), EncoderError> {
    if slot >= capacity {
        return Err(EncoderError::SlotOutOfRange {
            stage,
            slot,
            capacity,
            binding,
        });
    }
    Ok(())
}

#[derive(Debug)]
pub(crate) struct RenderState {
    pub(crate) store_actions: PendingStoreActions,
    pub(crate) attachments: SmallVec<[(ResourceId, ResourceUsage); 8]>,
    pub(crate) attachments_checked: bool,
    pub(crate) vertex: StageBindings,
    pub(crate) fragment: StageBindings,
    pub(crate) pipeline: Option<ResourceId>,
}

#[derive(Debug)]
pub(crate) struct ComputeState {
    pub(crate) bindings: StageBindings,
    pub(crate) pipeline: Option<ResourceId>,
}

/// The sub-encoder currently recording. Exactly one variant is live while an
/// encoder is open; `None` in the owning `Option` is the idle state.
#[derive(Debug)]
pub(crate) enum ActiveEncoder {
    Render(RenderState),
    Compute(ComputeState),
    Blit,
}

impl ActiveEncoder {
    pub(crate) fn kind(&self) -> EncoderKind {
        match self {
            ActiveEncoder::Render(_) => EncoderKind::Render,
            ActiveEncoder::Compute(_) => EncoderKind::Compute,
            ActiveEncoder::Blit => EncoderKind::Blit,
        }
    }

    /// Binding table for `stage`, or the reason the stage cannot be addressed.
    pub(crate) fn stage_bindings(&self, stage: ShaderStage) -> Result<&StageBindings, EncoderError> {
        match (self, stage) {
            (ActiveEncoder::Render(render), ShaderStage::Vertex) => Ok(&render.vertex),
            (ActiveEncoder::Render(render), ShaderStage::Fragment) => Ok(&render.fragment),
            (ActiveEncoder::Compute(compute), ShaderStage::Compute) => Ok(&compute.bindings),
            _ => Err(EncoderError::InvalidStage {
                stage,
                kind: self.kind(),
            }),
        }
    }

    pub(crate) fn stage_bindings_mut(
        &mut self,
        stage: ShaderStage,
    ) -> Result<&mut StageBindings, EncoderError> {
        let kind = self.kind();
        match (self, stage) {
            (ActiveEncoder::Render(render), ShaderStage::Vertex) => Ok(&mut render.vertex),
            (ActiveEncoder::Render(render), ShaderStage::Fragment) => Ok(&mut render.fragment),
            (ActiveEncoder::Compute(compute), ShaderStage::Compute) => Ok(&mut compute.bindings),
            _ => Err(EncoderError::InvalidStage { stage, kind }),
        }
    }
}

/// An encoder session: the sub-encoder state plus its fence bookkeeping.
#[derive(Debug)]
pub(crate) struct OpenEncoder {
    pub(crate) id: EncoderId,
    pub(crate) label: String,
    pub(crate) fence: FenceHandle,
    pub(crate) fence_updated: bool,
    pub(crate) waited: SmallVec<[FenceHandle; 4]>,
    pub(crate) state: ActiveEncoder,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockDevice, MockTexture};

    fn texture(device: &MockDevice, label: &str) -> MockTexture {
        device.create_texture(label)
    }

    #[test]
    fn store_actions_resolve_when_preset_on_descriptor() {
        let device = MockDevice::new();
        let descriptor = RenderPassDescriptor::<MockDevice>::new("main")
            .with_color(ColorAttachment::new(texture(&device, "color")).with_store(StoreAction::Store))
            .with_depth(DepthAttachment::new(texture(&device, "depth")).with_store(StoreAction::DontCare));

        let pending = PendingStoreActions::from_descriptor(&descriptor).unwrap();
        let resolved = pending.resolve().unwrap();

        assert_eq!(resolved.colors.as_slice(), &[StoreAction::Store]);
        assert_eq!(resolved.depth, Some(StoreAction::DontCare));
        assert_eq!(resolved.stencil, None);
    }

    #[test]
    fn unresolved_attachment_is_reported_by_slot() {
        let device = MockDevice::new();
        let descriptor = RenderPassDescriptor::<MockDevice>::new("main")
            .with_color(ColorAttachment::new(texture(&device, "a")).with_store(StoreAction::Store))
            .with_color(ColorAttachment::new(texture(&device, "b")));

        let pending = PendingStoreActions::from_descriptor(&descriptor).unwrap();

        assert_eq!(
            pending.resolve(),
            Err(EncoderError::UnresolvedStoreAction {
                attachment: AttachmentSlot::Color(1)
            })
        );
    }

    #[test]
    fn rejected_store_actions_leave_pending_state_unchanged() {
        let device = MockDevice::new();
        let descriptor = RenderPassDescriptor::<MockDevice>::new("main")
            .with_color(ColorAttachment::new(texture(&device, "color")));
        let mut pending = PendingStoreActions::from_descriptor(&descriptor).unwrap();

        let result = pending.apply(&[StoreAction::Store], Some(StoreAction::Store), None);

        assert_eq!(
            result,
            Err(EncoderError::UnknownAttachment {
                attachment: AttachmentSlot::Depth
            })
        );
        assert!(pending.resolve().is_err());
    }

    #[test]
    fn resolve_actions_require_a_resolve_texture() {
        let device = MockDevice::new();
        let descriptor = RenderPassDescriptor::<MockDevice>::new("msaa")
            .with_color(ColorAttachment::new(texture(&device, "msaa")));
        let mut pending = PendingStoreActions::from_descriptor(&descriptor).unwrap();

        assert_eq!(
            pending.apply(&[StoreAction::MultisampleResolve], None, None),
            Err(EncoderError::MissingResolveTarget {
                attachment: AttachmentSlot::Color(0)
            })
        );

        let descriptor = RenderPassDescriptor::<MockDevice>::new("msaa").with_color(
            ColorAttachment::new(texture(&device, "msaa"))
                .with_resolve_texture(texture(&device, "resolved")),
        );
        let mut pending = PendingStoreActions::from_descriptor(&descriptor).unwrap();
        pending
            .apply(&[StoreAction::StoreAndMultisampleResolve], None, None)
            .unwrap();
        assert_eq!(
            pending.resolve().unwrap().colors.as_slice(),
            &[StoreAction::StoreAndMultisampleResolve]
        );
    }

    #[test]
    fn compute_state_rejects_render_stages() {
        let caps = DeviceCapabilities::default();
        let state = ActiveEncoder::Compute(ComputeState {
            bindings: StageBindings::new(&caps),
            pipeline: None,
        });

        assert!(state.stage_bindings(ShaderStage::Compute).is_ok());
        assert_eq!(
            state.stage_bindings(ShaderStage::Fragment).err(),
            Some(EncoderError::InvalidStage {
                stage: ShaderStage::Fragment,
                kind: EncoderKind::Compute
            })
        );
    }

    #[test]
    fn slot_limits_follow_device_capabilities() {
        let caps = DeviceCapabilities::default();
        let bindings = StageBindings::new(&caps);

        assert!(bindings
            .check_buffer_slot(ShaderStage::Vertex, caps.max_buffer_slots - 1)
            .is_ok());
        assert_eq!(
            bindings.check_sampler_slot(ShaderStage::Vertex, caps.max_sampler_slots),
            Err(EncoderError::SlotOutOfRange {
                stage: ShaderStage::Vertex,
                slot: caps.max_sampler_slots,
                capacity: caps.max_sampler_slots,
                binding: BindingKind::Sampler,
            })
        );
    }
}
