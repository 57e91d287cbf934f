//! Recording device for tests and benchmarks.
//!
//! Every native call is recorded per command buffer. Committed buffers are
//! queued and only "execute" when the test drives the simulated GPU with
//! [`MockDevice::complete_next`] / [`MockDevice::complete_all`], in commit
//! order. Execution replays fence updates and waits against a per-fence
//! signal count, so a wait that no earlier encoder signalled shows up as a
//! hang, and applies buffer copies and fills so transient data can be read
//! back.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::AHashMap;

use super::{
    BlitOp, CompletionHandler, CompletionStatus, Device, DeviceCapabilities, IndexedDraw,
    NativeCommandBuffer, NativeResource,
};
use crate::encoder::{RenderPassDescriptor, ResolvedStoreActions, ShaderStage, StoreAction};
use crate::error::DeviceError;
use crate::id::ResourceId;

static NEXT_MOCK_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_MOCK_ID.fetch_add(1, Ordering::Relaxed)
}

macro_rules! mock_resource {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            id: ResourceId,
            label: Arc<str>,
        }

        impl $name {
            fn new(label: &str) -> Self {
                Self {
                    id: ResourceId(next_id()),
                    label: Arc::from(label),
                }
            }
        }

        impl NativeResource for $name {
            fn resource_id(&self) -> ResourceId {
                self.id
            }

            fn label(&self) -> Option<&str> {
                Some(&*self.label)
            }
        }
    };
}

mock_resource!(
    /// Backed by a byte vector owned by the device.
    MockBuffer
);
mock_resource!(MockTexture);
mock_resource!(MockSampler);
mock_resource!(MockRenderPipeline);
mock_resource!(MockComputePipeline);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFence {
    pub id: u64,
    pub label: String,
}

/// One recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    BeginRender {
        label: String,
        color_stores: Vec<Option<StoreAction>>,
    },
    BeginCompute {
        label: String,
    },
    BeginBlit {
        label: String,
    },
    SetRenderPipeline(ResourceId),
    SetComputePipeline(ResourceId),
    SetBuffer {
        stage: ShaderStage,
        slot: usize,
        buffer: ResourceId,
        offset: u64,
    },
    SetBytes {
        stage: ShaderStage,
        slot: usize,
        bytes: Vec<u8>,
    },
    SetTexture {
        stage: ShaderStage,
        slot: usize,
        texture: ResourceId,
    },
    SetSampler {
        stage: ShaderStage,
        slot: usize,
        sampler: ResourceId,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        index_buffer: ResourceId,
        indices: Range<u32>,
        instances: Range<u32>,
    },
    Dispatch([u32; 3]),
    CopyBuffer {
        source: ResourceId,
        source_offset: u64,
        destination: ResourceId,
        destination_offset: u64,
        size: u64,
    },
    CopyTexture {
        source: ResourceId,
        destination: ResourceId,
    },
    CopyBufferToTexture {
        source: ResourceId,
        destination: ResourceId,
    },
    FillBuffer {
        buffer: ResourceId,
        range: Range<u64>,
        value: u8,
    },
    UpdateFence(u64),
    WaitForFence(u64),
    SetStoreActions(ResolvedStoreActions),
    EndEncoding,
    PushDebugGroup(String),
    PopDebugGroup,
    Signpost(String),
}

/// A committed command buffer as the device saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct MockSubmission {
    pub sequence: u64,
    pub label: String,
    pub commands: Vec<MockCommand>,
}

/// Fence traffic in GPU execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceEvent {
    Signal {
        fence: u64,
        encoder: String,
        submission: u64,
    },
    Wait {
        fence: u64,
        encoder: String,
        submission: u64,
        /// Encoder whose signal satisfied the wait; `None` is a GPU hang.
        signaled_by: Option<String>,
    },
}

struct PendingSubmission {
    sequence: u64,
    commands: Vec<MockCommand>,
    handlers: Vec<CompletionHandler>,
}

#[derive(Default)]
struct MockState {
    buffers: AHashMap<ResourceId, Vec<u8>>,
    pending: VecDeque<PendingSubmission>,
    history: Vec<MockSubmission>,
    completed: Vec<(u64, CompletionStatus)>,
    fence_signals: AHashMap<u64, String>,
    fence_timeline: Vec<FenceEvent>,
    next_sequence: u64,
    executed_through: u64,
    inject_failure: Option<String>,
    reject_commit: Option<String>,
    stalled: bool,
}

/// Cheap to clone; clones share the same simulated GPU.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    capabilities: DeviceCapabilities,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities::default())
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            capabilities,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the recorded state from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_buffer(&self, label: &str, size: u64) -> MockBuffer {
        let buffer = MockBuffer::new(label);
        self.state()
            .buffers
            .insert(buffer.id, vec![0; size as usize]);
        buffer
    }

    pub fn create_texture(&self, label: &str) -> MockTexture {
        MockTexture::new(label)
    }

    pub fn create_sampler(&self, label: &str) -> MockSampler {
        MockSampler::new(label)
    }

    pub fn create_render_pipeline(&self, label: &str) -> MockRenderPipeline {
        MockRenderPipeline::new(label)
    }

    pub fn create_compute_pipeline(&self, label: &str) -> MockComputePipeline {
        MockComputePipeline::new(label)
    }

    /// Current contents of a buffer, as the GPU would see them.
    pub fn buffer_contents(&self, buffer: ResourceId) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer).cloned()
    }

    /// Every committed buffer in commit order, executed or not.
    pub fn submissions(&self) -> Vec<MockSubmission> {
        self.state().history.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Completion statuses in execution order, keyed by submission sequence.
    pub fn completed(&self) -> Vec<(u64, CompletionStatus)> {
        self.state().completed.clone()
    }

    pub fn fence_timeline(&self) -> Vec<FenceEvent> {
        self.state().fence_timeline.clone()
    }

    /// Makes the next executed buffer report a device fault.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state().inject_failure = Some(message.into());
    }

    /// Makes the next `commit` fail with [`DeviceError::Lost`] without queueing the buffer.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        self.state().reject_commit = Some(message.into());
    }

    /// While stalled, nothing executes and blocking waits time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    /// Executes the oldest committed buffer. Returns `false` if none is pending
    /// or the device is stalled.
    pub fn complete_next(&self) -> bool {
        let (submission, status) = {
            let mut state = self.state();
            if state.stalled {
                return false;
            }
            let Some(submission) = state.pending.pop_front() else {
                return false;
            };
            let mut status = state.execute(&submission);
            if let Some(message) = state.inject_failure.take() {
                status = CompletionStatus::Error(message);
            }
            state.executed_through = submission.sequence;
            state.completed.push((submission.sequence, status.clone()));
            (submission, status)
        };

        // Handlers run without the lock held, like a driver callback thread would.
        for handler in submission.handlers {
            handler(status.clone());
        }
        true
    }

    pub fn complete_all(&self) -> usize {
        let mut executed = 0;
        while self.complete_next() {
            executed += 1;
        }
        executed
    }

    /// Runs [`complete_all`](Self::complete_all) on another thread, so completion
    /// handlers fire off the encoding thread.
    pub fn complete_all_on_thread(&self) -> JoinHandle<usize> {
        let device = self.clone();
        std::thread::spawn(move || device.complete_all())
    }

    fn is_executed(&self, sequence: u64) -> bool {
        self.state().executed_through >= sequence
    }
}

impl MockState {
    fn execute(&mut self, submission: &PendingSubmission) -> CompletionStatus {
        let mut encoder = String::new();
        let mut hang = None;

        for command in &submission.commands {
            match command {
                MockCommand::BeginRender { label, .. }
                | MockCommand::BeginCompute { label }
                | MockCommand::BeginBlit { label } => encoder.clone_from(label),
                MockCommand::UpdateFence(fence) => {
                    self.fence_signals.insert(*fence, encoder.clone());
                    self.fence_timeline.push(FenceEvent::Signal {
                        fence: *fence,
                        encoder: encoder.clone(),
                        submission: submission.sequence,
                    });
                }
                MockCommand::WaitForFence(fence) => {
                    let signaled_by = self.fence_signals.get(fence).cloned();
                    if signaled_by.is_none() && hang.is_none() {
                        hang = Some(format!(
                            "encoder '{encoder}' waited on fence {fence} that was never signaled"
                        ));
                    }
                    self.fence_timeline.push(FenceEvent::Wait {
                        fence: *fence,
                        encoder: encoder.clone(),
                        submission: submission.sequence,
                        signaled_by,
                    });
                }
                MockCommand::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    let data = self.buffers.get(source).map(|contents| {
                        read_range(contents, *source_offset..source_offset + size)
                    });
                    if let (Some(data), Some(target)) = (data, self.buffers.get_mut(destination)) {
                        write_range(target, *destination_offset, &data);
                    }
                }
                MockCommand::FillBuffer {
                    buffer,
                    range,
                    value,
                } => {
                    if let Some(target) = self.buffers.get_mut(buffer) {
                        let fill = vec![*value; (range.end - range.start) as usize];
                        write_range(target, range.start, &fill);
                    }
                }
                _ => {}
            }
        }

        match hang {
            Some(message) => CompletionStatus::Error(message),
            None => CompletionStatus::Completed,
        }
    }
}

fn read_range(contents: &[u8], range: Range<u64>) -> Vec<u8> {
    let end = (range.end as usize).min(contents.len());
    let start = (range.start as usize).min(end);
    contents[start..end].to_vec()
}

fn write_range(target: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let start = offset as usize;
    let end = start + data.len();
    if target.len() < end {
        target.resize(end, 0);
    }
    target[start..end].copy_from_slice(data);
}

impl Device for MockDevice {
    type Buffer = MockBuffer;
    type Texture = MockTexture;
    type Sampler = MockSampler;
    type RenderPipeline = MockRenderPipeline;
    type ComputePipeline = MockComputePipeline;
    type Fence = MockFence;
    type CommandBuffer = MockCommandBuffer;

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.clone()
    }

    fn create_transient_buffer(&self, label: &str, size: u64) -> Result<MockBuffer, DeviceError> {
        Ok(self.create_buffer(label, size))
    }

    fn write_buffer(&self, buffer: &MockBuffer, offset: u64, data: &[u8]) {
        let mut state = self.state();
        let target = state.buffers.entry(buffer.id).or_default();
        write_range(target, offset, data);
    }

    fn create_fence(&self, label: &str) -> MockFence {
        MockFence {
            id: next_id(),
            label: label.to_owned(),
        }
    }

    fn new_command_buffer(&self, label: &str) -> Result<MockCommandBuffer, DeviceError> {
        Ok(MockCommandBuffer {
            device: self.clone(),
            label: label.to_owned(),
            commands: Vec::new(),
            handlers: Vec::new(),
            sequence: None,
        })
    }
}

pub struct MockCommandBuffer {
    device: MockDevice,
    label: String,
    commands: Vec<MockCommand>,
    handlers: Vec<CompletionHandler>,
    sequence: Option<u64>,
}

impl MockCommandBuffer {
    /// Calls recorded so far on this buffer.
    pub fn commands(&self) -> &[MockCommand] {
        &self.commands
    }

    fn record(&mut self, command: MockCommand) {
        self.commands.push(command);
    }
}

impl NativeCommandBuffer<MockDevice> for MockCommandBuffer {
    fn begin_render(
        &mut self,
        label: &str,
        descriptor: &RenderPassDescriptor<MockDevice>,
    ) -> Result<(), DeviceError> {
        let color_stores = descriptor
            .color_attachments
            .iter()
            .map(|attachment| attachment.store)
            .collect();
        self.record(MockCommand::BeginRender {
            label: label.to_owned(),
            color_stores,
        });
        Ok(())
    }

    fn begin_compute(&mut self, label: &str) -> Result<(), DeviceError> {
        self.record(MockCommand::BeginCompute {
            label: label.to_owned(),
        });
        Ok(())
    }

    fn begin_blit(&mut self, label: &str) -> Result<(), DeviceError> {
        self.record(MockCommand::BeginBlit {
            label: label.to_owned(),
        });
        Ok(())
    }

    fn set_render_pipeline(&mut self, pipeline: &MockRenderPipeline) {
        self.record(MockCommand::SetRenderPipeline(pipeline.id));
    }

    fn set_compute_pipeline(&mut self, pipeline: &MockComputePipeline) {
        self.record(MockCommand::SetComputePipeline(pipeline.id));
    }

    fn set_buffer(&mut self, stage: ShaderStage, slot: usize, buffer: &MockBuffer, offset: u64) {
        self.record(MockCommand::SetBuffer {
            stage,
            slot,
            buffer: buffer.id,
            offset,
        });
    }

    fn set_bytes(&mut self, stage: ShaderStage, slot: usize, bytes: &[u8]) {
        self.record(MockCommand::SetBytes {
            stage,
            slot,
            bytes: bytes.to_vec(),
        });
    }

    fn set_texture(&mut self, stage: ShaderStage, slot: usize, texture: &MockTexture) {
        self.record(MockCommand::SetTexture {
            stage,
            slot,
            texture: texture.id,
        });
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: usize, sampler: &MockSampler) {
        self.record(MockCommand::SetSampler {
            stage,
            slot,
            sampler: sampler.id,
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<(), DeviceError> {
        self.record(MockCommand::Draw {
            vertices,
            instances,
        });
        Ok(())
    }

    fn draw_indexed(&mut self, draw: &IndexedDraw<'_, MockDevice>) -> Result<(), DeviceError> {
        self.record(MockCommand::DrawIndexed {
            index_buffer: draw.index_buffer.id,
            indices: draw.indices.clone(),
            instances: draw.instances.clone(),
        });
        Ok(())
    }

    fn dispatch(&mut self, workgroups: [u32; 3]) -> Result<(), DeviceError> {
        self.record(MockCommand::Dispatch(workgroups));
        Ok(())
    }

    fn copy(&mut self, op: &BlitOp<'_, MockDevice>) -> Result<(), DeviceError> {
        let command = match op {
            BlitOp::BufferToBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } => MockCommand::CopyBuffer {
                source: source.id,
                source_offset: *source_offset,
                destination: destination.id,
                destination_offset: *destination_offset,
                size: *size,
            },
            BlitOp::TextureToTexture {
                source,
                destination,
                ..
            } => MockCommand::CopyTexture {
                source: source.id,
                destination: destination.id,
            },
            BlitOp::BufferToTexture {
                source,
                destination,
                ..
            } => MockCommand::CopyBufferToTexture {
                source: source.id,
                destination: destination.id,
            },
            BlitOp::FillBuffer {
                buffer,
                range,
                value,
            } => MockCommand::FillBuffer {
                buffer: buffer.id,
                range: range.clone(),
                value: *value,
            },
        };
        self.record(command);
        Ok(())
    }

    fn update_fence(&mut self, fence: &MockFence) {
        self.record(MockCommand::UpdateFence(fence.id));
    }

    fn wait_for_fence(&mut self, fence: &MockFence) {
        self.record(MockCommand::WaitForFence(fence.id));
    }

    fn set_store_actions(&mut self, actions: &ResolvedStoreActions) {
        self.record(MockCommand::SetStoreActions(actions.clone()));
    }

    fn end_encoding(&mut self) -> Result<(), DeviceError> {
        self.record(MockCommand::EndEncoding);
        Ok(())
    }

    fn push_debug_group(&mut self, label: &str) {
        self.record(MockCommand::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.record(MockCommand::PopDebugGroup);
    }

    fn insert_signpost(&mut self, label: &str) {
        self.record(MockCommand::Signpost(label.to_owned()));
    }

    fn add_completed_handler(&mut self, handler: CompletionHandler) {
        self.handlers.push(handler);
    }

    fn commit(&mut self) -> Result<(), DeviceError> {
        if self.sequence.is_some() {
            return Err(DeviceError::InvalidUsage("command buffer committed twice"));
        }
        let mut state = self.device.state();
        if let Some(message) = state.reject_commit.take() {
            return Err(DeviceError::Lost(message));
        }
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        state.history.push(MockSubmission {
            sequence,
            label: self.label.clone(),
            commands: self.commands.clone(),
        });
        state.pending.push_back(PendingSubmission {
            sequence,
            commands: std::mem::take(&mut self.commands),
            handlers: std::mem::take(&mut self.handlers),
        });
        self.sequence = Some(sequence);
        Ok(())
    }

    /// Executes pending work on the calling thread until this buffer has run.
    ///
    /// Unlike a real device, a stalled mock never blocks: even with `None`,
    /// which would wait forever, it returns [`DeviceError::Timeout`]
    /// (carrying `Duration::MAX`) so a stalled test fails instead of hanging.
    fn wait_until_completed(&mut self, timeout: Option<Duration>) -> Result<(), DeviceError> {
        let Some(sequence) = self.sequence else {
            return Err(DeviceError::InvalidUsage(
                "wait_until_completed called before commit",
            ));
        };
        while !self.device.is_executed(sequence) {
            if !self.device.complete_next() {
                // Another thread may be executing it; a stalled device never finishes.
                if self.device.state().stalled {
                    return Err(DeviceError::Timeout(timeout.unwrap_or(Duration::MAX)));
                }
                std::thread::yield_now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn commit_with_handler(
        device: &MockDevice,
        label: &str,
        record: impl FnOnce(&mut MockCommandBuffer),
    ) -> mpsc::Receiver<CompletionStatus> {
        let mut buffer = device.new_command_buffer(label).unwrap();
        record(&mut buffer);
        let (sender, receiver) = mpsc::channel();
        buffer.add_completed_handler(Box::new(move |status| {
            let _ = sender.send(status);
        }));
        buffer.commit().unwrap();
        receiver
    }

    #[test]
    fn buffers_execute_in_commit_order() {
        let device = MockDevice::new();
        let first = commit_with_handler(&device, "first", |_| {});
        let second = commit_with_handler(&device, "second", |_| {});

        assert_eq!(device.pending_submissions(), 2);
        assert!(device.complete_next());
        assert_eq!(first.try_recv(), Ok(CompletionStatus::Completed));
        assert!(second.try_recv().is_err());

        assert_eq!(device.complete_all(), 1);
        assert_eq!(second.try_recv(), Ok(CompletionStatus::Completed));
    }

    #[test]
    fn wait_on_unsignaled_fence_is_reported_as_hang() {
        let device = MockDevice::new();
        let fence = device.create_fence("orphan");
        let status = commit_with_handler(&device, "hang", |buffer| {
            buffer.begin_compute("reader").unwrap();
            buffer.wait_for_fence(&fence);
            buffer.end_encoding().unwrap();
        });

        device.complete_all();

        assert!(status.try_recv().unwrap().is_error());
        assert!(matches!(
            device.fence_timeline().as_slice(),
            [FenceEvent::Wait { signaled_by: None, .. }]
        ));
    }

    #[test]
    fn injected_failure_surfaces_in_completion_status() {
        let device = MockDevice::new();
        device.fail_next("page fault");
        let status = commit_with_handler(&device, "faulty", |_| {});

        device.complete_all();

        assert_eq!(
            status.try_recv(),
            Ok(CompletionStatus::Error("page fault".to_owned()))
        );
    }

    #[test]
    fn rejected_commit_queues_nothing() {
        let device = MockDevice::new();
        device.fail_next_commit("device removed");
        let mut buffer = device.new_command_buffer("rejected").unwrap();

        assert_eq!(
            buffer.commit(),
            Err(DeviceError::Lost("device removed".to_owned()))
        );
        assert_eq!(device.pending_submissions(), 0);
        assert!(device.submissions().is_empty());

        let mut next = device.new_command_buffer("accepted").unwrap();
        assert_eq!(next.commit(), Ok(()));
        assert_eq!(device.pending_submissions(), 1);
    }

    #[test]
    fn fill_and_copy_apply_at_execution_time() {
        let device = MockDevice::new();
        let source = device.create_buffer("src", 8);
        let destination = device.create_buffer("dst", 8);
        let _ = commit_with_handler(&device, "blit", |buffer| {
            buffer.begin_blit("copy").unwrap();
            buffer
                .copy(&BlitOp::FillBuffer {
                    buffer: &source,
                    range: 0..4,
                    value: 7,
                })
                .unwrap();
            buffer
                .copy(&BlitOp::BufferToBuffer {
                    source: &source,
                    source_offset: 0,
                    destination: &destination,
                    destination_offset: 4,
                    size: 4,
                })
                .unwrap();
            buffer.end_encoding().unwrap();
        });

        assert_eq!(device.buffer_contents(destination.resource_id()), Some(vec![0; 8]));
        device.complete_all();
        assert_eq!(
            device.buffer_contents(destination.resource_id()),
            Some(vec![0, 0, 0, 0, 7, 7, 7, 7])
        );
    }

    #[test]
    fn stalled_device_times_out_waits() {
        let device = MockDevice::new();
        let mut buffer = device.new_command_buffer("stuck").unwrap();
        buffer.commit().unwrap();
        device.set_stalled(true);

        assert_eq!(
            buffer.wait_until_completed(Some(Duration::from_millis(5))),
            Err(DeviceError::Timeout(Duration::from_millis(5)))
        );
        assert_eq!(
            buffer.wait_until_completed(None),
            Err(DeviceError::Timeout(Duration::MAX))
        );

        device.set_stalled(false);
        assert_eq!(buffer.wait_until_completed(None), Ok(()));
    }
}
