//! Typed views of the open encoder.
//!
//! A handle mutably borrows its [`Context`], so nothing else can be encoded
//! while it is alive. Dropping a handle does not end the encoder; call
//! `end_encoding` or pick it back up with `Context::resume_*`.

use std::ops::Range;

use bytemuck::Pod;

use super::Context;
use crate::backend::{BlitOp, Device, IndexedDraw, TextureRegion};
use crate::encoder::{ResourceUsage, ShaderStage, StoreAction};
use crate::error::EncoderError;
use crate::id::{EncoderId, FenceHandle};

macro_rules! common_encoder_methods {
    () => {
        /// Orders this encoder's remaining work after the encoder that signalled `fence`.
        pub fn wait_for_fence(&mut self, fence: FenceHandle) -> Result<(), EncoderError> {
            self.context.wait_for_fence(fence)
        }

        /// Signals this encoder's fence at the current point instead of at the end.
        pub fn update_fence(&mut self) -> Result<FenceHandle, EncoderError> {
            self.context.update_fence()
        }

        /// Ends the encoder. The returned fence is signalled once its work is done.
        pub fn end_encoding(&mut self) -> Result<FenceHandle, EncoderError> {
            self.context.end_encoding()
        }

        pub fn push_debug_group(&mut self, label: &str) -> Result<(), EncoderError> {
            self.context.push_debug_group(label)
        }

        pub fn pop_debug_group(&mut self) -> Result<(), EncoderError> {
            self.context.pop_debug_group()
        }

        pub fn insert_signpost(&mut self, label: &str) -> Result<(), EncoderError> {
            self.context.insert_signpost(label)
        }

        /// `None` once the encoder has ended.
        pub fn id(&self) -> Option<EncoderId> {
            self.context.current_encoder_id()
        }

        /// The fence this encoder signals.
        pub fn fence(&self) -> Option<FenceHandle> {
            self.context.current_fence()
        }
    };
}

pub struct RenderEncoder<'a, D: Device> {
    context: &'a mut Context<D>,
}

impl<'a, D: Device> RenderEncoder<'a, D> {
    pub(super) fn new(context: &'a mut Context<D>) -> Self {
        Self { context }
    }

    common_encoder_methods!();

    pub fn set_pipeline(&mut self, pipeline: &D::RenderPipeline) -> Result<(), EncoderError> {
        self.context.set_render_pipeline(pipeline)
    }

    pub fn set_buffer(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        buffer: &D::Buffer,
        offset: u64,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        self.context.set_buffer(stage, slot, buffer, offset, usage)
    }

    pub fn set_bytes(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        bytes: &[u8],
    ) -> Result<(), EncoderError> {
        self.context.set_bytes(stage, slot, bytes)
    }

    pub fn set_bytes_pod<T: Pod>(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        value: &T,
    ) -> Result<(), EncoderError> {
        self.context
            .set_bytes(stage, slot, bytemuck::bytes_of(value))
    }

    pub fn set_texture(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        texture: &D::Texture,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        self.context.set_texture(stage, slot, texture, usage)
    }

    pub fn set_sampler(
        &mut self,
        stage: ShaderStage,
        slot: usize,
        sampler: &D::Sampler,
    ) -> Result<(), EncoderError> {
        self.context.set_sampler(stage, slot, sampler)
    }

    /// Supplies store actions left open on the descriptor. Only devices
    /// reporting `deferred_store_actions` accept this.
    pub fn set_render_pass_store_actions(
        &mut self,
        colors: &[StoreAction],
        depth: Option<StoreAction>,
        stencil: Option<StoreAction>,
    ) -> Result<(), EncoderError> {
        self.context
            .set_render_pass_store_actions(colors, depth, stencil)
    }

    pub fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) -> Result<(), EncoderError> {
        self.context.draw(vertices, instances)
    }

    pub fn draw_indexed(&mut self, draw: &IndexedDraw<'_, D>) -> Result<(), EncoderError> {
        self.context.draw_indexed(draw)
    }
}

pub struct ComputeEncoder<'a, D: Device> {
    context: &'a mut Context<D>,
}

impl<'a, D: Device> ComputeEncoder<'a, D> {
    pub(super) fn new(context: &'a mut Context<D>) -> Self {
        Self { context }
    }

    common_encoder_methods!();

    pub fn set_pipeline(&mut self, pipeline: &D::ComputePipeline) -> Result<(), EncoderError> {
        self.context.set_compute_pipeline(pipeline)
    }

    pub fn set_buffer(
        &mut self,
        slot: usize,
        buffer: &D::Buffer,
        offset: u64,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        self.context
            .set_buffer(ShaderStage::Compute, slot, buffer, offset, usage)
    }

    pub fn set_bytes(&mut self, slot: usize, bytes: &[u8]) -> Result<(), EncoderError> {
        self.context.set_bytes(ShaderStage::Compute, slot, bytes)
    }

    pub fn set_bytes_pod<T: Pod>(&mut self, slot: usize, value: &T) -> Result<(), EncoderError> {
        self.context
            .set_bytes(ShaderStage::Compute, slot, bytemuck::bytes_of(value))
    }

    pub fn set_texture(
        &mut self,
        slot: usize,
        texture: &D::Texture,
        usage: ResourceUsage,
    ) -> Result<(), EncoderError> {
        self.context
            .set_texture(ShaderStage::Compute, slot, texture, usage)
    }

    pub fn set_sampler(&mut self, slot: usize, sampler: &D::Sampler) -> Result<(), EncoderError> {
        self.context.set_sampler(ShaderStage::Compute, slot, sampler)
    }

    pub fn dispatch(&mut self, workgroups: [u32; 3]) -> Result<(), EncoderError> {
        self.context.dispatch(workgroups)
    }
}

pub struct BlitEncoder<'a, D: Device> {
    context: &'a mut Context<D>,
}

impl<'a, D: Device> BlitEncoder<'a, D> {
    pub(super) fn new(context: &'a mut Context<D>) -> Self {
        Self { context }
    }

    common_encoder_methods!();

    pub fn copy_buffer_to_buffer(
        &mut self,
        source: &D::Buffer,
        source_offset: u64,
        destination: &D::Buffer,
        destination_offset: u64,
        size: u64,
    ) -> Result<(), EncoderError> {
        self.context.copy(&BlitOp::BufferToBuffer {
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        })
    }

    pub fn copy_texture_to_texture(
        &mut self,
        source: &D::Texture,
        source_region: TextureRegion,
        destination: &D::Texture,
        destination_origin: [u32; 3],
    ) -> Result<(), EncoderError> {
        self.context.copy(&BlitOp::TextureToTexture {
            source,
            source_region,
            destination,
            destination_origin,
        })
    }

    pub fn copy_buffer_to_texture(
        &mut self,
        source: &D::Buffer,
        source_offset: u64,
        bytes_per_row: u32,
        rows_per_image: u32,
        destination: &D::Texture,
        destination_region: TextureRegion,
    ) -> Result<(), EncoderError> {
        self.context.copy(&BlitOp::BufferToTexture {
            source,
            source_offset,
            bytes_per_row,
            rows_per_image,
            destination,
            destination_region,
        })
    }

    pub fn fill_buffer(
        &mut self,
        buffer: &D::Buffer,
        range: Range<u64>,
        value: u8,
    ) -> Result<(), EncoderError> {
        self.context
            .copy(&BlitOp::FillBuffer { buffer, range, value })
    }
}
