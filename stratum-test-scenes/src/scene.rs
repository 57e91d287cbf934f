use bytemuck::{Pod, Zeroable};
use stratum::backend::mock::{
    MockBuffer, MockComputePipeline, MockDevice, MockRenderPipeline, MockSampler, MockTexture,
};
use stratum::{
    ColorAttachment, Context, DebugCommandKind, DepthAttachment, EncoderError, FenceHandle,
    IndexFormat, IndexedDraw, LoadAction, RenderPassDescriptor, ResourceUsage, ShaderStage,
    StoreAction, TextureRegion,
};

use crate::expectations::TraceExpectation;

pub const PARTICLE_COUNT: u32 = 4096;
pub const WORKGROUP_SIZE: u32 = 64;
pub const DRAW_BATCHES: u32 = 8;

const PARTICLE_STRIDE: u64 = 32;
const ATLAS_SIZE: u32 = 64;
const INDICES_PER_BATCH: u32 = PARTICLE_COUNT / DRAW_BATCHES * 6;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_projection: [[f32; 4]; 4],
    pub time: f32,
    pub delta: f32,
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct DrawConstants {
    pub tint: [f32; 4],
    pub first_particle: u32,
    pub _pad: [u32; 3],
}

/// Long-lived resources shared by every frame of the scene.
pub struct FrameResources {
    pub particles: MockBuffer,
    pub indices: MockBuffer,
    pub staging: MockBuffer,
    pub readback: MockBuffer,
    pub atlas: MockTexture,
    pub color: MockTexture,
    pub depth: MockTexture,
    pub sampler: MockSampler,
    pub simulate: MockComputePipeline,
    pub draw: MockRenderPipeline,
}

impl FrameResources {
    pub fn new(device: &MockDevice) -> Self {
        let particle_bytes = u64::from(PARTICLE_COUNT) * PARTICLE_STRIDE;
        Self {
            particles: device.create_buffer("particles", particle_bytes),
            indices: device.create_buffer(
                "particle indices",
                u64::from(INDICES_PER_BATCH * DRAW_BATCHES) * 4,
            ),
            staging: device.create_buffer("atlas staging", u64::from(ATLAS_SIZE * ATLAS_SIZE) * 4),
            readback: device.create_buffer("particle readback", particle_bytes),
            atlas: device.create_texture("sprite atlas"),
            color: device.create_texture("color target"),
            depth: device.create_texture("depth target"),
            sampler: device.create_sampler("atlas sampler"),
            simulate: device.create_compute_pipeline("simulate particles"),
            draw: device.create_render_pipeline("draw particles"),
        }
    }
}

/// Fences of one frame's encoders, waited on by the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFences {
    pub upload: FenceHandle,
    pub simulation: FenceHandle,
    pub draw: FenceHandle,
    pub readback: FenceHandle,
}

pub struct FrameScene {
    pub fences: FrameFences,
    /// Debug-trace entries the frame produces at `LogOperations` and above.
    pub expectations: Vec<TraceExpectation>,
}

fn uniforms(frame: u32) -> FrameUniforms {
    let mut view_projection = [[0.0; 4]; 4];
    for (index, row) in view_projection.iter_mut().enumerate() {
        row[index] = 1.0;
    }
    FrameUniforms {
        view_projection,
        time: frame as f32 / 60.0,
        delta: 1.0 / 60.0,
        _pad: [0.0; 2],
    }
}

/// Encodes one frame: upload the sprite atlas, simulate particles, draw them
/// in batches and copy the particle state back for inspection.
///
/// Every encoder waits on whatever it depends on, including the previous
/// frame's encoders that touched the same resources, so validation stays
/// quiet while frames overlap on the GPU.
pub fn build_frame_scene(
    context: &mut Context<MockDevice>,
    resources: &FrameResources,
    frame: u32,
    previous: Option<FrameFences>,
) -> Result<FrameScene, EncoderError> {
    let mut expectations = Vec::new();
    let frame_uniforms = uniforms(frame);
    let group = format!("frame {frame}");
    context.push_debug_group(&group)?;
    expectations.push(TraceExpectation::new(
        DebugCommandKind::PushGroup,
        group.clone(),
        "frame group opens",
    ));

    // ── Atlas upload ─────────────────────────────────────────────────────────
    let upload = {
        let mut blit = context.begin_blit("upload atlas")?;
        if let Some(previous) = previous {
            blit.wait_for_fence(previous.upload)?;
            blit.wait_for_fence(previous.draw)?;
        }
        blit.copy_buffer_to_texture(
            &resources.staging,
            0,
            ATLAS_SIZE * 4,
            ATLAS_SIZE,
            &resources.atlas,
            TextureRegion::whole_2d(ATLAS_SIZE, ATLAS_SIZE),
        )?;
        blit.end_encoding()?
    };
    expectations.push(TraceExpectation::new(
        DebugCommandKind::BlitEncoder,
        "upload atlas",
        "upload begins",
    ));
    expectations.push(TraceExpectation::new(
        DebugCommandKind::Blit,
        "copy_buffer_to_texture",
        "atlas copy",
    ));

    // ── Simulation ───────────────────────────────────────────────────────────
    let simulation = {
        let mut compute = context.begin_compute("simulate")?;
        if let Some(previous) = previous {
            compute.wait_for_fence(previous.simulation)?;
            compute.wait_for_fence(previous.readback)?;
            compute.wait_for_fence(previous.draw)?;
        }
        compute.set_pipeline(&resources.simulate)?;
        compute.set_buffer(0, &resources.particles, 0, ResourceUsage::ReadWrite)?;
        compute.set_bytes_pod(1, &frame_uniforms)?;
        compute.dispatch([PARTICLE_COUNT / WORKGROUP_SIZE, 1, 1])?;
        compute.end_encoding()?
    };
    expectations.push(TraceExpectation::new(
        DebugCommandKind::ComputeEncoder,
        "simulate",
        "simulation begins",
    ));
    expectations.push(TraceExpectation::new(
        DebugCommandKind::Dispatch,
        format!("dispatch {}x1x1", PARTICLE_COUNT / WORKGROUP_SIZE),
        "simulation dispatch",
    ));

    // ── Draw ─────────────────────────────────────────────────────────────────
    let descriptor = RenderPassDescriptor::<MockDevice>::new("draw particles")
        .with_color(
            ColorAttachment::new(resources.color.clone())
                .with_load(LoadAction::Clear([0.0, 0.0, 0.0, 1.0]))
                .with_store(StoreAction::Store),
        )
        .with_depth(
            DepthAttachment::new(resources.depth.clone())
                .with_load(LoadAction::Clear(1.0))
                .with_store(StoreAction::DontCare),
        );
    let draw = {
        let mut render = context.begin_render(&descriptor)?;
        render.wait_for_fence(simulation)?;
        render.wait_for_fence(upload)?;
        if let Some(previous) = previous {
            render.wait_for_fence(previous.draw)?;
        }
        render.set_pipeline(&resources.draw)?;
        render.set_buffer(
            ShaderStage::Vertex,
            0,
            &resources.particles,
            0,
            ResourceUsage::Read,
        )?;
        render.set_bytes_pod(ShaderStage::Vertex, 1, &frame_uniforms)?;
        render.set_texture(ShaderStage::Fragment, 0, &resources.atlas, ResourceUsage::Read)?;
        render.set_sampler(ShaderStage::Fragment, 0, &resources.sampler)?;
        for batch in 0..DRAW_BATCHES {
            let constants = DrawConstants {
                tint: [1.0, batch as f32 / DRAW_BATCHES as f32, 0.5, 1.0],
                first_particle: batch * (PARTICLE_COUNT / DRAW_BATCHES),
                _pad: [0; 3],
            };
            render.set_bytes_pod(ShaderStage::Fragment, 1, &constants)?;
            render.draw_indexed(&IndexedDraw {
                index_buffer: &resources.indices,
                index_format: IndexFormat::Uint32,
                index_offset: u64::from(batch * INDICES_PER_BATCH) * 4,
                indices: 0..INDICES_PER_BATCH,
                base_vertex: 0,
                instances: 0..1,
            })?;
        }
        render.end_encoding()?
    };
    expectations.push(TraceExpectation::new(
        DebugCommandKind::RenderEncoder,
        "draw particles",
        "draw begins",
    ));
    expectations.push(TraceExpectation::new(
        DebugCommandKind::Pipeline,
        "draw particles",
        "draw pipeline",
    ));
    for _ in 0..DRAW_BATCHES {
        expectations.push(TraceExpectation::new(
            DebugCommandKind::Draw,
            "draw indexed",
            "particle batch",
        ));
    }
    expectations.push(TraceExpectation::new(
        DebugCommandKind::EndEncoder,
        "draw particles",
        "draw ends",
    ));

    // ── Readback ─────────────────────────────────────────────────────────────
    let readback = {
        let mut blit = context.begin_blit("readback particles")?;
        blit.wait_for_fence(simulation)?;
        if let Some(previous) = previous {
            blit.wait_for_fence(previous.readback)?;
        }
        let size = u64::from(PARTICLE_COUNT) * PARTICLE_STRIDE;
        blit.fill_buffer(&resources.readback, 0..size, 0)?;
        blit.copy_buffer_to_buffer(&resources.particles, 0, &resources.readback, 0, size)?;
        blit.end_encoding()?
    };
    expectations.push(TraceExpectation::new(
        DebugCommandKind::Blit,
        "fill_buffer",
        "readback cleared",
    ));
    expectations.push(TraceExpectation::new(
        DebugCommandKind::Blit,
        "copy_buffer_to_buffer",
        "readback copy",
    ));

    context.pop_debug_group()?;
    expectations.push(TraceExpectation::new(
        DebugCommandKind::PopGroup,
        group,
        "frame group closes",
    ));

    Ok(FrameScene {
        fences: FrameFences {
            upload,
            simulation,
            draw,
            readback,
        },
        expectations,
    })
}
