pub mod expectations;
pub mod scene;

pub use expectations::{check_trace, TraceExpectation};
pub use scene::{
    build_frame_scene, DrawConstants, FrameFences, FrameResources, FrameScene, FrameUniforms,
    DRAW_BATCHES, PARTICLE_COUNT, WORKGROUP_SIZE,
};
