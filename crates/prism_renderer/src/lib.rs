//! Multi-pass OpenGL rendering: render targets named after shader outputs,
//! introspected shader programs, std140 uniform block mirrors, render passes
//! and the ordered frame pipeline that wires them together.

pub mod blit;
pub mod deferred;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod foliage;
pub mod glow_device;
pub mod headless;
pub mod pipeline;
pub mod post;
pub mod pyramid;
pub mod reflect;
pub mod release;
pub mod render_pass;
pub mod render_target;
pub mod renderable;
pub mod shader;
pub mod textures;
pub mod uniform;
pub mod uniform_block;
pub mod volumetric;

pub use blit::{copy_render_target, copy_target_content};
pub use deferred::{DeferredRenderer, DeferredSettings, ObjectUniforms, SceneObject};
pub use device::{
    BlendMode, Capability, ClearFlags, DeviceState, GraphicsDevice, TextureFormat, TextureHandle, Viewport,
};
pub use diagnostics::{check_gl_error, decode_gl_error};
pub use error::RenderError;
pub use glow_device::GlowDevice;
pub use headless::HeadlessDevice;
pub use pipeline::{FramePipeline, FrameStats};
pub use render_pass::{PassStats, PreDrawHook, RenderPass, SharedBlock, SharedProgram, SharedTarget, shared};
pub use release::{GpuResource, ReleaseList};
pub use render_target::RenderTarget;
pub use renderable::{InstancedMesh, Mesh, Quad, Renderable};
pub use shader::{ShaderProgram, ShaderSources};
pub use uniform::UniformValue;
pub use uniform_block::{BindingPoints, UniformBlockBuffer, UniformBlockLayout};
