//! Full-screen post-processing chains.

pub mod depth_of_field;
pub mod lens_flare;

use std::path::Path;
use std::rc::Rc;

pub use depth_of_field::{DepthOfField, DofSettings};
pub use lens_flare::LensFlare;

use crate::device::{Capability, GraphicsDevice};
use crate::error::RenderError;
use crate::render_pass::{RenderPass, SharedProgram, SharedTarget, shared};
use crate::renderable::Renderable;
use crate::shader::ShaderProgram;

/// Vertex stage shared by every screen-space program.
pub const FULLSCREEN_VERT: &str = "screen_space/fullscreen.vert";

pub fn screen_program(
    device: &mut dyn GraphicsDevice,
    shaders: &Path,
    fragment: &str,
) -> Result<SharedProgram, RenderError> {
    Ok(shared(ShaderProgram::from_files(device, shaders, &[FULLSCREEN_VERT, fragment])?))
}

/// A quad pass with depth testing off.
pub fn screen_pass(
    label: &str,
    program: SharedProgram,
    target: Option<SharedTarget>,
    quad: Rc<dyn Renderable>,
) -> RenderPass {
    let mut pass = RenderPass::new(label, program, target);
    pass.add_disable(Capability::DepthTest).add_renderable(quad);
    pass
}
