use std::path::Path;
use std::rc::Rc;

use glam::{IVec2, Vec2, Vec4};

use super::{screen_pass, screen_program};
use crate::device::{ClearFlags, GraphicsDevice, TextureFormat, TextureHandle};
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::render_pass::{RenderPass, SharedProgram, SharedTarget};
use crate::render_target::RenderTarget;
use crate::renderable::Renderable;

pub const COC_FRAG: &str = "post/dof_coc.frag";
pub const BLUR_FRAG: &str = "post/dof_blur.frag";
pub const COMPOSITE_FRAG: &str = "post/dof_composite.frag";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DofSettings {
    /// near blur end, near focus start, far focus end, far blur start (view-space depth)
    pub focus_plane_depths: Vec4,
    /// max blur radius in pixels for the near and far field
    pub focus_plane_radii: Vec2,
    pub far_radius_rescale: f32,
}

impl Default for DofSettings {
    fn default() -> Self {
        Self {
            focus_plane_depths: Vec4::new(2.0, 4.0, 7.0, 10.0),
            focus_plane_radii: Vec2::new(10.0, -5.0),
            far_radius_rescale: 2.0,
        }
    }
}

/// Circle-of-confusion pass, separable two-pass blur, composite.
/// Everything runs at full resolution.
pub struct DepthOfField {
    settings: DofSettings,
    coc_program: SharedProgram,
    blur_programs: [SharedProgram; 2],
    composite_program: SharedProgram,
    coc_target: SharedTarget,
    blur_targets: [SharedTarget; 2],
    composite_target: SharedTarget,
    passes: Vec<RenderPass>,
}

impl DepthOfField {
    pub fn new(
        device: &mut dyn GraphicsDevice,
        shaders: &Path,
        quad: Rc<dyn Renderable>,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let coc_program = screen_program(device, shaders, COC_FRAG)?;
        let blur_programs = [
            screen_program(device, shaders, BLUR_FRAG)?,
            screen_program(device, shaders, BLUR_FRAG)?,
        ];
        let composite_program = screen_program(device, shaders, COMPOSITE_FRAG)?;

        // signed CoC needs a float format
        let coc_target = Rc::new(RenderTarget::for_program(
            device,
            "dof coc",
            &coc_program.borrow(),
            width,
            height,
            TextureFormat::Rgba16F,
            false,
        )?);
        let blur_targets = [
            Rc::new(RenderTarget::for_program(
                device,
                "dof blur horizontal",
                &blur_programs[0].borrow(),
                width,
                height,
                TextureFormat::Rgba16F,
                false,
            )?),
            Rc::new(RenderTarget::for_program(
                device,
                "dof blur vertical",
                &blur_programs[1].borrow(),
                width,
                height,
                TextureFormat::Rgba16F,
                false,
            )?),
        ];
        let composite_target = Rc::new(RenderTarget::for_program(
            device,
            "dof composite",
            &composite_program.borrow(),
            width,
            height,
            TextureFormat::Rgba8,
            false,
        )?);
        coc_target.require(&["fragmentColor"])?;
        for target in &blur_targets {
            target.require(&["nearResult", "blurResult"])?;
        }
        composite_target.require(&["fragmentColor"])?;

        {
            let mut horizontal = blur_programs[0].borrow_mut();
            horizontal.update("direction", IVec2::new(1, 0));
            horizontal.bind_texture_on_use("tex", coc_target.buffer("fragmentColor")?);
            horizontal.bind_texture_on_use("nearTex", coc_target.buffer("fragmentColor")?);
        }
        {
            let mut vertical = blur_programs[1].borrow_mut();
            vertical.update("direction", IVec2::new(0, 1));
            vertical.bind_texture_on_use("tex", blur_targets[0].buffer("blurResult")?);
            vertical.bind_texture_on_use("nearTex", blur_targets[0].buffer("nearResult")?);
        }
        {
            let mut composite = composite_program.borrow_mut();
            composite.bind_texture_on_use("packedBuffer", coc_target.buffer("fragmentColor")?);
            composite.bind_texture_on_use("blurBuffer", blur_targets[1].buffer("blurResult")?);
            composite.bind_texture_on_use("nearBuffer", blur_targets[1].buffer("nearResult")?);
        }

        let mut coc = screen_pass("dof coc", coc_program.clone(), Some(coc_target.clone()), quad.clone());
        coc.add_clear_bits(ClearFlags::COLOR);
        let passes = vec![
            coc,
            screen_pass(
                "dof blur horizontal",
                blur_programs[0].clone(),
                Some(blur_targets[0].clone()),
                quad.clone(),
            ),
            screen_pass(
                "dof blur vertical",
                blur_programs[1].clone(),
                Some(blur_targets[1].clone()),
                quad.clone(),
            ),
            screen_pass(
                "dof composite",
                composite_program.clone(),
                Some(composite_target.clone()),
                quad,
            ),
        ];

        let mut dof = Self {
            settings: DofSettings::default(),
            coc_program,
            blur_programs,
            composite_program,
            coc_target,
            blur_targets,
            composite_target,
            passes,
        };
        dof.apply_settings();
        Ok(dof)
    }

    pub fn settings(&self) -> DofSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: DofSettings) {
        self.settings = settings;
        self.apply_settings();
    }

    /// Moves the focus window so that `depth` lies in the middle of the sharp range.
    pub fn focus_at(&mut self, depth: f32) {
        let d = self.settings.focus_plane_depths;
        let half_sharp = (d.z - d.y) * 0.5;
        let shift = depth - (d.y + half_sharp);
        self.settings.focus_plane_depths = (d + Vec4::splat(shift)).max(Vec4::ZERO);
        self.apply_settings();
    }

    fn apply_settings(&mut self) {
        let s = self.settings;
        let max_radius = s.focus_plane_radii.x;
        {
            let mut coc = self.coc_program.borrow_mut();
            coc.update("focusPlaneDepths", s.focus_plane_depths);
            coc.update("focusPlaneRadi", s.focus_plane_radii);
        }
        for program in &self.blur_programs {
            let mut blur = program.borrow_mut();
            blur.update("maxCoCRadiusPixels", max_radius as i32);
            blur.update("nearBlurRadiusPixels", max_radius as i32);
            blur.update("invNearBlurRadiusPixels", 1.0 / max_radius);
        }
        let mut composite = self.composite_program.borrow_mut();
        composite.update("maxCoCRadiusPixels", max_radius);
        composite.update("farRadiusRescale", s.far_radius_rescale);
    }

    /// Blurs `color` by the depth found in the view-space `position` texture.
    pub fn execute(
        &mut self,
        device: &mut dyn GraphicsDevice,
        position: TextureHandle,
        color: TextureHandle,
    ) -> Result<u32, RenderError> {
        {
            let mut coc = self.coc_program.borrow_mut();
            coc.bind_texture_on_use("positionMap", position);
            coc.bind_texture_on_use("colorMap", color);
        }
        let mut draws = 0;
        for pass in &mut self.passes {
            draws += pass.render(device)?.draws;
        }
        Ok(draws)
    }

    pub fn output(&self) -> Result<TextureHandle, RenderError> {
        self.composite_target.buffer("fragmentColor")
    }

    /// Every texture the chain writes, for pipeline ordering.
    pub fn written_textures(&self) -> Vec<TextureHandle> {
        let mut textures = self.coc_target.textures();
        for target in &self.blur_targets {
            textures.extend(target.textures());
        }
        textures.extend(self.composite_target.textures());
        textures
    }
}

impl GpuResource for DepthOfField {
    fn collect_resources(&self, list: &mut ReleaseList) {
        for pass in &self.passes {
            pass.collect_resources(list);
        }
    }
}
