use std::path::Path;
use std::rc::Rc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

use super::{screen_pass, screen_program};
use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::render_pass::{RenderPass, SharedProgram, SharedTarget};
use crate::render_target::RenderTarget;
use crate::renderable::Renderable;

pub const DOWNSAMPLE_FRAG: &str = "post/flare_downsample.frag";
pub const GHOSTS_FRAG: &str = "post/flare_ghosts.frag";
pub const COMPOSITE_FRAG: &str = "post/flare_composite.frag";

const STAR_SIZE: u32 = 64;
const STAR_RAYS: u32 = 6;

/// Screen-space lens flare: bright-pass downsample and ghost/halo features at
/// half resolution, composited over the source at full resolution with a
/// starburst that turns with the camera.
pub struct LensFlare {
    downsample_program: SharedProgram,
    ghosts_program: SharedProgram,
    composite_program: SharedProgram,
    downsample_target: SharedTarget,
    ghosts_target: SharedTarget,
    composite_target: SharedTarget,
    lens_color: TextureHandle,
    lens_star: TextureHandle,
    passes: Vec<RenderPass>,
}

impl LensFlare {
    pub fn new(
        device: &mut dyn GraphicsDevice,
        shaders: &Path,
        quad: Rc<dyn Renderable>,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let (half_w, half_h) = ((width / 2).max(1), (height / 2).max(1));
        let downsample_program = screen_program(device, shaders, DOWNSAMPLE_FRAG)?;
        let ghosts_program = screen_program(device, shaders, GHOSTS_FRAG)?;
        let composite_program = screen_program(device, shaders, COMPOSITE_FRAG)?;

        let downsample_target = Rc::new(RenderTarget::for_program(
            device,
            "flare downsample",
            &downsample_program.borrow(),
            half_w,
            half_h,
            TextureFormat::Rgba16F,
            false,
        )?);
        let ghosts_target = Rc::new(RenderTarget::for_program(
            device,
            "flare ghosts",
            &ghosts_program.borrow(),
            half_w,
            half_h,
            TextureFormat::Rgba16F,
            false,
        )?);
        let composite_target = Rc::new(RenderTarget::for_program(
            device,
            "flare composite",
            &composite_program.borrow(),
            width,
            height,
            TextureFormat::Rgba8,
            false,
        )?);

        let lens_color = create_lens_color(device)?;
        let lens_star = create_lens_star(device)?;

        {
            let mut p = downsample_program.borrow_mut();
            p.update("scale", Vec4::splat(4.0));
            p.update("bias", Vec4::splat(-0.8));
        }
        {
            let mut p = ghosts_program.borrow_mut();
            p.bind_texture_on_use("tex", downsample_target.buffer("fragmentColor")?);
            p.bind_texture_on_use("lensColor", lens_color);
            p.update("ghosts", 4);
            p.update("ghostDispersal", 0.35f32);
            p.update("haloWidth", 0.45f32);
            p.update("distortion", 4.5f32);
        }
        {
            let mut p = composite_program.borrow_mut();
            p.bind_texture_on_use("lensFlareTex", ghosts_target.buffer("fragmentColor")?);
            p.bind_texture_on_use("lensStar", lens_star);
            p.update("lensStarMatrix", Mat3::IDENTITY);
        }

        let passes = vec![
            screen_pass(
                "flare downsample",
                downsample_program.clone(),
                Some(downsample_target.clone()),
                quad.clone(),
            ),
            screen_pass(
                "flare ghosts",
                ghosts_program.clone(),
                Some(ghosts_target.clone()),
                quad.clone(),
            ),
            screen_pass(
                "flare composite",
                composite_program.clone(),
                Some(composite_target.clone()),
                quad,
            ),
        ];

        Ok(Self {
            downsample_program,
            ghosts_program,
            composite_program,
            downsample_target,
            ghosts_target,
            composite_target,
            lens_color,
            lens_star,
            passes,
        })
    }

    /// Rotates the starburst with the camera so it does not look painted on the lens.
    pub fn update_lens_star_matrix(&mut self, view: &Mat4) {
        self.composite_program
            .borrow_mut()
            .update("lensStarMatrix", lens_star_matrix(view));
    }

    pub fn set_ghosts(&mut self, ghosts: i32, dispersal: f32) {
        let mut p = self.ghosts_program.borrow_mut();
        p.update("ghosts", ghosts);
        p.update("ghostDispersal", dispersal);
    }

    pub fn execute(&mut self, device: &mut dyn GraphicsDevice, source: TextureHandle) -> Result<u32, RenderError> {
        self.downsample_program.borrow_mut().bind_texture_on_use("tex", source);
        self.composite_program.borrow_mut().bind_texture_on_use("tex", source);
        let mut draws = 0;
        for pass in &mut self.passes {
            draws += pass.render(device)?.draws;
        }
        Ok(draws)
    }

    pub fn output(&self) -> Result<TextureHandle, RenderError> {
        self.composite_target.buffer("fragmentColor")
    }

    pub fn written_textures(&self) -> Vec<TextureHandle> {
        let mut textures = self.downsample_target.textures();
        textures.extend(self.ghosts_target.textures());
        textures.extend(self.composite_target.textures());
        textures
    }

    /// Procedural lookup textures, read-only after setup.
    pub fn lookup_textures(&self) -> [TextureHandle; 2] {
        [self.lens_color, self.lens_star]
    }
}

pub fn lens_star_matrix(view: &Mat4) -> Mat3 {
    let cam_x = view.x_axis.truncate();
    let cam_z = view.z_axis.truncate();
    let rotation = cam_x.dot(Vec3::Z) + cam_z.dot(Vec3::Y);
    Mat3::from_translation(Vec2::splat(0.5))
        * Mat3::from_angle(rotation)
        * Mat3::from_translation(Vec2::splat(-0.5))
}

/// Chromatic tint across the ghost radius.
fn create_lens_color(device: &mut dyn GraphicsDevice) -> Result<TextureHandle, RenderError> {
    let texels: [u8; 12] = [255, 180, 120, 255, 140, 255, 160, 255, 120, 160, 255, 255];
    let texture = device.create_texture(&TextureDesc::new(3, 1, TextureFormat::Rgba8))?;
    device.upload_texture(texture, 0, TexelData::U8(&texels))?;
    Ok(texture)
}

/// A starburst of thin rays fading towards the rim.
fn create_lens_star(device: &mut dyn GraphicsDevice) -> Result<TextureHandle, RenderError> {
    let half = STAR_SIZE as f32 * 0.5;
    let sector = std::f32::consts::TAU / STAR_RAYS as f32;
    let texels: Vec<u8> = (0..STAR_SIZE * STAR_SIZE)
        .map(|i| {
            let p = Vec2::new((i % STAR_SIZE) as f32 + 0.5 - half, (i / STAR_SIZE) as f32 + 0.5 - half);
            let radius = p.length() / half;
            let angle = p.y.atan2(p.x).rem_euclid(sector);
            let ray = (-(angle.min(sector - angle) * 24.0).powi(2)).exp();
            (ray * (1.0 - radius).max(0.0) * 255.0) as u8
        })
        .collect();
    let texture = device.create_texture(
        &TextureDesc::new(STAR_SIZE, STAR_SIZE, TextureFormat::R8).with_wrap(TextureWrap::ClampToEdge),
    )?;
    device.upload_texture(texture, 0, TexelData::U8(&texels))?;
    Ok(texture)
}

impl GpuResource for LensFlare {
    fn collect_resources(&self, list: &mut ReleaseList) {
        for pass in &self.passes {
            pass.collect_resources(list);
        }
        list.texture(self.lens_color).texture(self.lens_star);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lens_star_matrix_keeps_centre() {
        let view = Mat4::look_at_rh(Vec3::new(3.0, 1.0, 2.0), Vec3::ZERO, Vec3::Y);
        let m = lens_star_matrix(&view);
        let centre = m.transform_point2(Vec2::splat(0.5));
        assert!((centre - Vec2::splat(0.5)).length() < 1e-5);
        assert_eq!(lens_star_matrix(&Mat4::IDENTITY), Mat3::IDENTITY);
    }
}
