//! Gaussian and Laplacian pyramids of one image, side by side.
//! A/D change the binomial radius, S/W step through the levels.

use std::process::ExitCode;
use std::rc::Rc;

use prism_app::{AppError, finish, init, shader_root};
use prism_assets::{PixelLayout, TextureData};
use prism_core::{AppConfig, KeyCode};
use prism_renderer::device::TexelData;
use prism_renderer::post::{screen_pass, screen_program};
use prism_renderer::pyramid::{BINOMIAL_FILTER_FRAG, BinomialFilter, LAPLACE_FRAG, Pyramid, gauss, laplace};
use prism_renderer::{
    ClearFlags, GlowDevice, GraphicsDevice, Quad, ReleaseList, RenderError, RenderPass, Renderable, ShaderProgram,
    Viewport, check_gl_error,
};
use prism_window::{FrameContext, FrameHandler};

const SIZE: u32 = 512;
const IMAGE: &str = "lena.png";
const SHOW_LOD_FRAG: &str = "screen_space/show_texture_lod.frag";

/// RGBA floats for a `SIZE` x `SIZE` image, or `None` when it has another size.
fn image_texels(data: &TextureData) -> Option<Vec<f32>> {
    if data.width != SIZE || data.height != SIZE {
        return None;
    }
    let texels = match data.layout {
        PixelLayout::Rgba8 => data.pixels.iter().map(|&p| p as f32 / 255.0).collect(),
        PixelLayout::Gray8 => data
            .pixels
            .iter()
            .flat_map(|&p| {
                let v = p as f32 / 255.0;
                [v, v, v, 1.0]
            })
            .collect(),
    };
    Some(texels)
}

/// The source image from the resources folder; it must exist and be `SIZE` square.
fn source_texels(config: &AppConfig) -> Result<Vec<f32>, RenderError> {
    let path = config.resource_path(IMAGE);
    let data = TextureData::load(&path)?;
    image_texels(&data).ok_or_else(|| {
        RenderError::Device(format!(
            "{} is {}x{}, the pyramids need {SIZE}x{SIZE}",
            path.display(),
            data.width,
            data.height
        ))
    })
}

struct Pyramids {
    gauss: Pyramid,
    laplace: Pyramid,
    reduce: ShaderProgram,
    band_pass: ShaderProgram,
    show: RenderPass,
    quad: Rc<dyn Renderable>,
}

impl Pyramids {
    fn destroy(self, device: &mut dyn GraphicsDevice) {
        let mut list = ReleaseList::new();
        list.collect(&self.gauss)
            .collect(&self.laplace)
            .collect(&self.reduce)
            .collect(&self.band_pass)
            .collect(&self.show);
        list.release(device);
    }

    fn rebuild(&mut self, device: &mut dyn GraphicsDevice) {
        let draws = gauss(device, &self.gauss, &mut self.reduce, &self.quad)
            + laplace(device, &self.laplace, &self.gauss, &mut self.band_pass, &self.quad);
        log::debug!("pyramids rebuilt with {draws} draws");
    }
}

struct Glp {
    config: AppConfig,
    filter: BinomialFilter,
    lod: f32,
    pyramids: Option<Pyramids>,
}

impl FrameHandler for Glp {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let shaders = shader_root(&self.config);
        let texels = source_texels(&self.config)?;
        let quad: Rc<dyn Renderable> = Rc::new(Quad::new(ctx.device)?);

        let gauss = Pyramid::new(ctx.device, SIZE)?;
        let laplace = Pyramid::new(ctx.device, SIZE)?;
        ctx.device
            .upload_texture(gauss.texture(), 0, TexelData::F32(&texels))?;

        let mut reduce = ShaderProgram::from_files(
            ctx.device,
            &shaders,
            &[prism_renderer::post::FULLSCREEN_VERT, BINOMIAL_FILTER_FRAG],
        )?;
        self.filter.apply(&mut reduce);
        let band_pass =
            ShaderProgram::from_files(ctx.device, &shaders, &[prism_renderer::post::FULLSCREEN_VERT, LAPLACE_FRAG])?;

        let show_program = screen_program(ctx.device, &shaders, SHOW_LOD_FRAG)?;
        let show = screen_pass("show level", show_program, None, quad.clone());

        let mut pyramids = Pyramids {
            gauss,
            laplace,
            reduce,
            band_pass,
            show,
            quad,
        };
        pyramids.rebuild(ctx.device);
        self.pyramids = Some(pyramids);
        Ok(())
    }

    fn frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let Some(pyramids) = self.pyramids.as_mut() else {
            return Ok(());
        };

        let radius_step = ctx.input.just_pressed(KeyCode::KeyD) as i64 - ctx.input.just_pressed(KeyCode::KeyA) as i64;
        if radius_step != 0 {
            self.filter
                .set_radius(self.filter.radius() as i64 + radius_step, &mut pyramids.reduce);
            pyramids.rebuild(ctx.device);
        }
        let lod_step = ctx.input.just_pressed(KeyCode::KeyW) as i32 - ctx.input.just_pressed(KeyCode::KeyS) as i32;
        if lod_step != 0 {
            let max = pyramids.gauss.levels().saturating_sub(1) as f32;
            self.lod = (self.lod + lod_step as f32).clamp(0.0, max);
            log::info!("lod: {}", self.lod);
        }

        let views = [
            (Viewport::new(0, 0, SIZE, SIZE), pyramids.gauss.texture()),
            (Viewport::new(SIZE as i32, 0, SIZE, SIZE), pyramids.laplace.texture()),
        ];
        ctx.device.bind_framebuffer(None);
        ctx.device.set_clear_color([0.0, 0.0, 0.0, 1.0]);
        ctx.device.clear(ClearFlags::COLOR);
        for (viewport, texture) in views {
            let show = &mut pyramids.show;
            {
                let mut program = show.program().borrow_mut();
                program.update("lod", self.lod);
                program.update_and_bind_texture("tex", 0, texture);
            }
            show.set_viewport(viewport);
            show.render(ctx.device)?;
        }
        check_gl_error(ctx.device, false);
        Ok(())
    }

    fn teardown(&mut self, device: &mut GlowDevice) {
        if let Some(pyramids) = self.pyramids.take() {
            pyramids.destroy(device);
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = init("Prism: gaussian / laplacian pyramids", 2 * SIZE, SIZE)?;
    let demo = Glp {
        config: config.clone(),
        filter: BinomialFilter::default(),
        lod: 0.0,
        pyramids: None,
    };
    prism_window::run(&config, demo)?;
    Ok(())
}

fn main() -> ExitCode {
    finish(run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_square_images_of_the_pyramid_size_are_used() {
        let board = TextureData::checkerboard(SIZE, 32);
        assert_eq!(image_texels(&board).map(|t| t.len()), Some((SIZE * SIZE * 4) as usize));
        assert!(image_texels(&TextureData::checkerboard(64, 8)).is_none());
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let mut config = AppConfig::default();
        config.resources_root = "/nonexistent".into();
        assert!(matches!(
            source_texels(&config),
            Err(RenderError::Asset(prism_assets::AssetError::NotFound(_)))
        ));
    }
}
