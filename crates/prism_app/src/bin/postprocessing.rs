//! Seven objects drawn into a G-Buffer, lit in screen space and blurred by
//! depth of field. Left drag spins the objects, WASD moves the eye, F toggles
//! focusing on whatever is under the screen centre.

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use prism_app::{AppError, finish, init, load_cube, palette, shader_root};
use prism_core::{AppConfig, KeyCode, LookAtCamera, Projection, Turntable};
use prism_renderer::deferred::{COMPOSITING_FRAG, GBUFFER_FRAG, GBUFFER_VERT, SHOW_TEXTURE_FRAG};
use prism_renderer::post::depth_of_field::DepthOfField;
use prism_renderer::post::{screen_pass, screen_program};
use prism_renderer::{
    Capability, ClearFlags, FramePipeline, GlowDevice, GraphicsDevice, Quad, ReleaseList, RenderError, RenderPass,
    RenderTarget, Renderable, ShaderProgram, SharedProgram, SharedTarget, TextureFormat, check_gl_error, shared,
};
use prism_window::{FrameContext, FrameHandler};

const OBJECTS: usize = 7;
const STEP: f32 = 0.1;

struct Frame {
    pipeline: FramePipeline,
    gbuffer_program: SharedProgram,
    compositing_program: SharedProgram,
    gbuffer: SharedTarget,
    dof: Rc<RefCell<DepthOfField>>,
}

struct PostProcessing {
    config: AppConfig,
    camera: LookAtCamera,
    turntable: Turntable,
    rotation: Rc<RefCell<Mat4>>,
    dynamic_focus: bool,
    frame: Option<Frame>,
}

fn object_models() -> [Mat4; OBJECTS] {
    std::array::from_fn(|i| {
        let x = (i as f32 - (OBJECTS as f32 - 1.0) * 0.5) * 1.2;
        let z = -(i as f32) * 0.8;
        Mat4::from_translation(Vec3::new(x, 0.0, z)) * Mat4::from_scale(Vec3::splat(0.5))
    })
}

/// Window depth in [0, 1] back to a positive view-space distance.
fn linearize_depth(depth: f32, projection: &Projection) -> f32 {
    let (near, far) = (projection.near(), projection.far());
    let ndc = depth * 2.0 - 1.0;
    2.0 * near * far / (far + near - ndc * (far - near))
}

impl PostProcessing {
    fn new(config: AppConfig) -> Self {
        let projection = Projection::perspective(65.0, config.window.aspect_ratio(), 0.1, 30.0);
        Self {
            config,
            camera: LookAtCamera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, projection),
            turntable: Turntable::default(),
            rotation: Rc::new(RefCell::new(Mat4::IDENTITY)),
            dynamic_focus: false,
            frame: None,
        }
    }

    /// Moves eye and centre together along the view axes.
    fn move_camera(&mut self, ctx: &FrameContext<'_>) {
        let forward = (self.camera.center - self.camera.position).normalize_or_zero();
        let right = forward.cross(self.camera.up).normalize_or_zero();
        let mut offset = Vec3::ZERO;
        for (key, direction) in [
            (KeyCode::KeyW, forward),
            (KeyCode::KeyS, -forward),
            (KeyCode::KeyD, right),
            (KeyCode::KeyA, -right),
        ] {
            if ctx.input.is_held(key) {
                offset += direction * STEP;
            }
        }
        self.camera.position += offset;
        self.camera.center += offset;
    }
}

impl FrameHandler for PostProcessing {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let shaders = shader_root(&self.config);
        let (width, height) = ctx.size;
        let quad: Rc<dyn Renderable> = Rc::new(Quad::new(ctx.device)?);
        let cube: Rc<dyn Renderable> = Rc::new(load_cube(ctx.device, &self.config)?);
        self.camera.projection = Projection::perspective(65.0, ctx.aspect_ratio(), 0.1, 30.0);

        let gbuffer_program = shared(ShaderProgram::from_files(ctx.device, &shaders, &[GBUFFER_VERT, GBUFFER_FRAG])?);
        {
            let mut p = gbuffer_program.borrow_mut();
            p.update("mixTexture", 0.0f32);
            p.update("materialId", 0.0f32);
            p.update("projection", self.camera.projection_matrix());
        }
        let gbuffer = Rc::new(RenderTarget::for_program(
            ctx.device,
            "gbuffer",
            &gbuffer_program.borrow(),
            width,
            height,
            TextureFormat::Rgba32F,
            true,
        )?);
        gbuffer.require(&["fragColor", "fragNormal", "fragPosition", "fragMaterial"])?;

        let models = object_models();
        let colors = palette();
        let rotation = self.rotation.clone();
        let mut gbuffer_pass = RenderPass::new("gbuffer", gbuffer_program.clone(), Some(gbuffer.clone()));
        gbuffer_pass
            .add_enable(Capability::DepthTest)
            .set_clear_color([0.0; 4])
            .add_clear_bits(ClearFlags::COLOR | ClearFlags::DEPTH)
            .set_pre_draw_hook(move |index: usize, _: &dyn Renderable, program: &mut ShaderProgram| {
                let i = index % OBJECTS;
                program.update("model", *rotation.borrow() * models[i]);
                program.update("color", colors[i]);
            });
        for _ in 0..OBJECTS {
            gbuffer_pass.add_renderable(cube.clone());
        }

        let compositing_program = screen_program(ctx.device, &shaders, COMPOSITING_FRAG)?;
        compositing_program.borrow_mut().update("useLightPos", 1.0f32);
        let compositing = Rc::new(RenderTarget::for_program(
            ctx.device,
            "compositing",
            &compositing_program.borrow(),
            width,
            height,
            TextureFormat::Rgba8,
            false,
        )?);
        let mut compositing_pass = screen_pass(
            "compositing",
            compositing_program.clone(),
            Some(compositing.clone()),
            quad.clone(),
        );
        compositing_pass
            .set_clear_color([0.25, 0.25, 0.35, 0.0])
            .add_clear_bits(ClearFlags::COLOR)
            .read_texture("colorMap", gbuffer.buffer("fragColor")?)
            .read_texture("normalMap", gbuffer.buffer("fragNormal")?)
            .read_texture("positionMap", gbuffer.buffer("fragPosition")?)
            .read_texture("materialMap", gbuffer.buffer("fragMaterial")?);

        let dof = Rc::new(RefCell::new(DepthOfField::new(
            ctx.device,
            &shaders,
            quad.clone(),
            width,
            height,
        )?));
        let position = gbuffer.buffer("fragPosition")?;
        let lit = compositing.buffer("fragmentColor")?;
        let blurred = dof.borrow().output()?;
        let written = dof.borrow().written_textures();

        let show_program = screen_program(ctx.device, &shaders, SHOW_TEXTURE_FRAG)?;
        let mut show_pass = screen_pass("show", show_program, None, quad);
        show_pass.read_texture("tex", blurred);

        let mut pipeline = FramePipeline::new();
        let chain = dof.clone();
        pipeline
            .add_pass(gbuffer_pass)
            .add_pass(compositing_pass)
            .add_custom(
                "depth of field",
                vec![position, lit],
                written,
                move |device: &mut dyn GraphicsDevice| chain.borrow_mut().execute(device, position, lit),
            )
            .add_pass(show_pass);
        pipeline.validate()?;
        log::info!("frame: {}", pipeline.labels().join(" -> "));

        self.frame = Some(Frame {
            pipeline,
            gbuffer_program,
            compositing_program,
            gbuffer,
            dof,
        });
        Ok(())
    }

    fn frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        self.move_camera(ctx);
        let view = self.camera.view_matrix();
        self.turntable.apply_input(ctx.input, &view);
        *self.rotation.borrow_mut() = self.turntable.rotation_matrix();
        if ctx.input.just_pressed(KeyCode::KeyF) {
            self.dynamic_focus = !self.dynamic_focus;
            log::info!("dynamic focus: {}", self.dynamic_focus);
        }

        let Some(frame) = self.frame.as_mut() else {
            return Ok(());
        };
        frame.gbuffer_program.borrow_mut().update("view", view);
        frame
            .compositing_program
            .borrow_mut()
            .update("vLightPos", view * Vec4::new(2.0, 2.0, 2.0, 1.0));

        frame.pipeline.execute(ctx.device)?;

        if self.dynamic_focus {
            // forces a CPU/GPU sync
            let depth = frame.gbuffer.read_center_depth(ctx.device)?;
            if depth < 1.0 {
                let distance = linearize_depth(depth, &self.camera.projection);
                frame.dof.borrow_mut().focus_at(distance);
            }
        }
        check_gl_error(ctx.device, false);
        Ok(())
    }

    fn teardown(&mut self, device: &mut GlowDevice) {
        if let Some(frame) = self.frame.take() {
            let mut list = ReleaseList::new();
            list.collect(&frame.pipeline).collect(&frame.dof);
            log::info!("releasing {} GPU objects", list.len());
            list.release(device);
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = init("Prism: post-processing", 800, 600)?;
    prism_window::run(&config, PostProcessing::new(config.clone()))?;
    Ok(())
}

fn main() -> ExitCode {
    finish(run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_linearizes_to_the_planes() {
        let projection = Projection::perspective(65.0, 1.0, 0.1, 30.0);
        assert!((linearize_depth(0.0, &projection) - 0.1).abs() < 1e-4);
        assert!((linearize_depth(1.0, &projection) - 30.0).abs() < 1e-2);
    }
}
