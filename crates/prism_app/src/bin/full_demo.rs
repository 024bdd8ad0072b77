//! Deferred shading with shadow map, screen-space reflections, volumetric
//! light and procedural trees. WASD + left drag to fly around.

use std::process::ExitCode;
use std::rc::Rc;

use glam::Vec3;
use prism_app::{AppError, demo_scene, finish, init, shader_root};
use prism_core::{AppConfig, FirstPersonCamera, Projection};
use prism_renderer::deferred::main_camera;
use prism_renderer::{DeferredRenderer, DeferredSettings, GlowDevice, Quad, RenderError, Renderable};
use prism_window::{FrameContext, FrameHandler};

struct FullDemo {
    config: AppConfig,
    camera: FirstPersonCamera,
    renderer: Option<DeferredRenderer>,
}

impl FullDemo {
    fn new(config: AppConfig) -> Self {
        let camera = main_camera(config.window.aspect_ratio());
        Self {
            config,
            camera,
            renderer: None,
        }
    }
}

impl FrameHandler for FullDemo {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let quad: Rc<dyn Renderable> = Rc::new(Quad::new(ctx.device)?);
        let scene = demo_scene(ctx.device, &self.config)?;
        let settings = DeferredSettings {
            width: ctx.size.0,
            height: ctx.size.1,
            ..DeferredSettings::default()
        };

        self.camera = main_camera(ctx.aspect_ratio());
        self.camera.position = Vec3::new(0.0, 2.0, 8.0);
        self.camera.set_center(Vec3::ZERO);

        let mut rng = rand::thread_rng();
        let renderer = DeferredRenderer::new(ctx.device, &shader_root(&self.config), settings, quad, scene, &mut rng)?;
        self.renderer = Some(renderer);
        Ok(())
    }

    fn frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        self.camera.apply_input(ctx.input);
        self.camera.update(ctx.time.delta_seconds());

        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        renderer.update(ctx.device, &self.camera, ctx.time.elapsed_seconds())?;
        renderer.render(ctx.device)?;
        Ok(())
    }

    fn resized(&mut self, ctx: &mut FrameContext<'_>) {
        // render targets keep their setup resolution
        self.camera.projection = Projection::perspective(65.0, ctx.aspect_ratio(), 0.5, 100.0);
    }

    fn teardown(&mut self, device: &mut GlowDevice) {
        if let Some(renderer) = self.renderer.take() {
            renderer.destroy(device);
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = init("Prism: deferred renderer", 800, 600)?;
    prism_window::run(&config, FullDemo::new(config.clone()))?;
    Ok(())
}

fn main() -> ExitCode {
    finish(run())
}
