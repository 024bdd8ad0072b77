//! Three thousand cubes in one instanced draw. Per-instance model matrices
//! are a vertex stream; projection and view live in a uniform block.

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;

use glam::{Mat4, Quat, Vec3, Vec4};
use prism_app::{AppError, finish, init, load_cube_data, shader_root};
use prism_core::{AppConfig, LookAtCamera, Projection, Turntable};
use prism_renderer::{
    Capability, ClearFlags, GlowDevice, InstancedMesh, ReleaseList, RenderError, RenderPass, Renderable,
    ShaderProgram, SharedBlock, UniformBlockBuffer, UniformValue, check_gl_error, shared,
};
use prism_window::{FrameContext, FrameHandler};
use rand::Rng;

const INSTANCES: usize = 3000;
const MATRIX_BLOCK: &str = "MatrixBlock";
const MATRIX_BINDING: u32 = 1;
const VERT: &str = "model_space/instanced.vert";
const FRAG: &str = "model_space/simple_lighting.frag";

/// Random positions in a 30 unit cube, random orientation, small scale.
fn random_transforms<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Mat4> {
    (0..count)
        .map(|_| {
            let position = Vec3::new(
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
                rng.gen_range(-15.0..15.0),
            );
            let axis = Vec3::new(rng.r#gen(), rng.r#gen(), rng.r#gen()).normalize_or(Vec3::Y);
            let rotation = Quat::from_axis_angle(axis, rng.gen_range(0.0..std::f32::consts::TAU));
            Mat4::from_scale_rotation_translation(Vec3::splat(rng.gen_range(0.1..0.4)), rotation, position)
        })
        .collect()
}

struct Instancing {
    config: AppConfig,
    eye: Vec3,
    camera: LookAtCamera,
    turntable: Turntable,
    state: Option<(RenderPass, SharedBlock)>,
}

impl Instancing {
    fn new(config: AppConfig) -> Self {
        let eye = Vec3::new(10.0, 10.0, 10.0);
        let projection = Projection::perspective(65.0, config.window.aspect_ratio(), 0.5, 100.0);
        Self {
            config,
            eye,
            camera: LookAtCamera::new(eye, Vec3::ZERO, projection),
            turntable: Turntable::default(),
            state: None,
        }
    }
}

impl FrameHandler for Instancing {
    fn setup(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let shaders = shader_root(&self.config);
        self.camera.projection = Projection::perspective(65.0, ctx.aspect_ratio(), 0.5, 100.0);

        let transforms = random_transforms(INSTANCES, &mut rand::thread_rng());
        let cubes = InstancedMesh::new(ctx.device, &load_cube_data(&self.config)?, &transforms)?;
        log::info!("{} instances of {}", cubes.instance_count(), cubes.label());
        let cubes: Rc<dyn Renderable> = Rc::new(cubes);

        let program = shared(ShaderProgram::from_files(ctx.device, &shaders, &[VERT, FRAG])?);
        program
            .borrow_mut()
            .update("color", Vec4::new(0.8, 0.55, 0.3, 1.0));
        let block: SharedBlock = Rc::new(RefCell::new(UniformBlockBuffer::from_program(
            &program.borrow(),
            MATRIX_BLOCK,
        )?));

        let mut pass = RenderPass::new("instanced cubes", program, None);
        pass.add_enable(Capability::DepthTest)
            .set_clear_color([0.1, 0.1, 0.12, 1.0])
            .add_clear_bits(ClearFlags::COLOR | ClearFlags::DEPTH)
            .add_renderable(cubes)
            .set_instances(INSTANCES as u32)
            .add_uniform_block(block.clone(), MATRIX_BINDING);
        self.state = Some((pass, block));
        Ok(())
    }

    fn frame(&mut self, ctx: &mut FrameContext<'_>) -> Result<(), RenderError> {
        let view = self.camera.view_matrix();
        self.turntable.apply_input(ctx.input, &view);
        self.camera.position = self.turntable.rotation_matrix().transform_point3(self.eye);

        let Some((pass, block)) = self.state.as_mut() else {
            return Ok(());
        };
        let view = self.camera.view_matrix();
        {
            let mut block = block.borrow_mut();
            block.update_uniform("projection", &UniformValue::from(self.camera.projection_matrix()));
            block.update_uniform("view", &UniformValue::from(view));
            block.upload(ctx.device)?;
        }
        pass.program()
            .borrow_mut()
            .update("vLightPos", view * Vec4::new(0.0, 20.0, 0.0, 1.0));
        pass.render(ctx.device)?;
        check_gl_error(ctx.device, false);
        Ok(())
    }

    fn teardown(&mut self, device: &mut GlowDevice) {
        if let Some((pass, _)) = self.state.take() {
            let mut list = ReleaseList::new();
            list.collect(&pass);
            list.release(device);
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = init("Prism: instancing", 800, 600)?;
    prism_window::run(&config, Instancing::new(config.clone()))?;
    Ok(())
}

fn main() -> ExitCode {
    finish(run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_transforms_stay_in_the_volume() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let transforms = random_transforms(50, &mut rng);
        assert_eq!(transforms.len(), 50);
        for t in transforms {
            let p = t.transform_point3(Vec3::ZERO);
            assert!(p.abs().max_element() <= 15.0);
        }
    }
}
