//! The full deferred frame: G-Buffer, trees, skybox, shadow map, lighting,
//! screen-space reflections, volumetric light, overlay, optional
//! post-processing and the on-screen debug views.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use prism_assets::{CubeMapData, MeshData};
use prism_core::{FirstPersonCamera, LookAtCamera, Projection};
use rand::Rng;

use crate::device::*;
use crate::diagnostics::check_gl_error;
use crate::error::RenderError;
use crate::foliage::{TreeParams, TreeRendering, WindField};
use crate::pipeline::{FramePipeline, FrameStats};
use crate::post::{DepthOfField, LensFlare, screen_pass, screen_program};
use crate::release::ReleaseList;
use crate::render_pass::{RenderPass, SharedProgram, SharedTarget, shared};
use crate::render_target::RenderTarget;
use crate::renderable::{Mesh, Renderable};
use crate::shader::ShaderProgram;
use crate::textures::upload_cube_map;
use crate::uniform_block::BindingPoints;
use crate::volumetric::VolumetricLighting;

pub const GBUFFER_VERT: &str = "model_space/gbuffer.vert";
pub const GBUFFER_FRAG: &str = "model_space/gbuffer.frag";
pub const SKYBOX_VERT: &str = "model_space/skybox.vert";
pub const SKYBOX_FRAG: &str = "model_space/skybox.frag";
pub const SHADOWMAP_VERT: &str = "vml/shadowmap.vert";
pub const SHADOWMAP_FRAG: &str = "vml/shadowmap.frag";
pub const COMPOSITING_FRAG: &str = "screen_space/compositing.frag";
pub const SSR_FRAG: &str = "screen_space/ssr.frag";
pub const ADD_TEXTURE_FRAG: &str = "screen_space/add_texture.frag";
pub const SHOW_TEXTURE_FRAG: &str = "screen_space/show_texture.frag";

const WIND_FIELD_SIZE: u32 = 64;
const LIGHT_DISTANCE: f32 = 15.0;
const SKY_FACE_SIZE: u32 = 64;

/// World-space direction the light travels in.
pub fn world_light_direction() -> Vec4 {
    (-Vec3::new(-2.16, 2.6, 10.0).normalize()).extend(0.0)
}

/// The orthographic shadow camera, placed against the light direction.
pub fn light_camera() -> LookAtCamera {
    LookAtCamera::new(
        -world_light_direction().truncate() * LIGHT_DISTANCE,
        Vec3::ZERO,
        Projection::orthographic(-10.0, 10.0, -10.0, 10.0, 0.0, 30.0),
    )
}

/// The first-person camera the demo starts with.
pub fn main_camera(aspect_ratio: f32) -> FirstPersonCamera {
    FirstPersonCamera::new(Projection::perspective(65.0, aspect_ratio, 0.5, 100.0))
}

/// Per-object uniforms pushed before each G-Buffer and shadow draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub color: Vec4,
    pub material: f32,
}

impl Default for ObjectUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            color: Vec4::new(0.7, 0.7, 0.7, 1.0),
            material: 0.0,
        }
    }
}

pub struct SceneObject {
    pub renderable: Rc<dyn Renderable>,
    pub uniforms: ObjectUniforms,
}

#[derive(Clone, Debug)]
pub struct DeferredSettings {
    pub width: u32,
    pub height: u32,
    pub tree_variants: u32,
    pub trees_per_variant: u32,
    pub depth_of_field: bool,
    pub lens_flare: bool,
    /// Quarter-size views of intermediate buffers along the bottom edge.
    pub debug_views: bool,
    pub ssr_pixel_step: i32,
    /// Directory holding `posx.png` .. `negz.png`; a procedural gradient
    /// sky is used when unset.
    pub sky_directory: Option<PathBuf>,
}

impl Default for DeferredSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            tree_variants: 2,
            trees_per_variant: 4,
            depth_of_field: false,
            lens_flare: false,
            debug_views: true,
            ssr_pixel_step: 0,
            sky_directory: None,
        }
    }
}

pub struct DeferredRenderer {
    settings: DeferredSettings,
    pipeline: FramePipeline,
    objects: Rc<RefCell<Vec<ObjectUniforms>>>,

    gbuffer_program: SharedProgram,
    skybox_program: SharedProgram,
    shadow_program: SharedProgram,
    compositing_program: SharedProgram,
    ssr_program: SharedProgram,
    overlay_program: SharedProgram,
    show_program: SharedProgram,

    gbuffer: SharedTarget,
    shadow_map: SharedTarget,
    compositing: SharedTarget,
    ssr: SharedTarget,
    overlay: SharedTarget,

    volumetric: VolumetricLighting,
    trees: TreeRendering,
    wind: WindField,
    depth_of_field: Option<Rc<RefCell<DepthOfField>>>,
    lens_flare: Option<Rc<RefCell<LensFlare>>>,
    sky: TextureHandle,
    light: LookAtCamera,
    final_output: TextureHandle,
}

/// Places `count` trees on the ground plane with random heading and size.
fn scatter_trees<R: Rng + ?Sized>(count: u32, rng: &mut R) -> Vec<Mat4> {
    (0..count)
        .map(|_| {
            let position = Vec3::new(rng.gen_range(-8.0..8.0), -0.5, rng.gen_range(-8.0..8.0));
            Mat4::from_translation(position)
                * Mat4::from_rotation_y(rng.gen_range(0.0..std::f32::consts::TAU))
                * Mat4::from_scale(Vec3::splat(rng.gen_range(0.8..1.2)))
        })
        .collect()
}

/// Pushes `model`, `color` and `materialId` for the object at the draw index.
fn object_hook(
    objects: Rc<RefCell<Vec<ObjectUniforms>>>,
) -> impl FnMut(usize, &dyn Renderable, &mut ShaderProgram) + 'static {
    move |index: usize, _: &dyn Renderable, program: &mut ShaderProgram| {
        if let Some(object) = objects.borrow().get(index) {
            program.update("model", object.model);
            program.update("color", object.color);
            program.update("materialId", object.material);
        }
    }
}

impl DeferredRenderer {
    pub fn new<R: Rng + ?Sized>(
        device: &mut dyn GraphicsDevice,
        shaders: &Path,
        settings: DeferredSettings,
        quad: Rc<dyn Renderable>,
        scene: Vec<SceneObject>,
        rng: &mut R,
    ) -> Result<Self, RenderError> {
        let (width, height) = (settings.width, settings.height);
        let mut pipeline = FramePipeline::new();
        let objects = Rc::new(RefCell::new(scene.iter().map(|o| o.uniforms).collect::<Vec<_>>()));

        log::info!("Rendering Setup: 'Geometry' Rendering");
        let gbuffer_program = shared(ShaderProgram::from_files(device, shaders, &[GBUFFER_VERT, GBUFFER_FRAG])?);
        gbuffer_program.borrow_mut().update("mixTexture", 0.0f32);
        // float attachments keep unclamped positions and normals
        let gbuffer = Rc::new(RenderTarget::for_program(
            device,
            "gbuffer",
            &gbuffer_program.borrow(),
            width,
            height,
            TextureFormat::Rgba32F,
            true,
        )?);
        gbuffer.require(&["fragColor", "fragNormal", "fragPosition", "fragMaterial"])?;

        let mut gbuffer_pass = RenderPass::new("gbuffer", gbuffer_program.clone(), Some(gbuffer.clone()));
        // the skybox leaves depth writes off; clearing needs them back on
        gbuffer_pass
            .add_enable(Capability::DepthTest)
            .set_depth_func(DepthFunc::Less)
            .set_depth_write(true)
            .set_clear_color([0.0; 4])
            .add_clear_bits(ClearFlags::COLOR | ClearFlags::DEPTH)
            .set_pre_draw_hook(object_hook(objects.clone()));
        for object in &scene {
            gbuffer_pass.add_renderable(object.renderable.clone());
        }
        pipeline.add_pass(gbuffer_pass);

        let shadow_program = shared(ShaderProgram::from_files(device, shaders, &[SHADOWMAP_VERT, SHADOWMAP_FRAG])?);
        let shadow_map = Rc::new(RenderTarget::depth_only(device, "shadow map", width, height)?);

        // trees
        let mut trees = TreeRendering::new(device, shaders, GBUFFER_FRAG)?;
        let mut binding_points = BindingPoints::default();
        for _ in 0..settings.tree_variants {
            let transforms = scatter_trees(settings.trees_per_variant, rng);
            trees.add_variant(device, &mut binding_points, &TreeParams::default(), &transforms, rng)?;
        }
        trees.assign_material_textures(device)?;
        let mut wind = WindField::new(device, WIND_FIELD_SIZE, WIND_FIELD_SIZE)?;
        wind.update_vector_texture(device, 0.0)?;
        trees.assign_wind_field(&wind);
        for &texture in trees.material_textures() {
            pipeline.mark_external(texture, "tree material");
        }
        pipeline.mark_external(wind.texture(), "wind field");
        for pass in trees.gbuffer_passes(&gbuffer) {
            pipeline.add_pass(pass);
        }

        // sky fills only what no geometry covered: it sits on the far plane
        let sky_data = match &settings.sky_directory {
            Some(dir) => CubeMapData::load_dir(dir, "png")?,
            None => CubeMapData::gradient(SKY_FACE_SIZE, [70, 120, 200], [200, 215, 230], [60, 55, 50]),
        };
        let sky = upload_cube_map(device, &sky_data)?;
        pipeline.mark_external(sky, "sky");
        let skybox_program = shared(ShaderProgram::from_files(device, shaders, &[SKYBOX_VERT, SKYBOX_FRAG])?);
        let skybox_mesh: Rc<dyn Renderable> = Rc::new(Mesh::upload(device, &MeshData::cube(2.0))?);
        let mut skybox_pass = RenderPass::new("skybox", skybox_program.clone(), Some(gbuffer.clone()));
        skybox_pass
            .add_enable(Capability::DepthTest)
            .set_depth_func(DepthFunc::LessEqual)
            .set_depth_write(false)
            .add_renderable(skybox_mesh)
            .read_texture("sky", sky);
        pipeline.add_pass(skybox_pass);

        let mut shadow_pass = RenderPass::new("shadow map", shadow_program.clone(), Some(shadow_map.clone()));
        shadow_pass
            .add_enable(Capability::DepthTest)
            .set_depth_func(DepthFunc::Less)
            .set_depth_write(true)
            .set_clear_color([0.0; 4])
            .add_clear_bits(ClearFlags::DEPTH)
            .set_pre_draw_hook(object_hook(objects.clone()));
        for object in &scene {
            shadow_pass.add_renderable(object.renderable.clone());
        }
        pipeline.add_pass(shadow_pass);
        for pass in trees.shadow_passes(&shadow_map) {
            pipeline.add_pass(pass);
        }

        log::info!("Rendering Setup: 'Screen-Space' Rendering");
        let compositing_program = screen_program(device, shaders, COMPOSITING_FRAG)?;
        let compositing = Rc::new(RenderTarget::for_program(
            device,
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
            .read_texture("colorMap", gbuffer.buffer("fragColor")?)
            .read_texture("normalMap", gbuffer.buffer("fragNormal")?)
            .read_texture("positionMap", gbuffer.buffer("fragPosition")?)
            .read_texture("materialMap", gbuffer.buffer("fragMaterial")?);
        pipeline.add_pass(compositing_pass);
        let lit = compositing.buffer("fragmentColor")?;

        let ssr_program = screen_program(device, shaders, SSR_FRAG)?;
        {
            let mut ssr = ssr_program.borrow_mut();
            ssr.update("screenWidth", width as f32);
            ssr.update("screenHeight", height as f32);
            ssr.update("user_pixelStepSize", settings.ssr_pixel_step);
        }
        let ssr = Rc::new(RenderTarget::for_program(
            device,
            "ssr",
            &ssr_program.borrow(),
            width,
            height,
            TextureFormat::Rgba8,
            true,
        )?);
        let gbuffer_depth = gbuffer
            .depth_texture()
            .ok_or_else(|| RenderError::MissingAttachment("gbuffer depth".into()))?;
        let mut ssr_pass = screen_pass("ssr", ssr_program.clone(), Some(ssr.clone()), quad.clone());
        ssr_pass
            .set_clear_color([0.0; 4])
            .add_clear_bits(ClearFlags::COLOR | ClearFlags::DEPTH)
            .read_texture("vsPositionTex", gbuffer.buffer("fragPosition")?)
            .read_texture("vsNormalTex", gbuffer.buffer("fragNormal")?)
            .read_texture("ReflectanceTex", gbuffer.buffer("fragReflectance")?)
            .read_texture("DepthTex", gbuffer_depth)
            .read_texture("DiffuseTex", lit);
        pipeline.add_pass(ssr_pass);

        let shadow_depth = shadow_map
            .depth_texture()
            .ok_or_else(|| RenderError::MissingAttachment("shadow map depth".into()))?;
        let mut volumetric = VolumetricLighting::new(device, shaders, width, height)?;
        let noise = volumetric.setup_noise_texture(device, rng)?;
        pipeline.mark_external(noise, "volumetric noise");
        volumetric.bind_inputs(shadow_depth, gbuffer.buffer("fragPosition")?);
        pipeline.add_pass(volumetric.render_pass(quad.clone()));
        let raymarched = volumetric.output()?;

        // a separate target so the pass never samples what it writes
        let add_program = screen_program(device, shaders, ADD_TEXTURE_FRAG)?;
        add_program.borrow_mut().update("strength", 0.5f32);
        let overlay = Rc::new(RenderTarget::for_program(
            device,
            "overlay",
            &add_program.borrow(),
            width,
            height,
            TextureFormat::Rgba8,
            false,
        )?);
        let mut overlay_pass = screen_pass(
            "volumetric overlay",
            add_program.clone(),
            Some(overlay.clone()),
            quad.clone(),
        );
        overlay_pass
            .add_disable(Capability::Blend)
            .read_texture("tex", lit)
            .read_texture("addTex", raymarched);
        pipeline.add_pass(overlay_pass);
        let mut final_output = overlay.buffer("fragmentColor")?;

        let depth_of_field = if settings.depth_of_field {
            let dof = Rc::new(RefCell::new(DepthOfField::new(
                device,
                shaders,
                quad.clone(),
                width,
                height,
            )?));
            let written = dof.borrow().written_textures();
            let position = gbuffer.buffer("fragPosition")?;
            let color = final_output;
            let chain = dof.clone();
            pipeline.add_custom(
                "depth of field",
                vec![position, color],
                written,
                move |device: &mut dyn GraphicsDevice| chain.borrow_mut().execute(device, position, color),
            );
            final_output = dof.borrow().output()?;
            Some(dof)
        } else {
            None
        };

        let lens_flare = if settings.lens_flare {
            let flare = Rc::new(RefCell::new(LensFlare::new(
                device,
                shaders,
                quad.clone(),
                width,
                height,
            )?));
            let written = flare.borrow().written_textures();
            let source = final_output;
            let chain = flare.clone();
            pipeline.add_custom(
                "lens flare",
                vec![source],
                written,
                move |device: &mut dyn GraphicsDevice| chain.borrow_mut().execute(device, source),
            );
            final_output = flare.borrow().output()?;
            Some(flare)
        } else {
            None
        };

        let mut views = vec![(Viewport::full(width, height), final_output)];
        if settings.debug_views {
            let (w, h) = (width / 4, height / 4);
            views.extend([
                (Viewport::new(0, 0, w, h), gbuffer.buffer("fragNormal")?),
                (Viewport::new(w as i32, 0, w, h), gbuffer.buffer("fragMaterial")?),
                (Viewport::new((width / 2) as i32, 0, w, h), shadow_depth),
                (Viewport::new((3 * width / 4) as i32, 0, w, h), raymarched),
            ]);
        }
        let show_program = screen_program(device, shaders, SHOW_TEXTURE_FRAG)?;
        let mut show_pass = screen_pass("show texture", show_program.clone(), None, quad);
        let reads = views.iter().map(|&(_, texture)| texture).collect();
        pipeline.add_custom("debug views", reads, Vec::new(), move |device: &mut dyn GraphicsDevice| {
            let mut draws = 0;
            for &(viewport, texture) in &views {
                show_pass.set_viewport(viewport);
                show_pass
                    .program()
                    .borrow_mut()
                    .update_and_bind_texture("tex", 0, texture);
                draws += show_pass.render(device)?.draws;
            }
            device.set_viewport(Viewport::full(width, height));
            Ok(draws)
        });

        pipeline.validate()?;
        log::info!("frame: {}", pipeline.labels().join(" -> "));

        let light = light_camera();
        {
            let light_projection = light.projection_matrix();
            shadow_program.borrow_mut().update("projection", light_projection);
        }

        Ok(Self {
            settings,
            pipeline,
            objects,
            gbuffer_program,
            skybox_program,
            shadow_program,
            compositing_program,
            ssr_program,
            overlay_program: add_program,
            show_program,
            gbuffer,
            shadow_map,
            compositing,
            ssr,
            overlay,
            volumetric,
            trees,
            wind,
            depth_of_field,
            lens_flare,
            sky,
            light,
            final_output,
        })
    }

    pub fn settings(&self) -> &DeferredSettings {
        &self.settings
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut FramePipeline {
        &mut self.pipeline
    }

    pub fn gbuffer(&self) -> &SharedTarget {
        &self.gbuffer
    }

    pub fn shadow_map(&self) -> &SharedTarget {
        &self.shadow_map
    }

    pub fn compositing(&self) -> &SharedTarget {
        &self.compositing
    }

    pub fn ssr(&self) -> &SharedTarget {
        &self.ssr
    }

    pub fn overlay(&self) -> &SharedTarget {
        &self.overlay
    }

    pub fn volumetric(&self) -> &VolumetricLighting {
        &self.volumetric
    }

    pub fn trees_mut(&mut self) -> &mut TreeRendering {
        &mut self.trees
    }

    pub fn sky(&self) -> TextureHandle {
        self.sky
    }

    pub fn light(&self) -> &LookAtCamera {
        &self.light
    }

    /// The texture shown full-screen at the end of the frame.
    pub fn final_output(&self) -> TextureHandle {
        self.final_output
    }

    /// Changes one object's per-draw uniforms; returns false for a bad index.
    pub fn set_object(&mut self, index: usize, uniforms: ObjectUniforms) -> bool {
        match self.objects.borrow_mut().get_mut(index) {
            Some(object) => {
                *object = uniforms;
                true
            }
            None => false,
        }
    }

    /// Per-frame uniform updates: light follows the camera, the wind field
    /// advances to `elapsed`, every view-dependent program gets the new matrices.
    pub fn update(
        &mut self,
        device: &mut dyn GraphicsDevice,
        camera: &FirstPersonCamera,
        elapsed: f32,
    ) -> Result<(), RenderError> {
        let light_dir = world_light_direction();
        self.light
            .follow(camera.position, -light_dir.truncate() * LIGHT_DISTANCE);
        self.wind.update_vector_texture(device, elapsed)?;

        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        let light_view = self.light.view_matrix();
        let light_projection = self.light.projection_matrix();
        let view_light_dir = view * light_dir;

        {
            let mut gbuffer = self.gbuffer_program.borrow_mut();
            gbuffer.update("view", view);
            gbuffer.update("projection", projection);
        }
        {
            let mut skybox = self.skybox_program.borrow_mut();
            skybox.update("view", view);
            skybox.update("projection", projection);
        }
        self.shadow_program.borrow_mut().update("view", light_view);
        self.compositing_program
            .borrow_mut()
            .update("vLightDir", view_light_dir);
        {
            let mut ssr = self.ssr_program.borrow_mut();
            ssr.update("projection", projection);
            ssr.update("camNearPlane", camera.projection.near());
            ssr.update("camFarPlane", camera.projection.far());
        }

        self.trees.set_projections(&projection, &light_projection);
        self.trees.update(&view, &light_view, view_light_dir, elapsed);
        self.volumetric
            .update(&view, camera.position, &light_view, &light_projection);
        if let Some(flare) = &self.lens_flare {
            flare.borrow_mut().update_lens_star_matrix(&view);
        }
        Ok(())
    }

    /// Releases every target, program, uniform block, mesh and texture the
    /// frame owns, including the scene meshes handed to [`Self::new`].
    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        let mut list = ReleaseList::new();
        list.collect(&self.pipeline)
            .collect(&self.trees)
            .collect(&self.wind)
            .collect(&self.volumetric)
            .collect(&self.depth_of_field)
            .collect(&self.lens_flare)
            .collect(&self.overlay_program)
            .collect(&self.show_program)
            .texture(self.sky);
        for program in [
            &self.gbuffer_program,
            &self.skybox_program,
            &self.shadow_program,
            &self.compositing_program,
            &self.ssr_program,
        ] {
            list.collect(program);
        }
        for target in [&self.gbuffer, &self.shadow_map, &self.compositing, &self.ssr, &self.overlay] {
            list.collect(target);
        }
        log::info!("releasing {} GPU objects", list.len());
        list.release(device);
    }

    /// Runs the whole frame and polls GL errors once at the end.
    pub fn render(&mut self, device: &mut dyn GraphicsDevice) -> Result<FrameStats, RenderError> {
        let stats = self.pipeline.execute(device)?;
        check_gl_error(device, false);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_points_down_towards_the_scene() {
        let dir = world_light_direction();
        assert_eq!(dir.w, 0.0);
        assert!((dir.truncate().length() - 1.0).abs() < 1e-6);
        let light = light_camera();
        assert!((light.position.length() - LIGHT_DISTANCE).abs() < 1e-4);
        assert_eq!(light.center, Vec3::ZERO);
    }

    #[test]
    fn test_scattered_trees_stay_on_the_plot() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let trees = scatter_trees(10, &mut rng);
        assert_eq!(trees.len(), 10);
        for model in trees {
            let origin = model.transform_point3(Vec3::ZERO);
            assert!(origin.x.abs() <= 8.0 && origin.z.abs() <= 8.0);
            assert_eq!(origin.y, -0.5);
        }
    }
}
