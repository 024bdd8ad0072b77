use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use prism_assets::MeshData;
use prism_renderer::deferred::{ObjectUniforms, main_camera};
use prism_renderer::device::DepthFunc;
use prism_renderer::{
    Capability, DeferredRenderer, DeferredSettings, GraphicsDevice, HeadlessDevice, Mesh, Quad, Renderable,
    SceneObject, Viewport,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

const SHADERS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../resources/shaders");

fn scene(device: &mut HeadlessDevice) -> Vec<SceneObject> {
    let cube: Rc<dyn Renderable> = Rc::new(Mesh::upload(device, &MeshData::cube(1.0)).unwrap());
    let ground: Rc<dyn Renderable> = Rc::new(Mesh::upload(device, &MeshData::grid(8, 8, 2.0, 2.0)).unwrap());
    vec![
        SceneObject {
            renderable: cube,
            uniforms: ObjectUniforms {
                model: Mat4::from_translation(Vec3::new(0.0, 0.5, 0.0)),
                color: Vec4::new(0.8, 0.2, 0.2, 1.0),
                material: 1.0,
            },
        },
        SceneObject {
            renderable: ground,
            uniforms: ObjectUniforms::default(),
        },
    ]
}

fn renderer(device: &mut HeadlessDevice, settings: DeferredSettings) -> DeferredRenderer {
    let _ = env_logger::builder().is_test(true).try_init();
    let quad: Rc<dyn Renderable> = Rc::new(Quad::new(device).unwrap());
    let objects = scene(device);
    let mut rng = StdRng::seed_from_u64(42);
    DeferredRenderer::new(device, Path::new(SHADERS), settings, quad, objects, &mut rng).unwrap()
}

fn small_settings() -> DeferredSettings {
    DeferredSettings {
        width: 32,
        height: 24,
        tree_variants: 1,
        trees_per_variant: 2,
        ..DeferredSettings::default()
    }
}

#[test]
fn frame_ends_on_the_window_with_screen_state() {
    let settings = small_settings();
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    let camera = main_camera(32.0 / 24.0);

    deferred.update(&mut device, &camera, 0.5).unwrap();
    let stats = deferred.render(&mut device).unwrap();
    assert!(stats.draws > 0);

    let state = device.state();
    assert_eq!(state.framebuffer, None);
    assert_eq!(state.viewport, Viewport::full(32, 24));
    assert!(!state.is_enabled(Capability::DepthTest));
    assert!(!state.is_enabled(Capability::Blend));
    assert!(state.depth_write);
    assert_eq!(state.depth_func, DepthFunc::Less);

    // the last draw shows the final image over the whole window
    let last = device.draw_log().last().unwrap();
    assert_eq!(last.framebuffer, None);
    assert_eq!(last.fragment_label, "screen_space/show_texture.frag");
}

#[test]
fn geometry_passes_run_before_screen_passes() {
    let settings = DeferredSettings {
        debug_views: false,
        ..small_settings()
    };
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    deferred.update(&mut device, &main_camera(4.0 / 3.0), 0.0).unwrap();
    deferred.render(&mut device).unwrap();

    let labels: Vec<&str> = device
        .draw_log()
        .iter()
        .map(|d| d.fragment_label.as_str())
        .collect();
    let first_screen = labels
        .iter()
        .position(|&l| l == "screen_space/compositing.frag")
        .unwrap();
    assert!(labels[..first_screen].contains(&"model_space/gbuffer.frag"));
    assert!(labels[..first_screen].contains(&"vml/shadowmap.frag"));
    assert!(
        labels[first_screen..]
            .iter()
            .all(|l| l.starts_with("screen_space/") || l.starts_with("vml/raymarching"))
    );
    assert_eq!(labels.iter().filter(|&&l| l == "screen_space/show_texture.frag").count(), 1);

    // geometry passes draw with depth testing on
    let gbuffer = deferred.gbuffer().framebuffer();
    assert!(
        device
            .draw_log()
            .iter()
            .filter(|d| d.framebuffer == Some(gbuffer))
            .all(|d| d.enabled.contains(&Capability::DepthTest))
    );
}

#[test]
fn trees_draw_instanced_per_variant() {
    let settings = small_settings();
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    deferred.render(&mut device).unwrap();

    let tree_draws: Vec<_> = device
        .draw_log()
        .iter()
        .filter(|d| d.fragment_label == "tree/foliage.frag")
        .collect();
    assert_eq!(tree_draws.len(), 1);
    assert_eq!(tree_draws[0].instances, Some(2));
}

#[test]
fn object_uniforms_reach_the_gbuffer_program() {
    let settings = small_settings();
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    assert!(deferred.set_object(
        1,
        ObjectUniforms {
            material: 3.0,
            ..ObjectUniforms::default()
        }
    ));
    assert!(!deferred.set_object(9, ObjectUniforms::default()));
    deferred.render(&mut device).unwrap();

    let gbuffer_program = device
        .draw_log()
        .iter()
        .find(|d| d.fragment_label == "model_space/gbuffer.frag")
        .and_then(|d| d.program)
        .unwrap();
    assert_eq!(
        device.uniform_value(gbuffer_program, "materialId"),
        Some(&prism_renderer::UniformValue::Float(3.0))
    );
}

#[test]
fn optional_post_chains_extend_the_frame() {
    let settings = DeferredSettings {
        depth_of_field: true,
        lens_flare: true,
        ..small_settings()
    };
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    let labels = deferred.pipeline().labels();
    assert!(labels.contains(&"depth of field"));
    assert!(labels.contains(&"lens flare"));
    assert_eq!(labels.last(), Some(&"debug views"));

    deferred.render(&mut device).unwrap();
    assert!(!device.state().is_enabled(Capability::Blend));
    assert_eq!(device.state().framebuffer, None);
}

#[test]
fn skybox_follows_the_trees_and_precedes_the_shadow_map() {
    let settings = small_settings();
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    let labels = deferred.pipeline().labels();
    let position = |label: &str| labels.iter().position(|&l| l == label).unwrap();

    let skybox = position("skybox");
    assert!(position("gbuffer") < skybox);
    assert!(position("branches 0") < skybox);
    assert!(position("foliage 0") < skybox);
    assert_eq!(labels[skybox + 1], "shadow map");

    deferred.update(&mut device, &main_camera(4.0 / 3.0), 0.0).unwrap();
    deferred.render(&mut device).unwrap();
    let draws = device.draw_log();
    let sky_draw = draws
        .iter()
        .position(|d| d.fragment_label == "model_space/skybox.frag")
        .unwrap();
    assert_eq!(draws[sky_draw].framebuffer, Some(deferred.gbuffer().framebuffer()));
    assert_eq!(draws[sky_draw].depth_func, DepthFunc::LessEqual);
    assert!(!draws[sky_draw].depth_write);
    assert!(draws[sky_draw].enabled.contains(&Capability::DepthTest));

    // the shadow map draws right after with writes back on
    let shadow = &draws[sky_draw + 1];
    assert_eq!(shadow.fragment_label, "vml/shadowmap.frag");
    assert!(shadow.depth_write);
    assert_eq!(shadow.depth_func, DepthFunc::Less);
    assert!(device.texture_desc(deferred.sky()).unwrap().is_cube_map());
}

#[test]
fn destroy_releases_every_gpu_object() {
    let settings = DeferredSettings {
        depth_of_field: true,
        lens_flare: true,
        ..small_settings()
    };
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let mut deferred = renderer(&mut device, settings);
    deferred.render(&mut device).unwrap();
    assert!(device.live_objects() > 0);

    deferred.destroy(&mut device);
    assert_eq!(device.live_objects(), 0);
    assert_eq!(device.poll_error(), glow::NO_ERROR);
}

#[test]
fn missing_sky_directory_fails_setup() {
    let settings = DeferredSettings {
        sky_directory: Some("no/such/sky".into()),
        ..small_settings()
    };
    let mut device = HeadlessDevice::new(settings.width, settings.height);
    let quad: Rc<dyn Renderable> = Rc::new(Quad::new(&mut device).unwrap());
    let mut rng = StdRng::seed_from_u64(1);
    let result = DeferredRenderer::new(&mut device, Path::new(SHADERS), settings, quad, Vec::new(), &mut rng);
    assert!(matches!(result, Err(prism_renderer::RenderError::Asset(_))));
}
