//! Shared setup for the demo executables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use glam::{Mat4, Vec3, Vec4};
use prism_assets::{AssetError, MeshData, import_model};
use prism_core::{AppConfig, ConfigError, LogScope};
use prism_renderer::{GraphicsDevice, Mesh, ObjectUniforms, RenderError, Renderable, SceneObject};
use prism_window::WindowError;
use thiserror::Error;

pub const SHADER_DIR: &str = "shaders";
pub const CUBE_MODEL: &str = "cube.obj";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Loads `prism.json`, installs the logger and sets the demo's window title and size.
pub fn init(title: &str, width: u32, height: u32) -> Result<AppConfig, AppError> {
    let config = AppConfig::load()?;
    prism_core::logging::init(&config.log_filter);
    let config = config.with_window(title, width, height);
    log::info!("{title}: resources at {}", config.resources_root.display());
    Ok(config)
}

pub fn shader_root(config: &AppConfig) -> PathBuf {
    config.resource_path(SHADER_DIR)
}

/// `main` tail: logs the error and turns it into a failing exit status.
pub fn finish(result: Result<(), AppError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// First mesh of the cube model in the resources folder. A missing or
/// empty model fails setup.
pub fn load_cube_data(config: &AppConfig) -> Result<MeshData, AssetError> {
    let _scope = LogScope::enter("Setup: importing assets");
    let path = config.resource_path(CUBE_MODEL);
    let model = import_model(&path)?;
    model
        .meshes
        .into_iter()
        .next()
        .map(|mesh| mesh.data)
        .ok_or(AssetError::Empty(path))
}

pub fn load_cube(device: &mut dyn GraphicsDevice, config: &AppConfig) -> Result<Mesh, RenderError> {
    Mesh::upload(device, &load_cube_data(config)?)
}

/// A ground plane and a ring of cubes with varied colors and materials.
pub fn demo_scene(device: &mut dyn GraphicsDevice, config: &AppConfig) -> Result<Vec<SceneObject>, RenderError> {
    let cube: Rc<dyn Renderable> = Rc::new(load_cube(device, config)?);
    let ground: Rc<dyn Renderable> = Rc::new(Mesh::upload(device, &MeshData::grid(20, 20, 1.0, 1.0))?);

    let mut scene = vec![SceneObject {
        renderable: ground,
        uniforms: ObjectUniforms {
            model: Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0)),
            color: Vec4::new(0.6, 0.6, 0.55, 1.0),
            material: 0.0,
        },
    }];
    for (i, color) in palette().into_iter().enumerate() {
        let angle = i as f32 / 7.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 4.0, 0.0, angle.sin() * 4.0);
        scene.push(SceneObject {
            renderable: cube.clone(),
            uniforms: ObjectUniforms {
                model: Mat4::from_translation(position) * Mat4::from_rotation_y(angle),
                color,
                material: if i % 2 == 0 { 1.0 } else { 0.0 },
            },
        });
    }
    Ok(scene)
}

/// Seven distinct object colors.
pub fn palette() -> [Vec4; 7] {
    [
        Vec4::new(0.9, 0.2, 0.2, 1.0),
        Vec4::new(0.2, 0.9, 0.2, 1.0),
        Vec4::new(0.2, 0.3, 0.9, 1.0),
        Vec4::new(0.9, 0.9, 0.2, 1.0),
        Vec4::new(0.9, 0.2, 0.9, 1.0),
        Vec4::new(0.2, 0.9, 0.9, 1.0),
        Vec4::new(0.9, 0.6, 0.3, 1.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_renderer::HeadlessDevice;

    fn resources_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.resources_root = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../resources"));
        config
    }

    #[test]
    fn test_missing_cube_model_is_an_error() {
        let mut device = HeadlessDevice::new(1, 1);
        let mut config = AppConfig::default();
        config.resources_root = PathBuf::from("/nonexistent");
        assert!(matches!(load_cube_data(&config), Err(AssetError::NotFound(_))));
        assert!(matches!(
            load_cube(&mut device, &config),
            Err(RenderError::Asset(AssetError::NotFound(_)))
        ));
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_cube_model_loads_from_resources() {
        let data = load_cube_data(&resources_config()).unwrap();
        assert!(!data.positions.is_empty());
        assert!(!data.indices.is_empty());
    }

    #[test]
    fn test_scene_has_ground_and_ring() {
        let mut device = HeadlessDevice::new(1, 1);
        let config = resources_config();
        let scene = demo_scene(&mut device, &config).unwrap();
        assert_eq!(scene.len(), 8);
        assert_eq!(scene[0].uniforms.material, 0.0);
        assert_eq!(scene[1].uniforms.color, palette()[0]);
    }
}
