use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset file not found: {0}")]
    NotFound(PathBuf),
    #[error("unsupported model format '{extension}' ({path})")]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("OBJ import failed for {path}: {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },
    #[error("glTF import failed for {path}: {source}")]
    Gltf {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("mesh '{mesh}' is missing {attribute}")]
    MissingAttribute { mesh: String, attribute: &'static str },
    #[error("model {0} contains no meshes")]
    Empty(PathBuf),
    #[error("cube face {path} is {width}x{height}, expected {expected}x{expected}")]
    CubeFaceSize {
        path: PathBuf,
        expected: u32,
        width: u32,
        height: u32,
    },
}
