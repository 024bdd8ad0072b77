pub mod cubemap;
pub mod error;
pub mod gltf_parser;
pub mod mesh;
pub mod model;
pub mod obj_parser;
pub mod texture;

pub use cubemap::CubeMapData;
pub use error::AssetError;
pub use mesh::{BoundingBox, MeshData};
pub use model::{ImportedMesh, ImportedModel, MaterialInfo, TextureKind, import_model};
pub use texture::{PixelLayout, TextureData};
