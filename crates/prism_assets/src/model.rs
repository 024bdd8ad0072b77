use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::AssetError;
use crate::mesh::{BoundingBox, MeshData};
use crate::{gltf_parser, obj_parser};

/// Texture slots a material can reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TextureKind {
    Diffuse,
    Specular,
    Ambient,
    Normal,
    Height,
    Shininess,
    Opacity,
    Emissive,
    MetallicRoughness,
    Occlusion,
}

#[derive(Clone, Debug, Default)]
pub struct MaterialInfo {
    pub name: String,
    pub diffuse_color: Option<[f32; 4]>,
    /// Absolute (or resources-relative) paths, keyed by slot.
    pub textures: BTreeMap<TextureKind, PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ImportedMesh {
    pub data: MeshData,
    pub bounds: BoundingBox,
}

/// Everything the renderer needs from a model file.
#[derive(Clone, Debug, Default)]
pub struct ImportedModel {
    pub meshes: Vec<ImportedMesh>,
    pub materials: Vec<MaterialInfo>,
}

impl ImportedModel {
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.meshes
            .iter()
            .map(|m| m.bounds)
            .reduce(|acc, b| acc.union(&b))
    }

    /// Texture map of one material; empty if the index is out of range.
    pub fn texture_paths(&self, material_index: usize) -> BTreeMap<TextureKind, PathBuf> {
        self.materials
            .get(material_index)
            .map(|m| m.textures.clone())
            .unwrap_or_default()
    }

    /// Union of all material textures; the first material to name a slot wins.
    pub fn all_texture_paths(&self) -> BTreeMap<TextureKind, PathBuf> {
        let mut merged = BTreeMap::new();
        for material in &self.materials {
            for (kind, path) in &material.textures {
                merged.entry(*kind).or_insert_with(|| path.clone());
            }
        }
        merged
    }

    pub(crate) fn push_mesh(&mut self, mut data: MeshData) -> Result<(), AssetError> {
        data.fill_missing_attributes();
        let bounds = data.bounding_box().ok_or_else(|| AssetError::MissingAttribute {
            mesh: data.name.clone(),
            attribute: "positions",
        })?;
        self.meshes.push(ImportedMesh { data, bounds });
        Ok(())
    }
}

/// Loads a model file; the format is picked from the extension.
pub fn import_model(path: &Path) -> Result<ImportedModel, AssetError> {
    if !path.exists() {
        return Err(AssetError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let model = match extension.as_str() {
        "obj" => obj_parser::parse_obj(path)?,
        "gltf" | "glb" => gltf_parser::parse_gltf(path)?,
        _ => {
            return Err(AssetError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            });
        }
    };

    if model.meshes.is_empty() {
        return Err(AssetError::Empty(path.to_path_buf()));
    }

    log::info!(
        "imported {}: {} meshes, {} materials",
        path.display(),
        model.meshes.len(),
        model.materials.len()
    );
    for material in &model.materials {
        log::debug!("material '{}'", material.name);
        for (kind, texture) in &material.textures {
            log::debug!("  {kind:?}: {}", texture.display());
        }
    }

    Ok(model)
}
