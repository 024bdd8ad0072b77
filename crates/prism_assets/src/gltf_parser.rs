use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::AssetError;
use crate::mesh::MeshData;
use crate::model::{ImportedModel, MaterialInfo, TextureKind};

pub fn parse_gltf(path: &Path) -> Result<ImportedModel, AssetError> {
    let base_path = path.parent().unwrap_or(Path::new("./"));

    // A. Load Document & Buffers
    let (document, buffers, _images) = gltf::import(path).map_err(|source| AssetError::Gltf {
        path: path.to_path_buf(),
        source,
    })?;

    // Only images stored next to the file can be handed out as paths;
    // embedded ones (buffer views, data URIs) are skipped.
    let image_paths: Vec<Option<PathBuf>> = document
        .images()
        .map(|image| match image.source() {
            gltf::image::Source::Uri { uri, .. } if !uri.starts_with("data:") => {
                Some(base_path.join(uri))
            }
            _ => None,
        })
        .collect();

    let mut result = ImportedModel::default();

    // --- STEP 1: MATERIALS ---
    for mat in document.materials() {
        let pbr = mat.pbr_metallic_roughness();
        let slots = [
            (TextureKind::Diffuse, pbr.base_color_texture().map(|i| i.texture())),
            (
                TextureKind::MetallicRoughness,
                pbr.metallic_roughness_texture().map(|i| i.texture()),
            ),
            (TextureKind::Normal, mat.normal_texture().map(|i| i.texture())),
            (TextureKind::Occlusion, mat.occlusion_texture().map(|i| i.texture())),
            (TextureKind::Emissive, mat.emissive_texture().map(|i| i.texture())),
        ];

        let mut textures = BTreeMap::new();
        for (kind, texture) in slots {
            if let Some(file) = texture.and_then(|t| image_paths[t.source().index()].clone()) {
                textures.insert(kind, file);
            }
        }

        result.materials.push(MaterialInfo {
            name: mat.name().unwrap_or("GLTF Material").to_string(),
            diffuse_color: Some(pbr.base_color_factor()),
            textures,
        });
    }

    // --- STEP 2: MESHES ---
    // one MeshData per primitive
    for mesh in document.meshes() {
        let mesh_name = mesh.name().unwrap_or("GLTF Mesh").to_string();
        for (prim_index, primitive) in mesh.primitives().enumerate() {
            let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
            let name = format!("{mesh_name}#{prim_index}");

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .map(|iter| iter.collect())
                .ok_or_else(|| AssetError::MissingAttribute {
                    mesh: name.clone(),
                    attribute: "positions",
                })?;

            let normals: Vec<[f32; 3]> = reader
                .read_normals()
                .map(|iter| iter.collect())
                .unwrap_or_default();

            let uvs: Vec<[f32; 2]> = reader
                .read_tex_coords(0)
                .map(|read| read.into_f32().collect())
                .unwrap_or_default();

            let tangents: Vec<[f32; 3]> = reader
                .read_tangents()
                .map(|iter| iter.map(|[x, y, z, _w]| [x, y, z]).collect())
                .unwrap_or_default();

            // Non-indexed primitives get a trivial index list
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|read| read.into_u32().collect())
                .unwrap_or_else(|| (0..positions.len() as u32).collect());

            result.push_mesh(MeshData {
                name,
                positions,
                uvs,
                normals,
                tangents,
                indices,
                material_index: primitive.material().index(),
            })?;
        }
    }

    Ok(result)
}
