use std::collections::BTreeMap;
use std::path::Path;

use crate::error::AssetError;
use crate::mesh::MeshData;
use crate::model::{ImportedModel, MaterialInfo, TextureKind};

pub fn parse_obj(path: &Path) -> Result<ImportedModel, AssetError> {
    let base = path.parent().unwrap_or(Path::new("./"));

    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )
    .map_err(|source| AssetError::Obj {
        path: path.to_path_buf(),
        source,
    })?;

    // A missing .mtl is not fatal; the geometry is still usable
    let materials = materials.unwrap_or_else(|e| {
        log::warn!("no materials for {}: {e}", path.display());
        Vec::new()
    });

    let mut result = ImportedModel::default();

    for material in &materials {
        let mut textures = BTreeMap::new();
        let slots = [
            (TextureKind::Diffuse, &material.diffuse_texture),
            (TextureKind::Specular, &material.specular_texture),
            (TextureKind::Ambient, &material.ambient_texture),
            (TextureKind::Normal, &material.normal_texture),
            (TextureKind::Shininess, &material.shininess_texture),
            (TextureKind::Opacity, &material.dissolve_texture),
        ];
        for (kind, texture) in slots {
            if let Some(file) = texture {
                textures.insert(kind, base.join(file));
            }
        }

        result.materials.push(MaterialInfo {
            name: material.name.clone(),
            diffuse_color: material
                .diffuse
                .map(|[r, g, b]| [r, g, b, material.dissolve.unwrap_or(1.0)]),
            textures,
        });
    }

    for model in models {
        let mesh = model.mesh;
        let data = MeshData {
            name: model.name,
            positions: mesh.positions.chunks_exact(3).map(|p| [p[0], p[1], p[2]]).collect(),
            uvs: mesh.texcoords.chunks_exact(2).map(|t| [t[0], t[1]]).collect(),
            normals: mesh.normals.chunks_exact(3).map(|n| [n[0], n[1], n[2]]).collect(),
            tangents: Vec::new(),
            indices: mesh.indices,
            material_index: mesh.material_id,
        };
        result.push_mesh(data)?;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use std::fs;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("prism_obj_{name}_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_obj_with_material_textures() {
        let dir = scratch_dir("textured");
        fs::write(
            dir.join("tri.mtl"),
            "newmtl stone\nKd 0.5 0.5 0.5\nmap_Kd stone_diffuse.png\nmap_Bump stone_normal.png\n",
        )
        .unwrap();
        fs::write(
            dir.join("tri.obj"),
            "mtllib tri.mtl\no tri\nv 0 0 0\nv 2 0 0\nv 0 3 -1\nvt 0 0\nvt 1 0\nvt 0 1\n\
             vn 0 0 1\nusemtl stone\nf 1/1/1 2/2/1 3/3/1\n",
        )
        .unwrap();

        let model = crate::model::import_model(&dir.join("tri.obj")).unwrap();
        assert_eq!(model.meshes.len(), 1);
        let mesh = &model.meshes[0];
        assert_eq!(mesh.data.indices.len(), 3);
        assert_eq!(mesh.bounds.min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(mesh.bounds.max, Vec3::new(2.0, 3.0, 0.0));
        assert_eq!(mesh.data.material_index, Some(0));

        let textures = model.texture_paths(0);
        assert_eq!(textures[&TextureKind::Diffuse], dir.join("stone_diffuse.png"));
        assert_eq!(textures[&TextureKind::Normal], dir.join("stone_normal.png"));
    }

    #[test]
    fn test_obj_without_mtl_still_loads() {
        let dir = scratch_dir("plain");
        fs::write(dir.join("plain.obj"), "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();

        let model = crate::model::import_model(&dir.join("plain.obj")).unwrap();
        assert!(model.materials.is_empty());
        // missing normals are filled with +Y
        assert_eq!(model.meshes[0].data.normals, vec![[0.0, 1.0, 0.0]; 3]);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let dir = scratch_dir("unknown");
        let path = dir.join("model.fbx");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            crate::model::import_model(&path),
            Err(AssetError::UnsupportedFormat { .. })
        ));
    }
}
