use glam::Vec3;

/// Axis-aligned bounds in mesh space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Option<Self> {
        let mut iter = points.into_iter().map(|p| Vec3::from_array(*p));
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// CPU-side geometry in the attribute layout the renderer uploads:
/// location 0 position, 1 uv, 2 normal, 3 tangent.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub material_index: Option<usize>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.positions)
    }

    /// Fills missing uvs/normals with defaults so every attribute stream has
    /// one entry per position.
    pub fn fill_missing_attributes(&mut self) {
        let n = self.positions.len();
        if self.uvs.len() != n {
            self.uvs = vec![[0.0, 0.0]; n];
        }
        if self.normals.len() != n {
            self.normals = vec![[0.0, 1.0, 0.0]; n];
        }
    }

    /// Unit cube centred on the origin, 24 vertices so each face has flat normals.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        // (normal, tangent-u, tangent-v)
        let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ];

        let mut mesh = MeshData {
            name: "cube".to_string(),
            ..Default::default()
        };
        for (n, u, v) in faces {
            let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
            let base = mesh.positions.len() as u32;
            for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (n + u * s + v * t) * h;
                mesh.positions.push(p.to_array());
                mesh.uvs.push([(s + 1.0) * 0.5, (t + 1.0) * 0.5]);
                mesh.normals.push(n.to_array());
                mesh.tangents.push(u.to_array());
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        mesh
    }

    /// Flat grid on the XZ plane, `cols` x `rows` cells, facing +Y.
    pub fn grid(cols: u32, rows: u32, cell_width: f32, cell_depth: f32) -> Self {
        let mut mesh = MeshData {
            name: "grid".to_string(),
            ..Default::default()
        };
        let width = cols as f32 * cell_width;
        let depth = rows as f32 * cell_depth;

        for z in 0..=rows {
            for x in 0..=cols {
                mesh.positions.push([
                    x as f32 * cell_width - width * 0.5,
                    0.0,
                    z as f32 * cell_depth - depth * 0.5,
                ]);
                mesh.uvs.push([x as f32 / cols.max(1) as f32, z as f32 / rows.max(1) as f32]);
                mesh.normals.push([0.0, 1.0, 0.0]);
                mesh.tangents.push([1.0, 0.0, 0.0]);
            }
        }

        let stride = cols + 1;
        for z in 0..rows {
            for x in 0..cols {
                let i = z * stride + x;
                mesh.indices
                    .extend_from_slice(&[i, i + stride, i + 1, i + 1, i + stride, i + stride + 1]);
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_bounds_and_counts() {
        let cube = MeshData::cube(2.0);
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.indices.len(), 36);

        let bounds = cube.bounding_box().unwrap();
        assert_eq!(bounds.min, Vec3::splat(-1.0));
        assert_eq!(bounds.max, Vec3::splat(1.0));
        assert_eq!(bounds.center(), Vec3::ZERO);
    }

    #[test]
    fn test_grid_is_centered() {
        let grid = MeshData::grid(10, 10, 1.0, 1.0);
        assert_eq!(grid.vertex_count(), 121);
        assert_eq!(grid.indices.len(), 600);
        let bounds = grid.bounding_box().unwrap();
        assert_eq!(bounds.extent(), Vec3::new(10.0, 0.0, 10.0));
    }

    #[test]
    fn test_empty_mesh_has_no_bounds() {
        assert!(MeshData::default().bounding_box().is_none());
    }

    #[test]
    fn test_fill_missing_attributes() {
        let mut mesh = MeshData {
            positions: vec![[0.0; 3]; 3],
            ..Default::default()
        };
        mesh.fill_missing_attributes();
        assert_eq!(mesh.uvs.len(), 3);
        assert_eq!(mesh.normals[2], [0.0, 1.0, 0.0]);
    }
}
