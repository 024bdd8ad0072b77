//! Procedural trees: branch tubes and foliage cards, drawn instanced with
//! per-tree transforms read from a `Tree` uniform block by `gl_InstanceID`,
//! and bent in the vertex stage by a wind field texture.

use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use prism_assets::{MeshData, TextureData};
use rand::Rng;

use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::render_pass::{RenderPass, SharedBlock, SharedProgram, SharedTarget, shared};
use crate::renderable::{Mesh, Renderable};
use crate::shader::ShaderProgram;
use crate::textures::upload_texture_data;
use crate::uniform_block::{BindingPoints, UniformBlockBuffer};

pub const BRANCH_VERT: &str = "tree/branch.vert";
pub const FOLIAGE_VERT: &str = "tree/foliage.vert";
pub const FOLIAGE_FRAG: &str = "tree/foliage.frag";
pub const FOLIAGE_SHADOW_FRAG: &str = "tree/foliage_shadow.frag";
pub const SHADOW_FRAG: &str = "vml/shadowmap.frag";

pub const TREE_BLOCK: &str = "Tree";
/// Size of the `models` array in the `Tree` block.
pub const MAX_TREES_PER_VARIANT: usize = 16;
/// Variant `i` binds its `Tree` block at `FIRST_TREE_BINDING + i`.
pub const FIRST_TREE_BINDING: u32 = 2;
pub const DEFAULT_WIND_POWER: f32 = 0.25;
pub const DEFAULT_FOLIAGE_SIZE: f32 = 0.4;

const TUBE_SIDES: u32 = 6;

#[derive(Clone, Debug)]
pub struct TreeParams {
    pub trunk_height: f32,
    pub trunk_radius: f32,
    pub branches: u32,
    pub branch_length: f32,
    pub leaves_per_branch: u32,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            trunk_height: 2.5,
            trunk_radius: 0.12,
            branches: 7,
            branch_length: 1.2,
            leaves_per_branch: 12,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BranchSegment {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
}

/// Trunk first, then branches leaving the upper two thirds of the trunk.
pub fn generate_skeleton<R: Rng + ?Sized>(params: &TreeParams, rng: &mut R) -> Vec<BranchSegment> {
    let top = Vec3::Y * params.trunk_height;
    let mut skeleton = vec![BranchSegment {
        start: Vec3::ZERO,
        end: top,
        radius: params.trunk_radius,
    }];
    for i in 0..params.branches {
        let height = rng.gen_range(params.trunk_height / 3.0..params.trunk_height);
        let angle = i as f32 / params.branches as f32 * std::f32::consts::TAU + rng.gen_range(-0.3..0.3);
        let rise = rng.gen_range(0.3..0.9);
        let direction = Vec3::new(angle.cos(), rise, angle.sin()).normalize();
        let start = Vec3::Y * height;
        skeleton.push(BranchSegment {
            start,
            end: start + direction * params.branch_length * rng.gen_range(0.7..1.0),
            radius: params.trunk_radius * 0.4,
        });
    }
    skeleton
}

/// One open tube per segment. Tangents run along the branch.
pub fn generate_branch_mesh(skeleton: &[BranchSegment]) -> MeshData {
    let mut mesh = MeshData {
        name: "branches".to_string(),
        ..MeshData::default()
    };
    for segment in skeleton {
        let axis = (segment.end - segment.start).normalize_or(Vec3::Y);
        let (u, v) = axis.any_orthonormal_pair();
        let base = mesh.positions.len() as u32;
        for side in 0..=TUBE_SIDES {
            let theta = side as f32 / TUBE_SIDES as f32 * std::f32::consts::TAU;
            let normal = u * theta.cos() + v * theta.sin();
            for (t, centre) in [(0.0, segment.start), (1.0, segment.end)] {
                // branches taper towards their tip
                let radius = segment.radius * (1.0 - 0.6 * t);
                mesh.positions.push((centre + normal * radius).to_array());
                mesh.normals.push(normal.to_array());
                mesh.tangents.push(axis.to_array());
                mesh.uvs.push([side as f32 / TUBE_SIDES as f32, t]);
            }
        }
        for side in 0..TUBE_SIDES {
            let a = base + side * 2;
            let (b, c, d) = (a + 1, a + 2, a + 3);
            mesh.indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    mesh
}

/// Unit cards scattered over the outer half of every branch except the trunk.
/// Each vertex carries its card centre in the tangent stream so the vertex
/// stage can scale the card by `foliageSize` around it.
pub fn generate_foliage_mesh<R: Rng + ?Sized>(
    skeleton: &[BranchSegment],
    leaves_per_branch: u32,
    rng: &mut R,
) -> MeshData {
    let mut mesh = MeshData {
        name: "foliage".to_string(),
        ..MeshData::default()
    };
    for segment in skeleton.iter().skip(1) {
        for _ in 0..leaves_per_branch {
            let t = rng.gen_range(0.5..1.0);
            let centre = segment.start.lerp(segment.end, t);
            let normal = Vec3::new(rng.gen_range(-1.0..1.0), 1.0, rng.gen_range(-1.0..1.0)).normalize();
            let (u, v) = normal.any_orthonormal_pair();
            let base = mesh.positions.len() as u32;
            for (corner, uv) in [(-u - v, [0.0, 0.0]), (u - v, [1.0, 0.0]), (-u + v, [0.0, 1.0]), (u + v, [1.0, 1.0])] {
                mesh.positions.push((centre + corner * 0.5).to_array());
                mesh.normals.push(normal.to_array());
                mesh.tangents.push(centre.to_array());
                mesh.uvs.push(uv);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
        }
    }
    mesh
}

/// A 2D vector field sampled by the tree vertex stages, stored as RG32F.
pub struct WindField {
    width: u32,
    height: u32,
    texture: TextureHandle,
    data: Vec<f32>,
}

impl WindField {
    pub fn new(device: &mut dyn GraphicsDevice, width: u32, height: u32) -> Result<Self, RenderError> {
        let desc = TextureDesc::new(width, height, TextureFormat::Rg32F).with_wrap(TextureWrap::Repeat);
        let texture = device.create_texture(&desc)?;
        Ok(Self {
            width,
            height,
            texture,
            data: vec![0.0; (width * height * 2) as usize],
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn sample(&self, x: u32, y: u32) -> Vec2 {
        let i = ((y % self.height) * self.width + x % self.width) as usize * 2;
        Vec2::new(self.data[i], self.data[i + 1])
    }

    /// Recomputes the field for time `elapsed` (seconds) and re-uploads it.
    pub fn update_vector_texture(&mut self, device: &mut dyn GraphicsDevice, elapsed: f32) -> Result<(), RenderError> {
        for y in 0..self.height {
            for x in 0..self.width {
                let uv = Vec2::new(x as f32 / self.width as f32, y as f32 / self.height as f32);
                let wind = wind_at(uv, elapsed);
                let i = (y * self.width + x) as usize * 2;
                self.data[i] = wind.x;
                self.data[i + 1] = wind.y;
            }
        }
        device.upload_texture(self.texture, 0, TexelData::F32(&self.data))
    }
}

/// Prevailing wind with travelling gusts and a slow swirl. Length stays below 1.5.
fn wind_at(uv: Vec2, t: f32) -> Vec2 {
    let prevailing = Vec2::new(0.8, 0.3);
    let gust = (t * 0.9 + uv.x * 6.0).sin() * 0.5 + 0.5;
    let swirl = Vec2::new((uv.y * 5.0 + t * 1.3).sin(), (uv.x * 4.0 - t * 0.7).cos()) * 0.35;
    prevailing * gust + swirl
}

pub struct TreeVariant {
    pub branches: Rc<Mesh>,
    pub foliage: Rc<Mesh>,
    pub block: SharedBlock,
    pub binding_point: u32,
    pub instances: u32,
}

/// Shaders, materials and per-variant geometry for the tree passes.
pub struct TreeRendering {
    pub branch_program: SharedProgram,
    pub foliage_program: SharedProgram,
    pub branch_shadow_program: SharedProgram,
    pub foliage_shadow_program: SharedProgram,
    variants: Vec<TreeVariant>,
    materials: Vec<TextureHandle>,
    wind_power: f32,
    foliage_size: f32,
}

impl TreeRendering {
    /// `branch_fragment` is the G-Buffer fragment stage the bark is shaded with.
    pub fn new(device: &mut dyn GraphicsDevice, shaders: &Path, branch_fragment: &str) -> Result<Self, RenderError> {
        let branch_program = ShaderProgram::from_files(device, shaders, &[BRANCH_VERT, branch_fragment])?;
        let foliage_program = ShaderProgram::from_files(device, shaders, &[FOLIAGE_VERT, FOLIAGE_FRAG])?;
        let branch_shadow_program = ShaderProgram::from_files(device, shaders, &[BRANCH_VERT, SHADOW_FRAG])?;
        let foliage_shadow_program =
            ShaderProgram::from_files(device, shaders, &[FOLIAGE_VERT, FOLIAGE_SHADOW_FRAG])?;
        Ok(Self {
            branch_program: shared(branch_program),
            foliage_program: shared(foliage_program),
            branch_shadow_program: shared(branch_shadow_program),
            foliage_shadow_program: shared(foliage_shadow_program),
            variants: Vec::new(),
            materials: Vec::new(),
            wind_power: DEFAULT_WIND_POWER,
            foliage_size: DEFAULT_FOLIAGE_SIZE,
        })
    }

    fn programs(&self) -> [&SharedProgram; 4] {
        [
            &self.branch_program,
            &self.foliage_program,
            &self.branch_shadow_program,
            &self.foliage_shadow_program,
        ]
    }

    /// Generates one tree shape and places it at every transform (up to
    /// [`MAX_TREES_PER_VARIANT`]).
    pub fn add_variant<R: Rng + ?Sized>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        binding_points: &mut BindingPoints,
        params: &TreeParams,
        transforms: &[Mat4],
        rng: &mut R,
    ) -> Result<usize, RenderError> {
        if transforms.len() > MAX_TREES_PER_VARIANT {
            log::warn!(
                "{} trees requested for one variant, only {MAX_TREES_PER_VARIANT} fit the Tree block",
                transforms.len()
            );
        }
        let transforms = &transforms[..transforms.len().min(MAX_TREES_PER_VARIANT)];

        let skeleton = generate_skeleton(params, rng);
        let branches = Mesh::upload(device, &generate_branch_mesh(&skeleton))?.instanced_by_id();
        let foliage =
            Mesh::upload(device, &generate_foliage_mesh(&skeleton, params.leaves_per_branch, rng))?.instanced_by_id();

        let mut block = UniformBlockBuffer::from_program(&self.branch_program.borrow(), TREE_BLOCK)?;
        let models: Vec<f32> = transforms.iter().flat_map(|m| m.to_cols_array()).collect();
        let members: [(&str, &[f32]); 2] = [("models", &models), ("trunkHeight", &[params.trunk_height])];
        for (name, values) in members {
            if !block.update_value(name, values) {
                log::warn!("{TREE_BLOCK} block has no member {name}");
            }
        }
        block.upload(device)?;

        let binding_point = binding_points.allocate_from(FIRST_TREE_BINDING + self.variants.len() as u32);
        log::debug!(
            "tree variant {}: {} trees, {} branch + {} foliage indices, binding {binding_point}",
            self.variants.len(),
            transforms.len(),
            branches.index_count(),
            foliage.index_count()
        );
        self.variants.push(TreeVariant {
            branches: Rc::new(branches),
            foliage: Rc::new(foliage),
            block: shared(block),
            binding_point,
            instances: transforms.len() as u32,
        });
        Ok(self.variants.len() - 1)
    }

    pub fn variants(&self) -> &[TreeVariant] {
        &self.variants
    }

    /// Procedural bark and leaf textures.
    pub fn assign_material_textures(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), RenderError> {
        let bark = upload_texture_data(device, &TextureData::checkerboard(64, 4), true)?;
        let leaf = upload_texture_data(device, &TextureData::solid([70, 140, 50, 255]), false)?;
        {
            let mut branch = self.branch_program.borrow_mut();
            branch.bind_texture_on_use("tex", bark);
            branch.update("mixTexture", 1.0f32);
            branch.update("color", Vec4::new(0.45, 0.32, 0.2, 1.0));
        }
        self.foliage_program.borrow_mut().bind_texture_on_use("tex", leaf);
        self.foliage_shadow_program.borrow_mut().bind_texture_on_use("tex", leaf);
        self.materials = vec![bark, leaf];
        Ok(())
    }

    pub fn material_textures(&self) -> &[TextureHandle] {
        &self.materials
    }

    pub fn assign_wind_field(&mut self, wind: &WindField) {
        for program in self.programs() {
            program.borrow_mut().bind_texture_on_use("windField", wind.texture());
        }
    }

    pub fn set_wind_power(&mut self, power: f32) {
        self.wind_power = power;
    }

    pub fn set_foliage_size(&mut self, size: f32) {
        self.foliage_size = size;
    }

    pub fn set_projections(&mut self, camera: &Mat4, light: &Mat4) {
        self.branch_program.borrow_mut().update("projection", *camera);
        self.foliage_program.borrow_mut().update("projection", *camera);
        self.branch_shadow_program.borrow_mut().update("projection", *light);
        self.foliage_shadow_program.borrow_mut().update("projection", *light);
    }

    /// Per-frame view and wind uniforms. `light_dir_view` is the light
    /// direction in camera view space.
    pub fn update(&mut self, view: &Mat4, light_view: &Mat4, light_dir_view: Vec4, elapsed: f32) {
        self.branch_program.borrow_mut().update("view", *view);
        self.foliage_program.borrow_mut().update("view", *view);
        self.branch_shadow_program.borrow_mut().update("view", *light_view);
        self.foliage_shadow_program.borrow_mut().update("view", *light_view);
        self.foliage_program.borrow_mut().update("vLightDir", light_dir_view);

        let (power, size) = (self.wind_power, self.foliage_size);
        for program in self.programs() {
            let mut p = program.borrow_mut();
            p.update("windPower", power);
            p.update("time", elapsed);
        }
        self.foliage_program.borrow_mut().update("foliageSize", size);
        self.foliage_shadow_program.borrow_mut().update("foliageSize", size);
    }

    fn variant_pass(
        label: String,
        program: &SharedProgram,
        target: &SharedTarget,
        mesh: &Rc<Mesh>,
        variant: &TreeVariant,
    ) -> RenderPass {
        let renderable: Rc<dyn Renderable> = mesh.clone();
        let mut pass = RenderPass::new(&label, program.clone(), Some(target.clone()));
        pass.add_enable(Capability::DepthTest)
            .add_renderable(renderable)
            .set_instances(variant.instances)
            .add_uniform_block(variant.block.clone(), variant.binding_point);
        pass
    }

    /// Branch passes then foliage passes, drawing into the G-Buffer without clearing it.
    pub fn gbuffer_passes(&self, gbuffer: &SharedTarget) -> Vec<RenderPass> {
        let branches = self.variants.iter().enumerate().map(|(i, v)| {
            Self::variant_pass(format!("branches {i}"), &self.branch_program, gbuffer, &v.branches, v)
        });
        let foliage = self.variants.iter().enumerate().map(|(i, v)| {
            Self::variant_pass(format!("foliage {i}"), &self.foliage_program, gbuffer, &v.foliage, v)
        });
        branches.chain(foliage).collect()
    }

    /// Foliage then branch passes into the shadow map.
    pub fn shadow_passes(&self, shadow_map: &SharedTarget) -> Vec<RenderPass> {
        let foliage = self.variants.iter().enumerate().map(|(i, v)| {
            Self::variant_pass(
                format!("foliage shadow {i}"),
                &self.foliage_shadow_program,
                shadow_map,
                &v.foliage,
                v,
            )
        });
        let branches = self.variants.iter().enumerate().map(|(i, v)| {
            Self::variant_pass(
                format!("branch shadow {i}"),
                &self.branch_shadow_program,
                shadow_map,
                &v.branches,
                v,
            )
        });
        foliage.chain(branches).collect()
    }
}

impl GpuResource for WindField {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.texture(self.texture);
    }
}

impl GpuResource for TreeRendering {
    fn collect_resources(&self, list: &mut ReleaseList) {
        for program in self.programs() {
            program.collect_resources(list);
        }
        for variant in &self.variants {
            variant.branches.collect_resources(list);
            variant.foliage.collect_resources(list);
            variant.block.collect_resources(list);
        }
        for &texture in &self.materials {
            list.texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_branch_mesh_is_closed_around_each_segment() {
        let mut rng = StdRng::seed_from_u64(3);
        let params = TreeParams {
            branches: 2,
            ..TreeParams::default()
        };
        let skeleton = generate_skeleton(&params, &mut rng);
        assert_eq!(skeleton.len(), 3);
        let mesh = generate_branch_mesh(&skeleton);
        let per_segment = ((TUBE_SIDES + 1) * 2) as usize;
        assert_eq!(mesh.positions.len(), per_segment * 3);
        assert_eq!(mesh.indices.len(), (TUBE_SIDES * 6) as usize * 3);
        assert_eq!(mesh.tangents.len(), mesh.positions.len());
        assert!(mesh.indices.iter().all(|&i| (i as usize) < mesh.positions.len()));
    }

    #[test]
    fn test_foliage_skips_the_trunk() {
        let mut rng = StdRng::seed_from_u64(5);
        let skeleton = generate_skeleton(&TreeParams::default(), &mut rng);
        let mesh = generate_foliage_mesh(&skeleton, 3, &mut rng);
        let cards = (skeleton.len() - 1) * 3;
        assert_eq!(mesh.positions.len(), cards * 4);
        assert_eq!(mesh.indices.len(), cards * 6);
        assert_eq!(mesh.tangents[0], mesh.tangents[3]);
    }

    #[test]
    fn test_wind_is_bounded_and_moves() {
        let a = wind_at(Vec2::new(0.25, 0.5), 0.0);
        let b = wind_at(Vec2::new(0.25, 0.5), 1.0);
        assert_ne!(a, b);
        for t in [0.0, 0.5, 3.0, 100.0] {
            assert!(wind_at(Vec2::new(0.9, 0.1), t).length() < 1.5);
        }
    }
}
