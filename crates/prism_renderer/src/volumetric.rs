//! Volumetric light scattering by raymarching the shadow map.
//!
//! Each pixel marches from the camera to the G-Buffer world position and
//! accumulates in-scattered light wherever the shadow map sees the sample.
//! Ray start offsets come from a noise texture made of 8x8 blocks, each
//! holding a shuffled permutation of 0..64, which turns banding into noise.

use std::path::Path;
use std::rc::Rc;

use glam::{Mat4, Vec3};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::post::{screen_pass, screen_program};
use crate::render_pass::{RenderPass, SharedProgram, SharedTarget};
use crate::render_target::RenderTarget;
use crate::renderable::Renderable;

pub const RAYMARCH_FRAG: &str = "vml/raymarching.frag";

pub const BLOCK_SIDE: u32 = 8;
pub const BLOCK_SIZE: u32 = BLOCK_SIDE * BLOCK_SIDE;
pub const SCATTER_PROBABILITY: f32 = 0.02;
pub const RADIOCITY: f32 = 10_000_000.0;

pub struct VolumetricLighting {
    program: SharedProgram,
    target: SharedTarget,
    noise: Option<TextureHandle>,
    width: u32,
    height: u32,
}

impl VolumetricLighting {
    pub fn new(
        device: &mut dyn GraphicsDevice,
        shaders: &Path,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let program = screen_program(device, shaders, RAYMARCH_FRAG)?;
        let target = Rc::new(RenderTarget::with_color_attachments(
            device,
            "raymarching",
            width,
            height,
            1,
            TextureFormat::Rgba16F,
            false,
        )?);
        {
            let mut p = program.borrow_mut();
            p.update("albedo", SCATTER_PROBABILITY);
            p.update("radiocity", RADIOCITY);
        }
        Ok(Self {
            program,
            target,
            noise: None,
            width,
            height,
        })
    }

    /// The raymarch pass; add it to the frame after the shadow map and G-Buffer.
    pub fn render_pass(&self, quad: Rc<dyn Renderable>) -> RenderPass {
        let mut pass = screen_pass("volumetric lighting", self.program.clone(), Some(self.target.clone()), quad);
        pass.set_clear_color([0.0; 4]).add_clear_bits(ClearFlags::COLOR);
        pass
    }

    pub fn program(&self) -> &SharedProgram {
        &self.program
    }

    /// Uploads a fresh block-permutation noise map and binds it as `noiseMap`.
    pub fn setup_noise_texture<R: Rng + ?Sized>(
        &mut self,
        device: &mut dyn GraphicsDevice,
        rng: &mut R,
    ) -> Result<TextureHandle, RenderError> {
        let data = block_noise(self.width, self.height, rng);
        let desc = TextureDesc::new(self.width, self.height, TextureFormat::R8).with_filter(TextureFilter::Nearest);
        let texture = device.create_texture(&desc)?;
        device.upload_texture(texture, 0, TexelData::U8(&data))?;
        if let Some(old) = self.noise.replace(texture) {
            device.delete_texture(old);
        }
        self.program.borrow_mut().bind_texture_on_use("noiseMap", texture);
        Ok(texture)
    }

    pub fn noise_texture(&self) -> Option<TextureHandle> {
        self.noise
    }

    pub fn bind_inputs(&mut self, shadow_map: TextureHandle, world_positions: TextureHandle) {
        let mut p = self.program.borrow_mut();
        p.bind_texture_on_use("shadowMap", shadow_map);
        p.bind_texture_on_use("worldPosMap", world_positions);
    }

    pub fn update(&mut self, camera_view: &Mat4, camera_pos: Vec3, light_view: &Mat4, light_projection: &Mat4) {
        let mut p = self.program.borrow_mut();
        p.update("cameraView", *camera_view);
        p.update("cameraPosition", camera_pos);
        p.update("lightView", *light_view);
        p.update("lightProjection", *light_projection);
    }

    pub fn output(&self) -> Result<TextureHandle, RenderError> {
        self.target.buffer("color0")
    }

    pub fn target(&self) -> &SharedTarget {
        &self.target
    }
}

/// Row-major R8 noise: the pixel at (x, y) gets entry `(y % 8) * 8 + x % 8`
/// of its block's permutation.
pub fn block_noise<R: Rng + ?Sized>(width: u32, height: u32, rng: &mut R) -> Vec<u8> {
    let blocks_x = width.div_ceil(BLOCK_SIDE);
    let blocks_y = height.div_ceil(BLOCK_SIDE);
    let mut indices: Vec<u8> = (0..BLOCK_SIZE as u8).collect();
    let mut permutations = Vec::with_capacity((blocks_x * blocks_y * BLOCK_SIZE) as usize);
    for _ in 0..blocks_x * blocks_y {
        indices.shuffle(rng);
        permutations.extend_from_slice(&indices);
    }

    let mut noise = vec![0u8; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let block = (y / BLOCK_SIDE) * blocks_x + x / BLOCK_SIDE;
            let within = (y % BLOCK_SIDE) * BLOCK_SIDE + x % BLOCK_SIDE;
            noise[(y * width + x) as usize] = permutations[(block * BLOCK_SIZE + within) as usize];
        }
    }
    noise
}

impl GpuResource for VolumetricLighting {
    fn collect_resources(&self, list: &mut ReleaseList) {
        self.program.collect_resources(list);
        self.target.collect_resources(list);
        if let Some(noise) = self.noise {
            list.texture(noise);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_each_block_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let (w, h) = (16, 8);
        let noise = block_noise(w, h, &mut rng);
        for block_x in 0..2 {
            let mut seen: Vec<u8> = (0..8)
                .flat_map(|y| (0..8).map(move |x| (block_x * 8 + x, y)))
                .map(|(x, y)| noise[(y * w + x) as usize])
                .collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..64).collect::<Vec<u8>>());
        }
    }

    #[test]
    fn test_partial_blocks_at_the_edge() {
        let mut rng = StdRng::seed_from_u64(1);
        let noise = block_noise(10, 3, &mut rng);
        assert_eq!(noise.len(), 30);
        assert!(noise.iter().all(|&v| v < 64));
    }
}
