//! Gaussian and Laplacian image pyramids over the mip levels of one texture.

use std::rc::Rc;

use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::renderable::Renderable;
use crate::shader::ShaderProgram;
use crate::textures::full_mip_levels;

pub const MAX_RADIUS: usize = 16;
pub const BINOMIAL_FILTER_FRAG: &str = "screen_space/binomial_filter.frag";
pub const LAPLACE_FRAG: &str = "screen_space/laplace_pyramid.frag";

/// Rows `0..=level` of Pascal's triangle, each normalized to sum to one.
pub fn compute_masks(level: usize) -> Vec<Vec<f32>> {
    let mut masks: Vec<Vec<f32>> = vec![vec![1.0]];
    for i in 1..=level {
        let previous = &masks[i - 1];
        let row: Vec<f32> = (0..=i)
            .map(|j| {
                let left = if j > 0 { previous[j - 1] } else { 0.0 };
                let right = previous.get(j).copied().unwrap_or(0.0);
                left + right
            })
            .collect();
        masks.push(row);
    }
    for row in masks.iter_mut().skip(1) {
        let weight: f32 = row.iter().sum();
        row.iter_mut().for_each(|v| *v /= weight);
    }
    masks
}

/// A square RGBA32F texture with one framebuffer per mip level.
pub struct Pyramid {
    texture: TextureHandle,
    framebuffers: Vec<FramebufferHandle>,
    size: u32,
}

impl Pyramid {
    /// `size` should be a power of two; there are `log2(size)` levels.
    pub fn new(device: &mut dyn GraphicsDevice, size: u32) -> Result<Self, RenderError> {
        let desc = TextureDesc::new(size, size, TextureFormat::Rgba32F)
            .with_mip_levels(full_mip_levels(size, size))
            .with_wrap(TextureWrap::MirroredRepeat);
        let texture = device.create_texture(&desc)?;
        device.generate_mipmaps(texture);

        let levels = size.max(1).ilog2();
        let framebuffers = (0..levels)
            .map(|level| {
                device.create_framebuffer(&[FramebufferAttachment {
                    attachment: Attachment::Color(0),
                    texture,
                    level,
                }])
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("pyramid {size}x{size}: {levels} levels");

        Ok(Self {
            texture,
            framebuffers,
            size,
        })
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    pub fn levels(&self) -> u32 {
        self.framebuffers.len() as u32
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn level_size(&self, level: u32) -> u32 {
        (self.size >> level).max(1)
    }

    pub fn framebuffer(&self, level: u32) -> Option<FramebufferHandle> {
        self.framebuffers.get(level as usize).copied()
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        for framebuffer in self.framebuffers {
            device.delete_framebuffer(framebuffer);
        }
        device.delete_texture(self.texture);
    }
}

impl GpuResource for Pyramid {
    fn collect_resources(&self, list: &mut ReleaseList) {
        for &framebuffer in &self.framebuffers {
            list.framebuffer(framebuffer);
        }
        list.texture(self.texture);
    }
}

/// Draws `quad` into each of `levels` with `program` reading `source`.
/// Depth testing is switched off for the duration and then put back as it was.
fn filter_levels(
    device: &mut dyn GraphicsDevice,
    target: &Pyramid,
    levels: std::ops::Range<u32>,
    source: TextureHandle,
    program: &mut ShaderProgram,
    quad: &Rc<dyn Renderable>,
) -> u32 {
    let depth_test = device.state().is_enabled(Capability::DepthTest);
    if depth_test {
        device.set_capability(Capability::DepthTest, false);
    }
    program.update_and_bind_texture("tex", 0, source);
    program.use_program(device);

    let mut draws = 0;
    for level in levels {
        let size = target.level_size(level);
        device.set_viewport(Viewport::full(size, size));
        device.bind_framebuffer(target.framebuffer(level));
        program.update("level", level as i32);
        program.flush(device);
        quad.bind(device);
        quad.draw(device);
        quad.unbind(device);
        draws += 1;
    }

    device.bind_framebuffer(None);
    if depth_test {
        device.set_capability(Capability::DepthTest, true);
    }
    draws
}

/// Reduces level `l - 1` into level `l` for every level after the first.
pub fn gauss(
    device: &mut dyn GraphicsDevice,
    pyramid: &Pyramid,
    reduce: &mut ShaderProgram,
    quad: &Rc<dyn Renderable>,
) -> u32 {
    filter_levels(device, pyramid, 1..pyramid.levels(), pyramid.texture(), reduce, quad)
}

/// Fills levels `0..n-1` of `laplace` with the band-pass difference of
/// consecutive `gauss` levels.
pub fn laplace(
    device: &mut dyn GraphicsDevice,
    laplace: &Pyramid,
    gauss: &Pyramid,
    program: &mut ShaderProgram,
    quad: &Rc<dyn Renderable>,
) -> u32 {
    let levels = laplace.levels().saturating_sub(1);
    filter_levels(device, laplace, 0..levels, gauss.texture(), program, quad)
}

/// Binomial blur radius for the reduce shader, clamped to `0..=MAX_RADIUS`.
pub struct BinomialFilter {
    masks: Vec<Vec<f32>>,
    radius: usize,
}

impl Default for BinomialFilter {
    fn default() -> Self {
        Self {
            masks: compute_masks(MAX_RADIUS * 2 + 1),
            radius: 3,
        }
    }
}

impl BinomialFilter {
    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn weights(&self) -> &[f32] {
        &self.masks[2 * self.radius]
    }

    pub fn set_radius(&mut self, radius: i64, program: &mut ShaderProgram) {
        self.radius = radius.clamp(0, MAX_RADIUS as i64) as usize;
        log::info!("radius: {}", self.radius);
        self.apply(program);
    }

    pub fn apply(&self, program: &mut ShaderProgram) {
        program.update("radius", self.radius as i32);
        program.update("binomWeights", self.weights());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_masks_are_normalized_binomials() {
        let masks = compute_masks(4);
        assert_eq!(masks.len(), 5);
        assert_eq!(masks[0], vec![1.0]);
        assert_eq!(masks[2], vec![0.25, 0.5, 0.25]);
        assert_eq!(masks[4], vec![1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0]);
        for row in &masks {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_radius_is_clamped() {
        let mut device = HeadlessDevice::new(1, 1);
        let stages = [
            StageSource {
                stage: ShaderStage::Vertex,
                label: "v".into(),
                source: "void main() {}".into(),
            },
            StageSource {
                stage: ShaderStage::Fragment,
                label: "f".into(),
                source: "uniform int radius; uniform float binomWeights[33]; out vec4 c; void main() {}".into(),
            },
        ];
        let mut program = ShaderProgram::new(&mut device, &stages).unwrap();
        let mut filter = BinomialFilter::default();
        filter.set_radius(40, &mut program);
        assert_eq!(filter.radius(), MAX_RADIUS);
        assert_eq!(filter.weights().len(), 33);
        filter.set_radius(-2, &mut program);
        assert_eq!(filter.radius(), 0);
        assert_eq!(program.pending_value("radius"), Some(&crate::uniform::UniformValue::Int(0)));
    }

    #[test]
    fn test_pyramid_has_log2_levels() {
        let mut device = HeadlessDevice::new(1, 1);
        let pyramid = Pyramid::new(&mut device, 16).unwrap();
        assert_eq!(pyramid.levels(), 4);
        assert_eq!(pyramid.level_size(3), 2);
        assert!(pyramid.framebuffer(4).is_none());
    }
}
