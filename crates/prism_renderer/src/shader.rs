use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::device::{GraphicsDevice, ProgramHandle, ShaderStage, StageSource, TextureHandle};
use crate::error::RenderError;
use crate::reflect::{OutputInfo, ProgramInterface, UniformBlockInfo, UniformInfo, UniformKind};
use crate::release::{GpuResource, ReleaseList};
use crate::uniform::UniformValue;

pub struct ShaderSources;

impl ShaderSources {
    pub fn stage_for(path: &Path) -> Option<ShaderStage> {
        match path.extension()?.to_str()? {
            "vert" | "vs" => Some(ShaderStage::Vertex),
            "tc" | "tesc" => Some(ShaderStage::TessControl),
            "te" | "tese" => Some(ShaderStage::TessEvaluation),
            "geom" | "gs" => Some(ShaderStage::Geometry),
            "frag" | "fs" => Some(ShaderStage::Fragment),
            _ => None,
        }
    }

    /// Reads stage sources relative to `root`. The relative path becomes the
    /// stage label.
    pub fn from_files(root: &Path, paths: &[&str]) -> Result<Vec<StageSource>, RenderError> {
        paths
            .iter()
            .map(|relative| {
                let trimmed = relative.trim_start_matches(['/', '\\']);
                let path = root.join(trimmed);
                let stage = Self::stage_for(&path).ok_or_else(|| RenderError::UnknownStage(path.clone()))?;
                let source = std::fs::read_to_string(&path)
                    .map_err(|source| RenderError::ShaderSource { path: path.clone(), source })?;
                Ok(StageSource {
                    stage,
                    label: trimmed.to_string(),
                    source,
                })
            })
            .collect()
    }
}

#[derive(Clone, Debug)]
struct TextureBinding {
    name: String,
    texture: TextureHandle,
    unit: Option<u32>,
}

/// A linked program plus the binding contract between CPU-side parameter
/// updates and the GPU: uniform values are cached by location and flushed
/// while the program is current, textures are assigned sampler units at use.
pub struct ShaderProgram {
    handle: ProgramHandle,
    label: String,
    interface: ProgramInterface,
    pending: BTreeMap<u32, UniformValue>,
    textures: Vec<TextureBinding>,
    warned: HashSet<String>,
}

impl ShaderProgram {
    pub fn new(device: &mut dyn GraphicsDevice, stages: &[StageSource]) -> Result<Self, RenderError> {
        let label = stages
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>()
            .join(" + ");
        let (handle, interface) = device.create_program(stages)?;
        log::debug!(
            "program {label}: {} uniforms, {} blocks, {} outputs",
            interface.uniforms.len(),
            interface.blocks.len(),
            interface.outputs.len()
        );
        Ok(Self {
            handle,
            label,
            interface,
            pending: BTreeMap::new(),
            textures: Vec::new(),
            warned: HashSet::new(),
        })
    }

    pub fn from_files(
        device: &mut dyn GraphicsDevice,
        root: &Path,
        paths: &[&str],
    ) -> Result<Self, RenderError> {
        let stages = ShaderSources::from_files(root, paths)?;
        Self::new(device, &stages)
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    pub fn uniform_info(&self, name: &str) -> Option<&UniformInfo> {
        self.interface.uniform(name)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.interface.uniform(name).is_some()
    }

    pub fn uniform_block(&self, name: &str) -> Option<&UniformBlockInfo> {
        self.interface.block(name)
    }

    pub fn outputs(&self) -> &[OutputInfo] {
        &self.interface.outputs
    }

    /// Output name to attachment slot.
    pub fn output_map(&self) -> BTreeMap<String, u32> {
        self.interface
            .outputs
            .iter()
            .map(|o| (o.name.clone(), o.slot))
            .collect()
    }

    fn warn_once(&mut self, name: &str, what: &str) {
        if self.warned.insert(name.to_string()) {
            log::warn!("{}: no active {what} `{name}`, ignoring", self.label);
        }
    }

    /// Queues a uniform value. Unknown names are ignored with a warning,
    /// since the compiler strips unused uniforms.
    pub fn update(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let Some(location) = self.interface.uniform(name).map(|u| u.location) else {
            self.warn_once(name, "uniform");
            return false;
        };
        self.pending.insert(location, value.into());
        true
    }

    /// A value queued by `update` that has not been flushed yet.
    pub fn pending_value(&self, name: &str) -> Option<&UniformValue> {
        let location = self.interface.uniform(name)?.location;
        self.pending.get(&location)
    }

    /// Registers `texture` for sampler `name`; the unit is assigned at [`Self::use_program`].
    pub fn bind_texture_on_use(&mut self, name: &str, texture: TextureHandle) -> bool {
        self.register_texture(name, texture, None)
    }

    /// Like [`Self::bind_texture_on_use`] with a fixed sampler unit.
    pub fn update_and_bind_texture(&mut self, name: &str, unit: u32, texture: TextureHandle) -> bool {
        self.register_texture(name, texture, Some(unit))
    }

    fn register_texture(&mut self, name: &str, texture: TextureHandle, unit: Option<u32>) -> bool {
        let is_sampler = self
            .interface
            .uniform(name)
            .is_some_and(|u| u.kind == UniformKind::Sampler);
        if !is_sampler {
            self.warn_once(name, "sampler");
            return false;
        }
        match self.textures.iter_mut().find(|b| b.name == name) {
            Some(binding) => {
                binding.texture = texture;
                binding.unit = unit.or(binding.unit);
            }
            None => self.textures.push(TextureBinding {
                name: name.to_string(),
                texture,
                unit,
            }),
        }
        true
    }

    pub fn bound_textures(&self) -> Vec<(&str, TextureHandle)> {
        self.textures
            .iter()
            .map(|b| (b.name.as_str(), b.texture))
            .collect()
    }

    /// Makes the program current, binds every registered texture to a unit
    /// (fixed units first, the rest in registration order) and flushes
    /// pending uniforms.
    pub fn use_program(&mut self, device: &mut dyn GraphicsDevice) {
        device.use_program(Some(self.handle));

        let fixed: HashSet<u32> = self.textures.iter().filter_map(|b| b.unit).collect();
        let mut next = 0;
        let mut assignments = Vec::with_capacity(self.textures.len());
        for binding in &self.textures {
            let unit = match binding.unit {
                Some(unit) => unit,
                None => {
                    while fixed.contains(&next) {
                        next += 1;
                    }
                    let unit = next;
                    next += 1;
                    unit
                }
            };
            assignments.push((binding.name.clone(), unit, binding.texture));
        }
        for (name, unit, texture) in assignments {
            device.bind_texture(unit, Some(texture));
            if let Some(info) = self.interface.uniform(&name) {
                self.pending.insert(info.location, UniformValue::Int(unit as i32));
            }
        }
        self.flush(device);
    }

    /// Pushes queued uniform values. Only possible while this program is current.
    pub fn flush(&mut self, device: &mut dyn GraphicsDevice) {
        if device.state().program != Some(self.handle) {
            return;
        }
        for (location, value) in std::mem::take(&mut self.pending) {
            device.set_uniform(self.handle, location, &value);
        }
    }

    /// `glUniformBlockBinding` for a named block.
    pub fn bind_uniform_block(
        &self,
        device: &mut dyn GraphicsDevice,
        block: &str,
        binding_point: u32,
    ) -> Result<(), RenderError> {
        let index = self
            .interface
            .block(block)
            .ok_or_else(|| RenderError::UnknownUniformBlock {
                program: self.label.clone(),
                block: block.to_string(),
            })?
            .index;
        device.set_uniform_block_binding(self.handle, index, binding_point);
        Ok(())
    }

    pub fn delete(self, device: &mut dyn GraphicsDevice) {
        device.delete_program(self.handle);
    }
}

impl GpuResource for ShaderProgram {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.program(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use glam::Mat4;

    fn program(device: &mut HeadlessDevice) -> ShaderProgram {
        let stages = [
            StageSource {
                stage: ShaderStage::Vertex,
                label: "p.vert".into(),
                source: "uniform mat4 model; void main() {}".into(),
            },
            StageSource {
                stage: ShaderStage::Fragment,
                label: "p.frag".into(),
                source: "uniform sampler2D a; uniform sampler2D b; uniform float k; \
                         out vec4 color; void main() {}"
                    .into(),
            },
        ];
        ShaderProgram::new(device, &stages).unwrap()
    }

    #[test]
    fn test_unknown_uniform_is_a_warning_not_an_error() {
        let mut device = HeadlessDevice::new(2, 2);
        let mut program = program(&mut device);
        assert!(!program.update("doesNotExist", 1.0f32));
        assert!(program.update("model", Mat4::IDENTITY));
        assert!(program.pending_value("model").is_some());
    }

    #[test]
    fn test_use_assigns_sampler_units_and_flushes() {
        let mut device = HeadlessDevice::new(2, 2);
        let mut program = program(&mut device);
        let ta = device
            .create_texture(&crate::device::TextureDesc::new(1, 1, crate::device::TextureFormat::Rgba8))
            .unwrap();
        let tb = device
            .create_texture(&crate::device::TextureDesc::new(1, 1, crate::device::TextureFormat::Rgba8))
            .unwrap();

        // fixed unit 0 pushes the lazy binding to unit 1
        assert!(program.bind_texture_on_use("a", ta));
        assert!(program.update_and_bind_texture("b", 0, tb));
        assert!(!program.bind_texture_on_use("k", ta));
        program.update("k", 2.5f32);
        program.use_program(&mut device);

        assert_eq!(device.state().texture_units.get(&0), Some(&tb));
        assert_eq!(device.state().texture_units.get(&1), Some(&ta));
        assert_eq!(device.uniform_value(program.handle(), "a"), Some(&UniformValue::Int(1)));
        assert_eq!(device.uniform_value(program.handle(), "k"), Some(&UniformValue::Float(2.5)));
        assert!(program.pending_value("k").is_none());
    }

    #[test]
    fn test_output_map_and_missing_block() {
        let mut device = HeadlessDevice::new(2, 2);
        let program = program(&mut device);
        assert_eq!(program.output_map().get("color"), Some(&0));
        assert!(matches!(
            program.bind_uniform_block(&mut device, "Nope", 1),
            Err(RenderError::UnknownUniformBlock { .. })
        ));
    }

    #[test]
    fn test_stage_from_extension() {
        assert_eq!(ShaderSources::stage_for(Path::new("a/b.te")), Some(ShaderStage::TessEvaluation));
        assert_eq!(ShaderSources::stage_for(Path::new("a/b.txt")), None);
        assert!(matches!(
            ShaderSources::from_files(Path::new("/nowhere"), &["x.frag"]),
            Err(RenderError::ShaderSource { .. })
        ));
    }
}
