//! The per-frame render loop as an ordered list of named steps.
//!
//! Steps run strictly in insertion order on the calling thread. Ordering is
//! checked once at setup by [`FramePipeline::validate`]: every texture a step
//! samples must be written by an earlier step or declared external (loaded
//! from disk, filled on the CPU), and no pass may sample its own target.
//! GL state is not reset between steps; each pass applies its own diff and
//! the next pass starts from whatever is left.

use std::collections::{HashMap, HashSet};

use crate::device::{GraphicsDevice, TextureHandle};
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::render_pass::{PassStats, RenderPass};
use crate::render_target::RenderTarget;

pub type StepAction = Box<dyn FnMut(&mut dyn GraphicsDevice) -> Result<u32, RenderError>>;

enum StepKind {
    Pass(RenderPass),
    /// Anything that is not a single pass (post-processing chains, debug
    /// views, blits). Returns the number of draws it issued.
    Custom {
        reads: Vec<TextureHandle>,
        writes: Vec<TextureHandle>,
        action: StepAction,
    },
}

struct Step {
    label: String,
    enabled: bool,
    kind: StepKind,
}

impl Step {
    fn reads(&self) -> Vec<TextureHandle> {
        match &self.kind {
            StepKind::Pass(pass) => pass.sampled_textures(),
            StepKind::Custom { reads, .. } => reads.clone(),
        }
    }

    fn writes(&self) -> Vec<TextureHandle> {
        match &self.kind {
            StepKind::Pass(pass) => pass.written_textures(),
            StepKind::Custom { writes, .. } => writes.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub steps: u32,
    pub draws: u32,
    pub clears: u32,
}

#[derive(Default)]
pub struct FramePipeline {
    steps: Vec<Step>,
    external: HashSet<TextureHandle>,
    names: HashMap<TextureHandle, String>,
}

impl FramePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a texture that exists before the frame starts.
    pub fn mark_external(&mut self, texture: TextureHandle, name: &str) -> &mut Self {
        self.external.insert(texture);
        self.names.insert(texture, name.to_string());
        self
    }

    /// Names every attachment of `target` as `label.output` for diagnostics.
    pub fn name_target(&mut self, target: &RenderTarget) -> &mut Self {
        for output in target.outputs() {
            if let Ok(texture) = target.buffer(output) {
                self.names
                    .insert(texture, format!("{}.{output}", target.label()));
            }
        }
        if let Some(depth) = target.depth_texture() {
            self.names.insert(depth, format!("{}.depth", target.label()));
        }
        self
    }

    fn describe(&self, texture: TextureHandle) -> String {
        self.names
            .get(&texture)
            .cloned()
            .unwrap_or_else(|| format!("texture #{}", texture.id()))
    }

    pub fn add_pass(&mut self, pass: RenderPass) -> &mut Self {
        if let Some(target) = pass.target().cloned() {
            self.name_target(&target);
        }
        self.steps.push(Step {
            label: pass.label().to_string(),
            enabled: true,
            kind: StepKind::Pass(pass),
        });
        self
    }

    pub fn add_custom(
        &mut self,
        label: &str,
        reads: Vec<TextureHandle>,
        writes: Vec<TextureHandle>,
        action: impl FnMut(&mut dyn GraphicsDevice) -> Result<u32, RenderError> + 'static,
    ) -> &mut Self {
        self.steps.push(Step {
            label: label.to_string(),
            enabled: true,
            kind: StepKind::Custom {
                reads,
                writes,
                action: Box::new(action),
            },
        });
        self
    }

    pub fn labels(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.label.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Disabled steps are skipped by [`Self::execute`] but still validated.
    pub fn set_enabled(&mut self, label: &str, enabled: bool) -> bool {
        match self.steps.iter_mut().find(|s| s.label == label) {
            Some(step) => {
                step.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn pass_mut(&mut self, label: &str) -> Option<&mut RenderPass> {
        self.steps.iter_mut().find_map(|s| match &mut s.kind {
            StepKind::Pass(pass) if s.label == label => Some(pass),
            _ => None,
        })
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        let mut produced = self.external.clone();
        for step in &self.steps {
            let reads = step.reads();
            let writes = step.writes();
            if matches!(step.kind, StepKind::Pass(_)) && reads.iter().any(|t| writes.contains(t)) {
                return Err(RenderError::FeedbackLoop {
                    pass: step.label.clone(),
                });
            }
            if let Some(&missing) = reads.iter().find(|t| !produced.contains(t)) {
                return Err(RenderError::PassOrder {
                    pass: step.label.clone(),
                    texture: self.describe(missing),
                });
            }
            produced.extend(writes);
        }
        log::debug!("pipeline validated: {}", self.labels().join(" -> "));
        Ok(())
    }

    /// Runs every enabled step once. The first failing step aborts the frame;
    /// the caller decides whether to render the next one.
    pub fn execute(&mut self, device: &mut dyn GraphicsDevice) -> Result<FrameStats, RenderError> {
        let mut stats = FrameStats::default();
        for step in self.steps.iter_mut().filter(|s| s.enabled) {
            match &mut step.kind {
                StepKind::Pass(pass) => {
                    let PassStats { draws, cleared } = pass.render(device)?;
                    stats.draws += draws;
                    stats.clears += u32::from(cleared);
                }
                StepKind::Custom { action, .. } => {
                    stats.draws += action(device)?;
                }
            }
            stats.steps += 1;
        }
        Ok(stats)
    }
}

/// Everything the pass steps own. Custom steps are closures; their owners
/// report their own objects.
impl GpuResource for FramePipeline {
    fn collect_resources(&self, list: &mut ReleaseList) {
        for step in &self.steps {
            if let StepKind::Pass(pass) = &step.kind {
                pass.collect_resources(list);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ShaderStage, StageSource, TextureFormat};
    use crate::headless::HeadlessDevice;
    use crate::render_pass::shared;
    use crate::shader::ShaderProgram;
    use std::rc::Rc;

    fn program(device: &mut HeadlessDevice, label: &str) -> ShaderProgram {
        let stages = [
            StageSource {
                stage: ShaderStage::Vertex,
                label: "fullscreen.vert".into(),
                source: "void main() {}".into(),
            },
            StageSource {
                stage: ShaderStage::Fragment,
                label: label.into(),
                source: "uniform sampler2D tex; out vec4 color; void main() {}".into(),
            },
        ];
        ShaderProgram::new(device, &stages).unwrap()
    }

    fn target(device: &mut HeadlessDevice, label: &str) -> Rc<RenderTarget> {
        Rc::new(RenderTarget::with_color_attachments(device, label, 2, 2, 1, TextureFormat::Rgba8, false).unwrap())
    }

    #[test]
    fn test_read_before_write_is_rejected() {
        let mut device = HeadlessDevice::new(2, 2);
        let a = target(&mut device, "a");
        let b = target(&mut device, "b");

        let reader = shared(program(&mut device, "read.frag"));
        let mut read = RenderPass::new("read", reader, Some(b.clone()));
        read.read_texture("tex", a.buffer("color0").unwrap());
        let write = RenderPass::new("write", shared(program(&mut device, "write.frag")), Some(a));

        let mut pipeline = FramePipeline::new();
        pipeline.add_pass(read).add_pass(write);
        match pipeline.validate() {
            Err(RenderError::PassOrder { pass, texture }) => {
                assert_eq!(pass, "read");
                assert_eq!(texture, "a.color0");
            }
            other => panic!("expected a pass order error, got {other:?}"),
        }
    }

    #[test]
    fn test_sampling_own_target_is_a_feedback_loop() {
        let mut device = HeadlessDevice::new(2, 2);
        let a = target(&mut device, "a");
        let mut pass = RenderPass::new("loop", shared(program(&mut device, "l.frag")), Some(a.clone()));
        pass.read_texture("tex", a.buffer("color0").unwrap());

        let mut pipeline = FramePipeline::new();
        pipeline.mark_external(a.buffer("color0").unwrap(), "seed");
        pipeline.add_pass(pass);
        assert!(matches!(pipeline.validate(), Err(RenderError::FeedbackLoop { .. })));
    }

    #[test]
    fn test_disabled_steps_are_skipped() {
        let mut device = HeadlessDevice::new(2, 2);
        let mut pipeline = FramePipeline::new();
        let runs = Rc::new(std::cell::Cell::new(0));
        let counter = runs.clone();
        pipeline.add_custom("count", Vec::new(), Vec::new(), move |_| {
            counter.set(counter.get() + 1);
            Ok(0)
        });

        pipeline.execute(&mut device).unwrap();
        assert!(pipeline.set_enabled("count", false));
        assert!(!pipeline.set_enabled("nope", false));
        let stats = pipeline.execute(&mut device).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(stats.steps, 0);
    }
}
