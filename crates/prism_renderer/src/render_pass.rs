use std::cell::RefCell;
use std::rc::Rc;

use crate::device::{Capability, ClearFlags, DepthFunc, GraphicsDevice, Viewport};
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::render_target::RenderTarget;
use crate::renderable::Renderable;
use crate::shader::ShaderProgram;
use crate::uniform_block::UniformBlockBuffer;

/// Programs are shared between passes (G-Buffer and shadow variants, debug
/// views) and updated from the frame loop between renders.
pub type SharedProgram = Rc<RefCell<ShaderProgram>>;
pub type SharedTarget = Rc<RenderTarget>;
pub type SharedBlock = Rc<RefCell<UniformBlockBuffer>>;

pub fn shared<T>(value: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(value))
}

/// Runs before each renderable is drawn, typically to push per-object
/// uniforms (model matrix, material, color).
pub trait PreDrawHook {
    fn before_draw(&mut self, index: usize, renderable: &dyn Renderable, program: &mut ShaderProgram);
}

impl<F> PreDrawHook for F
where
    F: FnMut(usize, &dyn Renderable, &mut ShaderProgram),
{
    fn before_draw(&mut self, index: usize, renderable: &dyn Renderable, program: &mut ShaderProgram) {
        self(index, renderable, program)
    }
}

/// What one `render` call issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub draws: u32,
    pub cleared: bool,
}

/// One program drawing a list of renderables into one target (or the
/// window) under a GL state diff.
///
/// The enable/disable diff is applied on every render and never undone:
/// whatever a pass leaves enabled is what the next pass starts with.
pub struct RenderPass {
    label: String,
    program: SharedProgram,
    target: Option<SharedTarget>,
    enable: Vec<Capability>,
    disable: Vec<Capability>,
    clear_bits: ClearFlags,
    clear_color: [f32; 4],
    clear_depth: f32,
    viewport: Option<Viewport>,
    depth_func: Option<DepthFunc>,
    depth_write: Option<bool>,
    renderables: Vec<Rc<dyn Renderable>>,
    hook: Option<Box<dyn PreDrawHook>>,
    instances: Option<u32>,
    blocks: Vec<(String, SharedBlock, u32)>,
    reads: Vec<(String, crate::device::TextureHandle)>,
}

impl RenderPass {
    pub fn new(label: &str, program: SharedProgram, target: Option<SharedTarget>) -> Self {
        Self {
            label: label.to_string(),
            program,
            target,
            enable: Vec::new(),
            disable: Vec::new(),
            clear_bits: ClearFlags::empty(),
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            viewport: None,
            depth_func: None,
            depth_write: None,
            renderables: Vec::new(),
            hook: None,
            instances: None,
            blocks: Vec::new(),
            reads: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> &SharedProgram {
        &self.program
    }

    pub fn target(&self) -> Option<&SharedTarget> {
        self.target.as_ref()
    }

    pub fn add_enable(&mut self, capability: Capability) -> &mut Self {
        self.enable.push(capability);
        self
    }

    pub fn add_disable(&mut self, capability: Capability) -> &mut Self {
        self.disable.push(capability);
        self
    }

    pub fn add_clear_bits(&mut self, bits: ClearFlags) -> &mut Self {
        self.clear_bits |= bits;
        self
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) -> &mut Self {
        self.clear_color = color;
        self
    }

    pub fn set_clear_depth(&mut self, depth: f32) -> &mut Self {
        self.clear_depth = depth;
        self
    }

    /// Overrides the default viewport (the target's full resolution).
    pub fn set_viewport(&mut self, viewport: Viewport) -> &mut Self {
        self.viewport = Some(viewport);
        self
    }

    /// Depth comparison applied with the state diff; kept as is when unset.
    pub fn set_depth_func(&mut self, func: DepthFunc) -> &mut Self {
        self.depth_func = Some(func);
        self
    }

    /// Depth mask applied with the state diff, before any clear.
    pub fn set_depth_write(&mut self, enabled: bool) -> &mut Self {
        self.depth_write = Some(enabled);
        self
    }

    pub fn add_renderable(&mut self, renderable: Rc<dyn Renderable>) -> &mut Self {
        self.renderables.push(renderable);
        self
    }

    pub fn renderables(&self) -> &[Rc<dyn Renderable>] {
        &self.renderables
    }

    pub fn set_pre_draw_hook(&mut self, hook: impl PreDrawHook + 'static) -> &mut Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Every `render` draws each renderable `instances` times in one submission.
    pub fn set_instances(&mut self, instances: u32) -> &mut Self {
        self.instances = Some(instances);
        self
    }

    pub fn instances(&self) -> Option<u32> {
        self.instances
    }

    /// Binds `block`'s buffer at `binding_point` and points the program's
    /// block of the same name at it, on every render.
    pub fn add_uniform_block(&mut self, block: SharedBlock, binding_point: u32) -> &mut Self {
        let name = block.borrow().layout().name.clone();
        self.blocks.push((name, block, binding_point));
        self
    }

    /// Registers `texture` for `sampler` on the program and records the read
    /// for pipeline ordering checks.
    pub fn read_texture(&mut self, sampler: &str, texture: crate::device::TextureHandle) -> &mut Self {
        if !self.program.borrow_mut().bind_texture_on_use(sampler, texture) {
            log::warn!("{}: program has no sampler {sampler}", self.label);
        }
        self.reads.push((sampler.to_string(), texture));
        self
    }

    /// Textures this pass samples (through [`Self::read_texture`] or
    /// directly on the program).
    pub fn sampled_textures(&self) -> Vec<crate::device::TextureHandle> {
        let mut textures: Vec<_> = self.reads.iter().map(|(_, t)| *t).collect();
        for (_, texture) in self.program.borrow().bound_textures() {
            if !textures.contains(&texture) {
                textures.push(texture);
            }
        }
        textures
    }

    /// Textures this pass writes.
    pub fn written_textures(&self) -> Vec<crate::device::TextureHandle> {
        self.target.as_ref().map(|t| t.textures()).unwrap_or_default()
    }

    fn check_instancing(&self, instances: u32) -> Result<(), RenderError> {
        if instances <= 1 {
            return Ok(());
        }
        if let Some(r) = self.renderables.iter().find(|r| !r.supports_instancing()) {
            return Err(RenderError::NotInstanceable(r.label().to_string()));
        }
        if let Some(first) = self.renderables.first() {
            let layout = first.vertex_layout();
            if let Some(r) = self.renderables.iter().find(|r| r.vertex_layout() != layout) {
                return Err(RenderError::NotInstanceable(format!(
                    "{} (vertex layout differs from {})",
                    r.label(),
                    first.label()
                )));
            }
        }
        Ok(())
    }

    pub fn render(&mut self, device: &mut dyn GraphicsDevice) -> Result<PassStats, RenderError> {
        self.execute(device, self.instances)
    }

    /// Renders with an explicit instance count for this call only.
    pub fn render_instanced(
        &mut self,
        device: &mut dyn GraphicsDevice,
        instances: u32,
    ) -> Result<PassStats, RenderError> {
        self.execute(device, Some(instances))
    }

    fn execute(
        &mut self,
        device: &mut dyn GraphicsDevice,
        instances: Option<u32>,
    ) -> Result<PassStats, RenderError> {
        if let Some(n) = instances {
            self.check_instancing(n)?;
        }
        let mut stats = PassStats::default();

        // 1. target and viewport
        device.bind_framebuffer(self.target.as_ref().map(|t| t.framebuffer()));
        let viewport = self.viewport.unwrap_or_else(|| match &self.target {
            Some(target) => target.viewport(),
            None => {
                let (w, h) = device.default_framebuffer_size();
                Viewport::full(w, h)
            }
        });
        device.set_viewport(viewport);

        // 2. state diff, not restored afterwards
        for &capability in &self.enable {
            device.set_capability(capability, true);
        }
        for &capability in &self.disable {
            device.set_capability(capability, false);
        }
        if let Some(func) = self.depth_func {
            device.set_depth_func(func);
        }
        if let Some(enabled) = self.depth_write {
            device.set_depth_write(enabled);
        }

        // 3. clear
        if !self.clear_bits.is_empty() {
            device.set_clear_color(self.clear_color);
            device.set_clear_depth(self.clear_depth);
            device.clear(self.clear_bits);
            stats.cleared = true;
        }

        // 4. program, textures, uniform blocks
        let mut program = self.program.borrow_mut();
        program.use_program(device);
        for (name, block, binding_point) in &self.blocks {
            let mut block = block.borrow_mut();
            block.bind(device, *binding_point)?;
            program.bind_uniform_block(device, name, *binding_point)?;
        }

        // 5. draw in insertion order
        for (index, renderable) in self.renderables.iter().enumerate() {
            if let Some(hook) = self.hook.as_mut() {
                hook.before_draw(index, renderable.as_ref(), &mut program);
            }
            program.flush(device);
            renderable.bind(device);
            match instances {
                Some(n) => renderable.draw_instanced(device, n),
                None => renderable.draw(device),
            }
            renderable.unbind(device);
            stats.draws += 1;
        }
        Ok(stats)
    }
}

/// The program, target, renderables and blocks. Sampled textures belong to
/// whichever step or owner produced them.
impl GpuResource for RenderPass {
    fn collect_resources(&self, list: &mut ReleaseList) {
        self.program.collect_resources(list);
        self.target.collect_resources(list);
        for renderable in &self.renderables {
            renderable.collect_resources(list);
        }
        for (_, block, _) in &self.blocks {
            block.collect_resources(list);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ShaderStage, StageSource};
    use crate::headless::HeadlessDevice;
    use crate::renderable::Quad;

    fn program(device: &mut HeadlessDevice) -> SharedProgram {
        let stages = [
            StageSource {
                stage: ShaderStage::Vertex,
                label: "pass.vert".into(),
                source: "void main() {}".into(),
            },
            StageSource {
                stage: ShaderStage::Fragment,
                label: "pass.frag".into(),
                source: "uniform int index; out vec4 color; void main() {}".into(),
            },
        ];
        shared(ShaderProgram::new(device, &stages).unwrap())
    }

    #[test]
    fn test_hook_runs_per_renderable_in_order() {
        let mut device = HeadlessDevice::new(4, 4);
        let quad: Rc<dyn Renderable> = Rc::new(Quad::new(&mut device).unwrap());
        let mut pass = RenderPass::new("hooked", program(&mut device), None);
        pass.add_renderable(quad.clone()).add_renderable(quad);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        pass.set_pre_draw_hook(move |index: usize, _: &dyn Renderable, program: &mut ShaderProgram| {
            log.borrow_mut().push(index);
            program.update("index", index as i32);
        });
        let stats = pass.render(&mut device).unwrap();

        assert_eq!(stats.draws, 2);
        assert_eq!(*seen.borrow(), vec![0, 1]);
        assert_eq!(device.draw_log().len(), 2);
        let handle = pass.program().borrow().handle();
        assert_eq!(
            device.uniform_value(handle, "index"),
            Some(&crate::uniform::UniformValue::Int(1))
        );
    }

    #[test]
    fn test_state_diff_is_not_restored() {
        let mut device = HeadlessDevice::new(4, 4);
        let mut pass = RenderPass::new("state", program(&mut device), None);
        pass.add_disable(Capability::DepthTest).add_enable(Capability::Blend);
        pass.render(&mut device).unwrap();

        let state = device.state();
        assert!(!state.is_enabled(Capability::DepthTest));
        assert!(state.is_enabled(Capability::Blend));
        assert_eq!(state.viewport, Viewport::full(4, 4));
    }

    #[test]
    fn test_depth_state_is_applied_before_the_clear() {
        let mut device = HeadlessDevice::new(4, 4);
        let mut pass = RenderPass::new("depth", program(&mut device), None);
        pass.set_depth_func(DepthFunc::LessEqual)
            .set_depth_write(false)
            .add_clear_bits(ClearFlags::DEPTH);
        pass.render(&mut device).unwrap();
        assert_eq!(device.state().depth_func, DepthFunc::LessEqual);
        assert!(!device.state().depth_write);

        // passes without depth settings leave them alone
        let mut plain = RenderPass::new("plain", program(&mut device), None);
        plain.render(&mut device).unwrap();
        assert_eq!(device.state().depth_func, DepthFunc::LessEqual);
        assert!(!device.state().depth_write);
    }

    #[test]
    fn test_reading_an_unknown_sampler_is_still_recorded() {
        let mut device = HeadlessDevice::new(4, 4);
        let texture = device
            .create_texture(&crate::device::TextureDesc::new(2, 2, crate::device::TextureFormat::Rgba8))
            .unwrap();
        let mut pass = RenderPass::new("reads", program(&mut device), None);
        pass.read_texture("missing", texture);
        assert_eq!(pass.sampled_textures(), vec![texture]);
    }

    #[test]
    fn test_quad_cannot_be_instanced() {
        let mut device = HeadlessDevice::new(4, 4);
        let quad: Rc<dyn Renderable> = Rc::new(Quad::new(&mut device).unwrap());
        let mut pass = RenderPass::new("bad", program(&mut device), None);
        pass.add_renderable(quad);
        assert!(matches!(
            pass.render_instanced(&mut device, 10),
            Err(RenderError::NotInstanceable(_))
        ));
        assert!(device.draw_log().is_empty());
        // a single instance needs no per-instance data
        assert!(pass.render_instanced(&mut device, 1).is_ok());
    }
}
