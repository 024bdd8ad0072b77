//! CPU emulation of [`GraphicsDevice`] for tests and tooling.
//!
//! Textures are RGBA float arrays (depth in the red channel). Clears, blits
//! and readbacks are exact. Every draw is appended to a draw log; when a
//! fragment kernel is registered for the bound program's fragment-stage
//! label, it is also evaluated once per pixel of the current viewport, which
//! models the full-screen passes the pipeline is built from. Program
//! introspection comes from scanning the GLSL declarations.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use glam::{Vec2, Vec3};

use crate::device::*;
use crate::error::RenderError;
use crate::reflect::{self, ProgramInterface, UniformKind};
use crate::uniform::UniformValue;

struct SoftTexture {
    desc: TextureDesc,
    levels: Vec<Vec<[f32; 4]>>,
    /// Level 0 of each cube map face, top row first; empty for 2D textures.
    faces: Vec<Vec<[f32; 4]>>,
}

impl SoftTexture {
    fn new(desc: TextureDesc) -> Self {
        let levels = (0..desc.mip_levels)
            .map(|level| {
                let (w, h) = desc.level_size(level);
                vec![[0.0, 0.0, 0.0, 1.0]; (w * h) as usize]
            })
            .collect();
        let faces = if desc.is_cube_map() {
            vec![vec![[0.0, 0.0, 0.0, 1.0]; (desc.width * desc.height) as usize]; 6]
        } else {
            Vec::new()
        };
        Self { desc, levels, faces }
    }

    /// Nearest texel of the face `dir` points at.
    fn sample_cube(&self, dir: Vec3) -> [f32; 4] {
        let (face, st) = prism_assets::cubemap::cube_face_lookup(dir);
        let Some(texels) = self.faces.get(face) else {
            return [0.0; 4];
        };
        let (w, h) = (self.desc.width, self.desc.height);
        let x = ((st.x * w as f32).floor() as i64).clamp(0, w as i64 - 1) as u32;
        let y = ((st.y * h as f32).floor() as i64).clamp(0, h as i64 - 1) as u32;
        texels[(y * w + x) as usize]
    }

    /// Nearest texel, clamped to the edge.
    fn sample(&self, uv: Vec2, level: u32) -> [f32; 4] {
        let level = level.min(self.desc.mip_levels - 1);
        let (w, h) = self.desc.level_size(level);
        let x = ((uv.x * w as f32).floor() as i64).clamp(0, w as i64 - 1) as u32;
        let y = ((uv.y * h as f32).floor() as i64).clamp(0, h as i64 - 1) as u32;
        self.levels[level as usize][(y * w + x) as usize]
    }

    fn store(&self, value: [f32; 4]) -> [f32; 4] {
        let mut value = value;
        let channels = self.desc.format.channels();
        for (i, v) in value.iter_mut().enumerate() {
            if i >= channels {
                *v = if i == 3 { 1.0 } else { 0.0 };
            } else if self.desc.format.is_normalized() {
                *v = v.clamp(0.0, 1.0);
            }
        }
        value
    }
}

#[derive(Clone, Debug, Default)]
struct SoftFramebuffer {
    colors: BTreeMap<u32, (TextureHandle, u32)>,
    depth: Option<(TextureHandle, u32)>,
}

struct SoftProgram {
    interface: ProgramInterface,
    fragment_label: String,
    values: BTreeMap<u32, UniformValue>,
    block_bindings: BTreeMap<u32, u32>,
}

struct SoftVertexArray {
    attributes: Vec<VertexAttribute>,
    index_buffer: Option<BufferHandle>,
}

/// One entry of the draw log.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub program: Option<ProgramHandle>,
    /// Fragment-stage label of the program, empty without one.
    pub fragment_label: String,
    pub framebuffer: Option<FramebufferHandle>,
    pub vertex_array: Option<VertexArrayHandle>,
    pub primitive: Primitive,
    pub count: u32,
    pub instances: Option<u32>,
    pub viewport: Viewport,
    pub enabled: BTreeSet<Capability>,
    pub depth_func: DepthFunc,
    pub depth_write: bool,
}

/// What a fragment kernel can see for one pixel.
pub struct FragmentInput<'a> {
    pub pixel: (u32, u32),
    /// Pixel centre in [0, 1] over the viewport.
    pub uv: Vec2,
    device: &'a HeadlessDevice,
    program: &'a SoftProgram,
}

impl FragmentInput<'_> {
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        let info = self.program.interface.uniform(name)?;
        self.program.values.get(&info.location)
    }

    /// Scalar uniform, 0.0 when unset.
    pub fn float(&self, name: &str) -> f32 {
        match self.uniform(name) {
            Some(UniformValue::Float(v)) => *v,
            Some(UniformValue::Int(v)) => *v as f32,
            Some(UniformValue::UInt(v)) => *v as f32,
            _ => 0.0,
        }
    }

    pub fn sample(&self, sampler: &str, uv: Vec2) -> [f32; 4] {
        self.sample_level(sampler, uv, 0)
    }

    /// Like `textureLod` with nearest filtering. Unbound samplers read zero.
    pub fn sample_level(&self, sampler: &str, uv: Vec2, level: u32) -> [f32; 4] {
        self.bound_texture(sampler)
            .map_or([0.0; 4], |t| t.sample(uv, level))
    }

    /// `texture(samplerCube, dir)` with nearest filtering.
    pub fn sample_cube(&self, sampler: &str, dir: Vec3) -> [f32; 4] {
        self.bound_texture(sampler)
            .map_or([0.0; 4], |t| t.sample_cube(dir))
    }

    fn bound_texture(&self, sampler: &str) -> Option<&SoftTexture> {
        let unit = self.uniform(sampler).and_then(UniformValue::as_int)?;
        self.device
            .state
            .texture_units
            .get(&(unit as u32))
            .and_then(|t| self.device.textures.get(t.id()))
    }
}

type FragmentKernel = Box<dyn Fn(&FragmentInput<'_>) -> Vec<[f32; 4]>>;

pub struct HeadlessDevice {
    state: DeviceState,
    default_size: (u32, u32),
    default_color: TextureHandle,
    default_depth: TextureHandle,

    textures: HandleMap<SoftTexture>,
    framebuffers: HandleMap<SoftFramebuffer>,
    programs: HandleMap<SoftProgram>,
    buffers: HandleMap<Vec<u8>>,
    vertex_arrays: HandleMap<SoftVertexArray>,

    kernels: HashMap<String, FragmentKernel>,
    draw_log: Vec<DrawRecord>,
    errors: Vec<u32>,
    texture_budget: Option<usize>,
}

impl HeadlessDevice {
    /// A device whose default framebuffer is `width` x `height` RGBA8 + depth.
    /// Depth testing starts enabled, as on the GL backend.
    pub fn new(width: u32, height: u32) -> Self {
        let mut textures = HandleMap::default();
        let color = textures.insert(SoftTexture::new(TextureDesc::new(
            width,
            height,
            TextureFormat::Rgba8,
        )));
        let depth = textures.insert(SoftTexture::new(TextureDesc::new(
            width,
            height,
            TextureFormat::Depth32F,
        )));
        let mut state = DeviceState::new(width, height);
        state.set_enabled(Capability::DepthTest, true);

        Self {
            state,
            default_size: (width, height),
            default_color: TextureHandle::from_raw(color),
            default_depth: TextureHandle::from_raw(depth),
            textures,
            framebuffers: HandleMap::default(),
            programs: HandleMap::default(),
            buffers: HandleMap::default(),
            vertex_arrays: HandleMap::default(),
            kernels: HashMap::new(),
            draw_log: Vec::new(),
            errors: Vec::new(),
            texture_budget: None,
        }
    }

    /// Runs `kernel` for every pixel drawn by programs whose fragment stage
    /// carries `fragment_label`. The returned vector is indexed by output slot.
    pub fn register_kernel(
        &mut self,
        fragment_label: impl Into<String>,
        kernel: impl Fn(&FragmentInput<'_>) -> Vec<[f32; 4]> + 'static,
    ) {
        self.kernels.insert(fragment_label.into(), Box::new(kernel));
    }

    pub fn draw_log(&self) -> &[DrawRecord] {
        &self.draw_log
    }

    pub fn clear_draw_log(&mut self) {
        self.draw_log.clear();
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(buffer.id()).map(Vec::as_slice)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(texture.id()).map(|t| t.desc)
    }

    /// RGBA texels of one mip level, bottom row first.
    pub fn texels(&self, texture: TextureHandle, level: u32) -> Option<&[[f32; 4]]> {
        self.textures
            .get(texture.id())
            .and_then(|t| t.levels.get(level as usize))
            .map(Vec::as_slice)
    }

    /// Uniform values currently stored in a program, by name.
    pub fn uniform_value(&self, program: ProgramHandle, name: &str) -> Option<&UniformValue> {
        let p = self.programs.get(program.id())?;
        let info = p.interface.uniform(name)?;
        p.values.get(&info.location)
    }

    pub fn block_binding(&self, program: ProgramHandle, block_index: u32) -> Option<u32> {
        self.programs
            .get(program.id())
            .and_then(|p| p.block_bindings.get(&block_index).copied())
    }

    /// Level 0 of one cube map face, top row first.
    pub fn cube_face_texels(&self, texture: TextureHandle, face: u32) -> Option<&[[f32; 4]]> {
        self.textures
            .get(texture.id())
            .and_then(|t| t.faces.get(face as usize))
            .map(Vec::as_slice)
    }

    /// Caps live user textures; creating one more fails with `GL_OUT_OF_MEMORY`.
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    pub fn live_textures(&self) -> usize {
        // default framebuffer color + depth are not user textures
        self.textures.len() - 2
    }

    /// Textures, framebuffers, programs, buffers and vertex arrays still alive.
    pub fn live_objects(&self) -> usize {
        self.live_textures()
            + self.framebuffers.len()
            + self.programs.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
    }

    fn raise(&mut self, code: u32, message: impl AsRef<str>) {
        log::debug!("headless: {}", message.as_ref());
        self.errors.push(code);
    }

    fn framebuffer_layout(&self, framebuffer: Option<FramebufferHandle>) -> Option<SoftFramebuffer> {
        match framebuffer {
            None => Some(SoftFramebuffer {
                colors: BTreeMap::from([(0, (self.default_color, 0))]),
                depth: Some((self.default_depth, 0)),
            }),
            Some(fb) => self.framebuffers.get(fb.id()).cloned(),
        }
    }

    fn attachment_of(
        &self,
        framebuffer: Option<FramebufferHandle>,
        attachment: Attachment,
    ) -> Option<(TextureHandle, u32)> {
        let layout = self.framebuffer_layout(framebuffer)?;
        match attachment {
            Attachment::Color(slot) => layout.colors.get(&slot).copied(),
            Attachment::Depth => layout.depth,
        }
    }

    fn fill(&mut self, (texture, level): (TextureHandle, u32), value: [f32; 4]) {
        if let Some(tex) = self.textures.get_mut(texture.id()) {
            let value = tex.store(value);
            if let Some(texels) = tex.levels.get_mut(level as usize) {
                texels.fill(value);
            }
        }
    }

    fn level_size(&self, (texture, level): (TextureHandle, u32)) -> (u32, u32) {
        self.textures
            .get(texture.id())
            .map_or((0, 0), |t| t.desc.level_size(level))
    }

    fn run_kernel(&mut self, program: ProgramHandle) {
        let Some(p) = self.programs.get(program.id()) else {
            return;
        };
        let Some(kernel) = self.kernels.get(&p.fragment_label) else {
            return;
        };
        let Some(layout) = self.framebuffer_layout(self.state.framebuffer) else {
            return;
        };

        let vp = self.state.viewport;
        // all outputs are computed before anything is written
        let mut writes: Vec<(u32, u32, Vec<[f32; 4]>)> = Vec::new();
        for y in 0..vp.height {
            for x in 0..vp.width {
                let px = vp.x + x as i32;
                let py = vp.y + y as i32;
                if px < 0 || py < 0 {
                    continue;
                }
                let input = FragmentInput {
                    pixel: (px as u32, py as u32),
                    uv: Vec2::new(
                        (x as f32 + 0.5) / vp.width as f32,
                        (y as f32 + 0.5) / vp.height as f32,
                    ),
                    device: self,
                    program: p,
                };
                writes.push((px as u32, py as u32, kernel(&input)));
            }
        }

        let blend = self
            .state
            .is_enabled(Capability::Blend)
            .then_some(self.state.blend_mode);
        for (slot, &(texture, level)) in &layout.colors {
            let Some(tex) = self.textures.get_mut(texture.id()) else {
                continue;
            };
            let (w, h) = tex.desc.level_size(level);
            for (x, y, outputs) in &writes {
                let Some(&src) = outputs.get(*slot as usize) else {
                    continue;
                };
                if *x >= w || *y >= h {
                    continue;
                }
                let index = (y * w + x) as usize;
                let dst = tex.levels[level as usize][index];
                let value = match blend {
                    None => src,
                    Some(BlendMode::Alpha) => {
                        let a = src[3];
                        std::array::from_fn(|i| src[i] * a + dst[i] * (1.0 - a))
                    }
                    Some(BlendMode::Additive) => std::array::from_fn(|i| src[i] + dst[i]),
                };
                tex.levels[level as usize][index] = tex.store(value);
            }
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, RenderError> {
        if desc.width == 0 || desc.height == 0 {
            self.raise(glow::INVALID_VALUE, "zero-sized texture");
            return Err(RenderError::Device(format!(
                "texture size {}x{} is empty",
                desc.width, desc.height
            )));
        }
        if self.texture_budget.is_some_and(|budget| self.live_textures() >= budget) {
            self.raise(glow::OUT_OF_MEMORY, "texture budget exhausted");
            return Err(RenderError::Device("out of texture memory".into()));
        }
        let id = self.textures.insert(SoftTexture::new(*desc));
        Ok(TextureHandle::from_raw(id))
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        level: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError> {
        let Some(tex) = self.textures.get_mut(texture.id()) else {
            self.raise(glow::INVALID_OPERATION, "upload to unknown texture");
            return Err(RenderError::Device(format!("unknown texture {}", texture.id())));
        };
        if tex.desc.is_cube_map() {
            return Err(RenderError::Device(format!(
                "texture {} is a cube map; upload its faces",
                texture.id()
            )));
        }
        let (w, h) = tex.desc.level_size(level);
        let channels = tex.desc.format.channels();
        let components: Vec<f32> = match data {
            TexelData::U8(bytes) => bytes.iter().map(|&b| b as f32 / 255.0).collect(),
            TexelData::F32(floats) => floats.to_vec(),
        };
        let expected = (w * h) as usize * channels;
        if components.len() != expected || level >= tex.desc.mip_levels {
            return Err(RenderError::Device(format!(
                "texture upload of {} components, level {level} needs {expected}",
                components.len()
            )));
        }
        let texels = components
            .chunks_exact(channels)
            .map(|c| {
                let mut texel = [0.0, 0.0, 0.0, 1.0];
                texel[..channels].copy_from_slice(c);
                texel
            })
            .collect();
        tex.levels[level as usize] = texels;
        Ok(())
    }

    fn upload_cube_face(
        &mut self,
        texture: TextureHandle,
        face: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError> {
        let Some(tex) = self.textures.get_mut(texture.id()) else {
            self.raise(glow::INVALID_OPERATION, "upload to unknown texture");
            return Err(RenderError::Device(format!("unknown texture {}", texture.id())));
        };
        if !tex.desc.is_cube_map() || face >= 6 {
            return Err(RenderError::Device(format!(
                "texture {} has no cube face {face}",
                texture.id()
            )));
        }
        let channels = tex.desc.format.channels();
        let components: Vec<f32> = match data {
            TexelData::U8(bytes) => bytes.iter().map(|&b| b as f32 / 255.0).collect(),
            TexelData::F32(floats) => floats.to_vec(),
        };
        let expected = (tex.desc.width * tex.desc.height) as usize * channels;
        if components.len() != expected {
            return Err(RenderError::Device(format!(
                "cube face upload of {} components needs {expected}",
                components.len()
            )));
        }
        tex.faces[face as usize] = components
            .chunks_exact(channels)
            .map(|c| {
                let mut texel = [0.0, 0.0, 0.0, 1.0];
                texel[..channels].copy_from_slice(c);
                texel
            })
            .collect();
        Ok(())
    }

    /// Box-filters each level from the one above.
    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(tex) = self.textures.get_mut(texture.id()) else {
            return;
        };
        for level in 1..tex.desc.mip_levels {
            let (pw, ph) = tex.desc.level_size(level - 1);
            let (w, h) = tex.desc.level_size(level);
            let parent = tex.levels[level as usize - 1].clone();
            let at = |x: u32, y: u32| parent[(y.min(ph - 1) * pw + x.min(pw - 1)) as usize];
            tex.levels[level as usize] = (0..h)
                .flat_map(|y| (0..w).map(move |x| (x, y)))
                .map(|(x, y)| {
                    let q = [at(2 * x, 2 * y), at(2 * x + 1, 2 * y), at(2 * x, 2 * y + 1), at(2 * x + 1, 2 * y + 1)];
                    std::array::from_fn(|i| q.iter().map(|t| t[i]).sum::<f32>() / 4.0)
                })
                .collect();
        }
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture.id());
    }

    fn create_framebuffer(
        &mut self,
        attachments: &[FramebufferAttachment],
    ) -> Result<FramebufferHandle, RenderError> {
        let incomplete = |status: &str| RenderError::IncompleteFramebuffer {
            status: status.to_string(),
        };
        if attachments.is_empty() {
            return Err(incomplete("GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT"));
        }

        let mut fb = SoftFramebuffer::default();
        for attachment in attachments {
            let Some(tex) = self.textures.get(attachment.texture.id()) else {
                return Err(incomplete("GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT"));
            };
            if attachment.level >= tex.desc.mip_levels {
                return Err(incomplete("GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT"));
            }
            let binding = (attachment.texture, attachment.level);
            match attachment.attachment {
                Attachment::Color(slot) if !tex.desc.format.is_depth() => {
                    fb.colors.insert(slot, binding);
                }
                Attachment::Depth if tex.desc.format.is_depth() => fb.depth = Some(binding),
                _ => return Err(incomplete("GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT")),
            }
        }
        Ok(FramebufferHandle::from_raw(self.framebuffers.insert(fb)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(framebuffer.id());
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let deleted = framebuffer.is_some_and(|fb| self.framebuffers.get(fb.id()).is_none());
        if deleted {
            self.raise(glow::INVALID_OPERATION, "bind of deleted framebuffer");
            return;
        }
        self.state.framebuffer = framebuffer;
    }

    fn default_framebuffer_size(&self) -> (u32, u32) {
        self.default_size
    }

    fn blit_framebuffer(
        &mut self,
        source: Option<FramebufferHandle>,
        target: Option<FramebufferHandle>,
        source_rect: Viewport,
        target_rect: Viewport,
        mask: ClearFlags,
        _filter: TextureFilter,
    ) {
        let mut pairs = Vec::new();
        if mask.contains(ClearFlags::COLOR) {
            pairs.push(Attachment::Color(0));
        }
        if mask.contains(ClearFlags::DEPTH) {
            pairs.push(Attachment::Depth);
        }
        for attachment in pairs {
            let (Some(src), Some(dst)) = (
                self.attachment_of(source, attachment),
                self.attachment_of(target, attachment),
            ) else {
                self.raise(glow::INVALID_OPERATION, "blit between missing attachments");
                continue;
            };
            let (sw, sh) = self.level_size(src);
            let Some(src_tex) = self.textures.get(src.0.id()) else {
                continue;
            };
            let source_texels = src_tex.levels[src.1 as usize].clone();
            let Some(dst_tex) = self.textures.get_mut(dst.0.id()) else {
                continue;
            };
            let (dw, dh) = dst_tex.desc.level_size(dst.1);
            for ty in 0..target_rect.height {
                for tx in 0..target_rect.width {
                    let dx = target_rect.x + tx as i32;
                    let dy = target_rect.y + ty as i32;
                    // nearest source texel for this destination texel
                    let sx = source_rect.x + (tx * source_rect.width / target_rect.width) as i32;
                    let sy = source_rect.y + (ty * source_rect.height / target_rect.height) as i32;
                    let inside = |x: i32, y: i32, w: u32, h: u32| {
                        x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h
                    };
                    if !inside(dx, dy, dw, dh) || !inside(sx, sy, sw, sh) {
                        continue;
                    }
                    let value = source_texels[(sy as u32 * sw + sx as u32) as usize];
                    let stored = dst_tex.store(value);
                    dst_tex.levels[dst.1 as usize][(dy as u32 * dw + dx as u32) as usize] = stored;
                }
            }
        }
    }

    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        attachment: Attachment,
        rect: Viewport,
    ) -> Result<Vec<f32>, RenderError> {
        let Some(binding) = self.attachment_of(framebuffer, attachment) else {
            self.raise(glow::INVALID_OPERATION, "read from missing attachment");
            return Err(RenderError::Device(format!(
                "framebuffer has no {attachment:?} attachment"
            )));
        };
        let (w, h) = self.level_size(binding);
        let texels = self
            .texels(binding.0, binding.1)
            .ok_or_else(|| RenderError::Device("attachment texture was deleted".into()))?;

        let mut out = Vec::new();
        for y in rect.y..rect.y + rect.height as i32 {
            for x in rect.x..rect.x + rect.width as i32 {
                let texel = if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                    texels[(y as u32 * w + x as u32) as usize]
                } else {
                    [0.0; 4]
                };
                match attachment {
                    Attachment::Color(_) => out.extend_from_slice(&texel),
                    Attachment::Depth => out.push(texel[0]),
                }
            }
        }
        Ok(out)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        self.state.set_enabled(capability, enabled);
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.state.blend_mode = mode;
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        self.state.clear_color = color;
    }

    fn set_clear_depth(&mut self, depth: f32) {
        self.state.clear_depth = depth;
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        self.state.depth_func = func;
    }

    fn set_depth_write(&mut self, enabled: bool) {
        self.state.depth_write = enabled;
    }

    /// Clears whole attachments; the viewport does not restrict glClear.
    /// Depth is only cleared while depth writes are on, as with glDepthMask.
    fn clear(&mut self, flags: ClearFlags) {
        let Some(layout) = self.framebuffer_layout(self.state.framebuffer) else {
            self.raise(glow::INVALID_FRAMEBUFFER_OPERATION, "clear of deleted framebuffer");
            return;
        };
        if flags.contains(ClearFlags::COLOR) {
            let color = self.state.clear_color;
            for binding in layout.colors.values() {
                self.fill(*binding, color);
            }
        }
        let clears_depth = flags.contains(ClearFlags::DEPTH) && self.state.depth_write;
        if let (true, Some(depth)) = (clears_depth, layout.depth) {
            let d = self.state.clear_depth;
            self.fill(depth, [d, 0.0, 0.0, 1.0]);
        }
    }

    fn state(&self) -> &DeviceState {
        &self.state
    }

    fn create_program(
        &mut self,
        stages: &[StageSource],
    ) -> Result<(ProgramHandle, ProgramInterface), RenderError> {
        let mut scans = Vec::with_capacity(stages.len());
        for stage in stages {
            let compile_error = |log: String| RenderError::Compile {
                stage: stage.stage,
                label: stage.label.clone(),
                log,
            };
            let decls = reflect::scan_stage(&stage.source, stage.stage)
                .map_err(|msg| compile_error(format!("0(0) : error C0000: {msg}")))?;
            if !decls.has_main {
                return Err(compile_error(
                    "0(0) : error C3001: no program defined (missing main)".to_string(),
                ));
            }
            scans.push((stage.stage, decls));
        }

        let labels = || {
            stages
                .iter()
                .map(|s| s.label.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        for (required, name) in [(ShaderStage::Vertex, "vertex"), (ShaderStage::Fragment, "fragment")] {
            if !stages.iter().any(|s| s.stage == required) {
                return Err(RenderError::Link {
                    labels: labels(),
                    log: format!("error: no {name} shader attached"),
                });
            }
        }

        let interface = reflect::merge_stages(&scans);
        let fragment_label = stages
            .iter()
            .find(|s| s.stage == ShaderStage::Fragment)
            .map(|s| s.label.clone())
            .unwrap_or_default();
        let id = self.programs.insert(SoftProgram {
            interface: interface.clone(),
            fragment_label,
            values: BTreeMap::new(),
            block_bindings: BTreeMap::new(),
        });
        Ok((ProgramHandle::from_raw(id), interface))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(program.id());
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let deleted = program.is_some_and(|p| self.programs.get(p.id()).is_none());
        if deleted {
            self.raise(glow::INVALID_VALUE, "use of deleted program");
            return;
        }
        self.state.program = program;
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: u32, value: &UniformValue) {
        if self.state.program != Some(program) {
            self.raise(glow::INVALID_OPERATION, "glUniform without the program current");
            return;
        }
        let Some(p) = self.programs.get_mut(program.id()) else {
            return;
        };
        let Some(info) = p.interface.uniforms.iter().find(|u| u.location == location) else {
            self.errors.push(glow::INVALID_OPERATION);
            return;
        };
        if info.kind == UniformKind::Sampler && value.as_int().is_none() {
            self.errors.push(glow::INVALID_OPERATION);
            return;
        }
        p.values.insert(location, value.clone());
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        match texture {
            Some(texture) => self.state.texture_units.insert(unit, texture),
            None => self.state.texture_units.remove(&unit),
        };
    }

    fn set_uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32) {
        let known = self
            .programs
            .get(program.id())
            .is_some_and(|p| p.interface.blocks.iter().any(|b| b.index == block_index));
        if !known {
            self.raise(glow::INVALID_VALUE, "unknown uniform block index");
            return;
        }
        if let Some(p) = self.programs.get_mut(program.id()) {
            p.block_bindings.insert(block_index, binding);
        }
    }

    fn create_buffer(
        &mut self,
        _kind: BufferKind,
        data: &[u8],
        _usage: BufferUsage,
    ) -> Result<BufferHandle, RenderError> {
        Ok(BufferHandle::from_raw(self.buffers.insert(data.to_vec())))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), RenderError> {
        match self.buffers.get_mut(buffer.id()) {
            Some(contents) => {
                *contents = data.to_vec();
                Ok(())
            }
            None => {
                self.raise(glow::INVALID_OPERATION, "update of unknown buffer");
                Err(RenderError::Device(format!("unknown buffer {}", buffer.id())))
            }
        }
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer.id());
    }

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>) {
        match buffer {
            Some(buffer) => self.state.uniform_buffers.insert(binding, buffer),
            None => self.state.uniform_buffers.remove(&binding),
        };
    }

    fn create_vertex_array(
        &mut self,
        attributes: &[VertexAttribute],
        index_buffer: Option<BufferHandle>,
    ) -> Result<VertexArrayHandle, RenderError> {
        let id = self.vertex_arrays.insert(SoftVertexArray {
            attributes: attributes.to_vec(),
            index_buffer,
        });
        Ok(VertexArrayHandle::from_raw(id))
    }

    fn add_vertex_attributes(
        &mut self,
        vertex_array: VertexArrayHandle,
        attributes: &[VertexAttribute],
    ) -> Result<(), RenderError> {
        let vao = self
            .vertex_arrays
            .get_mut(vertex_array.id())
            .ok_or_else(|| RenderError::Device(format!("unknown vertex array {}", vertex_array.id())))?;
        vao.attributes.retain(|a| !attributes.iter().any(|n| n.location == a.location));
        vao.attributes.extend_from_slice(attributes);
        Ok(())
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.remove(vertex_array.id());
        if self.state.vertex_array == Some(vertex_array) {
            self.state.vertex_array = None;
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        self.state.vertex_array = vertex_array;
    }

    fn draw(&mut self, call: &DrawCall) {
        if call.indexed {
            let has_indices = self
                .state
                .vertex_array
                .and_then(|v| self.vertex_arrays.get(v.id()))
                .is_some_and(|v| v.index_buffer.is_some());
            if !has_indices {
                self.raise(glow::INVALID_OPERATION, "indexed draw without element buffer");
                return;
            }
        }
        let Some(program) = self.state.program else {
            self.raise(glow::INVALID_OPERATION, "draw without a program");
            return;
        };
        let fragment_label = self
            .programs
            .get(program.id())
            .map(|p| p.fragment_label.clone())
            .unwrap_or_default();

        self.draw_log.push(DrawRecord {
            program: Some(program),
            fragment_label,
            framebuffer: self.state.framebuffer,
            vertex_array: self.state.vertex_array,
            primitive: call.primitive,
            count: call.count,
            instances: call.instances,
            viewport: self.state.viewport,
            enabled: self.state.enabled.clone(),
            depth_func: self.state.depth_func,
            depth_write: self.state.depth_write,
        });
        self.run_kernel(program);
    }

    fn poll_error(&mut self) -> u32 {
        if self.errors.is_empty() {
            glow::NO_ERROR
        } else {
            self.errors.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERT: &str = "void main() { gl_Position = vec4(0.0); }";

    fn stages(fragment: &str) -> Vec<StageSource> {
        vec![
            StageSource {
                stage: ShaderStage::Vertex,
                label: "test.vert".into(),
                source: VERT.into(),
            },
            StageSource {
                stage: ShaderStage::Fragment,
                label: "test.frag".into(),
                source: fragment.into(),
            },
        ]
    }

    #[test]
    fn test_clear_and_read_back_default_framebuffer() {
        let mut device = HeadlessDevice::new(4, 4);
        device.set_clear_color([0.25, 0.5, 2.0, 1.0]);
        device.clear(ClearFlags::COLOR);
        let texels = device
            .read_pixels(None, Attachment::Color(0), Viewport::new(1, 1, 1, 1))
            .unwrap();
        // RGBA8 clamps
        assert_eq!(texels, vec![0.25, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_missing_attachment_is_incomplete() {
        let mut device = HeadlessDevice::new(4, 4);
        let err = device.create_framebuffer(&[]).unwrap_err();
        assert!(err.to_string().contains("MISSING_ATTACHMENT"));

        let depth = device
            .create_texture(&TextureDesc::new(4, 4, TextureFormat::Depth32F))
            .unwrap();
        let err = device
            .create_framebuffer(&[FramebufferAttachment {
                attachment: Attachment::Color(0),
                texture: depth,
                level: 0,
            }])
            .unwrap_err();
        assert!(matches!(err, RenderError::IncompleteFramebuffer { .. }));
    }

    #[test]
    fn test_kernel_writes_viewport_only() {
        let mut device = HeadlessDevice::new(4, 4);
        let (program, _) = device
            .create_program(&stages("out vec4 c; void main() { c = vec4(1.0); }"))
            .unwrap();
        device.register_kernel("test.frag", |_| vec![[1.0, 1.0, 1.0, 1.0]]);
        device.set_clear_color([0.0, 0.0, 0.0, 1.0]);
        device.clear(ClearFlags::COLOR);

        device.use_program(Some(program));
        device.set_viewport(Viewport::new(0, 0, 2, 4));
        device.draw(&DrawCall {
            primitive: Primitive::TriangleStrip,
            first: 0,
            count: 4,
            indexed: false,
            instances: None,
        });

        let row = device
            .read_pixels(None, Attachment::Color(0), Viewport::new(0, 0, 4, 1))
            .unwrap();
        assert_eq!(&row[0..4], &[1.0; 4]);
        assert_eq!(&row[8..12], &[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(device.draw_log().len(), 1);
    }

    #[test]
    fn test_errors_are_queued_until_polled() {
        let mut device = HeadlessDevice::new(2, 2);
        device.draw(&DrawCall {
            primitive: Primitive::Triangles,
            first: 0,
            count: 3,
            indexed: false,
            instances: None,
        });
        assert_eq!(device.poll_error(), glow::INVALID_OPERATION);
        assert_eq!(device.poll_error(), glow::NO_ERROR);
    }

    #[test]
    fn test_masked_depth_is_not_cleared() {
        let mut device = HeadlessDevice::new(2, 2);
        device.set_clear_depth(0.5);
        device.clear(ClearFlags::DEPTH);
        device.set_depth_write(false);
        device.set_clear_depth(1.0);
        device.clear(ClearFlags::DEPTH);
        let depth = device
            .read_pixels(None, Attachment::Depth, Viewport::new(0, 0, 1, 1))
            .unwrap();
        assert_eq!(depth, vec![0.5]);
    }

    #[test]
    fn test_cube_faces_are_sampled_by_direction() {
        let mut device = HeadlessDevice::new(2, 2);
        let cube = device
            .create_texture(&TextureDesc::cube_map(1, TextureFormat::R32F))
            .unwrap();
        for face in 0..6 {
            device
                .upload_cube_face(cube, face, TexelData::F32(&[face as f32]))
                .unwrap();
        }
        assert!(device.upload_texture(cube, 0, TexelData::F32(&[0.0])).is_err());
        assert!(device.upload_cube_face(cube, 6, TexelData::F32(&[0.0])).is_err());

        let (program, _) = device
            .create_program(&stages("uniform samplerCube sky; out vec4 c; void main() {}"))
            .unwrap();
        device.use_program(Some(program));
        device.set_uniform(program, 0, &UniformValue::Int(3));
        device.bind_texture(3, Some(cube));
        let p = device.programs.get(program.id()).unwrap();
        let input = FragmentInput {
            pixel: (0, 0),
            uv: Vec2::ZERO,
            device: &device,
            program: p,
        };
        assert_eq!(input.sample_cube("sky", Vec3::Y)[0], 2.0);
        assert_eq!(input.sample_cube("sky", Vec3::NEG_Z)[0], 5.0);
        assert_eq!(device.cube_face_texels(cube, 1).unwrap()[0][0], 1.0);
    }

    #[test]
    fn test_generate_mipmaps_averages() {
        let mut device = HeadlessDevice::new(2, 2);
        let tex = device
            .create_texture(&TextureDesc::new(2, 2, TextureFormat::R32F).with_mip_levels(2))
            .unwrap();
        device
            .upload_texture(tex, 0, TexelData::F32(&[0.0, 1.0, 2.0, 3.0]))
            .unwrap();
        device.generate_mipmaps(tex);
        assert_eq!(device.texels(tex, 1).unwrap()[0][0], 1.5);
    }
}
