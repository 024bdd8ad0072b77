//! [`GraphicsDevice`] on top of a live OpenGL 4.3 context via `glow`.

use glow::HasContext;

use crate::device::*;
use crate::diagnostics::framebuffer_status_name;
use crate::error::RenderError;
use crate::reflect::{
    self, ActiveBlockMember, BlockPacking, ProgramInterface, UniformBlockInfo, UniformInfo, UniformKind,
};
use crate::uniform::UniformValue;

struct GlTexture {
    raw: glow::NativeTexture,
    desc: TextureDesc,
}

struct GlProgram {
    raw: glow::NativeProgram,
    /// Indexed by [`UniformInfo::location`].
    locations: Vec<glow::NativeUniformLocation>,
}

/// (internal format, pixel format, component type)
fn gl_format(format: TextureFormat) -> (u32, u32, u32) {
    match format {
        TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16F => (glow::RGBA16F, glow::RGBA, glow::FLOAT),
        TextureFormat::Rgba32F => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        TextureFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        TextureFormat::R32F => (glow::R32F, glow::RED, glow::FLOAT),
        TextureFormat::Rg32F => (glow::RG32F, glow::RG, glow::FLOAT),
        TextureFormat::Depth32F => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
    }
}

fn gl_texture_target(target: TextureTarget) -> u32 {
    match target {
        TextureTarget::Texture2D => glow::TEXTURE_2D,
        TextureTarget::CubeMap => glow::TEXTURE_CUBE_MAP,
    }
}

fn gl_capability(capability: Capability) -> u32 {
    match capability {
        Capability::DepthTest => glow::DEPTH_TEST,
        Capability::Blend => glow::BLEND,
        Capability::CullFace => glow::CULL_FACE,
        Capability::ScissorTest => glow::SCISSOR_TEST,
        Capability::StencilTest => glow::STENCIL_TEST,
    }
}

fn gl_clear_mask(flags: ClearFlags) -> u32 {
    let mut mask = 0;
    if flags.contains(ClearFlags::COLOR) {
        mask |= glow::COLOR_BUFFER_BIT;
    }
    if flags.contains(ClearFlags::DEPTH) {
        mask |= glow::DEPTH_BUFFER_BIT;
    }
    if flags.contains(ClearFlags::STENCIL) {
        mask |= glow::STENCIL_BUFFER_BIT;
    }
    mask
}

fn gl_stage(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::TessControl => glow::TESS_CONTROL_SHADER,
        ShaderStage::TessEvaluation => glow::TESS_EVALUATION_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    }
}

fn gl_primitive(primitive: Primitive) -> u32 {
    match primitive {
        Primitive::Triangles => glow::TRIANGLES,
        Primitive::TriangleStrip => glow::TRIANGLE_STRIP,
        Primitive::Lines => glow::LINES,
        Primitive::Points => glow::POINTS,
        Primitive::Patches(_) => glow::PATCHES,
    }
}

fn is_gl_sampler(utype: u32) -> bool {
    matches!(
        utype,
        glow::SAMPLER_2D
            | glow::SAMPLER_3D
            | glow::SAMPLER_CUBE
            | glow::SAMPLER_2D_SHADOW
            | glow::SAMPLER_2D_ARRAY
            | glow::INT_SAMPLER_2D
            | glow::UNSIGNED_INT_SAMPLER_2D
    )
}

pub struct GlowDevice {
    gl: glow::Context,
    state: DeviceState,
    default_size: (u32, u32),

    textures: HandleMap<GlTexture>,
    framebuffers: HandleMap<glow::NativeFramebuffer>,
    programs: HandleMap<GlProgram>,
    buffers: HandleMap<glow::NativeBuffer>,
    vertex_arrays: HandleMap<glow::NativeVertexArray>,
}

impl GlowDevice {
    /// Takes over a context that is current on this thread. Depth testing
    /// starts enabled, like the window's initial GL setup.
    pub fn new(gl: glow::Context, width: u32, height: u32) -> Self {
        let mut device = Self {
            gl,
            state: DeviceState::new(width, height),
            default_size: (width, height),
            textures: HandleMap::default(),
            framebuffers: HandleMap::default(),
            programs: HandleMap::default(),
            buffers: HandleMap::default(),
            vertex_arrays: HandleMap::default(),
        };
        unsafe {
            let version = device.gl.get_parameter_string(glow::VERSION);
            let renderer = device.gl.get_parameter_string(glow::RENDERER);
            log::info!("OpenGL {version} on {renderer}");
            device.gl.viewport(0, 0, width as i32, height as i32);
            device.gl.enable(glow::TEXTURE_CUBE_MAP_SEAMLESS);
        }
        device.set_capability(Capability::DepthTest, true);
        device
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    /// Called by the window runner after a resize.
    pub fn set_default_framebuffer_size(&mut self, width: u32, height: u32) {
        self.default_size = (width.max(1), height.max(1));
    }

    fn raw_framebuffer(&self, framebuffer: Option<FramebufferHandle>) -> Option<glow::NativeFramebuffer> {
        framebuffer.and_then(|fb| self.framebuffers.get(fb.id()).copied())
    }

    /// `glTexSubImage2D` of one full level or cube face, unbinding afterwards.
    fn upload_image(
        &mut self,
        texture: TextureHandle,
        image_target: Option<u32>,
        level: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError> {
        let tex = self
            .textures
            .get(texture.id())
            .ok_or_else(|| RenderError::Device(format!("unknown texture {}", texture.id())))?;
        let (_, format, _) = gl_format(tex.desc.format);
        let (w, h) = tex.desc.level_size(level);
        let expected = (w * h) as usize * tex.desc.format.channels();

        let (bytes, ty, len): (&[u8], u32, usize) = match data {
            TexelData::U8(bytes) => (bytes, glow::UNSIGNED_BYTE, bytes.len()),
            TexelData::F32(floats) => (bytemuck::cast_slice(floats), glow::FLOAT, floats.len()),
        };
        if len != expected {
            return Err(RenderError::Device(format!(
                "texture upload of {len} components, level {level} needs {expected}"
            )));
        }

        let bind_target = gl_texture_target(tex.desc.target);
        unsafe {
            self.gl.bind_texture(bind_target, Some(tex.raw));
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.tex_sub_image_2d(
                image_target.unwrap_or(bind_target),
                level as i32,
                0,
                0,
                w as i32,
                h as i32,
                format,
                ty,
                glow::PixelUnpackData::Slice(Some(bytes)),
            );
            self.gl.bind_texture(bind_target, None);
        }
        self.state.texture_units.remove(&0);
        Ok(())
    }

    fn compile_stage(&self, source: &StageSource) -> Result<glow::NativeShader, RenderError> {
        unsafe {
            let shader = self
                .gl
                .create_shader(gl_stage(source.stage))
                .map_err(RenderError::Device)?;
            self.gl.shader_source(shader, &source.source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(RenderError::Compile {
                    stage: source.stage,
                    label: source.label.clone(),
                    log,
                });
            }
            Ok(shader)
        }
    }

    /// Member offsets, array strides and matrix strides of one active block,
    /// as the linker laid it out.
    fn block_layout(
        &self,
        program: glow::NativeProgram,
        index: u32,
        scanned: &UniformBlockInfo,
    ) -> UniformBlockInfo {
        unsafe {
            let byte_size = self
                .gl
                .get_active_uniform_block_parameter_i32(program, index, glow::UNIFORM_BLOCK_DATA_SIZE)
                as u32;
            let count = self
                .gl
                .get_active_uniform_block_parameter_i32(program, index, glow::UNIFORM_BLOCK_ACTIVE_UNIFORMS)
                .max(0) as usize;
            let mut raw_indices = vec![0i32; count];
            self.gl.get_active_uniform_block_parameter_i32_slice(
                program,
                index,
                glow::UNIFORM_BLOCK_ACTIVE_UNIFORM_INDICES,
                &mut raw_indices,
            );
            let indices: Vec<u32> = raw_indices.iter().map(|&i| i as u32).collect();
            let offsets = self
                .gl
                .get_active_uniforms_parameter(program, &indices, glow::UNIFORM_OFFSET);
            let array_strides = self
                .gl
                .get_active_uniforms_parameter(program, &indices, glow::UNIFORM_ARRAY_STRIDE);
            let matrix_strides = self
                .gl
                .get_active_uniforms_parameter(program, &indices, glow::UNIFORM_MATRIX_STRIDE);

            let active: Vec<ActiveBlockMember> = indices
                .iter()
                .enumerate()
                .filter_map(|(i, &uniform)| {
                    let info = self.gl.get_active_uniform(program, uniform)?;
                    Some(ActiveBlockMember {
                        name: info.name,
                        array_size: info.size,
                        offset: offsets.get(i).copied().unwrap_or(-1),
                        array_stride: array_strides.get(i).copied().unwrap_or(0),
                        matrix_stride: matrix_strides.get(i).copied().unwrap_or(0),
                    })
                })
                .collect();
            UniformBlockInfo::from_driver(&scanned.name, index, byte_size, &active, Some(scanned))
        }
    }

    /// Driver-reported uniforms and blocks. Plain uniform types and block
    /// member types come from the source scan.
    fn introspect(
        &self,
        program: glow::NativeProgram,
        scanned: &ProgramInterface,
    ) -> (ProgramInterface, Vec<glow::NativeUniformLocation>) {
        let mut interface = ProgramInterface::default();
        let mut locations = Vec::new();

        unsafe {
            for index in 0..self.gl.get_active_uniforms(program) {
                let Some(active) = self.gl.get_active_uniform(program, index) else {
                    continue;
                };
                // block members have no location
                let Some(location) = self.gl.get_uniform_location(program, &active.name) else {
                    continue;
                };
                let name = reflect::normalize_name(&active.name).to_string();
                let glsl_type = scanned
                    .uniform(&name)
                    .map(|u| u.glsl_type.clone())
                    .unwrap_or_default();
                let kind = if is_gl_sampler(active.utype) {
                    UniformKind::Sampler
                } else {
                    UniformKind::Scalar
                };
                interface.uniforms.push(UniformInfo {
                    name,
                    glsl_type,
                    kind,
                    location: locations.len() as u32,
                    array_size: active.size.max(1) as u32,
                });
                locations.push(location);
            }

            for block in &scanned.blocks {
                let Some(index) = self.gl.get_uniform_block_index(program, &block.name) else {
                    log::debug!("uniform block {} is inactive", block.name);
                    continue;
                };
                let info = self.block_layout(program, index, block);
                if block.packing == BlockPacking::Std140 && info.byte_size != block.byte_size {
                    log::warn!(
                        "uniform block {}: driver reports {} bytes, std140 scan {}",
                        block.name,
                        info.byte_size,
                        block.byte_size
                    );
                }
                interface.blocks.push(info);
            }
        }

        // slots were fixed with glBindFragDataLocation before linking
        interface.outputs = scanned.outputs.clone();
        (interface, locations)
    }
}

impl GraphicsDevice for GlowDevice {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, RenderError> {
        let (internal, format, ty) = gl_format(desc.format);
        let (min_filter, mag_filter) = match (desc.filter, desc.mip_levels > 1) {
            (TextureFilter::Nearest, false) => (glow::NEAREST, glow::NEAREST),
            (TextureFilter::Nearest, true) => (glow::NEAREST_MIPMAP_NEAREST, glow::NEAREST),
            (TextureFilter::Linear, false) => (glow::LINEAR, glow::LINEAR),
            (TextureFilter::Linear, true) => (glow::LINEAR_MIPMAP_LINEAR, glow::LINEAR),
        };
        let wrap = match desc.wrap {
            TextureWrap::ClampToEdge => glow::CLAMP_TO_EDGE,
            TextureWrap::Repeat => glow::REPEAT,
            TextureWrap::MirroredRepeat => glow::MIRRORED_REPEAT,
        };

        let target = gl_texture_target(desc.target);
        let images: Vec<u32> = match desc.target {
            TextureTarget::Texture2D => vec![glow::TEXTURE_2D],
            TextureTarget::CubeMap => (0..6).map(|face| glow::TEXTURE_CUBE_MAP_POSITIVE_X + face).collect(),
        };

        let raw = unsafe {
            let raw = self.gl.create_texture().map_err(RenderError::Device)?;
            self.gl.bind_texture(target, Some(raw));
            for &image in &images {
                for level in 0..desc.mip_levels {
                    let (w, h) = desc.level_size(level);
                    self.gl.tex_image_2d(
                        image,
                        level as i32,
                        internal as i32,
                        w as i32,
                        h as i32,
                        0,
                        format,
                        ty,
                        glow::PixelUnpackData::Slice(None),
                    );
                }
            }
            let params = [
                (glow::TEXTURE_MIN_FILTER, min_filter as i32),
                (glow::TEXTURE_MAG_FILTER, mag_filter as i32),
                (glow::TEXTURE_WRAP_S, wrap as i32),
                (glow::TEXTURE_WRAP_T, wrap as i32),
                (glow::TEXTURE_WRAP_R, wrap as i32),
                (glow::TEXTURE_BASE_LEVEL, 0),
                (glow::TEXTURE_MAX_LEVEL, desc.mip_levels as i32 - 1),
            ];
            for (param, value) in params {
                self.gl.tex_parameter_i32(target, param, value);
            }
            self.gl.bind_texture(target, None);
            raw
        };
        // unit 0 lost its binding above
        self.state.texture_units.remove(&0);

        let id = self.textures.insert(GlTexture { raw, desc: *desc });
        Ok(TextureHandle::from_raw(id))
    }

    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        level: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError> {
        if self.textures.get(texture.id()).is_some_and(|t| t.desc.is_cube_map()) {
            return Err(RenderError::Device(format!(
                "texture {} is a cube map; upload its faces",
                texture.id()
            )));
        }
        self.upload_image(texture, None, level, data)
    }

    fn upload_cube_face(
        &mut self,
        texture: TextureHandle,
        face: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError> {
        let is_cube = self.textures.get(texture.id()).is_some_and(|t| t.desc.is_cube_map());
        if !is_cube || face >= 6 {
            return Err(RenderError::Device(format!(
                "texture {} has no cube face {face}",
                texture.id()
            )));
        }
        self.upload_image(texture, Some(glow::TEXTURE_CUBE_MAP_POSITIVE_X + face), 0, data)
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.get(texture.id()) {
            let target = gl_texture_target(tex.desc.target);
            unsafe {
                self.gl.bind_texture(target, Some(tex.raw));
                self.gl.generate_mipmap(target);
                self.gl.bind_texture(target, None);
            }
            self.state.texture_units.remove(&0);
        }
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(texture.id()) {
            unsafe { self.gl.delete_texture(tex.raw) };
        }
    }

    fn create_framebuffer(
        &mut self,
        attachments: &[FramebufferAttachment],
    ) -> Result<FramebufferHandle, RenderError> {
        let raw = unsafe { self.gl.create_framebuffer().map_err(RenderError::Device)? };
        let mut draw_buffers = Vec::new();
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(raw));
            for attachment in attachments {
                let texture = self.textures.get(attachment.texture.id()).map(|t| t.raw);
                let point = match attachment.attachment {
                    Attachment::Color(slot) => {
                        let point = glow::COLOR_ATTACHMENT0 + slot;
                        let slot = slot as usize;
                        if draw_buffers.len() <= slot {
                            draw_buffers.resize(slot + 1, glow::NONE);
                        }
                        draw_buffers[slot] = point;
                        point
                    }
                    Attachment::Depth => glow::DEPTH_ATTACHMENT,
                };
                self.gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    point,
                    glow::TEXTURE_2D,
                    texture,
                    attachment.level as i32,
                );
            }
            if draw_buffers.is_empty() {
                self.gl.draw_buffer(glow::NONE);
                self.gl.read_buffer(glow::NONE);
            } else {
                self.gl.draw_buffers(&draw_buffers);
            }

            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            let previous = self.raw_framebuffer(self.state.framebuffer);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, previous);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.gl.delete_framebuffer(raw);
                return Err(RenderError::IncompleteFramebuffer {
                    status: framebuffer_status_name(status).to_string(),
                });
            }
        }
        Ok(FramebufferHandle::from_raw(self.framebuffers.insert(raw)))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(raw) = self.framebuffers.remove(framebuffer.id()) {
            unsafe { self.gl.delete_framebuffer(raw) };
            if self.state.framebuffer == Some(framebuffer) {
                self.bind_framebuffer(None);
            }
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        let raw = self.raw_framebuffer(framebuffer);
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, raw) };
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
        filter: TextureFilter,
    ) {
        let filter = match filter {
            TextureFilter::Nearest => glow::NEAREST,
            TextureFilter::Linear => glow::LINEAR,
        };
        let s = source_rect;
        let t = target_rect;
        unsafe {
            self.gl
                .bind_framebuffer(glow::READ_FRAMEBUFFER, self.raw_framebuffer(source));
            self.gl
                .bind_framebuffer(glow::DRAW_FRAMEBUFFER, self.raw_framebuffer(target));
            self.gl.blit_framebuffer(
                s.x,
                s.y,
                s.x + s.width as i32,
                s.y + s.height as i32,
                t.x,
                t.y,
                t.x + t.width as i32,
                t.y + t.height as i32,
                gl_clear_mask(mask),
                filter,
            );
            let current = self.raw_framebuffer(self.state.framebuffer);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, current);
        }
    }

    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        attachment: Attachment,
        rect: Viewport,
    ) -> Result<Vec<f32>, RenderError> {
        let (format, channels) = match attachment {
            Attachment::Color(_) => (glow::RGBA, 4),
            Attachment::Depth => (glow::DEPTH_COMPONENT, 1),
        };
        let mut texels = vec![0.0f32; (rect.width * rect.height) as usize * channels];
        unsafe {
            self.gl
                .bind_framebuffer(glow::READ_FRAMEBUFFER, self.raw_framebuffer(framebuffer));
            if let Attachment::Color(slot) = attachment {
                let buffer = if framebuffer.is_some() {
                    glow::COLOR_ATTACHMENT0 + slot
                } else {
                    glow::BACK
                };
                self.gl.read_buffer(buffer);
            }
            self.gl.read_pixels(
                rect.x,
                rect.y,
                rect.width as i32,
                rect.height as i32,
                format,
                glow::FLOAT,
                glow::PixelPackData::Slice(Some(bytemuck::cast_slice_mut(&mut texels))),
            );
            let current = self.raw_framebuffer(self.state.framebuffer);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, current);
        }
        Ok(texels)
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        unsafe {
            self.gl.viewport(
                viewport.x,
                viewport.y,
                viewport.width as i32,
                viewport.height as i32,
            )
        };
        self.state.viewport = viewport;
    }

    fn set_capability(&mut self, capability: Capability, enabled: bool) {
        let cap = gl_capability(capability);
        unsafe {
            if enabled {
                self.gl.enable(cap);
            } else {
                self.gl.disable(cap);
            }
        }
        self.state.set_enabled(capability, enabled);
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        let (src, dst) = match mode {
            BlendMode::Alpha => (glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA),
            BlendMode::Additive => (glow::ONE, glow::ONE),
        };
        unsafe { self.gl.blend_func(src, dst) };
        self.state.blend_mode = mode;
    }

    fn set_clear_color(&mut self, color: [f32; 4]) {
        unsafe { self.gl.clear_color(color[0], color[1], color[2], color[3]) };
        self.state.clear_color = color;
    }

    fn set_clear_depth(&mut self, depth: f32) {
        unsafe { self.gl.clear_depth_f64(depth as f64) };
        self.state.clear_depth = depth;
    }

    fn set_depth_func(&mut self, func: DepthFunc) {
        let raw = match func {
            DepthFunc::Less => glow::LESS,
            DepthFunc::LessEqual => glow::LEQUAL,
            DepthFunc::Always => glow::ALWAYS,
        };
        unsafe { self.gl.depth_func(raw) };
        self.state.depth_func = func;
    }

    fn set_depth_write(&mut self, enabled: bool) {
        unsafe { self.gl.depth_mask(enabled) };
        self.state.depth_write = enabled;
    }

    fn clear(&mut self, flags: ClearFlags) {
        unsafe { self.gl.clear(gl_clear_mask(flags)) };
    }

    fn state(&self) -> &DeviceState {
        &self.state
    }

    fn create_program(
        &mut self,
        stages: &[StageSource],
    ) -> Result<(ProgramHandle, ProgramInterface), RenderError> {
        let mut shaders = Vec::with_capacity(stages.len());
        for stage in stages {
            match self.compile_stage(stage) {
                Ok(shader) => shaders.push(shader),
                Err(err) => {
                    for shader in shaders {
                        unsafe { self.gl.delete_shader(shader) };
                    }
                    return Err(err);
                }
            }
        }

        let scans: Vec<_> = stages
            .iter()
            .map(|s| {
                let decls = reflect::scan_stage(&s.source, s.stage).unwrap_or_else(|err| {
                    log::warn!("{}: declaration scan failed: {err}", s.label);
                    Default::default()
                });
                (s.stage, decls)
            })
            .collect();
        let scanned = reflect::merge_stages(&scans);

        let raw = unsafe {
            let raw = self.gl.create_program().map_err(RenderError::Device)?;
            for shader in &shaders {
                self.gl.attach_shader(raw, *shader);
            }
            // pins implicit outputs to the scanned slots; explicit layout locations win
            for output in &scanned.outputs {
                self.gl.bind_frag_data_location(raw, output.slot, &output.name);
            }
            self.gl.link_program(raw);
            for shader in shaders {
                self.gl.detach_shader(raw, shader);
                self.gl.delete_shader(shader);
            }
            if !self.gl.get_program_link_status(raw) {
                let log = self.gl.get_program_info_log(raw);
                self.gl.delete_program(raw);
                let labels: Vec<&str> = stages.iter().map(|s| s.label.as_str()).collect();
                return Err(RenderError::Link {
                    labels: labels.join(", "),
                    log,
                });
            }
            raw
        };

        let (interface, locations) = self.introspect(raw, &scanned);

        let id = self.programs.insert(GlProgram { raw, locations });
        Ok((ProgramHandle::from_raw(id), interface))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if let Some(p) = self.programs.remove(program.id()) {
            unsafe { self.gl.delete_program(p.raw) };
            if self.state.program == Some(program) {
                self.state.program = None;
            }
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        let raw = program.and_then(|p| self.programs.get(p.id()).map(|p| p.raw));
        unsafe { self.gl.use_program(raw) };
        self.state.program = program;
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: u32, value: &UniformValue) {
        if self.state.program != Some(program) {
            log::warn!("set_uniform on program {} while it is not current", program.id());
            return;
        }
        let Some(loc) = self
            .programs
            .get(program.id())
            .and_then(|p| p.locations.get(location as usize))
        else {
            return;
        };
        let loc = Some(loc);
        unsafe {
            match value {
                UniformValue::Float(v) => self.gl.uniform_1_f32(loc, *v),
                UniformValue::Int(v) => self.gl.uniform_1_i32(loc, *v),
                UniformValue::UInt(v) => self.gl.uniform_1_u32(loc, *v),
                UniformValue::Vec2(v) => self.gl.uniform_2_f32(loc, v.x, v.y),
                UniformValue::Vec3(v) => self.gl.uniform_3_f32(loc, v.x, v.y, v.z),
                UniformValue::Vec4(v) => self.gl.uniform_4_f32(loc, v.x, v.y, v.z, v.w),
                UniformValue::IVec2(v) => self.gl.uniform_2_i32(loc, v.x, v.y),
                UniformValue::Mat3(m) => {
                    self.gl
                        .uniform_matrix_3_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::Mat4(m) => {
                    self.gl
                        .uniform_matrix_4_f32_slice(loc, false, &m.to_cols_array())
                }
                UniformValue::FloatArray(values) => self.gl.uniform_1_f32_slice(loc, values),
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        let bound = texture.and_then(|t| self.textures.get(t.id()).map(|t| (t.raw, t.desc.target)));
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            match bound {
                Some((raw, target)) => self.gl.bind_texture(gl_texture_target(target), Some(raw)),
                None => {
                    self.gl.bind_texture(glow::TEXTURE_2D, None);
                    self.gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
                }
            }
            self.gl.active_texture(glow::TEXTURE0);
        }
        match texture {
            Some(texture) => self.state.texture_units.insert(unit, texture),
            None => self.state.texture_units.remove(&unit),
        };
    }

    fn set_uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32) {
        if let Some(p) = self.programs.get(program.id()) {
            unsafe { self.gl.uniform_block_binding(p.raw, block_index, binding) };
        }
    }

    fn create_buffer(
        &mut self,
        _kind: BufferKind,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferHandle, RenderError> {
        let usage = match usage {
            BufferUsage::Static => glow::STATIC_DRAW,
            BufferUsage::Dynamic => glow::DYNAMIC_DRAW,
        };
        // COPY_WRITE_BUFFER leaves VAO and indexed uniform bindings untouched
        let raw = unsafe {
            let raw = self.gl.create_buffer().map_err(RenderError::Device)?;
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(raw));
            self.gl
                .buffer_data_u8_slice(glow::COPY_WRITE_BUFFER, data, usage);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            raw
        };
        Ok(BufferHandle::from_raw(self.buffers.insert(raw)))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), RenderError> {
        let raw = *self
            .buffers
            .get(buffer.id())
            .ok_or_else(|| RenderError::Device(format!("unknown buffer {}", buffer.id())))?;
        unsafe {
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(raw));
            self.gl
                .buffer_data_u8_slice(glow::COPY_WRITE_BUFFER, data, glow::DYNAMIC_DRAW);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
        Ok(())
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some(raw) = self.buffers.remove(buffer.id()) {
            unsafe { self.gl.delete_buffer(raw) };
        }
    }

    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>) {
        let raw = buffer.and_then(|b| self.buffers.get(b.id()).copied());
        unsafe { self.gl.bind_buffer_base(glow::UNIFORM_BUFFER, binding, raw) };
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
        let raw = unsafe { self.gl.create_vertex_array().map_err(RenderError::Device)? };
        let handle = VertexArrayHandle::from_raw(self.vertex_arrays.insert(raw));
        self.add_vertex_attributes(handle, attributes)?;
        if let Some(index) = index_buffer {
            let index_raw = self.buffers.get(index.id()).copied();
            unsafe {
                self.gl.bind_vertex_array(Some(raw));
                self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, index_raw);
                self.restore_vertex_array();
            }
        }
        Ok(handle)
    }

    fn add_vertex_attributes(
        &mut self,
        vertex_array: VertexArrayHandle,
        attributes: &[VertexAttribute],
    ) -> Result<(), RenderError> {
        let raw = *self.vertex_arrays.get(vertex_array.id()).ok_or_else(|| {
            RenderError::Device(format!("unknown vertex array {}", vertex_array.id()))
        })?;
        unsafe {
            self.gl.bind_vertex_array(Some(raw));
            for attr in attributes {
                let buffer = self.buffers.get(attr.buffer.id()).copied();
                self.gl.bind_buffer(glow::ARRAY_BUFFER, buffer);
                self.gl.enable_vertex_attrib_array(attr.location);
                self.gl.vertex_attrib_pointer_f32(
                    attr.location,
                    attr.components as i32,
                    glow::FLOAT,
                    false,
                    attr.stride as i32,
                    attr.offset as i32,
                );
                self.gl.vertex_attrib_divisor(attr.location, attr.divisor);
            }
            self.gl.bind_buffer(glow::ARRAY_BUFFER, None);
            self.restore_vertex_array();
        }
        Ok(())
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        if let Some(raw) = self.vertex_arrays.remove(vertex_array.id()) {
            unsafe { self.gl.delete_vertex_array(raw) };
            if self.state.vertex_array == Some(vertex_array) {
                self.state.vertex_array = None;
            }
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>) {
        let raw = vertex_array.and_then(|v| self.vertex_arrays.get(v.id()).copied());
        unsafe { self.gl.bind_vertex_array(raw) };
        self.state.vertex_array = vertex_array;
    }

    fn draw(&mut self, call: &DrawCall) {
        let mode = gl_primitive(call.primitive);
        unsafe {
            if let Primitive::Patches(vertices) = call.primitive {
                self.gl.patch_parameter_i32(glow::PATCH_VERTICES, vertices as i32);
            }
            let count = call.count as i32;
            let byte_offset = (call.first * 4) as i32;
            match (call.indexed, call.instances) {
                (true, None) => self
                    .gl
                    .draw_elements(mode, count, glow::UNSIGNED_INT, byte_offset),
                (true, Some(n)) => self.gl.draw_elements_instanced(
                    mode,
                    count,
                    glow::UNSIGNED_INT,
                    byte_offset,
                    n as i32,
                ),
                (false, None) => self.gl.draw_arrays(mode, call.first as i32, count),
                (false, Some(n)) => {
                    self.gl
                        .draw_arrays_instanced(mode, call.first as i32, count, n as i32)
                }
            }
        }
    }

    fn poll_error(&mut self) -> u32 {
        unsafe { self.gl.get_error() }
    }
}

impl GlowDevice {
    unsafe fn restore_vertex_array(&self) {
        let raw = self
            .state
            .vertex_array
            .and_then(|v| self.vertex_arrays.get(v.id()).copied());
        unsafe { self.gl.bind_vertex_array(raw) };
    }
}
