//! The graphics device boundary.
//!
//! Everything above this module talks to the GPU through [`GraphicsDevice`],
//! a thin trait shaped after the OpenGL 4 core API. [`crate::glow_device`]
//! forwards to a real context; [`crate::headless`] emulates it on the CPU.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::RenderError;
use crate::reflect::ProgramInterface;
use crate::uniform::UniformValue;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn from_raw(id: u32) -> Self {
                Self(id)
            }

            pub fn id(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(
    /// A 2D texture (possibly mipmapped) or a cube map.
    TextureHandle
);
handle!(FramebufferHandle);
handle!(ProgramHandle);
handle!(BufferHandle);
handle!(VertexArrayHandle);

/// Slot map from handle ids to backend objects. Ids start at 1 and are never reused.
#[derive(Debug)]
pub(crate) struct HandleMap<T> {
    next: u32,
    items: HashMap<u32, T>,
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self {
            next: 1,
            items: HashMap::new(),
        }
    }
}

impl<T> HandleMap<T> {
    pub fn insert(&mut self, item: T) -> u32 {
        let id = self.next;
        self.next += 1;
        self.items.insert(id, item);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.items.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.items.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// GL_RGBA8, the default color format
    Rgba8,
    Rgba16F,
    /// GL_RGBA32F, unclamped floats for G-Buffer style targets
    Rgba32F,
    R8,
    R32F,
    Rg32F,
    Depth32F,
}

impl TextureFormat {
    pub fn channels(self) -> usize {
        match self {
            Self::Rgba8 | Self::Rgba16F | Self::Rgba32F => 4,
            Self::Rg32F => 2,
            Self::R8 | Self::R32F | Self::Depth32F => 1,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32F)
    }

    /// Normalized fixed-point formats clamp writes to [0, 1].
    pub fn is_normalized(self) -> bool {
        matches!(self, Self::Rgba8 | Self::R8)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextureWrap {
    #[default]
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TextureTarget {
    #[default]
    Texture2D,
    /// Six square faces in GL order +X, -X, +Y, -Y, +Z, -Z.
    CubeMap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub mip_levels: u32,
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
    pub target: TextureTarget,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_levels: 1,
            filter: TextureFilter::Linear,
            wrap: TextureWrap::ClampToEdge,
            target: TextureTarget::Texture2D,
        }
    }

    /// A cube map with `size` x `size` faces.
    pub fn cube_map(size: u32, format: TextureFormat) -> Self {
        Self {
            target: TextureTarget::CubeMap,
            ..Self::new(size, size, format)
        }
    }

    pub fn is_cube_map(&self) -> bool {
        self.target == TextureTarget::CubeMap
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels.max(1);
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: TextureWrap) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// Pixel payload for a texture upload; row-major, bottom row first.
#[derive(Clone, Copy, Debug)]
pub enum TexelData<'a> {
    U8(&'a [u8]),
    F32(&'a [f32]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    DepthTest,
    Blend,
    CullFace,
    ScissorTest,
    StencilTest,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// SRC_ALPHA, ONE_MINUS_SRC_ALPHA
    #[default]
    Alpha,
    /// ONE, ONE
    Additive,
}

/// Depth comparison; `LessEqual` lets a far-plane skybox pass over cleared depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DepthFunc {
    #[default]
    Less,
    LessEqual,
    Always,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attachment {
    Color(u32),
    Depth,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramebufferAttachment {
    pub attachment: Attachment,
    pub texture: TextureHandle,
    pub level: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    TessControl,
    TessEvaluation,
    Geometry,
    Fragment,
}

#[derive(Clone, Debug)]
pub struct StageSource {
    pub stage: ShaderStage,
    /// Where the source came from; used in diagnostics and to pick headless kernels.
    pub label: String,
    pub source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Static,
    Dynamic,
}

/// One float vertex attribute sourced from a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub buffer: BufferHandle,
    pub components: u32,
    /// Bytes between consecutive elements; 0 means tightly packed.
    pub stride: u32,
    pub offset: u32,
    /// 0 = per vertex, 1 = advance once per instance.
    pub divisor: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Primitive {
    Triangles,
    TriangleStrip,
    Lines,
    Points,
    Patches(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawCall {
    pub primitive: Primitive,
    pub first: u32,
    pub count: u32,
    /// Draw from the bound element buffer (u32 indices).
    pub indexed: bool,
    /// `None` issues a plain draw, `Some(n)` one instanced submission of n.
    pub instances: Option<u32>,
}

/// The state a pass leaves behind. Passes never restore it, so each one
/// inherits whatever the previous pass configured.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceState {
    pub framebuffer: Option<FramebufferHandle>,
    pub viewport: Viewport,
    pub enabled: BTreeSet<Capability>,
    pub blend_mode: BlendMode,
    pub program: Option<ProgramHandle>,
    pub vertex_array: Option<VertexArrayHandle>,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub depth_func: DepthFunc,
    /// glDepthMask; depth clears are skipped while it is off.
    pub depth_write: bool,
    pub texture_units: BTreeMap<u32, TextureHandle>,
    pub uniform_buffers: BTreeMap<u32, BufferHandle>,
}

impl DeviceState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            framebuffer: None,
            viewport: Viewport::full(width, height),
            enabled: BTreeSet::new(),
            blend_mode: BlendMode::Alpha,
            program: None,
            vertex_array: None,
            clear_color: [0.0; 4],
            clear_depth: 1.0,
            depth_func: DepthFunc::Less,
            depth_write: true,
            texture_units: BTreeMap::new(),
            uniform_buffers: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }

    pub(crate) fn set_enabled(&mut self, capability: Capability, enabled: bool) {
        if enabled {
            self.enabled.insert(capability);
        } else {
            self.enabled.remove(&capability);
        }
    }
}

/// GPU access used by every renderer type. Single-threaded; one context.
pub trait GraphicsDevice {
    // --- Textures ---
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, RenderError>;
    /// Replaces one whole mip level.
    fn upload_texture(
        &mut self,
        texture: TextureHandle,
        level: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError>;
    /// Replaces level 0 of one cube map face, `face` in 0..6 (+X, -X, +Y, -Y, +Z, -Z).
    /// Rows run top to bottom, as cube map faces are addressed.
    fn upload_cube_face(
        &mut self,
        texture: TextureHandle,
        face: u32,
        data: TexelData<'_>,
    ) -> Result<(), RenderError>;
    fn generate_mipmaps(&mut self, texture: TextureHandle);
    fn delete_texture(&mut self, texture: TextureHandle);

    // --- Framebuffers ---
    /// Fails with [`RenderError::IncompleteFramebuffer`] if the attachment set is not complete.
    fn create_framebuffer(
        &mut self,
        attachments: &[FramebufferAttachment],
    ) -> Result<FramebufferHandle, RenderError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// `None` is the window's default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn default_framebuffer_size(&self) -> (u32, u32);
    fn blit_framebuffer(
        &mut self,
        source: Option<FramebufferHandle>,
        target: Option<FramebufferHandle>,
        source_rect: Viewport,
        target_rect: Viewport,
        mask: ClearFlags,
        filter: TextureFilter,
    );
    /// RGBA floats for color attachments, one float per texel for depth.
    fn read_pixels(
        &mut self,
        framebuffer: Option<FramebufferHandle>,
        attachment: Attachment,
        rect: Viewport,
    ) -> Result<Vec<f32>, RenderError>;

    // --- Fixed-function state ---
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_capability(&mut self, capability: Capability, enabled: bool);
    fn set_blend_mode(&mut self, mode: BlendMode);
    fn set_clear_color(&mut self, color: [f32; 4]);
    fn set_clear_depth(&mut self, depth: f32);
    fn set_depth_func(&mut self, func: DepthFunc);
    fn set_depth_write(&mut self, enabled: bool);
    fn clear(&mut self, flags: ClearFlags);
    fn state(&self) -> &DeviceState;

    // --- Programs ---
    fn create_program(
        &mut self,
        stages: &[StageSource],
    ) -> Result<(ProgramHandle, ProgramInterface), RenderError>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn use_program(&mut self, program: Option<ProgramHandle>);
    /// `location` is an index from the program's [`ProgramInterface`]; the program must be current.
    fn set_uniform(&mut self, program: ProgramHandle, location: u32, value: &UniformValue);
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);
    fn set_uniform_block_binding(&mut self, program: ProgramHandle, block_index: u32, binding: u32);

    // --- Buffers and vertex arrays ---
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<BufferHandle, RenderError>;
    /// Replaces the full contents (glBufferData); partial updates are not offered.
    fn update_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<(), RenderError>;
    fn delete_buffer(&mut self, buffer: BufferHandle);
    fn bind_uniform_buffer(&mut self, binding: u32, buffer: Option<BufferHandle>);
    fn create_vertex_array(
        &mut self,
        attributes: &[VertexAttribute],
        index_buffer: Option<BufferHandle>,
    ) -> Result<VertexArrayHandle, RenderError>;
    fn add_vertex_attributes(
        &mut self,
        vertex_array: VertexArrayHandle,
        attributes: &[VertexAttribute],
    ) -> Result<(), RenderError>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle);
    fn bind_vertex_array(&mut self, vertex_array: Option<VertexArrayHandle>);
    fn draw(&mut self, call: &DrawCall);

    // --- Diagnostics ---
    /// Raw glGetError code; 0 when nothing is pending. Clears the flag.
    fn poll_error(&mut self) -> u32;
}
