//! Teardown of GPU objects that are shared between passes.
//!
//! Programs, targets and meshes sit behind `Rc`s in several passes at once,
//! so nothing deletes them on drop. Owners report their handles into a
//! [`ReleaseList`] instead, which deletes each object exactly once.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::device::*;

/// Something that owns GPU objects.
pub trait GpuResource {
    fn collect_resources(&self, list: &mut ReleaseList);
}

impl<T: GpuResource + ?Sized> GpuResource for Rc<T> {
    fn collect_resources(&self, list: &mut ReleaseList) {
        self.as_ref().collect_resources(list);
    }
}

impl<T: GpuResource + ?Sized> GpuResource for RefCell<T> {
    fn collect_resources(&self, list: &mut ReleaseList) {
        self.borrow().collect_resources(list);
    }
}

impl<T: GpuResource> GpuResource for Option<T> {
    fn collect_resources(&self, list: &mut ReleaseList) {
        if let Some(resource) = self {
            resource.collect_resources(list);
        }
    }
}

#[derive(Debug, Default)]
pub struct ReleaseList {
    textures: BTreeSet<TextureHandle>,
    framebuffers: BTreeSet<FramebufferHandle>,
    programs: BTreeSet<ProgramHandle>,
    buffers: BTreeSet<BufferHandle>,
    vertex_arrays: BTreeSet<VertexArrayHandle>,
}

impl ReleaseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, resource: &dyn GpuResource) -> &mut Self {
        resource.collect_resources(self);
        self
    }

    pub fn texture(&mut self, texture: TextureHandle) -> &mut Self {
        self.textures.insert(texture);
        self
    }

    pub fn framebuffer(&mut self, framebuffer: FramebufferHandle) -> &mut Self {
        self.framebuffers.insert(framebuffer);
        self
    }

    pub fn program(&mut self, program: ProgramHandle) -> &mut Self {
        self.programs.insert(program);
        self
    }

    pub fn buffer(&mut self, buffer: BufferHandle) -> &mut Self {
        self.buffers.insert(buffer);
        self
    }

    pub fn vertex_array(&mut self, vertex_array: VertexArrayHandle) -> &mut Self {
        self.vertex_arrays.insert(vertex_array);
        self
    }

    pub fn len(&self) -> usize {
        self.textures.len()
            + self.framebuffers.len()
            + self.programs.len()
            + self.buffers.len()
            + self.vertex_arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Framebuffers go before the textures attached to them, vertex arrays
    /// before their buffers.
    pub fn release(self, device: &mut dyn GraphicsDevice) {
        log::debug!(
            "releasing {} framebuffers, {} programs, {} vertex arrays, {} buffers, {} textures",
            self.framebuffers.len(),
            self.programs.len(),
            self.vertex_arrays.len(),
            self.buffers.len(),
            self.textures.len()
        );
        for framebuffer in self.framebuffers {
            device.delete_framebuffer(framebuffer);
        }
        for program in self.programs {
            device.delete_program(program);
        }
        for vertex_array in self.vertex_arrays {
            device.delete_vertex_array(vertex_array);
        }
        for buffer in self.buffers {
            device.delete_buffer(buffer);
        }
        for texture in self.textures {
            device.delete_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use crate::render_target::RenderTarget;

    #[test]
    fn test_shared_objects_are_released_once() {
        let mut device = HeadlessDevice::new(4, 4);
        let target =
            Rc::new(RenderTarget::with_color_attachments(&mut device, "t", 4, 4, 2, TextureFormat::Rgba8, true).unwrap());
        let alias = target.clone();

        let mut list = ReleaseList::new();
        list.collect(&target).collect(&alias);
        assert_eq!(list.len(), 4);
        list.release(&mut device);
        assert_eq!(device.live_objects(), 0);
        assert_eq!(device.poll_error(), glow::NO_ERROR);
    }
}
