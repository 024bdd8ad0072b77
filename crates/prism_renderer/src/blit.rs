use crate::device::{ClearFlags, FramebufferHandle, GraphicsDevice, TextureFilter, Viewport};
use crate::render_target::RenderTarget;

/// Copies the full extent of `source` into the full extent of `target`
/// (`None` is the window), stretching if the sizes differ.
///
/// Depth and stencil can only be blitted with nearest filtering; colour-only
/// copies between different sizes are filtered linearly.
pub fn copy_target_content(
    device: &mut dyn GraphicsDevice,
    source: Option<FramebufferHandle>,
    target: Option<FramebufferHandle>,
    source_size: (u32, u32),
    target_size: (u32, u32),
    mask: ClearFlags,
) {
    let filter = if mask == ClearFlags::COLOR && source_size != target_size {
        TextureFilter::Linear
    } else {
        TextureFilter::Nearest
    };
    device.blit_framebuffer(
        source,
        target,
        Viewport::full(source_size.0, source_size.1),
        Viewport::full(target_size.0, target_size.1),
        mask,
        filter,
    );
}

/// [`copy_target_content`] between render targets.
pub fn copy_render_target(
    device: &mut dyn GraphicsDevice,
    source: &RenderTarget,
    target: Option<&RenderTarget>,
    mask: ClearFlags,
) {
    let target_size = match target {
        Some(t) => t.resolution(),
        None => device.default_framebuffer_size(),
    };
    copy_target_content(
        device,
        Some(source.framebuffer()),
        target.map(RenderTarget::framebuffer),
        source.resolution(),
        target_size,
        mask,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TextureFormat;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_copy_into_window() {
        let mut device = HeadlessDevice::new(4, 4);
        let target =
            RenderTarget::with_color_attachments(&mut device, "src", 2, 2, 1, TextureFormat::Rgba32F, false)
                .unwrap();
        device.bind_framebuffer(Some(target.framebuffer()));
        device.set_clear_color([0.25, 0.5, 0.75, 1.0]);
        device.clear(ClearFlags::COLOR);

        copy_render_target(&mut device, &target, None, ClearFlags::COLOR);
        let pixels = device
            .read_pixels(None, crate::device::Attachment::Color(0), Viewport::new(3, 3, 1, 1))
            .unwrap();
        assert_eq!(pixels, vec![0.25, 0.5, 0.75, 1.0]);
    }
}
