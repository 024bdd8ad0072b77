use std::collections::BTreeMap;

use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};
use crate::shader::ShaderProgram;

/// An off-screen framebuffer whose color attachments are named after the
/// outputs of the program that renders into it. All attachments share one
/// resolution and one color format; resizing means building a new target.
#[derive(Debug)]
pub struct RenderTarget {
    label: String,
    framebuffer: FramebufferHandle,
    width: u32,
    height: u32,
    format: TextureFormat,
    attachments: BTreeMap<String, (u32, TextureHandle)>,
    depth: Option<TextureHandle>,
}

impl RenderTarget {
    /// One texture per declared output (name -> slot), plus a depth texture
    /// when `with_depth` is set.
    pub fn from_outputs(
        device: &mut dyn GraphicsDevice,
        label: &str,
        outputs: &BTreeMap<String, u32>,
        width: u32,
        height: u32,
        format: TextureFormat,
        with_depth: bool,
    ) -> Result<Self, RenderError> {
        let color_desc = TextureDesc::new(width, height, format);
        let mut attachments = BTreeMap::new();
        let mut fb_attachments = Vec::new();

        let created = Self::create_attachments(
            device,
            outputs,
            &color_desc,
            with_depth,
            &mut attachments,
            &mut fb_attachments,
        )
        .and_then(|depth| Ok((depth, device.create_framebuffer(&fb_attachments)?)));
        let (depth, framebuffer) = match created {
            Ok(created) => created,
            Err(err) => {
                for attachment in &fb_attachments {
                    device.delete_texture(attachment.texture);
                }
                return Err(err);
            }
        };
        log::debug!(
            "target {label}: {width}x{height} {format:?}, outputs [{}]{}",
            outputs.keys().cloned().collect::<Vec<_>>().join(", "),
            if with_depth { " + depth" } else { "" }
        );

        Ok(Self {
            label: label.to_string(),
            framebuffer,
            width,
            height,
            format,
            attachments,
            depth,
        })
    }

    /// Attachments named and slotted exactly like `program`'s outputs.
    pub fn for_program(
        device: &mut dyn GraphicsDevice,
        label: &str,
        program: &ShaderProgram,
        width: u32,
        height: u32,
        format: TextureFormat,
        with_depth: bool,
    ) -> Result<Self, RenderError> {
        Self::from_outputs(device, label, &program.output_map(), width, height, format, with_depth)
    }

    /// `count` anonymous attachments named `color0`, `color1`, ...
    pub fn with_color_attachments(
        device: &mut dyn GraphicsDevice,
        label: &str,
        width: u32,
        height: u32,
        count: u32,
        format: TextureFormat,
        with_depth: bool,
    ) -> Result<Self, RenderError> {
        let outputs: BTreeMap<String, u32> = (0..count).map(|i| (format!("color{i}"), i)).collect();
        Self::from_outputs(device, label, &outputs, width, height, format, with_depth)
    }

    /// Depth attachment only, for shadow maps.
    pub fn depth_only(
        device: &mut dyn GraphicsDevice,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        Self::from_outputs(
            device,
            label,
            &BTreeMap::new(),
            width,
            height,
            TextureFormat::Depth32F,
            true,
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }

    /// Texture behind attachment `name`. A miss means a program/target wiring
    /// mismatch and should surface at setup.
    pub fn buffer(&self, name: &str) -> Result<TextureHandle, RenderError> {
        self.attachments
            .get(name)
            .map(|&(_, texture)| texture)
            .ok_or_else(|| RenderError::MissingAttachment(name.to_string()))
    }

    /// Checks at setup that every name a later pass will sample exists.
    pub fn require(&self, names: &[&str]) -> Result<(), RenderError> {
        names.iter().try_for_each(|name| self.buffer(name).map(|_| ()))
    }

    pub fn color_attachment(&self, slot: u32) -> Option<TextureHandle> {
        self.attachments
            .values()
            .find(|(s, _)| *s == slot)
            .map(|&(_, texture)| texture)
    }

    pub fn slot(&self, name: &str) -> Option<u32> {
        self.attachments.get(name).map(|&(slot, _)| slot)
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth
    }

    /// Every texture this target writes, depth included.
    pub fn textures(&self) -> Vec<TextureHandle> {
        self.attachments
            .values()
            .map(|&(_, texture)| texture)
            .chain(self.depth)
            .collect()
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    /// Reads one depth value; forces a CPU/GPU sync.
    pub fn read_depth(&self, device: &mut dyn GraphicsDevice, x: u32, y: u32) -> Result<f32, RenderError> {
        let texels = device.read_pixels(
            Some(self.framebuffer),
            Attachment::Depth,
            Viewport::new(x as i32, y as i32, 1, 1),
        )?;
        texels
            .first()
            .copied()
            .ok_or_else(|| RenderError::Device("empty depth readback".into()))
    }

    /// Depth under the centre of the target, for focusing depth of field.
    pub fn read_center_depth(&self, device: &mut dyn GraphicsDevice) -> Result<f32, RenderError> {
        self.read_depth(device, self.width / 2, self.height / 2)
    }

    /// RGBA floats of one color attachment over `rect`.
    pub fn read_color(
        &self,
        device: &mut dyn GraphicsDevice,
        name: &str,
        rect: Viewport,
    ) -> Result<Vec<f32>, RenderError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| RenderError::MissingAttachment(name.to_string()))?;
        device.read_pixels(Some(self.framebuffer), Attachment::Color(slot), rect)
    }

    /// Fills `fb_attachments` as textures are created, so a failure part way
    /// leaves exactly the textures to release there.
    fn create_attachments(
        device: &mut dyn GraphicsDevice,
        outputs: &BTreeMap<String, u32>,
        color_desc: &TextureDesc,
        with_depth: bool,
        attachments: &mut BTreeMap<String, (u32, TextureHandle)>,
        fb_attachments: &mut Vec<FramebufferAttachment>,
    ) -> Result<Option<TextureHandle>, RenderError> {
        for (name, &slot) in outputs {
            let texture = device.create_texture(color_desc)?;
            attachments.insert(name.clone(), (slot, texture));
            fb_attachments.push(FramebufferAttachment {
                attachment: Attachment::Color(slot),
                texture,
                level: 0,
            });
        }
        if !with_depth {
            return Ok(None);
        }
        let desc = TextureDesc::new(color_desc.width, color_desc.height, TextureFormat::Depth32F)
            .with_filter(TextureFilter::Nearest);
        let texture = device.create_texture(&desc)?;
        fb_attachments.push(FramebufferAttachment {
            attachment: Attachment::Depth,
            texture,
            level: 0,
        });
        Ok(Some(texture))
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.delete_framebuffer(self.framebuffer);
        for texture in self.textures() {
            device.delete_texture(texture);
        }
    }
}

impl GpuResource for RenderTarget {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.framebuffer(self.framebuffer);
        for texture in self.textures() {
            list.texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_anonymous_attachments_and_missing_name() {
        let mut device = HeadlessDevice::new(8, 8);
        let target =
            RenderTarget::with_color_attachments(&mut device, "raymarch", 8, 8, 2, TextureFormat::Rgba8, false)
                .unwrap();
        assert!(target.buffer("color1").is_ok());
        assert_eq!(target.color_attachment(1), target.buffer("color1").ok());
        assert!(matches!(target.buffer("color2"), Err(RenderError::MissingAttachment(_))));
        assert!(target.depth_texture().is_none());
        assert!(target.require(&["color0", "color1"]).is_ok());
    }

    #[test]
    fn test_depth_only_target_clears_depth() {
        let mut device = HeadlessDevice::new(8, 8);
        let target = RenderTarget::depth_only(&mut device, "shadow", 4, 4).unwrap();
        assert_eq!(target.outputs().count(), 0);

        device.bind_framebuffer(Some(target.framebuffer()));
        device.set_clear_depth(0.75);
        device.clear(ClearFlags::DEPTH);
        assert_eq!(target.read_center_depth(&mut device).unwrap(), 0.75);
    }

    #[test]
    fn test_destroy_releases_textures() {
        let mut device = HeadlessDevice::new(8, 8);
        let target =
            RenderTarget::with_color_attachments(&mut device, "t", 8, 8, 3, TextureFormat::Rgba32F, true)
                .unwrap();
        assert_eq!(device.live_textures(), 4);
        target.destroy(&mut device);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn test_failed_attachment_releases_earlier_textures() {
        let mut device = HeadlessDevice::new(8, 8);
        device.set_texture_budget(Some(2));
        let result =
            RenderTarget::with_color_attachments(&mut device, "t", 8, 8, 3, TextureFormat::Rgba8, false);
        assert!(result.is_err());
        assert_eq!(device.live_textures(), 0);

        // the depth texture is the one that no longer fits
        device.set_texture_budget(Some(3));
        let result =
            RenderTarget::with_color_attachments(&mut device, "t", 8, 8, 3, TextureFormat::Rgba8, true);
        assert!(result.is_err());
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.poll_error(), glow::OUT_OF_MEMORY);
    }
}
