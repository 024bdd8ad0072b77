use std::collections::BTreeMap;
use std::path::Path;

use prism_assets::{CubeMapData, PixelLayout, TextureData, TextureKind};

use crate::device::{GraphicsDevice, TexelData, TextureDesc, TextureFormat, TextureHandle, TextureWrap};
use crate::error::RenderError;

/// Number of levels in a full mip chain down to 1x1.
pub fn full_mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn upload_texture_data(
    device: &mut dyn GraphicsDevice,
    data: &TextureData,
    mipmaps: bool,
) -> Result<TextureHandle, RenderError> {
    let format = match data.layout {
        PixelLayout::Rgba8 => TextureFormat::Rgba8,
        PixelLayout::Gray8 => TextureFormat::R8,
    };
    let levels = if mipmaps {
        full_mip_levels(data.width, data.height)
    } else {
        1
    };
    let desc = TextureDesc::new(data.width, data.height, format)
        .with_mip_levels(levels)
        .with_wrap(TextureWrap::Repeat);
    let texture = device.create_texture(&desc)?;
    device.upload_texture(texture, 0, TexelData::U8(&data.pixels))?;
    if levels > 1 {
        device.generate_mipmaps(texture);
    }
    Ok(texture)
}

/// Uploads six RGBA faces as one cube map, faces top row first.
pub fn upload_cube_map(device: &mut dyn GraphicsDevice, data: &CubeMapData) -> Result<TextureHandle, RenderError> {
    let texture = device.create_texture(&TextureDesc::cube_map(data.size, TextureFormat::Rgba8))?;
    for (face, face_data) in data.faces.iter().enumerate() {
        if face_data.layout != PixelLayout::Rgba8 {
            device.delete_texture(texture);
            return Err(RenderError::Device(format!("{}: cube faces must be RGBA", face_data.name)));
        }
        if let Err(err) = device.upload_cube_face(texture, face as u32, TexelData::U8(&face_data.pixels)) {
            device.delete_texture(texture);
            return Err(err);
        }
    }
    log::debug!("cube map {} uploaded ({}px)", data.name, data.size);
    Ok(texture)
}

pub fn load_texture(device: &mut dyn GraphicsDevice, path: &Path) -> Result<TextureHandle, RenderError> {
    let data = TextureData::load(path)?;
    upload_texture_data(device, &data, true)
}

/// Uploads every texture a material references. Files that fail to load are
/// skipped with a warning; the material then renders untextured.
pub fn load_material_textures(
    device: &mut dyn GraphicsDevice,
    paths: &BTreeMap<TextureKind, std::path::PathBuf>,
) -> BTreeMap<TextureKind, TextureHandle> {
    let mut textures = BTreeMap::new();
    for (&kind, path) in paths {
        match load_texture(device, path) {
            Ok(texture) => {
                textures.insert(kind, texture);
            }
            Err(err) => log::warn!("skipping {kind:?} texture: {err}"),
        }
    }
    textures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_mip_chain_length() {
        assert_eq!(full_mip_levels(1, 1), 1);
        assert_eq!(full_mip_levels(512, 512), 10);
        assert_eq!(full_mip_levels(800, 600), 10);
    }

    #[test]
    fn test_checkerboard_upload_is_mipmapped() {
        let mut device = HeadlessDevice::new(1, 1);
        let texture = upload_texture_data(&mut device, &TextureData::checkerboard(4, 1), true).unwrap();
        assert_eq!(device.texture_desc(texture).unwrap().mip_levels, 3);
        // alternating 230/40 averages out one level down
        let level1 = device.texels(texture, 1).unwrap();
        assert!((level1[0][0] - (230.0 + 40.0) / 2.0 / 255.0).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_sky_uploads_all_faces() {
        let mut device = HeadlessDevice::new(1, 1);
        let sky = CubeMapData::gradient(4, [0, 0, 255], [255, 255, 255], [0, 0, 0]);
        let texture = upload_cube_map(&mut device, &sky).unwrap();
        assert!(device.texture_desc(texture).unwrap().is_cube_map());
        // straight down is the ground colour
        let down = device.cube_face_texels(texture, 3).unwrap();
        assert_eq!(down[(2 * 4 + 2) as usize], [0.0, 0.0, 0.0, 1.0]);
        let up = device.cube_face_texels(texture, 2).unwrap();
        assert!(up[(2 * 4 + 2) as usize][2] > 0.99);
    }

    #[test]
    fn test_missing_material_texture_is_skipped() {
        let mut device = HeadlessDevice::new(1, 1);
        let paths = BTreeMap::from([(TextureKind::Diffuse, "missing.png".into())]);
        assert!(load_material_textures(&mut device, &paths).is_empty());
    }
}
