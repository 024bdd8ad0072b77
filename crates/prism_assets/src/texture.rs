use std::path::Path;

use crate::error::AssetError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgba8, // Standard 32-bit color (0-255)
    Gray8, // Single channel masks
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// Decoded image in host memory, rows bottom-up as OpenGL expects.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl TextureData {
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        // OpenGL's first row is the bottom one
        Self::decode(path, true)
    }

    /// Keeps the file's row order; cube map faces are addressed top row first.
    pub fn load_top_down(path: &Path) -> Result<Self, AssetError> {
        Self::decode(path, false)
    }

    fn decode(path: &Path, flip: bool) -> Result<Self, AssetError> {
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()));
        }
        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let img = if flip { img.flipv() } else { img }.to_rgba8();
        let (width, height) = img.dimensions();
        log::debug!("decoded {} ({width}x{height})", path.display());

        Ok(Self {
            name: path.display().to_string(),
            width,
            height,
            pixels: img.into_raw(),
            layout: PixelLayout::Rgba8,
        })
    }

    /// Two-tone checkerboard; stand-in when an optional image is missing.
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let bright = ((x / cell) + (y / cell)) % 2 == 0;
                let v = if bright { 230 } else { 40 };
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Self {
            name: "checkerboard".to_string(),
            pixels,
            width: size,
            height: size,
            layout: PixelLayout::Rgba8,
        }
    }

    /// 1x1 texture of a single color.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            name: "solid".to_string(),
            pixels: rgba.to_vec(),
            width: 1,
            height: 1,
            layout: PixelLayout::Rgba8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_alternates() {
        let tex = TextureData::checkerboard(4, 2);
        assert_eq!(tex.pixels.len(), 4 * 4 * 4);
        assert_eq!(tex.pixels[0], 230);
        // texel (2, 0) is in the next cell
        assert_eq!(tex.pixels[2 * 4], 40);
        // texel (2, 2) is back to bright
        assert_eq!(tex.pixels[(2 * 4 + 2) * 4], 230);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = TextureData::load(Path::new("no/such/image.png")).unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }
}
