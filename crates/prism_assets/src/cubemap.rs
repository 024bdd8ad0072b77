use std::path::Path;

use glam::{Vec2, Vec3};

use crate::error::AssetError;
use crate::texture::{PixelLayout, TextureData};

/// File stems of the six faces, in GL order +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACE_NAMES: [&str; 6] = ["posx", "negx", "posy", "negy", "posz", "negz"];

/// Direction through texel coordinates `st` (each in [0, 1], t = 0 on the
/// top row) of cube face `face`.
pub fn cube_face_direction(face: usize, st: Vec2) -> Vec3 {
    let s = st.x * 2.0 - 1.0;
    let t = st.y * 2.0 - 1.0;
    let dir = match face {
        0 => Vec3::new(1.0, -t, -s),
        1 => Vec3::new(-1.0, -t, s),
        2 => Vec3::new(s, 1.0, t),
        3 => Vec3::new(s, -1.0, -t),
        4 => Vec3::new(s, -t, 1.0),
        _ => Vec3::new(-s, -t, -1.0),
    };
    dir.normalize()
}

/// Face and texel coordinates a lookup along `dir` lands on.
pub fn cube_face_lookup(dir: Vec3) -> (usize, Vec2) {
    let a = dir.abs();
    let (face, sc, tc, ma) = if a.x >= a.y && a.x >= a.z {
        if dir.x >= 0.0 {
            (0, -dir.z, -dir.y, a.x)
        } else {
            (1, dir.z, -dir.y, a.x)
        }
    } else if a.y >= a.z {
        if dir.y >= 0.0 {
            (2, dir.x, dir.z, a.y)
        } else {
            (3, dir.x, -dir.z, a.y)
        }
    } else if dir.z >= 0.0 {
        (4, dir.x, -dir.y, a.z)
    } else {
        (5, -dir.x, -dir.y, a.z)
    };
    let ma = ma.max(f32::EPSILON);
    (face, Vec2::new((sc / ma + 1.0) * 0.5, (tc / ma + 1.0) * 0.5))
}

/// Six square RGBA faces for a skybox, top row first.
#[derive(Clone, Debug)]
pub struct CubeMapData {
    pub name: String,
    pub size: u32,
    pub faces: Vec<TextureData>,
}

impl CubeMapData {
    /// Loads `posx.<ext>` .. `negz.<ext>` from `dir`. Every face must exist
    /// and all of them must share one square size.
    pub fn load_dir(dir: &Path, extension: &str) -> Result<Self, AssetError> {
        let mut faces = Vec::with_capacity(6);
        let mut size = None;
        for stem in CUBE_FACE_NAMES {
            let path = dir.join(format!("{stem}.{extension}"));
            let face = TextureData::load_top_down(&path)?;
            let expected = *size.get_or_insert(face.width);
            if face.width != face.height || face.width != expected {
                return Err(AssetError::CubeFaceSize {
                    path,
                    expected,
                    width: face.width,
                    height: face.height,
                });
            }
            faces.push(face);
        }
        log::debug!("cube map {} ({}px faces)", dir.display(), size.unwrap_or(0));
        Ok(Self {
            name: dir.display().to_string(),
            size: size.unwrap_or(0),
            faces,
        })
    }

    /// A procedural sky: `zenith` overhead fading to `horizon`, `ground` below.
    pub fn gradient(size: u32, zenith: [u8; 3], horizon: [u8; 3], ground: [u8; 3]) -> Self {
        let size = size.max(1);
        let mix = |a: [u8; 3], b: [u8; 3], f: f32| -> [u8; 3] {
            std::array::from_fn(|i| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * f).round() as u8)
        };
        let faces = (0..6)
            .map(|face| {
                let mut pixels = Vec::with_capacity((size * size * 4) as usize);
                for y in 0..size {
                    for x in 0..size {
                        let st = Vec2::new((x as f32 + 0.5) / size as f32, (y as f32 + 0.5) / size as f32);
                        let up = cube_face_direction(face, st).y;
                        let rgb = if up >= 0.0 {
                            mix(horizon, zenith, up.sqrt())
                        } else {
                            mix(horizon, ground, (-up * 4.0).min(1.0))
                        };
                        pixels.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
                    }
                }
                TextureData {
                    name: format!("sky {}", CUBE_FACE_NAMES[face]),
                    pixels,
                    width: size,
                    height: size,
                    layout: PixelLayout::Rgba8,
                }
            })
            .collect();
        Self {
            name: "gradient sky".to_string(),
            size,
            faces,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_lookup_inverts_face_direction() {
        for face in 0..6 {
            let st = Vec2::new(0.25, 0.8);
            let (found, back) = cube_face_lookup(cube_face_direction(face, st));
            assert_eq!(found, face);
            assert!((back - st).length() < 1e-5, "face {face}: {back:?}");
        }
    }

    #[test]
    fn test_gradient_is_bright_overhead_and_dark_below() {
        let sky = CubeMapData::gradient(8, [40, 90, 200], [200, 220, 240], [30, 30, 30]);
        assert_eq!(sky.faces.len(), 6);
        let centre = |face: usize| {
            let data = &sky.faces[face];
            let i = ((4 * 8 + 4) * 4) as usize;
            [data.pixels[i], data.pixels[i + 1], data.pixels[i + 2]]
        };
        // +Y looks straight up, -Y straight down
        assert!(centre(2)[2] < 220 && centre(2)[2] > 190);
        assert_eq!(centre(3), [30, 30, 30]);
    }

    #[test]
    fn test_missing_face_is_an_error() {
        let err = CubeMapData::load_dir(Path::new("no/such/sky"), "png").unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }
}
