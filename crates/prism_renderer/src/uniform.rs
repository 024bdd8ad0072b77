use glam::{IVec2, Mat3, Mat4, Vec2, Vec3, Vec4};

/// A value for a plain (non-block) uniform.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    IVec2(IVec2),
    Mat3(Mat3),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
}

impl UniformValue {
    /// Column-major floats, as they are laid out in a uniform buffer.
    pub fn to_floats(&self) -> Vec<f32> {
        match self {
            Self::Float(v) => vec![*v],
            Self::Int(v) => vec![*v as f32],
            Self::UInt(v) => vec![*v as f32],
            Self::Vec2(v) => v.to_array().to_vec(),
            Self::Vec3(v) => v.to_array().to_vec(),
            Self::Vec4(v) => v.to_array().to_vec(),
            Self::IVec2(v) => vec![v.x as f32, v.y as f32],
            Self::Mat3(m) => m.to_cols_array().to_vec(),
            Self::Mat4(m) => m.to_cols_array().to_vec(),
            Self::FloatArray(values) => values.clone(),
        }
    }

    /// Matrix columns; `None` for non-matrix values.
    pub fn columns(&self) -> Option<Vec<Vec<f32>>> {
        match self {
            Self::Mat3(m) => Some(
                [m.x_axis, m.y_axis, m.z_axis]
                    .iter()
                    .map(|c| c.to_array().to_vec())
                    .collect(),
            ),
            Self::Mat4(m) => Some(
                [m.x_axis, m.y_axis, m.z_axis, m.w_axis]
                    .iter()
                    .map(|c| c.to_array().to_vec())
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => Some(*v as i32),
            _ => None,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_from!(
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    IVec2 => IVec2,
    Mat3 => Mat3,
    Mat4 => Mat4,
    Vec<f32> => FloatArray,
);

impl From<&[f32]> for UniformValue {
    fn from(value: &[f32]) -> Self {
        Self::FloatArray(value.to_vec())
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        Self::Int(value as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrices_flatten_column_major() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let floats = UniformValue::from(m).to_floats();
        assert_eq!(&floats[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(UniformValue::from(m).columns().unwrap().len(), 4);
    }

    #[test]
    fn test_bool_becomes_int() {
        assert_eq!(UniformValue::from(true), UniformValue::Int(1));
        assert_eq!(UniformValue::from(false).as_int(), Some(0));
    }
}
