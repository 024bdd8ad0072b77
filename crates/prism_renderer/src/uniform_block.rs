use std::collections::{BTreeMap, BTreeSet};

use crate::device::{BufferHandle, BufferKind, BufferUsage, GraphicsDevice};
use crate::error::RenderError;
use crate::reflect::BlockMember;
use crate::release::{GpuResource, ReleaseList};
use crate::shader::ShaderProgram;
use crate::uniform::UniformValue;

/// Byte layout of one uniform block, taken from a compiled program.
/// Fixed for the program's lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBlockLayout {
    pub name: String,
    pub index: u32,
    pub byte_size: u32,
    pub members: BTreeMap<String, BlockMember>,
}

impl UniformBlockLayout {
    pub fn from_program(program: &ShaderProgram, block: &str) -> Result<Self, RenderError> {
        let info = program
            .uniform_block(block)
            .ok_or_else(|| RenderError::UnknownUniformBlock {
                program: program.label().to_string(),
                block: block.to_string(),
            })?;
        Ok(Self {
            name: info.name.clone(),
            index: info.index,
            byte_size: info.byte_size,
            members: info.members.clone(),
        })
    }

    /// Layout of plain float members at explicit byte offsets.
    pub fn with_offsets(name: &str, byte_size: u32, offsets: &[(&str, u32)]) -> Self {
        let members = offsets
            .iter()
            .map(|&(member, offset)| {
                (
                    member.to_string(),
                    BlockMember {
                        glsl_type: "float".to_string(),
                        offset,
                        array_size: 1,
                        array_stride: 0,
                        matrix_stride: 0,
                    },
                )
            })
            .collect();
        Self {
            name: name.to_string(),
            index: 0,
            byte_size,
            members,
        }
    }

    pub fn member(&self, name: &str) -> Option<&BlockMember> {
        self.members.get(name)
    }

    pub fn float_len(&self) -> usize {
        self.byte_size as usize / 4
    }
}

/// CPU mirror of one uniform block. Members are written by name, then the
/// whole block is uploaded; there are no partial uploads.
pub struct UniformBlockBuffer {
    layout: UniformBlockLayout,
    data: Vec<f32>,
    buffer: Option<BufferHandle>,
}

impl UniformBlockBuffer {
    pub fn new(layout: UniformBlockLayout) -> Self {
        let data = vec![0.0; layout.float_len()];
        Self {
            layout,
            data,
            buffer: None,
        }
    }

    pub fn from_program(program: &ShaderProgram, block: &str) -> Result<Self, RenderError> {
        Ok(Self::new(UniformBlockLayout::from_program(program, block)?))
    }

    pub fn layout(&self) -> &UniformBlockLayout {
        &self.layout
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Copies `values` to the member's offset. Names the block does not
    /// declare are ignored; writes past the end are rejected whole.
    pub fn update_value(&mut self, name: &str, values: &[f32]) -> bool {
        let Some(member) = self.layout.member(name) else {
            return false;
        };
        self.write_at(member.offset, values, name)
    }

    fn write_at(&mut self, byte_offset: u32, values: &[f32], name: &str) -> bool {
        let start = byte_offset as usize / 4;
        let end = start + values.len();
        if end > self.data.len() {
            log::warn!(
                "{}.{name}: write of {} floats at {start} overflows {} floats",
                self.layout.name,
                values.len(),
                self.data.len()
            );
            return false;
        }
        self.data[start..end].copy_from_slice(values);
        true
    }

    /// Writes a typed value, following the member's matrix and array strides.
    pub fn update_uniform(&mut self, name: &str, value: &UniformValue) -> bool {
        let Some(member) = self.layout.member(name).cloned() else {
            return false;
        };

        if let (Some(columns), true) = (value.columns(), member.matrix_stride > 0) {
            let fits = member.offset as usize + columns.len() * member.matrix_stride as usize
                <= self.layout.byte_size as usize;
            if !fits {
                return self.write_at(member.offset, &value.to_floats(), name);
            }
            for (i, column) in columns.iter().enumerate() {
                let offset = member.offset + i as u32 * member.matrix_stride;
                self.write_at(offset, column, name);
            }
            return true;
        }

        if let (UniformValue::FloatArray(values), true) = (value, member.array_stride > 0) {
            let last = member.offset as usize + values.len().saturating_sub(1) * member.array_stride as usize + 4;
            if last > self.layout.byte_size as usize {
                log::warn!("{}.{name}: array write past the block end", self.layout.name);
                return false;
            }
            for (i, v) in values.iter().enumerate() {
                let offset = member.offset + i as u32 * member.array_stride;
                self.write_at(offset, &[*v], name);
            }
            return true;
        }

        self.write_at(member.offset, &value.to_floats(), name)
    }

    pub fn read(&self, name: &str, len: usize) -> Option<&[f32]> {
        let start = self.layout.member(name)?.offset as usize / 4;
        self.data.get(start..start + len)
    }

    /// Uploads the full mirror, creating the GPU buffer on first use.
    pub fn upload(&mut self, device: &mut dyn GraphicsDevice) -> Result<BufferHandle, RenderError> {
        let bytes: &[u8] = bytemuck::cast_slice(&self.data);
        match self.buffer {
            Some(buffer) => {
                device.update_buffer(buffer, bytes)?;
                Ok(buffer)
            }
            None => {
                let buffer = device.create_buffer(BufferKind::Uniform, bytes, BufferUsage::Dynamic)?;
                self.buffer = Some(buffer);
                Ok(buffer)
            }
        }
    }

    /// Binds the GPU buffer to `binding_point` (uploading first if needed).
    pub fn bind(&mut self, device: &mut dyn GraphicsDevice, binding_point: u32) -> Result<(), RenderError> {
        let buffer = match self.buffer {
            Some(buffer) => buffer,
            None => self.upload(device)?,
        };
        device.bind_uniform_buffer(binding_point, Some(buffer));
        Ok(())
    }

    /// Points `program`'s copy of this block at `binding_point`.
    pub fn attach(
        &self,
        device: &mut dyn GraphicsDevice,
        program: &ShaderProgram,
        binding_point: u32,
    ) -> Result<(), RenderError> {
        program.bind_uniform_block(device, &self.layout.name, binding_point)
    }

    pub fn delete(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.delete_buffer(buffer);
        }
    }
}

impl GpuResource for UniformBlockBuffer {
    fn collect_resources(&self, list: &mut ReleaseList) {
        if let Some(buffer) = self.buffer {
            list.buffer(buffer);
        }
    }
}

/// Hands out uniform-buffer binding points so two blocks never share one by accident.
#[derive(Debug, Default)]
pub struct BindingPoints {
    taken: BTreeSet<u32>,
}

impl BindingPoints {
    /// Claims a specific point; false if it is already taken.
    pub fn reserve(&mut self, point: u32) -> bool {
        self.taken.insert(point)
    }

    /// Lowest free point at or above `from`.
    pub fn allocate_from(&mut self, from: u32) -> u32 {
        let mut point = from;
        while self.taken.contains(&point) {
            point += 1;
        }
        self.taken.insert(point);
        point
    }

    pub fn allocate(&mut self) -> u32 {
        self.allocate_from(0)
    }

    pub fn release(&mut self, point: u32) {
        self.taken.remove(&point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    fn tree_layout() -> UniformBlockLayout {
        let (members, byte_size) = crate::reflect::std140_layout(&[
            crate::reflect::Declaration {
                glsl_type: "mat4".into(),
                name: "model".into(),
                array_size: 1,
            },
            crate::reflect::Declaration {
                glsl_type: "float".into(),
                name: "widths".into(),
                array_size: 3,
            },
        ]);
        UniformBlockLayout {
            name: "Tree".into(),
            index: 0,
            byte_size,
            members,
        }
    }

    #[test]
    fn test_absent_member_leaves_buffer_unchanged() {
        let mut block = UniformBlockBuffer::new(UniformBlockLayout::with_offsets("B", 16, &[("a", 0)]));
        block.update_value("a", &[3.0]);
        let before = block.data().to_vec();
        assert!(!block.update_value("missing", &[9.0, 9.0]));
        assert_eq!(block.data(), before.as_slice());
    }

    #[test]
    fn test_overflowing_write_is_rejected_whole() {
        let mut block = UniformBlockBuffer::new(UniformBlockLayout::with_offsets("B", 16, &[("a", 8)]));
        assert!(!block.update_value("a", &[1.0, 2.0, 3.0]));
        assert_eq!(block.data(), &[0.0; 4]);
        assert!(block.update_value("a", &[1.0, 2.0]));
        assert_eq!(block.data(), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_matrix_and_array_strides() {
        let mut block = UniformBlockBuffer::new(tree_layout());
        let model = Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0));
        assert!(block.update_uniform("model", &model.into()));
        assert_eq!(block.read("model", 16).unwrap(), &model.to_cols_array());

        assert!(block.update_uniform("widths", &vec![1.0, 2.0, 3.0].into()));
        // std140 arrays of float use a 16 byte stride
        assert_eq!(block.data()[16], 1.0);
        assert_eq!(block.data()[20], 2.0);
        assert_eq!(block.data()[24], 3.0);
    }

    #[test]
    fn test_binding_points_are_unique() {
        let mut points = BindingPoints::default();
        assert!(points.reserve(1));
        assert!(!points.reserve(1));
        assert_eq!(points.allocate(), 0);
        assert_eq!(points.allocate(), 2);
        assert_eq!(points.allocate_from(2), 3);
        points.release(2);
        assert_eq!(points.allocate(), 2);
    }
}
