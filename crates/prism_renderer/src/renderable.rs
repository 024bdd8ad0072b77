use glam::Mat4;
use prism_assets::{BoundingBox, MeshData};

use crate::device::*;
use crate::error::RenderError;
use crate::release::{GpuResource, ReleaseList};

/// Attribute locations shared by every shader in `resources/shaders`.
pub mod location {
    pub const POSITION: u32 = 0;
    pub const UV: u32 = 1;
    pub const NORMAL: u32 = 2;
    pub const TANGENT: u32 = 3;
    /// First of four vec4 columns of a per-instance model matrix.
    pub const INSTANCE_MODEL: u32 = 4;
}

/// (location, components, divisor) of one enabled attribute.
pub type AttributeLayout = (u32, u32, u32);

/// Something a render pass can draw.
pub trait Renderable: GpuResource {
    fn label(&self) -> &str;

    fn bind(&self, device: &mut dyn GraphicsDevice);

    fn unbind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_vertex_array(None);
    }

    fn draw(&self, device: &mut dyn GraphicsDevice);

    /// One submission with multiplicity `instances`.
    fn draw_instanced(&self, device: &mut dyn GraphicsDevice, instances: u32);

    /// True when per-instance data exists, either as divisor-1 attributes or
    /// looked up by `gl_InstanceID` from a uniform block.
    fn supports_instancing(&self) -> bool {
        false
    }

    /// Enabled attributes, sorted by location. Instanced passes require all
    /// their renderables to agree on this.
    fn vertex_layout(&self) -> Vec<AttributeLayout> {
        Vec::new()
    }
}

/// A mesh uploaded to the GPU, one buffer per attribute stream.
pub struct Mesh {
    label: String,
    vertex_array: VertexArrayHandle,
    buffers: Vec<BufferHandle>,
    attributes: Vec<VertexAttribute>,
    index_count: u32,
    primitive: Primitive,
    bounds: Option<BoundingBox>,
    instanced_by_id: bool,
}

impl Mesh {
    pub fn upload(device: &mut dyn GraphicsDevice, data: &MeshData) -> Result<Self, RenderError> {
        if data.positions.is_empty() || data.indices.is_empty() {
            return Err(prism_assets::AssetError::Empty(data.name.clone().into()).into());
        }
        let mut data = data.clone();
        data.fill_missing_attributes();

        let mut buffers = Vec::new();
        let mut attributes = Vec::new();
        let streams: [(u32, u32, &[u8]); 3] = [
            (location::POSITION, 3, bytemuck::cast_slice(&data.positions)),
            (location::UV, 2, bytemuck::cast_slice(&data.uvs)),
            (location::NORMAL, 3, bytemuck::cast_slice(&data.normals)),
        ];
        let tangents: Option<(u32, u32, &[u8])> = (data.tangents.len() == data.positions.len())
            .then(|| (location::TANGENT, 3, bytemuck::cast_slice(&data.tangents)));

        for (location, components, bytes) in streams.into_iter().chain(tangents) {
            let buffer = device.create_buffer(BufferKind::Vertex, bytes, BufferUsage::Static)?;
            buffers.push(buffer);
            attributes.push(VertexAttribute {
                location,
                buffer,
                components,
                stride: 0,
                offset: 0,
                divisor: 0,
            });
        }

        let index_buffer = device.create_buffer(
            BufferKind::Index,
            bytemuck::cast_slice(&data.indices),
            BufferUsage::Static,
        )?;
        buffers.push(index_buffer);
        let vertex_array = device.create_vertex_array(&attributes, Some(index_buffer))?;

        Ok(Self {
            label: data.name.clone(),
            vertex_array,
            buffers,
            attributes,
            index_count: data.indices.len() as u32,
            primitive: Primitive::Triangles,
            bounds: data.bounding_box(),
            instanced_by_id: false,
        })
    }

    /// Overrides the primitive, e.g. `Patches(n)` for tessellated meshes.
    pub fn with_primitive(mut self, primitive: Primitive) -> Self {
        self.primitive = primitive;
        self
    }

    /// Per-instance data comes from a uniform block indexed by `gl_InstanceID`.
    pub fn instanced_by_id(mut self) -> Self {
        self.instanced_by_id = true;
        self
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.bounds
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_array(&self) -> VertexArrayHandle {
        self.vertex_array
    }

    fn call(&self, instances: Option<u32>) -> DrawCall {
        DrawCall {
            primitive: self.primitive,
            first: 0,
            count: self.index_count,
            indexed: true,
            instances,
        }
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.delete_vertex_array(self.vertex_array);
        for buffer in self.buffers {
            device.delete_buffer(buffer);
        }
    }
}

fn layout_of(attributes: &[VertexAttribute]) -> Vec<AttributeLayout> {
    let mut layout: Vec<_> = attributes
        .iter()
        .map(|a| (a.location, a.components, a.divisor))
        .collect();
    layout.sort_unstable();
    layout
}

impl GpuResource for Mesh {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.vertex_array(self.vertex_array);
        for &buffer in &self.buffers {
            list.buffer(buffer);
        }
    }
}

impl Renderable for Mesh {
    fn label(&self) -> &str {
        &self.label
    }

    fn bind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_vertex_array(Some(self.vertex_array));
    }

    fn draw(&self, device: &mut dyn GraphicsDevice) {
        device.draw(&self.call(None));
    }

    fn draw_instanced(&self, device: &mut dyn GraphicsDevice, instances: u32) {
        device.draw(&self.call(Some(instances)));
    }

    fn supports_instancing(&self) -> bool {
        self.instanced_by_id || self.attributes.iter().any(|a| a.divisor > 0)
    }

    fn vertex_layout(&self) -> Vec<AttributeLayout> {
        layout_of(&self.attributes)
    }
}

/// A mesh plus a per-instance `mat4` stream at locations 4..7 (divisor 1).
pub struct InstancedMesh {
    mesh: Mesh,
    instance_buffer: BufferHandle,
    instance_count: u32,
}

impl InstancedMesh {
    pub fn new(
        device: &mut dyn GraphicsDevice,
        data: &MeshData,
        transforms: &[Mat4],
    ) -> Result<Self, RenderError> {
        let mut mesh = Mesh::upload(device, data)?;
        let instance_buffer = device.create_buffer(
            BufferKind::Vertex,
            bytemuck::cast_slice(transforms),
            BufferUsage::Dynamic,
        )?;

        let columns: Vec<VertexAttribute> = (0..4)
            .map(|column| VertexAttribute {
                location: location::INSTANCE_MODEL + column,
                buffer: instance_buffer,
                components: 4,
                stride: 64,
                offset: column * 16,
                divisor: 1,
            })
            .collect();
        device.add_vertex_attributes(mesh.vertex_array, &columns)?;
        mesh.attributes.extend(columns);
        mesh.label = format!("{} x{}", mesh.label, transforms.len());

        Ok(Self {
            mesh,
            instance_buffer,
            instance_count: transforms.len() as u32,
        })
    }

    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Replaces all instance transforms.
    pub fn update_instances(
        &mut self,
        device: &mut dyn GraphicsDevice,
        transforms: &[Mat4],
    ) -> Result<(), RenderError> {
        device.update_buffer(self.instance_buffer, bytemuck::cast_slice(transforms))?;
        self.instance_count = transforms.len() as u32;
        Ok(())
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.delete_buffer(self.instance_buffer);
        self.mesh.destroy(device);
    }
}

impl GpuResource for InstancedMesh {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.buffer(self.instance_buffer);
        self.mesh.collect_resources(list);
    }
}

impl Renderable for InstancedMesh {
    fn label(&self) -> &str {
        self.mesh.label()
    }

    fn bind(&self, device: &mut dyn GraphicsDevice) {
        self.mesh.bind(device);
    }

    /// Draws every stored instance.
    fn draw(&self, device: &mut dyn GraphicsDevice) {
        self.mesh.draw_instanced(device, self.instance_count);
    }

    /// Never reads past the stored transforms: larger counts are clamped.
    fn draw_instanced(&self, device: &mut dyn GraphicsDevice, instances: u32) {
        if instances > self.instance_count {
            log::warn!(
                "{}: {instances} instances requested, {} stored",
                self.label(),
                self.instance_count
            );
        }
        self.mesh.draw_instanced(device, instances.min(self.instance_count));
    }

    fn supports_instancing(&self) -> bool {
        true
    }

    fn vertex_layout(&self) -> Vec<AttributeLayout> {
        self.mesh.vertex_layout()
    }
}

/// Screen-filling quad as a 4-vertex triangle strip; uv at location 1.
pub struct Quad {
    vertex_array: VertexArrayHandle,
    buffers: [BufferHandle; 2],
}

impl Quad {
    pub fn new(device: &mut dyn GraphicsDevice) -> Result<Self, RenderError> {
        let positions: [[f32; 3]; 4] = [
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [-1.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let uvs: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];

        let position_buffer =
            device.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&positions), BufferUsage::Static)?;
        let uv_buffer =
            device.create_buffer(BufferKind::Vertex, bytemuck::cast_slice(&uvs), BufferUsage::Static)?;
        let vertex_array = device.create_vertex_array(
            &[
                VertexAttribute {
                    location: location::POSITION,
                    buffer: position_buffer,
                    components: 3,
                    stride: 0,
                    offset: 0,
                    divisor: 0,
                },
                VertexAttribute {
                    location: location::UV,
                    buffer: uv_buffer,
                    components: 2,
                    stride: 0,
                    offset: 0,
                    divisor: 0,
                },
            ],
            None,
        )?;
        Ok(Self {
            vertex_array,
            buffers: [position_buffer, uv_buffer],
        })
    }

    fn call(instances: Option<u32>) -> DrawCall {
        DrawCall {
            primitive: Primitive::TriangleStrip,
            first: 0,
            count: 4,
            indexed: false,
            instances,
        }
    }

    pub fn destroy(self, device: &mut dyn GraphicsDevice) {
        device.delete_vertex_array(self.vertex_array);
        for buffer in self.buffers {
            device.delete_buffer(buffer);
        }
    }
}

impl GpuResource for Quad {
    fn collect_resources(&self, list: &mut ReleaseList) {
        list.vertex_array(self.vertex_array);
        for &buffer in &self.buffers {
            list.buffer(buffer);
        }
    }
}

impl Renderable for Quad {
    fn label(&self) -> &str {
        "quad"
    }

    fn bind(&self, device: &mut dyn GraphicsDevice) {
        device.bind_vertex_array(Some(self.vertex_array));
    }

    fn draw(&self, device: &mut dyn GraphicsDevice) {
        device.draw(&Self::call(None));
    }

    fn draw_instanced(&self, device: &mut dyn GraphicsDevice, instances: u32) {
        device.draw(&Self::call(Some(instances)));
    }

    fn vertex_layout(&self) -> Vec<AttributeLayout> {
        vec![(location::POSITION, 3, 0), (location::UV, 2, 0)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn test_mesh_upload_layout() {
        let mut device = HeadlessDevice::new(2, 2);
        let mesh = Mesh::upload(&mut device, &MeshData::cube(1.0)).unwrap();
        assert_eq!(mesh.index_count(), 36);
        assert!(!mesh.supports_instancing());
        assert_eq!(
            mesh.vertex_layout(),
            vec![(0, 3, 0), (1, 2, 0), (2, 3, 0), (3, 3, 0)]
        );
    }

    #[test]
    fn test_instanced_mesh_adds_matrix_columns() {
        let mut device = HeadlessDevice::new(2, 2);
        let transforms = vec![Mat4::IDENTITY; 5];
        let mesh = InstancedMesh::new(&mut device, &MeshData::cube(1.0), &transforms).unwrap();
        assert!(mesh.supports_instancing());
        let layout = mesh.vertex_layout();
        assert_eq!(&layout[4..], &[(4, 4, 1), (5, 4, 1), (6, 4, 1), (7, 4, 1)]);
        assert_eq!(mesh.instance_count(), 5);
    }

    #[test]
    fn test_instance_count_is_clamped_to_stored_transforms() {
        let mut device = HeadlessDevice::new(2, 2);
        let mesh = InstancedMesh::new(&mut device, &MeshData::cube(1.0), &[Mat4::IDENTITY; 3]).unwrap();
        mesh.bind(&mut device);
        mesh.draw_instanced(&mut device, 10);
        mesh.draw_instanced(&mut device, 2);
        let counts: Vec<_> = device.draw_log().iter().map(|d| d.instances).collect();
        assert_eq!(counts, vec![Some(3), Some(2)]);
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let mut device = HeadlessDevice::new(2, 2);
        assert!(Mesh::upload(&mut device, &MeshData::default()).is_err());
    }
}
