//! Drawable contract: the closed set of drawable kinds, their vertex layouts and per-instance data,
//! plus the mesh-backed and full-screen drawables the renderer ships with.

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_rhi::{
    Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, Device, IndexFormat, PrimitiveTopology,
    RenderPass, VertexAttribute, VertexBinding, VertexFormat, VertexInputDescriptor, VertexInputRate,
};

use crate::error::Result;

/// Bones addressable by one skeletal-mesh instance.
pub const MAX_BONES: usize = 100;

/// Closed set of drawable categories. The kind fixes the vertex layout and the per-instance data shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DrawableKind {
    StaticMesh,
    SkeletalMesh,
    Billboard,
    BlitQuad,
    InstancedStaticMesh,
}

impl DrawableKind {
    pub const ALL: [DrawableKind; 5] = [
        DrawableKind::StaticMesh,
        DrawableKind::SkeletalMesh,
        DrawableKind::Billboard,
        DrawableKind::BlitQuad,
        DrawableKind::InstancedStaticMesh,
    ];

    /// Size in bytes of one per-instance parameter block, before alignment.
    pub fn instance_data_size(self) -> u64 {
        let size = match self {
            DrawableKind::StaticMesh => std::mem::size_of::<StaticMeshInstance>(),
            DrawableKind::SkeletalMesh => std::mem::size_of::<SkeletalMeshInstance>(),
            DrawableKind::Billboard => std::mem::size_of::<BillboardInstance>(),
            DrawableKind::InstancedStaticMesh => std::mem::size_of::<InstancedStaticMeshInstance>(),
            DrawableKind::BlitQuad => 0,
        };
        size as u64
    }

    pub fn uses_instance_data(self) -> bool {
        self.instance_data_size() > 0
    }

    pub fn topology(self) -> PrimitiveTopology {
        match self {
            DrawableKind::BlitQuad => PrimitiveTopology::TriangleStrip,
            _ => PrimitiveTopology::TriangleList,
        }
    }

    /// Vertex buffer layout at binding 0. The blit quad generates its corners in the vertex shader.
    pub fn vertex_input(self) -> VertexInputDescriptor {
        let attribute = |location, format, offset| VertexAttribute {
            location,
            binding: 0,
            format,
            offset,
        };
        let (attributes, stride) = match self {
            DrawableKind::StaticMesh | DrawableKind::InstancedStaticMesh => (
                vec![
                    attribute(0, VertexFormat::Float32x3, 0),
                    attribute(1, VertexFormat::Float32x3, 12),
                    attribute(2, VertexFormat::Float32x2, 24),
                ],
                std::mem::size_of::<StaticVertex>(),
            ),
            DrawableKind::SkeletalMesh => (
                vec![
                    attribute(0, VertexFormat::Float32x3, 0),
                    attribute(1, VertexFormat::Float32x3, 12),
                    attribute(2, VertexFormat::Float32x2, 24),
                    attribute(3, VertexFormat::Uint32x4, 32),
                    attribute(4, VertexFormat::Float32x4, 48),
                ],
                std::mem::size_of::<SkinnedVertex>(),
            ),
            DrawableKind::Billboard => (
                vec![
                    attribute(0, VertexFormat::Float32x3, 0),
                    attribute(1, VertexFormat::Float32x2, 12),
                ],
                std::mem::size_of::<BillboardVertex>(),
            ),
            DrawableKind::BlitQuad => return VertexInputDescriptor::default(),
        };
        VertexInputDescriptor {
            attributes,
            bindings: vec![VertexBinding {
                binding: 0,
                stride: stride as u32,
                input_rate: VertexInputRate::Vertex,
            }],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct StaticVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct SkinnedVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct BillboardVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct StaticMeshInstance {
    pub mvp: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SkeletalMeshInstance {
    pub mvp: [[f32; 4]; 4],
    pub bones: [[[f32; 4]; 4]; MAX_BONES],
}

impl Default for SkeletalMeshInstance {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Billboards only need their world placement; orientation happens in the shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct BillboardInstance {
    pub position: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct InstancedStaticMeshInstance {
    pub mvp: [[f32; 4]; 4],
}

/// Identity of the geometry a drawable binds. Drawables with equal ids share one geometry bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

impl GeometryId {
    /// Drawables that bind no geometry at all.
    pub const NONE: GeometryId = GeometryId(0);
}

static NEXT_GEOMETRY_ID: AtomicU64 = AtomicU64::new(1);

/// Anything the batch can render.
pub trait Drawable: Send + Sync + fmt::Debug {
    fn kind(&self) -> DrawableKind;
    fn geometry_id(&self) -> GeometryId;
    fn bind_geometry(&self, pass: &mut dyn RenderPass);
    fn draw(&self, pass: &mut dyn RenderPass);
    /// Per-instance parameter block, at most `kind().instance_data_size()` bytes.
    fn instance_data(&self) -> &[u8];
}

/// GPU geometry shared by any number of drawables.
pub struct Mesh {
    id: GeometryId,
    vertex_buffer: Box<dyn Buffer>,
    index_buffer: Option<Box<dyn Buffer>>,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    /// Upload vertices (and optional 32-bit indices) into device-local buffers.
    pub fn new(
        device: &dyn Device,
        label: &'static str,
        vertices: &[u8],
        vertex_count: u32,
        indices: Option<&[u32]>,
    ) -> Result<Self> {
        let vertex_buffer = device.create_buffer(&BufferDescriptor {
            label: Some(label),
            size: vertices.len() as u64,
            usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            memory: BufferMemoryPreference::DeviceLocal,
        })?;
        device.upload_to_buffer(vertex_buffer.as_ref(), 0, vertices)?;
        let index_buffer = match indices {
            Some(indices) => {
                let bytes: &[u8] = bytemuck::cast_slice(indices);
                let buffer = device.create_buffer(&BufferDescriptor {
                    label: Some(label),
                    size: bytes.len() as u64,
                    usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                    memory: BufferMemoryPreference::DeviceLocal,
                })?;
                device.upload_to_buffer(buffer.as_ref(), 0, bytes)?;
                Some(buffer)
            }
            None => None,
        };
        let index_count = indices.map(|i| i.len() as u32).unwrap_or(0);
        Ok(Self::from_buffers(vertex_buffer, vertex_count, index_buffer, index_count))
    }

    pub fn from_buffers(
        vertex_buffer: Box<dyn Buffer>,
        vertex_count: u32,
        index_buffer: Option<Box<dyn Buffer>>,
        index_count: u32,
    ) -> Self {
        Self {
            id: GeometryId(NEXT_GEOMETRY_ID.fetch_add(1, Ordering::Relaxed)),
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
        }
    }

    pub fn id(&self) -> GeometryId {
        self.id
    }

    pub fn bind(&self, pass: &mut dyn RenderPass) {
        pass.set_vertex_buffer(0, self.vertex_buffer.as_ref(), 0);
        if let Some(ref index_buffer) = self.index_buffer {
            pass.set_index_buffer(index_buffer.as_ref(), 0, IndexFormat::Uint32);
        }
    }

    pub fn draw(&self, pass: &mut dyn RenderPass, instance_count: u32) {
        if self.index_buffer.is_some() {
            pass.draw_indexed(self.index_count, instance_count, 0, 0, 0);
        } else {
            pass.draw(self.vertex_count, instance_count, 0, 0);
        }
    }
}

impl fmt::Debug for Mesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mesh")
            .field("id", &self.id)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .finish()
    }
}

/// A mesh-backed drawable of one of the mesh kinds.
#[derive(Debug, Clone)]
pub struct MeshDrawable {
    kind: DrawableKind,
    mesh: Arc<Mesh>,
    instance_count: u32,
    instance: Vec<u8>,
}

impl MeshDrawable {
    fn new<T: Pod>(kind: DrawableKind, mesh: Arc<Mesh>, instance_count: u32, data: &T) -> Self {
        Self {
            kind,
            mesh,
            instance_count,
            instance: bytemuck::bytes_of(data).to_vec(),
        }
    }

    pub fn static_mesh(mesh: Arc<Mesh>, data: StaticMeshInstance) -> Self {
        Self::new(DrawableKind::StaticMesh, mesh, 1, &data)
    }

    pub fn skeletal_mesh(mesh: Arc<Mesh>, data: &SkeletalMeshInstance) -> Self {
        Self::new(DrawableKind::SkeletalMesh, mesh, 1, data)
    }

    pub fn billboard(mesh: Arc<Mesh>, data: BillboardInstance) -> Self {
        Self::new(DrawableKind::Billboard, mesh, 1, &data)
    }

    /// `instance_count` copies of the mesh in one draw; the shader offsets them by instance index.
    pub fn instanced_static_mesh(mesh: Arc<Mesh>, data: InstancedStaticMeshInstance, instance_count: u32) -> Self {
        Self::new(DrawableKind::InstancedStaticMesh, mesh, instance_count.max(1), &data)
    }

    /// Replace the per-instance block (e.g. a new transform for this frame).
    pub fn set_instance_data<T: Pod>(&mut self, data: &T) {
        self.instance.clear();
        self.instance.extend_from_slice(bytemuck::bytes_of(data));
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }
}

impl Drawable for MeshDrawable {
    fn kind(&self) -> DrawableKind {
        self.kind
    }

    fn geometry_id(&self) -> GeometryId {
        self.mesh.id()
    }

    fn bind_geometry(&self, pass: &mut dyn RenderPass) {
        self.mesh.bind(pass);
    }

    fn draw(&self, pass: &mut dyn RenderPass) {
        self.mesh.draw(pass, self.instance_count);
    }

    fn instance_data(&self) -> &[u8] {
        &self.instance
    }
}

/// Full-screen quad drawn as a 4-vertex strip with no vertex buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlitQuad;

impl Drawable for BlitQuad {
    fn kind(&self) -> DrawableKind {
        DrawableKind::BlitQuad
    }

    fn geometry_id(&self) -> GeometryId {
        GeometryId::NONE
    }

    fn bind_geometry(&self, _pass: &mut dyn RenderPass) {}

    fn draw(&self, pass: &mut dyn RenderPass) {
        pass.draw(4, 1, 0, 0);
    }

    fn instance_data(&self) -> &[u8] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_sizes() {
        assert_eq!(DrawableKind::StaticMesh.instance_data_size(), 64);
        assert_eq!(DrawableKind::SkeletalMesh.instance_data_size(), 64 + 64 * MAX_BONES as u64);
        assert_eq!(DrawableKind::BlitQuad.instance_data_size(), 0);
        assert!(!DrawableKind::BlitQuad.uses_instance_data());
    }

    #[test]
    fn vertex_layouts_match_vertex_structs() {
        let skinned = DrawableKind::SkeletalMesh.vertex_input();
        assert_eq!(skinned.bindings[0].stride as usize, std::mem::size_of::<SkinnedVertex>());
        assert_eq!(skinned.attributes.len(), 5);
        assert_eq!(
            DrawableKind::StaticMesh.vertex_input(),
            DrawableKind::InstancedStaticMesh.vertex_input()
        );
        assert!(DrawableKind::BlitQuad.vertex_input().bindings.is_empty());
        assert_eq!(DrawableKind::BlitQuad.topology(), PrimitiveTopology::TriangleStrip);
    }
}
