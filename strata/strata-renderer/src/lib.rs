//! Strata Renderer: frame-level orchestration over the Strata RHI.
//!
//! Visible drawables are grouped per frame into [`RenderBatch`]es (kind, material, material instance,
//! mesh) so state changes happen once per group. Materials cache one pipeline per
//! (kind, pass, subpass). [`RenderNode`]s own render passes and order them by dependency level;
//! [`RenderProcess`]es chain nodes through GPU signals; the [`Renderer`] drives acquire, submit and
//! present.

pub mod batch;
pub mod config;
pub mod drawable;
pub mod error;
pub mod graph;
pub mod instance_buffer;
pub mod material;
pub mod node;
pub mod process;
pub mod renderer;
pub mod resources;
pub mod shader;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchHandle, BatchKind, LeafGroup, RenderBatch};
pub use config::RendererConfig;
pub use drawable::{
    BillboardInstance, BillboardVertex, BlitQuad, Drawable, DrawableKind, GeometryId, InstancedStaticMeshInstance,
    Mesh, MeshDrawable, SkeletalMeshInstance, SkinnedVertex, StaticMeshInstance, StaticVertex, MAX_BONES,
};
pub use error::{RenderError, Result};
pub use graph::{PassGraph, PassId};
pub use instance_buffer::InstanceBuffer;
pub use material::{
    InputScope, InputSlot, KindPipelineInfo, Material, MaterialDescriptor, MaterialHandle, MaterialInputSet,
    MaterialInstance, MaterialInstanceHandle, MaterialRegistry, PipelineKey, ShaderSource, SubpassPipelineInfo,
    SubpassState,
};
pub use node::{PassState, RenderNode, RenderPassDesc};
pub use process::RenderProcess;
pub use renderer::{FrameStatus, Renderer};
pub use resources::RenderResources;
