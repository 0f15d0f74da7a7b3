//! Pipeline permutation cache: one pipeline per (kind, pass, subpass).

use rustc_hash::FxHashMap;
use strata_rhi::{
    ColorTargetState, DepthStencilState, GraphicsPipeline, PrimitiveTopology, RasterizationState, RenderPassLayout,
    ResourceId, VertexInputDescriptor,
};

use crate::drawable::DrawableKind;

/// Identifies a cached pipeline inside one material. `pass` is the render pass layout id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub kind: DrawableKind,
    pub pass: ResourceId,
    pub subpass: u32,
}

/// Pipeline state fixed by the drawable kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindPipelineInfo {
    pub kind: DrawableKind,
    pub vertex_input: VertexInputDescriptor,
    pub topology: PrimitiveTopology,
}

impl KindPipelineInfo {
    pub fn for_kind(kind: DrawableKind) -> Self {
        Self {
            kind,
            vertex_input: kind.vertex_input(),
            topology: kind.topology(),
        }
    }
}

/// Fixed-function state a subpass imposes on every pipeline drawn inside it.
#[derive(Debug, Clone, Default)]
pub struct SubpassState {
    pub rasterization: RasterizationState,
    /// Blend state per color attachment. Missing entries default to no blending.
    pub color_targets: Vec<ColorTargetState>,
    /// Ignored when the subpass has no depth attachment.
    pub depth_stencil: Option<DepthStencilState>,
}

/// Pipeline state fixed by the target pass and subpass.
#[derive(Debug, Clone, Copy)]
pub struct SubpassPipelineInfo<'a> {
    pub render_pass: &'a dyn RenderPassLayout,
    pub subpass: u32,
    pub state: &'a SubpassState,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, Box<dyn GraphicsPipeline>>,
}

impl PipelineCache {
    /// Insert under `key`, handing back whatever was cached there before.
    pub fn insert(&mut self, key: PipelineKey, pipeline: Box<dyn GraphicsPipeline>) -> Option<Box<dyn GraphicsPipeline>> {
        self.pipelines.insert(key, pipeline)
    }

    pub fn get(&self, key: &PipelineKey) -> Option<&dyn GraphicsPipeline> {
        self.pipelines.get(key).map(|p| p.as_ref())
    }

    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.pipelines.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn invalidate_all(&mut self) -> usize {
        let count = self.pipelines.len();
        self.pipelines.clear();
        count
    }

    pub fn invalidate_pass(&mut self, pass: ResourceId) -> usize {
        let before = self.pipelines.len();
        self.pipelines.retain(|key, _| key.pass != pass);
        before - self.pipelines.len()
    }
}
