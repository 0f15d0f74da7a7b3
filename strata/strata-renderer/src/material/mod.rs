//! Materials: a shader program family, its three input scopes and its pipeline permutation cache.

mod input;
mod instance;
mod pipeline;
mod registry;

pub use input::{InputScope, InputSlot, MaterialInputSet};
pub use instance::MaterialInstance;
pub use pipeline::{KindPipelineInfo, PipelineKey, SubpassPipelineInfo, SubpassState};
pub use registry::{MaterialHandle, MaterialInstanceHandle, MaterialRegistry};

use log::debug;
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::PathBuf;
use strata_rhi::{
    Buffer, ColorTargetState, Device, GraphicsPipelineDescriptor, RenderPass, ResourceId, ShaderStage, ShaderStages,
};

use crate::drawable::DrawableKind;
use crate::error::{RenderError, Result};
use crate::shader::load_spirv;
use pipeline::PipelineCache;

/// Where a shader stage's SPIR-V comes from.
#[derive(Debug, Clone)]
pub enum ShaderSource {
    Path(PathBuf),
    SpirV(Vec<u8>),
}

impl ShaderSource {
    fn load(&self) -> Result<Vec<u8>> {
        match self {
            ShaderSource::Path(path) => load_spirv(path),
            ShaderSource::SpirV(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Everything needed to create a [`Material`].
#[derive(Debug, Clone)]
pub struct MaterialDescriptor {
    pub label: Option<&'static str>,
    pub vertex_shader: ShaderSource,
    pub vertex_entry: String,
    pub fragment_shader: Option<ShaderSource>,
    pub fragment_entry: String,
    pub global_inputs: Vec<InputSlot>,
    pub local_inputs: Vec<InputSlot>,
    /// Kinds the material can draw, with extra per-kind slots. Kinds with per-instance data get an
    /// instance data slot at binding 0 unless one is listed.
    pub kinds: Vec<(DrawableKind, Vec<InputSlot>)>,
}

impl MaterialDescriptor {
    pub fn new(label: &'static str, vertex_shader: ShaderSource, fragment_shader: ShaderSource) -> Self {
        Self {
            label: Some(label),
            vertex_shader,
            vertex_entry: "main".to_string(),
            fragment_shader: Some(fragment_shader),
            fragment_entry: "main".to_string(),
            global_inputs: Vec::new(),
            local_inputs: Vec::new(),
            kinds: Vec::new(),
        }
    }

    pub fn with_entry_points(mut self, vertex: &str, fragment: &str) -> Self {
        self.vertex_entry = vertex.to_string();
        self.fragment_entry = fragment.to_string();
        self
    }

    pub fn with_global_input(mut self, slot: InputSlot) -> Self {
        self.global_inputs.push(slot);
        self
    }

    pub fn with_local_input(mut self, slot: InputSlot) -> Self {
        self.local_inputs.push(slot);
        self
    }

    pub fn with_kind(self, kind: DrawableKind) -> Self {
        self.with_kind_inputs(kind, Vec::new())
    }

    pub fn with_kind_inputs(mut self, kind: DrawableKind, slots: Vec<InputSlot>) -> Self {
        self.kinds.push((kind, slots));
        self
    }
}

pub struct Material {
    label: Option<&'static str>,
    vertex_spirv: Vec<u8>,
    vertex_entry: String,
    fragment_spirv: Option<Vec<u8>>,
    fragment_entry: String,
    global: MaterialInputSet,
    local: MaterialInputSet,
    kinds: FxHashMap<DrawableKind, MaterialInputSet>,
    pipelines: PipelineCache,
}

impl Material {
    /// Load both shader stages and allocate every input scope. Failure here is fatal for the material.
    pub fn new(device: &dyn Device, desc: &MaterialDescriptor, per_kind_set_capacity: u32) -> Result<Self> {
        let vertex_spirv = desc.vertex_shader.load()?;
        let fragment_spirv = desc.fragment_shader.as_ref().map(ShaderSource::load).transpose()?;
        let global = MaterialInputSet::new(device, InputScope::Global, desc.global_inputs.clone(), 1)?;
        let local = MaterialInputSet::new(device, InputScope::Local, desc.local_inputs.clone(), 1)?;
        let mut kinds = FxHashMap::default();
        for (kind, extra) in &desc.kinds {
            let mut slots = extra.clone();
            let has_instance_slot = slots.iter().any(|s| matches!(s, InputSlot::InstanceData { .. }));
            if kind.uses_instance_data() && !has_instance_slot {
                slots.insert(
                    0,
                    InputSlot::InstanceData {
                        binding: 0,
                        stages: ShaderStages::VERTEX,
                    },
                );
            }
            let set = MaterialInputSet::new(device, InputScope::PerKind, slots, per_kind_set_capacity)?;
            kinds.insert(*kind, set);
        }
        Ok(Self {
            label: desc.label,
            vertex_spirv,
            vertex_entry: desc.vertex_entry.clone(),
            fragment_spirv,
            fragment_entry: desc.fragment_entry.clone(),
            global,
            local,
            kinds,
            pipelines: PipelineCache::default(),
        })
    }

    pub fn supports_kind(&self, kind: DrawableKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    fn kind_inputs(&self, kind: DrawableKind) -> Result<&MaterialInputSet> {
        self.kinds.get(&kind).ok_or(RenderError::MissingKindInputs { kind })
    }

    /// Build the pipeline for (kind, pass, subpass) and cache it. A pipeline already cached under the
    /// same key is replaced and destroyed; it must not be in use by the GPU.
    pub fn set_material_valid_for(
        &mut self,
        device: &dyn Device,
        kind: &KindPipelineInfo,
        subpass: &SubpassPipelineInfo<'_>,
    ) -> Result<()> {
        let kind_inputs = self.kind_inputs(kind.kind)?;
        let render_pass = subpass.render_pass;
        let color_count = render_pass.color_attachment_count(subpass.subpass) as usize;
        let mut color_targets = subpass.state.color_targets.clone();
        color_targets.resize(color_count, ColorTargetState::default());
        let desc = GraphicsPipelineDescriptor {
            label: self.label,
            vertex_shader: ShaderStage {
                source: self.vertex_spirv.clone(),
                entry_point: self.vertex_entry.clone(),
            },
            fragment_shader: self.fragment_spirv.as_ref().map(|source| ShaderStage {
                source: source.clone(),
                entry_point: self.fragment_entry.clone(),
            }),
            vertex_input: kind.vertex_input.clone(),
            primitive_topology: kind.topology,
            rasterization: subpass.state.rasterization.clone(),
            color_targets,
            depth_stencil: subpass.state.depth_stencil.clone(),
            set_layouts: vec![
                self.global.bindings().to_vec(),
                self.local.bindings().to_vec(),
                kind_inputs.bindings().to_vec(),
            ],
        };
        let pipeline = device.create_graphics_pipeline(&desc, render_pass, subpass.subpass)?;
        let key = PipelineKey {
            kind: kind.kind,
            pass: render_pass.id(),
            subpass: subpass.subpass,
        };
        match self.pipelines.insert(key, pipeline) {
            Some(old) => {
                debug!("material {:?}: replaced pipeline for {:?}", self.label, key);
                drop(old);
            }
            None => debug!("material {:?}: cached pipeline for {:?}", self.label, key),
        }
        Ok(())
    }

    pub fn has_pipeline(&self, key: &PipelineKey) -> bool {
        self.pipelines.contains(key)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Drop every cached pipeline (swapchain recreation).
    pub fn invalidate_pipelines(&mut self) {
        let dropped = self.pipelines.invalidate_all();
        if dropped > 0 {
            debug!("material {:?}: invalidated {} pipelines", self.label, dropped);
        }
    }

    pub fn invalidate_pass(&mut self, pass: ResourceId) {
        let dropped = self.pipelines.invalidate_pass(pass);
        if dropped > 0 {
            debug!("material {:?}: invalidated {} pipelines of pass {}", self.label, dropped, pass);
        }
    }

    /// Register `buffer` as a source of per-instance data for `kind`.
    pub fn ensure_instance_binding(&mut self, kind: DrawableKind, buffer: &dyn Buffer, range: u64) -> Result<()> {
        let inputs = self.kinds.get_mut(&kind).ok_or(RenderError::MissingKindInputs { kind })?;
        if inputs.has_instance_slot() {
            inputs.ensure_instance_buffer(buffer, range)?;
        }
        Ok(())
    }

    pub fn cmd_bind_pipeline(&self, pass: &mut dyn RenderPass, key: &PipelineKey) -> Result<()> {
        let pipeline = self.pipelines.get(key).ok_or(RenderError::MissingPipeline {
            kind: key.kind,
            pass: key.pass,
            subpass: key.subpass,
        })?;
        pass.set_pipeline(pipeline);
        Ok(())
    }

    pub fn cmd_bind_global_uniforms(&self, pass: &mut dyn RenderPass) {
        if let Some(set) = self.global.descriptor_set(None) {
            pass.bind_descriptor_set(InputScope::Global.set_index(), set, &[]);
        }
    }

    pub fn cmd_bind_local_uniforms(&self, pass: &mut dyn RenderPass) {
        if let Some(set) = self.local.descriptor_set(None) {
            pass.bind_descriptor_set(InputScope::Local.set_index(), set, &[]);
        }
    }

    /// Bind the per-kind set for one drawable, addressing its block at `offset` inside `buffer`.
    pub fn cmd_bind_renderable_uniforms(
        &self,
        pass: &mut dyn RenderPass,
        kind: DrawableKind,
        buffer: Option<ResourceId>,
        offset: u32,
    ) -> Result<()> {
        let inputs = self.kind_inputs(kind)?;
        if !inputs.has_instance_slot() {
            if let Some(set) = inputs.descriptor_set(None) {
                pass.bind_descriptor_set(InputScope::PerKind.set_index(), set, &[]);
            }
            return Ok(());
        }
        let set = inputs.descriptor_set(buffer).ok_or_else(|| {
            RenderError::InvalidInputs(format!("no per-kind set registered for {:?} instance buffer", kind))
        })?;
        pass.bind_descriptor_set(InputScope::PerKind.set_index(), set, &[offset]);
        Ok(())
    }

    pub fn global_inputs_mut(&mut self) -> &mut MaterialInputSet {
        &mut self.global
    }

    pub fn local_inputs(&self) -> &MaterialInputSet {
        &self.local
    }

    pub fn local_inputs_mut(&mut self) -> &mut MaterialInputSet {
        &mut self.local
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("label", &self.label)
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{color_pass, commands_of, test_descriptor, Command, MockDevice};

    #[test]
    fn pipeline_cache_keeps_one_pipeline_per_key() {
        let device = MockDevice::new();
        let log = device.log();
        let mut material = Material::new(&device, &test_descriptor(), 4).unwrap();
        let pass = device.create_render_pass_layout(&color_pass()).unwrap();
        let state = SubpassState::default();
        let kind = KindPipelineInfo::for_kind(DrawableKind::StaticMesh);
        let subpass = SubpassPipelineInfo {
            render_pass: pass.as_ref(),
            subpass: 0,
            state: &state,
        };
        material.set_material_valid_for(&device, &kind, &subpass).unwrap();
        material.set_material_valid_for(&device, &kind, &subpass).unwrap();

        let key = PipelineKey {
            kind: DrawableKind::StaticMesh,
            pass: pass.id(),
            subpass: 0,
        };
        assert!(material.has_pipeline(&key));
        assert_eq!(material.pipeline_count(), 1);
        let log = log.lock();
        assert_eq!(log.pipelines_created, 2);
        assert_eq!(log.pipelines_destroyed.len(), 1);
        assert_eq!(log.pipeline_set_layouts, vec![3, 3]);
    }

    #[test]
    fn binding_the_surviving_pipeline() {
        let device = MockDevice::new();
        let log = device.log();
        let mut material = Material::new(&device, &test_descriptor(), 4).unwrap();
        let pass = device.create_render_pass_layout(&color_pass()).unwrap();
        let state = SubpassState::default();
        let kind = KindPipelineInfo::for_kind(DrawableKind::StaticMesh);
        let subpass = SubpassPipelineInfo {
            render_pass: pass.as_ref(),
            subpass: 0,
            state: &state,
        };
        material.set_material_valid_for(&device, &kind, &subpass).unwrap();
        material.set_material_valid_for(&device, &kind, &subpass).unwrap();
        let key = PipelineKey {
            kind: DrawableKind::StaticMesh,
            pass: pass.id(),
            subpass: 0,
        };
        let mut encoder = device.create_bundle_encoder(pass.as_ref(), 0, (1, 1)).unwrap();
        material.cmd_bind_pipeline(encoder.as_render_pass(), &key).unwrap();
        let commands = commands_of(encoder.finish().unwrap().as_ref());
        let destroyed = log.lock().pipelines_destroyed.clone();
        match commands.as_slice() {
            [Command::SetPipeline(id)] => assert!(!destroyed.contains(id)),
            other => panic!("unexpected commands {:?}", other),
        }
    }

    #[test]
    fn missing_pipeline_and_kind() {
        let device = MockDevice::new();
        let material = Material::new(&device, &test_descriptor(), 4).unwrap();
        let pass = device.create_render_pass_layout(&color_pass()).unwrap();
        let mut encoder = device.create_bundle_encoder(pass.as_ref(), 0, (1, 1)).unwrap();
        let key = PipelineKey {
            kind: DrawableKind::StaticMesh,
            pass: pass.id(),
            subpass: 0,
        };
        assert!(matches!(
            material.cmd_bind_pipeline(encoder.as_render_pass(), &key),
            Err(RenderError::MissingPipeline { .. })
        ));
        assert!(matches!(
            material.cmd_bind_renderable_uniforms(encoder.as_render_pass(), DrawableKind::Billboard, None, 0),
            Err(RenderError::MissingKindInputs { .. })
        ));
    }

    #[test]
    fn invalidation() {
        let device = MockDevice::new();
        let mut material = Material::new(&device, &test_descriptor().with_kind(DrawableKind::BlitQuad), 4).unwrap();
        let first = device.create_render_pass_layout(&color_pass()).unwrap();
        let second = device.create_render_pass_layout(&color_pass()).unwrap();
        let state = SubpassState::default();
        for pass in [first.as_ref(), second.as_ref()] {
            for kind in [DrawableKind::StaticMesh, DrawableKind::BlitQuad] {
                let subpass = SubpassPipelineInfo {
                    render_pass: pass,
                    subpass: 0,
                    state: &state,
                };
                material
                    .set_material_valid_for(&device, &KindPipelineInfo::for_kind(kind), &subpass)
                    .unwrap();
            }
        }
        assert_eq!(material.pipeline_count(), 4);
        material.invalidate_pass(first.id());
        assert_eq!(material.pipeline_count(), 2);
        material.invalidate_pipelines();
        assert_eq!(material.pipeline_count(), 0);
    }

    #[test]
    fn missing_shader_file_is_fatal() {
        let device = MockDevice::new();
        let desc = MaterialDescriptor::new(
            "broken",
            ShaderSource::Path(PathBuf::from("/nonexistent/strata/shader.vert.spv")),
            ShaderSource::SpirV(vec![0; 4]),
        );
        assert!(matches!(
            Material::new(&device, &desc, 1),
            Err(RenderError::ShaderLoad { .. })
        ));
    }
}
