//! Render batch: the per-frame grouping of visible drawables by kind, material, material instance
//! and geometry, so each state change is recorded once per group.
//!
//! Groups live in flat arenas and refer to their children by index, so appending during a frame never
//! invalidates a lookup. Clearing empties the arenas and keeps their allocations.

use log::trace;
use rustc_hash::FxHashMap;
use slotmap::new_key_type;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use strata_rhi::{BufferUsage, CommandBuffer, Device, RenderPass, ResourceId};

use crate::drawable::{Drawable, DrawableKind, GeometryId};
use crate::error::{RenderError, Result};
use crate::instance_buffer::InstanceBuffer;
use crate::material::{
    KindPipelineInfo, MaterialHandle, MaterialInstanceHandle, MaterialRegistry, PipelineKey, SubpassPipelineInfo,
};

new_key_type! {
    pub struct BatchHandle;
}

/// A kind accepted by a batch, with the size and number of its per-instance blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchKind {
    pub kind: DrawableKind,
    pub item_size: u64,
    pub capacity: u32,
}

impl BatchKind {
    pub fn new(kind: DrawableKind, capacity: u32) -> Self {
        Self {
            kind,
            item_size: kind.instance_data_size(),
            capacity,
        }
    }
}

/// One leaf of the grouping: how many drawables share (kind, material, instance, geometry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafGroup {
    pub kind: DrawableKind,
    pub material: MaterialHandle,
    pub instance: Option<MaterialInstanceHandle>,
    pub geometry: GeometryId,
    pub count: usize,
}

#[derive(Debug)]
struct DrawEntry {
    drawable: Arc<dyn Drawable>,
    slot: u32,
}

#[derive(Debug)]
struct MeshGroup {
    geometry: GeometryId,
    drawables: SmallVec<[DrawEntry; 4]>,
}

#[derive(Debug)]
struct InstanceGroup {
    instance: Option<MaterialInstanceHandle>,
    meshes: Vec<usize>,
    mesh_index: FxHashMap<GeometryId, usize>,
}

#[derive(Debug)]
struct MaterialGroup {
    material: MaterialHandle,
    instances: Vec<usize>,
    instance_index: FxHashMap<Option<MaterialInstanceHandle>, usize>,
}

#[derive(Debug)]
struct KindGroup {
    kind: DrawableKind,
    materials: Vec<usize>,
    material_index: FxHashMap<MaterialHandle, usize>,
}

/// A secondary command buffer and the recording round it was recorded in.
struct RecordedSecondary {
    commands: Box<dyn CommandBuffer>,
    round: u64,
}

/// Per-instance offsets are bound as 32-bit dynamic offsets.
fn dynamic_offset(kind: DrawableKind, offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| RenderError::DynamicOffsetOverflow { kind, offset })
}

/// Find `key` in `index`, or push a new node built by `create` into `arena` and register it.
fn find_or_insert<K: std::hash::Hash + Eq, T>(
    index: &mut FxHashMap<K, usize>,
    children: &mut Vec<usize>,
    arena: &mut Vec<T>,
    key: K,
    create: impl FnOnce() -> T,
) -> usize {
    if let Some(&found) = index.get(&key) {
        return found;
    }
    let slot = arena.len();
    arena.push(create());
    children.push(slot);
    index.insert(key, slot);
    slot
}

pub struct RenderBatch {
    label: Option<&'static str>,
    buffers: FxHashMap<DrawableKind, InstanceBuffer>,
    kinds: Vec<KindGroup>,
    kind_order: Vec<usize>,
    kind_index: FxHashMap<DrawableKind, usize>,
    materials: Vec<MaterialGroup>,
    instances: Vec<InstanceGroup>,
    meshes: Vec<MeshGroup>,
    drawable_count: usize,
    /// Secondary command buffers, one per (render pass id, subpass) this batch was recorded for.
    recorded: FxHashMap<(ResourceId, u32), RecordedSecondary>,
    round: u64,
}

impl RenderBatch {
    /// Allocate one instance buffer per accepted kind.
    pub fn new(device: &dyn Device, label: Option<&'static str>, kinds: &[BatchKind]) -> Result<Self> {
        let mut buffers = FxHashMap::default();
        for kind in kinds {
            let buffer = InstanceBuffer::new(device, kind.kind, kind.item_size, kind.capacity, BufferUsage::UNIFORM)?;
            buffers.insert(kind.kind, buffer);
        }
        Ok(Self {
            label,
            buffers,
            kinds: Vec::new(),
            kind_order: Vec::new(),
            kind_index: FxHashMap::default(),
            materials: Vec::new(),
            instances: Vec::new(),
            meshes: Vec::new(),
            drawable_count: 0,
            recorded: FxHashMap::default(),
            round: 0,
        })
    }

    /// Add a visible drawable for this frame.
    ///
    /// Fails without touching the batch when the kind is not accepted, the material does not draw the
    /// kind, the instance belongs to another material, or the kind's instance buffer is full.
    pub fn add_renderable(
        &mut self,
        device: &dyn Device,
        materials: &MaterialRegistry,
        material: MaterialHandle,
        instance: Option<MaterialInstanceHandle>,
        drawable: Arc<dyn Drawable>,
    ) -> Result<()> {
        let kind = drawable.kind();
        if !self.buffers.contains_key(&kind) {
            return Err(RenderError::UnknownKind(kind));
        }
        materials.check_pair(material, instance)?;
        if !materials.material(material)?.supports_kind(kind) {
            return Err(RenderError::MissingKindInputs { kind });
        }
        let buffer = self.buffers.get_mut(&kind).ok_or(RenderError::UnknownKind(kind))?;
        let slot = buffer.add_item(device, drawable.instance_data())?;

        let kind_slot = find_or_insert(&mut self.kind_index, &mut self.kind_order, &mut self.kinds, kind, || {
            KindGroup {
                kind,
                materials: Vec::new(),
                material_index: FxHashMap::default(),
            }
        });
        let group = &mut self.kinds[kind_slot];
        let material_slot = find_or_insert(
            &mut group.material_index,
            &mut group.materials,
            &mut self.materials,
            material,
            || MaterialGroup {
                material,
                instances: Vec::new(),
                instance_index: FxHashMap::default(),
            },
        );
        let group = &mut self.materials[material_slot];
        let instance_slot = find_or_insert(
            &mut group.instance_index,
            &mut group.instances,
            &mut self.instances,
            instance,
            || InstanceGroup {
                instance,
                meshes: Vec::new(),
                mesh_index: FxHashMap::default(),
            },
        );
        let geometry = drawable.geometry_id();
        let group = &mut self.instances[instance_slot];
        let mesh_slot = find_or_insert(&mut group.mesh_index, &mut group.meshes, &mut self.meshes, geometry, || {
            MeshGroup {
                geometry,
                drawables: SmallVec::new(),
            }
        });
        self.meshes[mesh_slot].drawables.push(DrawEntry { drawable, slot });
        self.drawable_count += 1;
        Ok(())
    }

    /// Make sure every material in the batch can draw into `subpass`: per-kind sets exist for this
    /// batch's instance buffers and pipelines exist for the target.
    fn prepare(
        &self,
        device: &dyn Device,
        materials: &mut MaterialRegistry,
        subpass: &SubpassPipelineInfo<'_>,
    ) -> Result<()> {
        for &kind_slot in &self.kind_order {
            let group = &self.kinds[kind_slot];
            let kind_info = KindPipelineInfo::for_kind(group.kind);
            let key = PipelineKey {
                kind: group.kind,
                pass: subpass.render_pass.id(),
                subpass: subpass.subpass,
            };
            let instance_buffer = self.buffers.get(&group.kind);
            for &material_slot in &group.materials {
                let material = materials.material_mut(self.materials[material_slot].material)?;
                if let Some(buffer) = instance_buffer.and_then(|b| b.buffer().map(|raw| (raw, b.item_size()))) {
                    material.ensure_instance_binding(group.kind, buffer.0, buffer.1)?;
                }
                if !material.has_pipeline(&key) {
                    material.set_material_valid_for(device, &kind_info, subpass)?;
                }
            }
        }
        Ok(())
    }

    /// Record this frame's draws into a secondary command buffer for `subpass` and keep it for
    /// the owning node's primary recording.
    pub fn record_render_command(
        &mut self,
        device: &dyn Device,
        materials: &mut MaterialRegistry,
        subpass: &SubpassPipelineInfo<'_>,
        extent: (u32, u32),
    ) -> Result<()> {
        self.prepare(device, materials, subpass)?;
        let mut encoder = device.create_bundle_encoder(subpass.render_pass, subpass.subpass, extent)?;
        self.record_into(materials, subpass.render_pass.id(), subpass.subpass, encoder.as_render_pass())?;
        let commands = encoder.finish()?;
        trace!(
            "batch {:?}: recorded {} drawables for pass {} subpass {}",
            self.label,
            self.drawable_count,
            subpass.render_pass.id(),
            subpass.subpass
        );
        self.recorded.insert(
            (subpass.render_pass.id(), subpass.subpass),
            RecordedSecondary {
                commands,
                round: self.round,
            },
        );
        Ok(())
    }

    /// Walk the hierarchy: pipeline and global inputs once per (kind, material), local inputs once per
    /// material instance, geometry once per mesh, then one per-kind bind at the drawable's offset and
    /// one draw per drawable.
    pub fn record_into(
        &self,
        materials: &MaterialRegistry,
        pass_id: ResourceId,
        subpass: u32,
        pass: &mut dyn RenderPass,
    ) -> Result<()> {
        for &kind_slot in &self.kind_order {
            let group = &self.kinds[kind_slot];
            let kind = group.kind;
            let instance_buffer = self.buffers.get(&kind);
            let buffer_id = instance_buffer.and_then(|b| b.buffer()).map(|b| b.id());
            let key = PipelineKey {
                kind,
                pass: pass_id,
                subpass,
            };
            for &material_slot in &group.materials {
                let material_group = &self.materials[material_slot];
                let material = materials.material(material_group.material)?;
                material.cmd_bind_pipeline(pass, &key)?;
                material.cmd_bind_global_uniforms(pass);
                if buffer_id.is_none() {
                    material.cmd_bind_renderable_uniforms(pass, kind, None, 0)?;
                }
                for &instance_slot in &material_group.instances {
                    let instance_group = &self.instances[instance_slot];
                    materials.cmd_bind_local_uniforms(pass, material_group.material, instance_group.instance)?;
                    for &mesh_slot in &instance_group.meshes {
                        let mesh = &self.meshes[mesh_slot];
                        let Some(first) = mesh.drawables.first() else {
                            continue;
                        };
                        first.drawable.bind_geometry(pass);
                        for entry in &mesh.drawables {
                            if let (Some(buffer), Some(_)) = (instance_buffer, buffer_id) {
                                let offset = dynamic_offset(kind, buffer.offset_of(entry.slot))?;
                                material.cmd_bind_renderable_uniforms(pass, kind, buffer_id, offset)?;
                            }
                            entry.drawable.draw(pass);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Empty the grouping and reset every instance buffer. No GPU memory is released.
    pub fn clear_batch(&mut self) {
        self.kinds.clear();
        self.kind_order.clear();
        self.kind_index.clear();
        self.materials.clear();
        self.instances.clear();
        self.meshes.clear();
        self.drawable_count = 0;
        for buffer in self.buffers.values_mut() {
            buffer.clear();
        }
    }

    /// Release the recorded command buffers. The caller guarantees the GPU is done with them.
    pub fn destroy(&mut self) {
        self.clear_batch();
        self.recorded.clear();
    }

    /// Secondary command buffer recorded for (render pass id, subpass), if any.
    pub fn secondary(&self, pass_id: ResourceId, subpass: u32) -> Option<&dyn CommandBuffer> {
        self.recorded.get(&(pass_id, subpass)).map(|r| r.commands.as_ref())
    }

    /// Drop the secondaries not recorded since the previous call, e.g. for a subpass the batch no
    /// longer renders into, and start a new round. The GPU must be done with the dropped buffers.
    pub fn retire_unrecorded(&mut self) {
        let round = self.round;
        self.recorded.retain(|_, r| r.round == round);
        self.round += 1;
    }

    pub fn secondary_count(&self) -> usize {
        self.recorded.len()
    }

    pub fn kind_pipeline_info(&self, kind: DrawableKind) -> Result<KindPipelineInfo> {
        if !self.buffers.contains_key(&kind) {
            return Err(RenderError::UnknownKind(kind));
        }
        Ok(KindPipelineInfo::for_kind(kind))
    }

    pub fn accepts(&self, kind: DrawableKind) -> bool {
        self.buffers.contains_key(&kind)
    }

    /// Every leaf group in recording order.
    pub fn leaves(&self) -> Vec<LeafGroup> {
        let mut leaves = Vec::new();
        for &kind_slot in &self.kind_order {
            let group = &self.kinds[kind_slot];
            for &material_slot in &group.materials {
                let material_group = &self.materials[material_slot];
                for &instance_slot in &material_group.instances {
                    let instance_group = &self.instances[instance_slot];
                    for &mesh_slot in &instance_group.meshes {
                        let mesh = &self.meshes[mesh_slot];
                        leaves.push(LeafGroup {
                            kind: group.kind,
                            material: material_group.material,
                            instance: instance_group.instance,
                            geometry: mesh.geometry,
                            count: mesh.drawables.len(),
                        });
                    }
                }
            }
        }
        leaves
    }

    pub fn drawable_count(&self) -> usize {
        self.drawable_count
    }

    pub fn instance_buffer(&self, kind: DrawableKind) -> Option<&InstanceBuffer> {
        self.buffers.get(&kind)
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label
    }
}

impl fmt::Debug for RenderBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBatch")
            .field("label", &self.label)
            .field("kinds", &self.buffers.keys().collect::<Vec<_>>())
            .field("drawables", &self.drawable_count)
            .field("recorded", &self.recorded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawable::{BillboardInstance, BlitQuad, Mesh, MeshDrawable, StaticMeshInstance, StaticVertex};
    use crate::material::{InputSlot, MaterialDescriptor, ShaderSource, SubpassState};
    use crate::testing::{color_pass, commands_of, test_descriptor, Command, MockDevice};
    use strata_rhi::{RenderPassLayout, ShaderStages};

    struct Fixture {
        device: MockDevice,
        registry: MaterialRegistry,
        material: MaterialHandle,
        pass: Box<dyn RenderPassLayout>,
        state: SubpassState,
    }

    fn fixture() -> Fixture {
        let device = MockDevice::new();
        let mut registry = MaterialRegistry::new();
        let material = registry.create_material(&device, &test_descriptor(), 4).unwrap();
        let pass = device.create_render_pass_layout(&color_pass()).unwrap();
        Fixture {
            device,
            registry,
            material,
            pass,
            state: SubpassState::default(),
        }
    }

    fn triangle(device: &MockDevice) -> Arc<Mesh> {
        let vertices = [StaticVertex::default(); 3];
        Arc::new(Mesh::new(device, "triangle", bytemuck::cast_slice(&vertices), 3, None).unwrap())
    }

    fn static_drawable(mesh: &Arc<Mesh>, tag: f32) -> Arc<dyn Drawable> {
        Arc::new(MeshDrawable::static_mesh(
            Arc::clone(mesh),
            StaticMeshInstance { mvp: [[tag; 4]; 4] },
        ))
    }

    fn record(f: &mut Fixture, batch: &mut RenderBatch) -> Vec<Command> {
        let info = SubpassPipelineInfo {
            render_pass: f.pass.as_ref(),
            subpass: 0,
            state: &f.state,
        };
        batch
            .record_render_command(&f.device, &mut f.registry, &info, (64, 64))
            .unwrap();
        commands_of(batch.secondary(f.pass.id(), 0).unwrap())
    }

    #[test]
    fn static_mesh_pair_records_one_bind_per_level() {
        let mut f = fixture();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 2)]).unwrap();
        assert_eq!(batch.instance_buffer(DrawableKind::StaticMesh).unwrap().item_size(), 64);
        let mesh = triangle(&f.device);
        batch
            .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 1.0))
            .unwrap();
        batch
            .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 2.0))
            .unwrap();

        let commands = record(&mut f, &mut batch);
        let count = |pred: &dyn Fn(&Command) -> bool| commands.iter().filter(|c| pred(c)).count();
        assert_eq!(count(&|c| matches!(c, Command::SetPipeline(_))), 1);
        assert_eq!(count(&|c| matches!(c, Command::BindSet { set_index: 0, .. })), 1);
        assert_eq!(count(&|c| matches!(c, Command::BindSet { set_index: 1, .. })), 1);
        assert_eq!(count(&|c| matches!(c, Command::SetVertexBuffer(_))), 1);
        assert_eq!(count(&|c| matches!(c, Command::Draw { .. })), 2);
        let offsets: Vec<Vec<u32>> = commands
            .iter()
            .filter_map(|c| match c {
                Command::BindSet {
                    set_index: 2, offsets, ..
                } => Some(offsets.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![vec![0], vec![64]]);
        // Pipeline first, then global, local, geometry, then per-draw binds.
        assert!(matches!(commands[0], Command::SetPipeline(_)));
        assert!(matches!(commands[1], Command::BindSet { set_index: 0, .. }));
        assert!(matches!(commands[2], Command::BindSet { set_index: 1, .. }));
        assert!(matches!(commands[3], Command::SetVertexBuffer(_)));
        assert!(matches!(commands[5], Command::Draw { vertex_count: 3, instance_count: 1 }));
    }

    #[test]
    fn grouping_by_material_instance_and_mesh() {
        let mut f = fixture();
        let other = f.registry.create_material(&f.device, &test_descriptor(), 4).unwrap();
        let variant = f
            .registry
            .create_instance(
                &f.device,
                f.material,
                vec![InputSlot::uniform(0, ShaderStages::FRAGMENT, &[0.25f32; 4])],
            )
            .unwrap();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 16)]).unwrap();
        let a = triangle(&f.device);
        let b = triangle(&f.device);
        let inserts = [
            (f.material, None, &a),
            (f.material, None, &a),
            (f.material, Some(variant), &a),
            (f.material, None, &b),
            (other, None, &a),
            (f.material, None, &a),
            (other, None, &a),
        ];
        for (material, instance, mesh) in inserts {
            batch
                .add_renderable(&f.device, &f.registry, material, instance, static_drawable(mesh, 0.0))
                .unwrap();
        }
        let leaves = batch.leaves();
        let count_of = |material: MaterialHandle, instance: Option<MaterialInstanceHandle>, mesh: &Arc<Mesh>| {
            leaves
                .iter()
                .filter(|l| l.material == material && l.instance == instance && l.geometry == mesh.id())
                .map(|l| l.count)
                .collect::<Vec<_>>()
        };
        assert_eq!(leaves.len(), 4);
        assert_eq!(count_of(f.material, None, &a), vec![3]);
        assert_eq!(count_of(f.material, Some(variant), &a), vec![1]);
        assert_eq!(count_of(f.material, None, &b), vec![1]);
        assert_eq!(count_of(other, None, &a), vec![2]);
        assert_eq!(leaves.iter().map(|l| l.count).sum::<usize>(), inserts.len());
        assert_eq!(batch.drawable_count(), inserts.len());

        // One pipeline per material, one local bind per instance group, one geometry bind per mesh group.
        let commands = record(&mut f, &mut batch);
        assert_eq!(commands.iter().filter(|c| matches!(c, Command::SetPipeline(_))).count(), 2);
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, Command::BindSet { set_index: 1, .. }))
                .count(),
            3
        );
        assert_eq!(commands.iter().filter(|c| matches!(c, Command::SetVertexBuffer(_))).count(), 4);
        assert_eq!(commands.iter().filter(|c| matches!(c, Command::Draw { .. })).count(), 7);
    }

    #[test]
    fn capacity_overflow_leaves_the_batch_intact() {
        let f = fixture();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 2)]).unwrap();
        let mesh = triangle(&f.device);
        for tag in [1.0, 2.0] {
            batch
                .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, tag))
                .unwrap();
        }
        for _ in 0..3 {
            let err = batch
                .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 9.0))
                .unwrap_err();
            assert!(err.is_recoverable());
            assert!(matches!(err, RenderError::CapacityExceeded { capacity: 2, .. }));
        }
        let buffer = batch.instance_buffer(DrawableKind::StaticMesh).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(batch.drawable_count(), 2);
        assert_eq!(batch.leaves()[0].count, 2);
        let bytes = f.device.buffer_bytes(buffer.buffer().unwrap());
        let first: &[f32] = bytemuck::cast_slice(&bytes[..64]);
        let second: &[f32] = bytemuck::cast_slice(&bytes[64..128]);
        assert!(first.iter().all(|v| *v == 1.0));
        assert!(second.iter().all(|v| *v == 2.0));
    }

    #[test]
    fn rejected_insertions_do_not_mutate() {
        let f = fixture();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 4)]).unwrap();
        let mesh = triangle(&f.device);
        let billboard: Arc<dyn Drawable> = Arc::new(MeshDrawable::billboard(Arc::clone(&mesh), BillboardInstance::default()));
        let err = batch
            .add_renderable(&f.device, &f.registry, f.material, None, billboard)
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownKind(DrawableKind::Billboard)));

        let mut blit_batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::BlitQuad, 1)]).unwrap();
        let err = blit_batch
            .add_renderable(&f.device, &f.registry, f.material, None, Arc::new(BlitQuad))
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingKindInputs { .. }));
        assert!(blit_batch.instance_buffer(DrawableKind::BlitQuad).unwrap().is_empty());
        assert_eq!(batch.drawable_count(), 0);
        assert!(batch.leaves().is_empty());
    }

    #[test]
    fn clear_then_record_draws_nothing() {
        let mut f = fixture();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 2)]).unwrap();
        let mesh = triangle(&f.device);
        batch
            .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 1.0))
            .unwrap();
        assert!(!record(&mut f, &mut batch).is_empty());
        batch.clear_batch();
        batch.clear_batch();
        assert!(record(&mut f, &mut batch).is_empty());
        assert_eq!(batch.instance_buffer(DrawableKind::StaticMesh).unwrap().len(), 0);
        assert!(batch.leaves().is_empty());
    }

    #[test]
    fn blit_quads_bind_no_instance_data() {
        let mut f = fixture();
        let desc = MaterialDescriptor::new(
            "blit",
            ShaderSource::SpirV(vec![0; 4]),
            ShaderSource::SpirV(vec![0; 4]),
        )
        .with_kind(DrawableKind::BlitQuad);
        let blit = f.registry.create_material(&f.device, &desc, 1).unwrap();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::BlitQuad, 1)]).unwrap();
        batch
            .add_renderable(&f.device, &f.registry, blit, None, Arc::new(BlitQuad))
            .unwrap();
        let commands = record(&mut f, &mut batch);
        assert_eq!(
            commands,
            vec![
                Command::SetPipeline(match commands[0] {
                    Command::SetPipeline(id) => id,
                    _ => 0,
                }),
                Command::Draw {
                    vertex_count: 4,
                    instance_count: 1
                },
            ]
        );
    }

    #[test]
    fn secondaries_of_abandoned_subpasses_are_retired() {
        let mut f = fixture();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 2)]).unwrap();
        let mesh = triangle(&f.device);
        batch
            .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 1.0))
            .unwrap();
        let first_pass = f.pass.id();
        record(&mut f, &mut batch);
        batch.retire_unrecorded();
        assert!(batch.secondary(first_pass, 0).is_some());

        // The batch moves to another pass.
        f.pass = f.device.create_render_pass_layout(&color_pass()).unwrap();
        record(&mut f, &mut batch);
        assert_eq!(batch.secondary_count(), 2);
        batch.retire_unrecorded();
        assert_eq!(batch.secondary_count(), 1);
        assert!(batch.secondary(first_pass, 0).is_none());
        assert!(batch.secondary(f.pass.id(), 0).is_some());
    }

    #[test]
    fn offsets_beyond_32_bits_are_rejected() {
        assert_eq!(dynamic_offset(DrawableKind::StaticMesh, 256).unwrap(), 256);
        assert!(matches!(
            dynamic_offset(DrawableKind::Billboard, u64::from(u32::MAX) + 1),
            Err(RenderError::DynamicOffsetOverflow { kind: DrawableKind::Billboard, .. })
        ));
    }

    #[test]
    fn recording_creates_missing_pipelines_once() {
        let mut f = fixture();
        let log = f.device.log();
        let mut batch = RenderBatch::new(&f.device, None, &[BatchKind::new(DrawableKind::StaticMesh, 2)]).unwrap();
        let mesh = triangle(&f.device);
        batch
            .add_renderable(&f.device, &f.registry, f.material, None, static_drawable(&mesh, 1.0))
            .unwrap();
        record(&mut f, &mut batch);
        record(&mut f, &mut batch);
        assert_eq!(log.lock().pipelines_created, 1);
        assert_eq!(f.registry.material(f.material).unwrap().pipeline_count(), 1);
        assert_eq!(
            batch.kind_pipeline_info(DrawableKind::StaticMesh).unwrap(),
            KindPipelineInfo::for_kind(DrawableKind::StaticMesh)
        );
        assert!(batch.kind_pipeline_info(DrawableKind::SkeletalMesh).is_err());
    }
}
