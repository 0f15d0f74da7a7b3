//! Material input sets: the shader-visible resources bound at one scope (global, local or per-kind).

use bytemuck::Pod;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::sync::Arc;
use strata_rhi::{
    Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, DescriptorPool, DescriptorPoolDescriptor,
    DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorType, Device, ResourceId, Sampler,
    ShaderStages, Texture,
};

use crate::error::{RenderError, Result};

/// Descriptor set index each scope is bound at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputScope {
    Global = 0,
    Local = 1,
    PerKind = 2,
}

impl InputScope {
    pub fn set_index(self) -> u32 {
        self as u32
    }
}

/// One binding of an input set.
#[derive(Clone)]
pub enum InputSlot {
    /// Uniform block owned by the set; `data` is its initial contents.
    Uniform {
        binding: u32,
        stages: ShaderStages,
        data: Vec<u8>,
    },
    Texture {
        binding: u32,
        stages: ShaderStages,
        texture: Arc<dyn Texture>,
        sampler: Arc<dyn Sampler>,
    },
    /// Per-drawable block read from a batch's instance buffer at a dynamic offset.
    InstanceData { binding: u32, stages: ShaderStages },
}

impl InputSlot {
    pub fn uniform<T: Pod>(binding: u32, stages: ShaderStages, value: &T) -> Self {
        InputSlot::Uniform {
            binding,
            stages,
            data: bytemuck::bytes_of(value).to_vec(),
        }
    }

    pub fn binding(&self) -> u32 {
        match *self {
            InputSlot::Uniform { binding, .. }
            | InputSlot::Texture { binding, .. }
            | InputSlot::InstanceData { binding, .. } => binding,
        }
    }

    fn layout_binding(&self) -> DescriptorSetLayoutBinding {
        let (binding, stages, descriptor_type) = match *self {
            InputSlot::Uniform { binding, stages, .. } => (binding, stages, DescriptorType::UniformBuffer),
            InputSlot::Texture { binding, stages, .. } => (binding, stages, DescriptorType::CombinedImageSampler),
            InputSlot::InstanceData { binding, stages } => (binding, stages, DescriptorType::UniformBufferDynamic),
        };
        DescriptorSetLayoutBinding {
            binding,
            descriptor_type,
            count: 1,
            stages,
        }
    }
}

impl fmt::Debug for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSlot::Uniform { binding, data, .. } => f
                .debug_struct("Uniform")
                .field("binding", binding)
                .field("len", &data.len())
                .finish(),
            InputSlot::Texture { binding, texture, .. } => f
                .debug_struct("Texture")
                .field("binding", binding)
                .field("texture", &texture.id())
                .finish(),
            InputSlot::InstanceData { binding, .. } => {
                f.debug_struct("InstanceData").field("binding", binding).finish()
            }
        }
    }
}

/// Layout, pool and allocated set(s) for one scope.
///
/// Sets without an instance-data slot are allocated once. Sets with one are allocated lazily, one per
/// instance buffer they read from, up to the capacity given at creation.
pub struct MaterialInputSet {
    scope: InputScope,
    slots: Vec<InputSlot>,
    layout: Box<dyn DescriptorSetLayout>,
    pool: Box<dyn DescriptorPool>,
    uniforms: FxHashMap<u32, Box<dyn Buffer>>,
    static_set: Option<Box<dyn DescriptorSet>>,
    instance_binding: Option<u32>,
    instance_sets: FxHashMap<ResourceId, Box<dyn DescriptorSet>>,
}

impl MaterialInputSet {
    pub fn new(device: &dyn Device, scope: InputScope, slots: Vec<InputSlot>, instance_set_capacity: u32) -> Result<Self> {
        let mut seen = FxHashSet::default();
        if let Some(slot) = slots.iter().find(|s| !seen.insert(s.binding())) {
            return Err(RenderError::InvalidInputs(format!(
                "{:?} scope binds {} twice",
                scope,
                slot.binding()
            )));
        }
        let instance_slots: Vec<u32> = slots
            .iter()
            .filter_map(|s| match s {
                InputSlot::InstanceData { binding, .. } => Some(*binding),
                _ => None,
            })
            .collect();
        if instance_slots.len() > 1 {
            return Err(RenderError::InvalidInputs(format!(
                "{:?} scope has {} instance data slots",
                scope,
                instance_slots.len()
            )));
        }
        let instance_binding = instance_slots.first().copied();

        let bindings: Vec<DescriptorSetLayoutBinding> = slots.iter().map(InputSlot::layout_binding).collect();
        let layout = device.create_descriptor_set_layout(&bindings)?;
        let max_sets = if instance_binding.is_some() {
            instance_set_capacity.max(1)
        } else {
            1
        };
        let mut per_type: FxHashMap<DescriptorType, u32> = FxHashMap::default();
        for binding in &bindings {
            *per_type.entry(binding.descriptor_type).or_insert(0) += binding.count;
        }
        let pool = device.create_descriptor_pool_with_descriptor(&DescriptorPoolDescriptor {
            max_sets,
            pool_sizes: per_type.into_iter().map(|(ty, count)| (ty, count * max_sets)).collect(),
        })?;

        let mut uniforms = FxHashMap::default();
        for slot in &slots {
            if let InputSlot::Uniform { binding, data, .. } = slot {
                let buffer = device.create_buffer(&BufferDescriptor {
                    label: Some("material uniform"),
                    size: (data.len() as u64).max(16),
                    usage: BufferUsage::UNIFORM,
                    memory: BufferMemoryPreference::HostVisible,
                })?;
                if !data.is_empty() {
                    device.write_buffer(buffer.as_ref(), 0, data)?;
                }
                uniforms.insert(*binding, buffer);
            }
        }

        let mut set = Self {
            scope,
            slots,
            layout,
            pool,
            uniforms,
            static_set: None,
            instance_binding,
            instance_sets: FxHashMap::default(),
        };
        if set.instance_binding.is_none() && !set.slots.is_empty() {
            let mut static_set = set.pool.allocate_set(set.layout.as_ref())?;
            set.write_shared_slots(static_set.as_mut())?;
            set.static_set = Some(static_set);
        }
        Ok(set)
    }

    fn write_shared_slots(&self, set: &mut dyn DescriptorSet) -> Result<()> {
        for slot in &self.slots {
            match slot {
                InputSlot::Uniform { binding, .. } => {
                    if let Some(buffer) = self.uniforms.get(binding) {
                        set.write_buffer(*binding, buffer.as_ref(), 0, buffer.size())?;
                    }
                }
                InputSlot::Texture {
                    binding,
                    texture,
                    sampler,
                    ..
                } => set.write_sampled_image(*binding, texture.as_ref(), sampler.as_ref())?,
                InputSlot::InstanceData { .. } => {}
            }
        }
        Ok(())
    }

    /// Make sure a set reading per-instance data from `buffer` exists. `range` is the bytes one draw sees.
    pub fn ensure_instance_buffer(&mut self, buffer: &dyn Buffer, range: u64) -> Result<()> {
        let Some(binding) = self.instance_binding else {
            return Err(RenderError::InvalidInputs(format!(
                "{:?} scope has no instance data slot",
                self.scope
            )));
        };
        if self.instance_sets.contains_key(&buffer.id()) {
            return Ok(());
        }
        let mut set = self.pool.allocate_set(self.layout.as_ref())?;
        self.write_shared_slots(set.as_mut())?;
        set.write_buffer(binding, buffer, 0, range)?;
        self.instance_sets.insert(buffer.id(), set);
        Ok(())
    }

    /// Overwrite the contents of a uniform slot.
    pub fn set_uniform(&mut self, device: &dyn Device, binding: u32, data: &[u8]) -> Result<()> {
        let buffer = self
            .uniforms
            .get(&binding)
            .ok_or_else(|| RenderError::InvalidInputs(format!("binding {} is not a uniform slot", binding)))?;
        if data.len() as u64 > buffer.size() {
            return Err(RenderError::InvalidInputs(format!(
                "{} bytes do not fit uniform binding {} ({} bytes)",
                data.len(),
                binding,
                buffer.size()
            )));
        }
        device.write_buffer(buffer.as_ref(), 0, data)?;
        for slot in &mut self.slots {
            if let InputSlot::Uniform { binding: b, data: d, .. } = slot {
                if *b == binding {
                    d.clear();
                    d.extend_from_slice(data);
                }
            }
        }
        Ok(())
    }

    /// The set to bind: the shared one, or the one registered for `instance_buffer`.
    pub fn descriptor_set(&self, instance_buffer: Option<ResourceId>) -> Option<&dyn DescriptorSet> {
        match (self.instance_binding, instance_buffer) {
            (Some(_), Some(id)) => self.instance_sets.get(&id).map(|s| s.as_ref()),
            (Some(_), None) => None,
            (None, _) => self.static_set.as_deref(),
        }
    }

    pub fn has_instance_slot(&self) -> bool {
        self.instance_binding.is_some()
    }

    pub fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        self.layout.bindings()
    }

    pub fn scope(&self) -> InputScope {
        self.scope
    }

    pub fn slots(&self) -> &[InputSlot] {
        &self.slots
    }
}

impl fmt::Debug for MaterialInputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterialInputSet")
            .field("scope", &self.scope)
            .field("slots", &self.slots)
            .field("instance_sets", &self.instance_sets.len())
            .finish()
    }
}
