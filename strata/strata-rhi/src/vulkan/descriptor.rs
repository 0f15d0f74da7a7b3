//! Vulkan descriptor set layouts, pools and sets.

use crate::{
    Buffer, DescriptorPool, DescriptorPoolDescriptor, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBinding, DescriptorType, Sampler, ShaderStages, Texture,
};
use ash::vk;
use std::sync::Arc;

use super::texture::VulkanSampler;
use super::{image_handles, raw_buffer};

/// Descriptor count reserved per type and per set when a pool descriptor leaves a type unspecified.
const DEFAULT_POOL_MULTIPLIER: u32 = 4;

const POOL_TYPES: [DescriptorType; 5] = [
    DescriptorType::UniformBuffer,
    DescriptorType::UniformBufferDynamic,
    DescriptorType::StorageBuffer,
    DescriptorType::SampledImage,
    DescriptorType::CombinedImageSampler,
];

pub(crate) fn descriptor_type_to_vk(t: DescriptorType) -> vk::DescriptorType {
    match t {
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

pub(crate) fn shader_stages_to_vk(s: ShaderStages) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if s.contains(ShaderStages::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if s.contains(ShaderStages::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    flags
}

pub(crate) fn create_raw_set_layout(
    device: &ash::Device,
    bindings: &[DescriptorSetLayoutBinding],
) -> Result<vk::DescriptorSetLayout, String> {
    let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
        .iter()
        .map(|b| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(b.binding)
                .descriptor_type(descriptor_type_to_vk(b.descriptor_type))
                .descriptor_count(b.count)
                .stage_flags(shader_stages_to_vk(b.stages))
        })
        .collect();
    let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
    unsafe {
        device
            .create_descriptor_set_layout(&create_info, None)
            .map_err(|e| format!("create_descriptor_set_layout: {:?}", e))
    }
}

pub struct VulkanDescriptorSetLayout {
    device: Arc<ash::Device>,
    pub(crate) layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl Drop for VulkanDescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

impl std::fmt::Debug for VulkanDescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSetLayout")
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl DescriptorSetLayout for VulkanDescriptorSetLayout {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) fn create_descriptor_set_layout(
    device: &Arc<ash::Device>,
    bindings: &[DescriptorSetLayoutBinding],
) -> Result<VulkanDescriptorSetLayout, String> {
    let layout = create_raw_set_layout(device, bindings)?;
    Ok(VulkanDescriptorSetLayout {
        device: Arc::clone(device),
        layout,
        bindings: bindings.to_vec(),
    })
}

pub(crate) fn create_descriptor_pool(
    device: &Arc<ash::Device>,
    desc: &DescriptorPoolDescriptor,
) -> Result<VulkanDescriptorPool, String> {
    let max_sets = desc.max_sets.max(1);
    let default_per_type = max_sets * DEFAULT_POOL_MULTIPLIER;
    let pool_sizes: Vec<vk::DescriptorPoolSize> = POOL_TYPES
        .iter()
        .map(|ty| {
            let count = desc
                .pool_sizes
                .iter()
                .find(|(t, _)| t == ty)
                .map(|(_, c)| *c)
                .unwrap_or(default_per_type);
            vk::DescriptorPoolSize::default()
                .ty(descriptor_type_to_vk(*ty))
                .descriptor_count(count.max(1))
        })
        .collect();
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);
    let pool = unsafe {
        device
            .create_descriptor_pool(&create_info, None)
            .map_err(|e| format!("create_descriptor_pool: {:?}", e))?
    };
    Ok(VulkanDescriptorPool {
        device: Arc::clone(device),
        pool,
        max_sets,
    })
}

/// Sets allocated from a pool are released when the pool is destroyed.
pub struct VulkanDescriptorPool {
    device: Arc<ash::Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl Drop for VulkanDescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanDescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorPool")
            .field("max_sets", &self.max_sets)
            .finish()
    }
}

impl DescriptorPool for VulkanDescriptorPool {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String> {
        let vk_layout = layout
            .as_any()
            .downcast_ref::<VulkanDescriptorSetLayout>()
            .ok_or("layout is not a Vulkan descriptor set layout")?;
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(std::slice::from_ref(&vk_layout.layout));
        let sets = unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| format!("allocate_descriptor_sets: {:?}", e))?
        };
        let set = sets
            .first()
            .copied()
            .ok_or("allocate_descriptor_sets returned nothing")?;
        Ok(Box::new(VulkanDescriptorSet {
            device: Arc::clone(&self.device),
            set,
            bindings: vk_layout.bindings.clone(),
        }))
    }
}

pub struct VulkanDescriptorSet {
    device: Arc<ash::Device>,
    pub(crate) set: vk::DescriptorSet,
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl std::fmt::Debug for VulkanDescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDescriptorSet").finish()
    }
}

impl VulkanDescriptorSet {
    fn descriptor_type(&self, binding: u32) -> Result<vk::DescriptorType, String> {
        self.bindings
            .iter()
            .find(|b| b.binding == binding)
            .map(|b| descriptor_type_to_vk(b.descriptor_type))
            .ok_or_else(|| format!("binding {} not found in layout", binding))
    }

    fn write_image(&self, binding: u32, image_info: vk::DescriptorImageInfo) -> Result<(), String> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(self.descriptor_type(binding)?)
            .image_info(std::slice::from_ref(&image_info));
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }
}

impl DescriptorSet for VulkanDescriptorSet {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String> {
        let vk_ty = self.descriptor_type(binding)?;
        let vk_buf = raw_buffer(buffer)?;
        if offset > buffer.size() {
            return Err(format!(
                "write_buffer: offset {} past the end of a {} byte buffer",
                offset,
                buffer.size()
            ));
        }
        let range = if size > 0 { size } else { buffer.size() - offset };
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(vk_buf.buffer)
            .offset(offset)
            .range(range);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk_ty)
            .buffer_info(std::slice::from_ref(&buffer_info));
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String> {
        let (_, view) = image_handles(texture)?;
        self.write_image(
            binding,
            vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        )
    }

    fn write_sampled_image(&mut self, binding: u32, texture: &dyn Texture, sampler: &dyn Sampler) -> Result<(), String> {
        let (_, view) = image_handles(texture)?;
        let vk_sampler = sampler
            .as_any()
            .downcast_ref::<VulkanSampler>()
            .ok_or("sampler is not a Vulkan sampler")?;
        self.write_image(
            binding,
            vk::DescriptorImageInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .sampler(vk_sampler.sampler),
        )
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
