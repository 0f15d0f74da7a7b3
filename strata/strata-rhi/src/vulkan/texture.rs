//! Vulkan textures (image, memory and view) and samplers.

use crate::{
    AddressMode, FilterMode, ResourceId, Sampler, SamplerDescriptor, Texture, TextureDescriptor,
    TextureDimension, TextureFormat, TextureUsage,
};
use ash::vk;
use std::sync::Arc;

pub(crate) fn create_texture(
    device: Arc<ash::Device>,
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    descriptor: &TextureDescriptor,
    id: ResourceId,
) -> Result<VulkanTexture, String> {
    let (width, height, layers) = descriptor.size;
    let extent = vk::Extent3D {
        width: width.max(1),
        height: height.max(1),
        depth: 1,
    };
    let (array_layers, flags, view_type) = match descriptor.dimension {
        TextureDimension::D2 => (1, vk::ImageCreateFlags::empty(), vk::ImageViewType::TYPE_2D),
        TextureDimension::D2Array => (
            layers.max(1),
            vk::ImageCreateFlags::empty(),
            vk::ImageViewType::TYPE_2D_ARRAY,
        ),
        TextureDimension::Cube => (6, vk::ImageCreateFlags::CUBE_COMPATIBLE, vk::ImageViewType::CUBE),
    };
    let vk_format = texture_format_to_vk(descriptor.format);
    let mip_levels = descriptor.mip_level_count.max(1);

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk_format)
        .extent(extent)
        .mip_levels(mip_levels)
        .array_layers(array_layers)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(texture_usage_to_vk(descriptor.usage, descriptor.format))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .flags(flags);
    let image = unsafe {
        device
            .create_image(&create_info, None)
            .map_err(|e| format!("create_image: {:?}", e))?
    };

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let memory_props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    let Some(memory_type_index) = (0..memory_props.memory_type_count).find(|i| {
        let suitable = (requirements.memory_type_bits & (1 << i)) != 0;
        suitable
            && memory_props.memory_types[*i as usize]
                .property_flags
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }) else {
        unsafe { device.destroy_image(image, None) };
        return Err(format!("No device-local memory for texture {:?}", descriptor.label));
    };
    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    let memory = match unsafe { device.allocate_memory(&allocate_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(format!("allocate_memory (texture): {:?}", e));
        }
    };

    let aspect_mask = if descriptor.format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    };
    let view_create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(view_type)
        .format(vk_format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect_mask)
                .base_mip_level(0)
                .level_count(mip_levels)
                .base_array_layer(0)
                .layer_count(array_layers),
        );
    let view = unsafe {
        let bound = device.bind_image_memory(image, memory, 0);
        match bound.and_then(|_| device.create_image_view(&view_create_info, None)) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
                return Err(format!("create_image_view: {:?}", e));
            }
        }
    };

    Ok(VulkanTexture {
        device,
        image,
        memory,
        view,
        format: descriptor.format,
        size: descriptor.size,
        dimension: descriptor.dimension,
        mip_level_count: mip_levels,
        id,
    })
}

pub struct VulkanTexture {
    device: Arc<ash::Device>,
    pub(crate) image: vk::Image,
    memory: vk::DeviceMemory,
    pub(crate) view: vk::ImageView,
    format: TextureFormat,
    size: (u32, u32, u32),
    dimension: TextureDimension,
    mip_level_count: u32,
    id: ResourceId,
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanTexture")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl Texture for VulkanTexture {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn format(&self) -> TextureFormat {
        self.format
    }
    fn size(&self) -> (u32, u32, u32) {
        self.size
    }
    fn dimension(&self) -> TextureDimension {
        self.dimension
    }
    fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub(crate) fn texture_format_to_vk(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
    }
}

#[cfg(feature = "window")]
pub(crate) fn texture_format_from_vk(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8Srgb),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8Srgb),
        _ => None,
    }
}

fn texture_usage_to_vk(usage: TextureUsage, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        flags |= vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        if format.is_depth() {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }
    flags
}

fn filter_to_vk(f: FilterMode) -> vk::Filter {
    match f {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

fn address_mode_to_vk(a: AddressMode) -> vk::SamplerAddressMode {
    match a {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

/// Anisotropic filtering is only requested when the device feature was enabled at creation.
pub(crate) fn create_sampler(
    device: Arc<ash::Device>,
    desc: &SamplerDescriptor,
    anisotropy_enabled: bool,
) -> Result<VulkanSampler, String> {
    let anisotropy = desc
        .anisotropy_clamp
        .filter(|_| anisotropy_enabled)
        .map(|c| c.clamp(1.0, 16.0));
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(filter_to_vk(desc.mag_filter))
        .min_filter(filter_to_vk(desc.min_filter))
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(address_mode_to_vk(desc.address_mode_u))
        .address_mode_v(address_mode_to_vk(desc.address_mode_v))
        .address_mode_w(address_mode_to_vk(desc.address_mode_w))
        .anisotropy_enable(anisotropy.is_some())
        .max_anisotropy(anisotropy.unwrap_or(1.0))
        .max_lod(vk::LOD_CLAMP_NONE)
        .unnormalized_coordinates(false);
    let sampler = unsafe {
        device
            .create_sampler(&create_info, None)
            .map_err(|e| format!("create_sampler: {:?}", e))?
    };
    Ok(VulkanSampler { device, sampler })
}

pub struct VulkanSampler {
    device: Arc<ash::Device>,
    pub(crate) sampler: vk::Sampler,
}

impl Drop for VulkanSampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

impl std::fmt::Debug for VulkanSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSampler").finish()
    }
}

impl Sampler for VulkanSampler {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
