//! Vulkan swapchain (feature "window").

use crate::{AcquiredImage, PresentStatus, ResourceId, Semaphore, Swapchain, Texture, TextureDimension, TextureFormat};
use ash::khr::swapchain::Device as SwapchainDevice;
use ash::vk;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::raw_semaphore;
use super::texture::{texture_format_from_vk, texture_format_to_vk};

/// Swapchain image wrapper usable as a color attachment. The image itself belongs to the swapchain.
pub struct VulkanSwapchainImage {
    device: Arc<ash::Device>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    format: TextureFormat,
    extent: (u32, u32),
    id: ResourceId,
}

impl Drop for VulkanSwapchainImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

impl std::fmt::Debug for VulkanSwapchainImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchainImage")
            .field("id", &self.id)
            .field("extent", &self.extent)
            .finish()
    }
}

impl Texture for VulkanSwapchainImage {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn format(&self) -> TextureFormat {
        self.format
    }
    fn size(&self) -> (u32, u32, u32) {
        (self.extent.0, self.extent.1, 1)
    }
    fn dimension(&self) -> TextureDimension {
        TextureDimension::D2
    }
    fn mip_level_count(&self) -> u32 {
        1
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct VulkanSwapchain {
    swapchain_loader: SwapchainDevice,
    swapchain: vk::SwapchainKHR,
    images: Vec<VulkanSwapchainImage>,
    queue: vk::Queue,
    extent: (u32, u32),
    format: TextureFormat,
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<(vk::SurfaceFormatKHR, TextureFormat)> {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    preferred
        .into_iter()
        .chain(formats.iter())
        .find_map(|f| texture_format_from_vk(f.format).map(|t| (*f, t)))
}

impl VulkanSwapchain {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        surface_loader: &ash::khr::surface::Instance,
        swapchain_loader: SwapchainDevice,
        surface: vk::SurfaceKHR,
        queue: vk::Queue,
        extent: (u32, u32),
        old_swapchain: vk::SwapchainKHR,
        next_id: &AtomicU64,
    ) -> Result<Self, String> {
        let caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .map_err(|e| format!("get_physical_device_surface_capabilities: {:?}", e))?
        };
        let extent_vk = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: extent.0.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: extent.1.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }
        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .map_err(|e| format!("get_physical_device_surface_formats: {:?}", e))?
        };
        let (surface_format, format) =
            choose_surface_format(&formats).ok_or("No supported 8-bit RGBA/BGRA surface format")?;
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .map_err(|e| format!("get_physical_device_surface_present_modes: {:?}", e))?
        };
        let present_mode = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|m| present_modes.contains(m))
            .unwrap_or(vk::PresentModeKHR::FIFO);
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent_vk)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let swapchain = unsafe {
            swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| format!("create_swapchain: {:?}", e))?
        };
        let extent = (extent_vk.width, extent_vk.height);
        let mut result = Self {
            swapchain_loader,
            swapchain,
            images: Vec::new(),
            queue,
            extent,
            format,
        };
        let vk_images = unsafe {
            result
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| format!("get_swapchain_images: {:?}", e))?
        };
        let vk_format = texture_format_to_vk(format);
        for image in vk_images {
            let view_create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(vk_format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );
            let view = unsafe {
                device
                    .create_image_view(&view_create_info, None)
                    .map_err(|e| format!("create_image_view (swapchain): {:?}", e))?
            };
            result.images.push(VulkanSwapchainImage {
                device: Arc::clone(&device),
                image,
                view,
                format,
                extent,
                id: next_id.fetch_add(1, Ordering::Relaxed),
            });
        }
        Ok(result)
    }

    pub(crate) fn raw(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        // Views first; the images go away with the swapchain.
        self.images.clear();
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

impl std::fmt::Debug for VulkanSwapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSwapchain")
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl Swapchain for VulkanSwapchain {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn acquire_next_image(&mut self, signal_semaphore: Option<&dyn Semaphore>) -> Result<AcquiredImage, String> {
        let semaphore = signal_semaphore
            .and_then(raw_semaphore)
            .unwrap_or(vk::Semaphore::null());
        let acquired = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquiredImage::Ready { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::OutOfDate),
            Err(e) => Err(format!("acquire_next_image: {:?}", e)),
        }
    }

    fn present(&self, image_index: u32, wait_semaphores: &[&dyn Semaphore]) -> Result<PresentStatus, String> {
        let waits: Vec<vk::Semaphore> = wait_semaphores.iter().filter_map(|s| raw_semaphore(*s)).collect();
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(std::slice::from_ref(&self.swapchain))
            .image_indices(&image_indices);
        let presented = unsafe { self.swapchain_loader.queue_present(self.queue, &present_info) };
        match presented {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(format!("queue_present: {:?}", e)),
        }
    }

    fn extent(&self) -> (u32, u32) {
        self.extent
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn format(&self) -> TextureFormat {
        self.format
    }

    fn image(&self, index: u32) -> Option<&dyn Texture> {
        self.images.get(index as usize).map(|i| i as &dyn Texture)
    }
}
