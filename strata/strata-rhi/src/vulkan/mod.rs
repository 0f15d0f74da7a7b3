//! Vulkan backend for Strata RHI.
//! Implements Device, Queue, Buffer, Texture, RenderPassLayout, Framebuffer, GraphicsPipeline,
//! CommandEncoder, RenderBundleEncoder, Fence, Semaphore and (feature "window") Swapchain.

mod buffer;
mod command;
mod descriptor;
mod pipeline;
mod queue;
mod render_pass;
mod texture;

#[cfg(feature = "window")]
mod swapchain;

use crate::{
    Buffer, BufferDescriptor, BufferMemoryPreference, BufferUsage, CommandEncoder, DescriptorPool,
    DescriptorPoolDescriptor, DescriptorSetLayout, DescriptorSetLayoutBinding, Device, DeviceLimits,
    Fence, Framebuffer, GraphicsPipeline, GraphicsPipelineDescriptor, ImageLayout, RenderBundleEncoder,
    RenderPassLayout, RenderPassLayoutDescriptor, ResourceId, Sampler, SamplerDescriptor, Semaphore,
    Texture, TextureDescriptor,
};
use ash::vk;
use std::ffi::CStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use buffer::VulkanBuffer;
pub use command::{VulkanBundleEncoder, VulkanCommandBuffer, VulkanCommandEncoder};
pub use descriptor::{VulkanDescriptorPool, VulkanDescriptorSet, VulkanDescriptorSetLayout};
pub use pipeline::VulkanGraphicsPipeline;
pub use render_pass::{VulkanFramebuffer, VulkanRenderPassLayout};
pub use texture::{VulkanSampler, VulkanTexture};

#[cfg(feature = "window")]
pub use swapchain::{VulkanSwapchain, VulkanSwapchainImage};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Returns the image and view of any texture this backend can render to or sample from.
pub(crate) fn image_handles(texture: &dyn Texture) -> Result<(vk::Image, vk::ImageView), String> {
    if let Some(t) = texture.as_any().downcast_ref::<VulkanTexture>() {
        return Ok((t.image, t.view));
    }
    #[cfg(feature = "window")]
    if let Some(s) = texture.as_any().downcast_ref::<VulkanSwapchainImage>() {
        return Ok((s.image, s.view));
    }
    Err(format!("texture {} is not a Vulkan texture", texture.id()))
}

pub(crate) fn raw_buffer(buffer: &dyn Buffer) -> Result<&VulkanBuffer, String> {
    buffer
        .as_any()
        .downcast_ref::<VulkanBuffer>()
        .ok_or_else(|| format!("buffer {} is not a Vulkan buffer", buffer.id()))
}

pub(crate) fn raw_semaphore(semaphore: &dyn Semaphore) -> Option<vk::Semaphore> {
    semaphore
        .as_any()
        .downcast_ref::<VulkanSemaphore>()
        .map(|s| s.semaphore)
}

pub(crate) fn raw_fence(fence: &dyn Fence) -> Option<vk::Fence> {
    fence.as_any().downcast_ref::<VulkanFence>().map(|f| f.fence)
}

pub(crate) fn image_layout_to_vk(l: ImageLayout) -> vk::ImageLayout {
    match l {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn validation_requested() -> bool {
    cfg!(feature = "validation")
        || std::env::var("STRATA_VALIDATION").map(|v| v == "1").unwrap_or(false)
}

pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    limits: DeviceLimits,
    anisotropy_enabled: bool,
    next_id: AtomicU64,
    #[cfg(feature = "window")]
    surface_state: Option<SurfaceState>,
}

#[cfg(feature = "window")]
struct SurfaceState {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

/// Instance-level objects shared by headless and windowed construction.
struct InstanceParts {
    entry: ash::Entry,
    instance: ash::Instance,
}

fn create_instance(extensions: &[*const std::ffi::c_char]) -> Result<InstanceParts, String> {
    let entry = unsafe { ash::Entry::load().map_err(|e| e.to_string())? };
    let app_info = vk::ApplicationInfo::default()
        .api_version(vk::API_VERSION_1_2)
        .application_name(c"Strata")
        .engine_name(c"Strata");
    let mut layers = Vec::new();
    if validation_requested() {
        let available = unsafe {
            entry
                .enumerate_instance_layer_properties()
                .map_err(|e| format!("enumerate_instance_layer_properties: {:?}", e))?
        };
        let found = available
            .iter()
            .any(|l| l.layer_name_as_c_str().map(|n| n == VALIDATION_LAYER).unwrap_or(false));
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
        }
    }
    let instance_create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(extensions);
    let instance = unsafe {
        entry
            .create_instance(&instance_create_info, None)
            .map_err(|e| format!("create_instance: {:?}", e))?
    };
    Ok(InstanceParts { entry, instance })
}

/// Picks a physical device and a graphics queue family. Discrete GPUs are preferred.
/// `present_ok` filters queue families that can present to the target surface.
fn pick_physical_device(
    instance: &ash::Instance,
    present_ok: impl Fn(vk::PhysicalDevice, u32) -> bool,
) -> Result<(vk::PhysicalDevice, u32), String> {
    let physical_devices = unsafe {
        instance
            .enumerate_physical_devices()
            .map_err(|e| format!("enumerate_physical_devices: {:?}", e))?
    };
    let mut candidates: Vec<(vk::PhysicalDevice, u32, bool)> = Vec::new();
    for pd in physical_devices {
        let families = unsafe { instance.get_physical_device_queue_family_properties(pd) };
        let family = families.iter().enumerate().find(|(i, p)| {
            p.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present_ok(pd, *i as u32)
        });
        if let Some((index, _)) = family {
            let props = unsafe { instance.get_physical_device_properties(pd) };
            let discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
            candidates.push((pd, index as u32, discrete));
        }
    }
    candidates.sort_by_key(|(_, _, discrete)| !*discrete);
    candidates
        .first()
        .map(|(pd, family, _)| (*pd, *family))
        .ok_or_else(|| "No Vulkan physical device with a suitable graphics queue".to_string())
}

impl VulkanDevice {
    /// Create a headless Vulkan device (no surface, no swapchain).
    pub fn new() -> Result<Arc<Self>, String> {
        let parts = create_instance(&[])?;
        let (physical_device, family) = pick_physical_device(&parts.instance, |_, _| true)?;
        Self::finish(parts, physical_device, family, &[], PendingSurface::default())
    }

    fn next_id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create the logical device, queue and command pool. A pending surface gets its swapchain
    /// loader once the logical device exists.
    fn finish(
        parts: InstanceParts,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        device_extensions: &[*const std::ffi::c_char],
        surface: PendingSurface,
    ) -> Result<Arc<Self>, String> {
        let InstanceParts { entry, instance } = parts;
        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let anisotropy_enabled = supported.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(anisotropy_enabled);
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&queue_priorities);
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(device_extensions)
            .enabled_features(&features);
        let device_raw = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| format!("create_device: {:?}", e))?
        };
        let queue = unsafe { device_raw.get_device_queue(queue_family_index, 0) };
        let command_pool_create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            device_raw
                .create_command_pool(&command_pool_create_info, None)
                .map_err(|e| format!("create_command_pool: {:?}", e))?
        };
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: props.limits.min_uniform_buffer_offset_alignment.max(1),
            max_uniform_buffer_range: u64::from(props.limits.max_uniform_buffer_range),
        };
        #[cfg(feature = "window")]
        let surface_state = surface.map(|(surface, surface_loader)| SurfaceState {
            surface,
            surface_loader,
            swapchain_loader: ash::khr::swapchain::Device::new(&instance, &device_raw),
        });
        #[cfg(not(feature = "window"))]
        let () = surface;
        Ok(Arc::new(Self {
            entry,
            instance,
            physical_device,
            device: Arc::new(device_raw),
            queue,
            command_pool,
            limits,
            anisotropy_enabled,
            next_id: AtomicU64::new(1),
            #[cfg(feature = "window")]
            surface_state,
        }))
    }

    #[cfg(feature = "window")]
    /// Create a Vulkan device with a window surface for swapchain/presentation.
    /// Supports Win32, Xlib and Wayland windows.
    pub fn new_with_surface(
        window: &(impl raw_window_handle::HasWindowHandle + raw_window_handle::HasDisplayHandle),
    ) -> Result<Arc<Self>, String> {
        use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
        let window_handle = window
            .window_handle()
            .map_err(|e| format!("window_handle: {:?}", e))?
            .as_raw();
        let display_handle = window
            .display_handle()
            .map_err(|e| format!("display_handle: {:?}", e))?
            .as_raw();
        let platform_extension = match window_handle {
            RawWindowHandle::Win32(_) => ash::khr::win32_surface::NAME,
            RawWindowHandle::Xlib(_) => ash::khr::xlib_surface::NAME,
            RawWindowHandle::Wayland(_) => ash::khr::wayland_surface::NAME,
            other => return Err(format!("Unsupported window handle: {:?}", other)),
        };
        let extensions = [ash::khr::surface::NAME.as_ptr(), platform_extension.as_ptr()];
        let parts = create_instance(&extensions)?;
        let surface = unsafe {
            match (window_handle, display_handle) {
                (RawWindowHandle::Win32(win), _) => {
                    let info = vk::Win32SurfaceCreateInfoKHR::default()
                        .hwnd(win.hwnd.get())
                        .hinstance(win.hinstance.map(|h| h.get()).unwrap_or(0));
                    ash::khr::win32_surface::Instance::new(&parts.entry, &parts.instance)
                        .create_win32_surface(&info, None)
                        .map_err(|e| format!("create_win32_surface: {:?}", e))?
                }
                (RawWindowHandle::Xlib(win), RawDisplayHandle::Xlib(display)) => {
                    let dpy = display
                        .display
                        .ok_or("Xlib display handle is null")?
                        .as_ptr();
                    let info = vk::XlibSurfaceCreateInfoKHR::default()
                        .dpy(dpy.cast())
                        .window(win.window);
                    ash::khr::xlib_surface::Instance::new(&parts.entry, &parts.instance)
                        .create_xlib_surface(&info, None)
                        .map_err(|e| format!("create_xlib_surface: {:?}", e))?
                }
                (RawWindowHandle::Wayland(win), RawDisplayHandle::Wayland(display)) => {
                    let info = vk::WaylandSurfaceCreateInfoKHR::default()
                        .display(display.display.as_ptr())
                        .surface(win.surface.as_ptr());
                    ash::khr::wayland_surface::Instance::new(&parts.entry, &parts.instance)
                        .create_wayland_surface(&info, None)
                        .map_err(|e| format!("create_wayland_surface: {:?}", e))?
                }
                _ => return Err("Window and display handles do not match".to_string()),
            }
        };
        let surface_loader = ash::khr::surface::Instance::new(&parts.entry, &parts.instance);
        let (physical_device, family) = pick_physical_device(&parts.instance, |pd, family| unsafe {
            surface_loader
                .get_physical_device_surface_support(pd, family, surface)
                .unwrap_or(false)
        })?;
        let swapchain_ext = [ash::khr::swapchain::NAME.as_ptr()];
        Self::finish(parts, physical_device, family, &swapchain_ext, Some((surface, surface_loader)))
    }

    fn buffer_usage_to_vk(usage: BufferUsage) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if usage.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if usage.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if usage.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }

    fn find_memory_type(&self, type_bits: u32, wanted: vk::MemoryPropertyFlags) -> Option<u32> {
        let props = unsafe {
            self.instance
                .get_physical_device_memory_properties(self.physical_device)
        };
        (0..props.memory_type_count).find(|i| {
            let suitable = (type_bits & (1 << i)) != 0;
            suitable && props.memory_types[*i as usize].property_flags.contains(wanted)
        })
    }

    /// Record commands with a one-shot encoder, submit and block until the queue drains.
    fn submit_one_shot(
        &self,
        record: impl FnOnce(&mut dyn CommandEncoder) -> Result<(), String>,
    ) -> Result<(), String> {
        let mut encoder = self.create_command_encoder()?;
        record(encoder.as_mut())?;
        let cmd = encoder.finish()?;
        let queue = self.queue()?;
        queue.submit(&[cmd.as_ref()], &[], &[], None)?;
        unsafe {
            self.device
                .queue_wait_idle(self.queue)
                .map_err(|e| format!("queue_wait_idle: {:?}", e))
        }
    }
}

/// Surface created before the logical device, waiting for its swapchain loader.
#[cfg(feature = "window")]
type PendingSurface = Option<(vk::SurfaceKHR, ash::khr::surface::Instance)>;
#[cfg(not(feature = "window"))]
type PendingSurface = ();

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }
        #[cfg(feature = "window")]
        if let Some(ref s) = self.surface_state {
            unsafe {
                s.surface_loader.destroy_surface(s.surface, None);
            }
        }
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Device for VulkanDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String> {
        let size = desc.size.max(1);
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(Self::buffer_usage_to_vk(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe {
            self.device
                .create_buffer(&create_info, None)
                .map_err(|e| format!("create_buffer: {:?}", e))?
        };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let host_visible = desc.memory == BufferMemoryPreference::HostVisible;
        let wanted = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let Some(memory_type_index) = self.find_memory_type(requirements.memory_type_bits, wanted) else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(format!("No memory type with {:?} for buffer {:?}", wanted, desc.label));
        };
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(format!("allocate_memory: {:?}", e));
            }
        };
        let vk_buffer = VulkanBuffer {
            device: Arc::clone(&self.device),
            buffer,
            memory,
            size,
            id: self.next_id(),
            host_visible,
        };
        unsafe {
            self.device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| format!("bind_buffer_memory: {:?}", e))?;
        }
        Ok(Box::new(vk_buffer))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
        let tex = texture::create_texture(
            Arc::clone(&self.device),
            &self.instance,
            self.physical_device,
            desc,
            self.next_id(),
        )?;
        Ok(Box::new(tex))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String> {
        let sampler = texture::create_sampler(Arc::clone(&self.device), desc, self.anisotropy_enabled)?;
        Ok(Box::new(sampler))
    }

    fn create_render_pass_layout(
        &self,
        desc: &RenderPassLayoutDescriptor,
    ) -> Result<Box<dyn RenderPassLayout>, String> {
        let layout = render_pass::VulkanRenderPassLayout::create(Arc::clone(&self.device), desc, self.next_id())?;
        Ok(Box::new(layout))
    }

    fn create_framebuffer(
        &self,
        render_pass: &dyn RenderPassLayout,
        attachments: &[&dyn Texture],
        extent: (u32, u32),
    ) -> Result<Box<dyn Framebuffer>, String> {
        let fb = render_pass::VulkanFramebuffer::create(
            Arc::clone(&self.device),
            render_pass,
            attachments,
            extent,
            self.next_id(),
        )?;
        Ok(Box::new(fb))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
        render_pass: &dyn RenderPassLayout,
        subpass: u32,
    ) -> Result<Box<dyn GraphicsPipeline>, String> {
        let vk_pass = render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPassLayout>()
            .ok_or("render pass is not a Vulkan render pass")?;
        let pipe = pipeline::VulkanGraphicsPipeline::create(&self.device, desc, vk_pass, subpass)?;
        Ok(Box::new(pipe))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Box<dyn DescriptorSetLayout>, String> {
        let layout = descriptor::create_descriptor_set_layout(&self.device, bindings)?;
        Ok(Box::new(layout))
    }

    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String> {
        self.create_descriptor_pool_with_descriptor(&DescriptorPoolDescriptor {
            max_sets,
            pool_sizes: Vec::new(),
        })
    }

    fn create_descriptor_pool_with_descriptor(
        &self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<Box<dyn DescriptorPool>, String> {
        let pool = descriptor::create_descriptor_pool(&self.device, desc)?;
        Ok(Box::new(pool))
    }

    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>, String> {
        let encoder = command::VulkanCommandEncoder::begin(Arc::clone(&self.device), self.command_pool)?;
        Ok(Box::new(encoder))
    }

    fn create_bundle_encoder(
        &self,
        render_pass: &dyn RenderPassLayout,
        subpass: u32,
        extent: (u32, u32),
    ) -> Result<Box<dyn RenderBundleEncoder>, String> {
        let vk_pass = render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPassLayout>()
            .ok_or("render pass is not a Vulkan render pass")?;
        let encoder = command::VulkanBundleEncoder::begin(
            Arc::clone(&self.device),
            self.command_pool,
            vk_pass.render_pass,
            subpass,
            vk::Extent2D { width: extent.0, height: extent.1 },
        )?;
        Ok(Box::new(encoder))
    }

    fn queue(&self) -> Result<Box<dyn crate::Queue>, String> {
        Ok(Box::new(queue::VulkanQueue::new(Arc::clone(&self.device), self.queue)))
    }

    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        let vk_buf = raw_buffer(buffer)?;
        if !vk_buf.host_visible {
            return Err("write_buffer requires a host-visible buffer".to_string());
        }
        if offset + data.len() as u64 > vk_buf.size {
            return Err(format!(
                "write_buffer: {} bytes at offset {} overflow buffer of {} bytes",
                data.len(),
                offset,
                vk_buf.size
            ));
        }
        if data.is_empty() {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(vk_buf.memory, offset, data.len() as u64, vk::MemoryMapFlags::empty())
                .map_err(|e| format!("map_memory: {:?}", e))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(vk_buf.memory);
        }
        Ok(())
    }

    fn upload_to_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        if buffer.host_visible() {
            return self.write_buffer(buffer, offset, data);
        }
        let staging = self.create_buffer(&BufferDescriptor {
            label: Some("staging"),
            size: data.len() as u64,
            usage: BufferUsage::COPY_SRC,
            memory: BufferMemoryPreference::HostVisible,
        })?;
        self.write_buffer(staging.as_ref(), 0, data)?;
        self.submit_one_shot(|encoder| {
            encoder.copy_buffer_to_buffer(staging.as_ref(), 0, buffer, offset, data.len() as u64)
        })
    }

    fn upload_to_texture(&self, texture: &dyn Texture, data: &[u8]) -> Result<(), String> {
        let (width, height, _) = texture.size();
        let expected = u64::from(width) * u64::from(height) * u64::from(texture.format().bytes_per_pixel());
        if data.len() as u64 != expected {
            return Err(format!(
                "upload_to_texture: expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                texture.format(),
                data.len()
            ));
        }
        let staging = self.create_buffer(&BufferDescriptor {
            label: Some("texture staging"),
            size: expected,
            usage: BufferUsage::COPY_SRC,
            memory: BufferMemoryPreference::HostVisible,
        })?;
        self.write_buffer(staging.as_ref(), 0, data)?;
        self.submit_one_shot(|encoder| {
            encoder.pipeline_barrier_texture(texture, ImageLayout::Undefined, ImageLayout::TransferDst)?;
            encoder.copy_buffer_to_texture(staging.as_ref(), 0, texture, (width, height))?;
            encoder.pipeline_barrier_texture(texture, ImageLayout::TransferDst, ImageLayout::ShaderReadOnly)
        })
    }

    fn wait_idle(&self) -> Result<(), String> {
        unsafe {
            self.device
                .queue_wait_idle(self.queue)
                .map_err(|e| format!("queue_wait_idle: {:?}", e))?;
            self.device
                .device_wait_idle()
                .map_err(|e| format!("device_wait_idle: {:?}", e))
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String> {
        let create_info = vk::FenceCreateInfo::default().flags(if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        });
        let fence = unsafe {
            self.device
                .create_fence(&create_info, None)
                .map_err(|e| format!("create_fence: {:?}", e))?
        };
        Ok(Box::new(VulkanFence {
            device: Arc::clone(&self.device),
            fence,
        }))
    }

    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, String> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe {
            self.device
                .create_semaphore(&create_info, None)
                .map_err(|e| format!("create_semaphore: {:?}", e))?
        };
        Ok(Box::new(VulkanSemaphore {
            device: Arc::clone(&self.device),
            semaphore,
        }))
    }

    #[cfg(feature = "window")]
    fn create_swapchain(
        &self,
        extent: (u32, u32),
        old_swapchain: Option<&dyn crate::Swapchain>,
    ) -> Result<Box<dyn crate::Swapchain>, String> {
        let state = self
            .surface_state
            .as_ref()
            .ok_or("Device was created without a surface")?;
        let old = old_swapchain
            .and_then(|s| s.as_any().downcast_ref::<VulkanSwapchain>())
            .map(|s| s.raw())
            .unwrap_or(vk::SwapchainKHR::null());
        let swapchain = swapchain::VulkanSwapchain::create(
            Arc::clone(&self.device),
            self.physical_device,
            &state.surface_loader,
            state.swapchain_loader.clone(),
            state.surface,
            self.queue,
            extent,
            old,
            &self.next_id,
        )?;
        Ok(Box::new(swapchain))
    }
}

pub struct VulkanFence {
    device: Arc<ash::Device>,
    fence: vk::Fence,
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

impl std::fmt::Debug for VulkanFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFence").finish()
    }
}

impl Fence for VulkanFence {
    fn wait(&self, timeout_ns: u64) -> Result<(), String> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout_ns)
                .map_err(|e| format!("wait_for_fences: {:?}", e))
        }
    }

    fn reset(&self) -> Result<(), String> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .map_err(|e| format!("reset_fences: {:?}", e))
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct VulkanSemaphore {
    device: Arc<ash::Device>,
    semaphore: vk::Semaphore,
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

impl std::fmt::Debug for VulkanSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanSemaphore").finish()
    }
}

impl Semaphore for VulkanSemaphore {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
