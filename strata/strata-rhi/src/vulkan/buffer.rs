//! Vulkan Buffer: a VkBuffer with its own dedicated allocation.

use crate::{Buffer, ResourceId};
use ash::vk;
use std::sync::Arc;

pub struct VulkanBuffer {
    pub(crate) device: Arc<ash::Device>,
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) size: u64,
    pub(crate) id: ResourceId,
    pub(crate) host_visible: bool,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl std::fmt::Debug for VulkanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("host_visible", &self.host_visible)
            .finish()
    }
}

impl Buffer for VulkanBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn host_visible(&self) -> bool {
        self.host_visible
    }
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
