//! Vulkan Queue: batched, non-blocking submission with per-descriptor semaphores.

use crate::{Fence, Queue, SubmitBatch};
use ash::vk;
use std::sync::Arc;

use super::command::VulkanCommandBuffer;
use super::{raw_fence, raw_semaphore};

pub struct VulkanQueue {
    device: Arc<ash::Device>,
    queue: vk::Queue,
}

impl VulkanQueue {
    pub fn new(device: Arc<ash::Device>, queue: vk::Queue) -> Self {
        Self { device, queue }
    }
}

impl std::fmt::Debug for VulkanQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanQueue").finish()
    }
}

/// Raw handles of one submission; kept alive while the `vk::SubmitInfo`s borrow them.
struct RawBatch {
    command_buffers: Vec<vk::CommandBuffer>,
    waits: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signals: Vec<vk::Semaphore>,
}

impl Queue for VulkanQueue {
    fn submit_batch(&self, batches: &[SubmitBatch<'_>], signal_fence: Option<&dyn Fence>) -> Result<(), String> {
        let mut raw = Vec::with_capacity(batches.len());
        for batch in batches {
            let command_buffers = batch
                .command_buffers
                .iter()
                .map(|b| {
                    b.as_any()
                        .downcast_ref::<VulkanCommandBuffer>()
                        .map(|vb| vb.buffer)
                        .ok_or_else(|| "command buffer is not a Vulkan command buffer".to_string())
                })
                .collect::<Result<Vec<_>, String>>()?;
            let waits: Vec<vk::Semaphore> = batch
                .wait_semaphores
                .iter()
                .filter_map(|s| raw_semaphore(*s))
                .collect();
            let signals: Vec<vk::Semaphore> = batch
                .signal_semaphores
                .iter()
                .filter_map(|s| raw_semaphore(*s))
                .collect();
            // Wait at color attachment output so acquired images and upstream passes are ready before we write.
            let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; waits.len()];
            raw.push(RawBatch {
                command_buffers,
                waits,
                wait_stages,
                signals,
            });
        }
        let submit_infos: Vec<vk::SubmitInfo> = raw
            .iter()
            .map(|r| {
                vk::SubmitInfo::default()
                    .command_buffers(&r.command_buffers)
                    .wait_semaphores(&r.waits)
                    .wait_dst_stage_mask(&r.wait_stages)
                    .signal_semaphores(&r.signals)
            })
            .collect();
        let fence = signal_fence.and_then(raw_fence).unwrap_or(vk::Fence::null());
        if submit_infos.is_empty() && fence == vk::Fence::null() {
            return Ok(());
        }
        unsafe {
            self.device
                .queue_submit(self.queue, &submit_infos, fence)
                .map_err(|e| format!("queue submit: {:?}", e))?;
        }
        Ok(())
    }
}
