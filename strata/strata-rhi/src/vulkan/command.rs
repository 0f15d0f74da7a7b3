//! Vulkan command recording: primary encoder, secondary (bundle) encoder and the shared draw recorder.

use crate::{
    Buffer, ClearValue, CommandBuffer, CommandEncoder, DescriptorSet, GraphicsPipeline, ImageLayout,
    IndexFormat, RenderBundleEncoder, RenderPass, RenderPassBegin, Texture,
};
use ash::vk;
use std::sync::Arc;

use super::descriptor::VulkanDescriptorSet;
use super::pipeline::VulkanGraphicsPipeline;
use super::render_pass::{VulkanFramebuffer, VulkanRenderPassLayout};
use super::{image_handles, image_layout_to_vk, raw_buffer};

fn allocate(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    level: vk::CommandBufferLevel,
) -> Result<vk::CommandBuffer, String> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(level)
        .command_buffer_count(1);
    let buffers = unsafe {
        device
            .allocate_command_buffers(&allocate_info)
            .map_err(|e| format!("allocate_command_buffers: {:?}", e))?
    };
    buffers
        .first()
        .copied()
        .ok_or_else(|| "allocate_command_buffers returned nothing".to_string())
}

/// Primary command encoder. Render passes it begins expect secondary command buffers as contents.
pub struct VulkanCommandEncoder {
    device: Arc<ash::Device>,
    command_pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
    finished: bool,
}

impl VulkanCommandEncoder {
    pub(crate) fn begin(device: Arc<ash::Device>, command_pool: vk::CommandPool) -> Result<Self, String> {
        let buffer = allocate(&device, command_pool, vk::CommandBufferLevel::PRIMARY)?;
        let encoder = Self {
            device,
            command_pool,
            buffer,
            finished: false,
        };
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            encoder
                .device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(|e| format!("begin_command_buffer: {:?}", e))?;
        }
        Ok(encoder)
    }
}

impl Drop for VulkanCommandEncoder {
    fn drop(&mut self) {
        if !self.finished {
            unsafe {
                let _ = self.device.end_command_buffer(self.buffer);
                self.device.free_command_buffers(self.command_pool, &[self.buffer]);
            }
        }
    }
}

impl std::fmt::Debug for VulkanCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandEncoder").finish()
    }
}

impl CommandEncoder for VulkanCommandEncoder {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>) -> Result<(), String> {
        let pass = begin
            .render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPassLayout>()
            .ok_or("render pass is not a Vulkan render pass")?;
        let framebuffer = begin
            .framebuffer
            .as_any()
            .downcast_ref::<VulkanFramebuffer>()
            .ok_or("framebuffer is not a Vulkan framebuffer")?;
        let clear_values: Vec<vk::ClearValue> = begin
            .clear_values
            .iter()
            .map(|cv| match *cv {
                ClearValue::Color(c) => vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [c.r, c.g, c.b, c.a],
                    },
                },
                ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
                },
            })
            .collect();
        let render_pass_begin = vk::RenderPassBeginInfo::default()
            .render_pass(pass.render_pass)
            .framebuffer(framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                self.buffer,
                &render_pass_begin,
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            );
        }
        Ok(())
    }

    fn execute_bundles(&mut self, bundles: &[&dyn CommandBuffer]) {
        let raw: Vec<vk::CommandBuffer> = bundles
            .iter()
            .filter_map(|b| b.as_any().downcast_ref::<VulkanCommandBuffer>())
            .map(|b| b.buffer)
            .collect();
        if raw.is_empty() {
            return;
        }
        unsafe {
            self.device.cmd_execute_commands(self.buffer, &raw);
        }
    }

    fn next_subpass(&mut self) {
        unsafe {
            self.device
                .cmd_next_subpass(self.buffer, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.buffer);
        }
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), String> {
        let src_buf = raw_buffer(src)?;
        let dst_buf = raw_buffer(dst)?;
        let region = vk::BufferCopy::default()
            .src_offset(src_offset)
            .dst_offset(dst_offset)
            .size(size);
        unsafe {
            self.device
                .cmd_copy_buffer(self.buffer, src_buf.buffer, dst_buf.buffer, &[region]);
        }
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Texture,
        size: (u32, u32),
    ) -> Result<(), String> {
        let src_buf = raw_buffer(src)?;
        let (image, _) = image_handles(dst)?;
        let image_subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::BufferImageCopy::default()
            .buffer_offset(src_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(image_subresource)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: size.0,
                height: size.1,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.buffer,
                src_buf.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        Ok(())
    }

    fn pipeline_barrier_texture(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<(), String> {
        let (image, _) = image_handles(texture)?;
        let (src_access, src_stage, dst_access, dst_stage) = match (old_layout, new_layout) {
            (ImageLayout::Undefined, ImageLayout::TransferDst) => (
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (ImageLayout::TransferDst, ImageLayout::ShaderReadOnly) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            _ => (
                vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
            ),
        };
        let aspect_mask = if texture.format().is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(image_layout_to_vk(old_layout))
            .new_layout(image_layout_to_vk(new_layout))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(texture.mip_level_count())
                    .base_array_layer(0)
                    .layer_count(1),
            );
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        unsafe {
            self.device
                .end_command_buffer(self.buffer)
                .map_err(|e| format!("end_command_buffer: {:?}", e))?;
        }
        self.finished = true;
        Ok(Box::new(VulkanCommandBuffer {
            device: Arc::clone(&self.device),
            command_pool: self.command_pool,
            buffer: self.buffer,
        }))
    }
}

/// Draw-state recording into one command buffer inside a subpass.
pub(crate) struct DrawRecorder {
    device: Arc<ash::Device>,
    command_buffer: vk::CommandBuffer,
    extent: vk::Extent2D,
    pipeline_layout: Option<vk::PipelineLayout>,
}

impl std::fmt::Debug for DrawRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawRecorder")
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}

impl RenderPass for DrawRecorder {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline) {
        let Some(vk_pipe) = pipeline.as_any().downcast_ref::<VulkanGraphicsPipeline>() else {
            return;
        };
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                vk_pipe.pipeline,
            );
            // Pipelines use dynamic viewport/scissor; cover the full render area.
            let viewport = vk::Viewport::default()
                .width(self.extent.width as f32)
                .height(self.extent.height as f32)
                .max_depth(1.0);
            self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            let scissor = vk::Rect2D::default()
                .offset(vk::Offset2D { x: 0, y: 0 })
                .extent(self.extent);
            self.device.cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
        self.pipeline_layout = Some(vk_pipe.layout);
    }

    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet, dynamic_offsets: &[u32]) {
        let (Some(layout), Some(vk_set)) = (
            self.pipeline_layout,
            set.as_any().downcast_ref::<VulkanDescriptorSet>(),
        ) else {
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[vk_set.set],
                dynamic_offsets,
            );
        }
    }

    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64) {
        if let Ok(vk_buf) = raw_buffer(buffer) {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(self.command_buffer, index, &[vk_buf.buffer], &[offset]);
            }
        }
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat) {
        let index_type = match index_format {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        };
        if let Ok(vk_buf) = raw_buffer(buffer) {
            unsafe {
                self.device
                    .cmd_bind_index_buffer(self.command_buffer, vk_buf.buffer, offset, index_type);
            }
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

/// Secondary command encoder bound to one subpass of a render pass.
pub struct VulkanBundleEncoder {
    recorder: DrawRecorder,
    command_pool: vk::CommandPool,
    finished: bool,
}

impl VulkanBundleEncoder {
    pub(crate) fn begin(
        device: Arc<ash::Device>,
        command_pool: vk::CommandPool,
        render_pass: vk::RenderPass,
        subpass: u32,
        extent: vk::Extent2D,
    ) -> Result<Self, String> {
        let buffer = allocate(&device, command_pool, vk::CommandBufferLevel::SECONDARY)?;
        let encoder = Self {
            recorder: DrawRecorder {
                device,
                command_buffer: buffer,
                extent,
                pipeline_layout: None,
            },
            command_pool,
            finished: false,
        };
        let inheritance = vk::CommandBufferInheritanceInfo::default()
            .render_pass(render_pass)
            .subpass(subpass);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(
                vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE
                    | vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
            .inheritance_info(&inheritance);
        unsafe {
            encoder
                .recorder
                .device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(|e| format!("begin_command_buffer (secondary): {:?}", e))?;
        }
        Ok(encoder)
    }
}

impl Drop for VulkanBundleEncoder {
    fn drop(&mut self) {
        if !self.finished {
            unsafe {
                let device = &self.recorder.device;
                let _ = device.end_command_buffer(self.recorder.command_buffer);
                device.free_command_buffers(self.command_pool, &[self.recorder.command_buffer]);
            }
        }
    }
}

impl std::fmt::Debug for VulkanBundleEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBundleEncoder")
            .field("recorder", &self.recorder)
            .finish()
    }
}

impl RenderPass for VulkanBundleEncoder {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline) {
        self.recorder.set_pipeline(pipeline);
    }

    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet, dynamic_offsets: &[u32]) {
        self.recorder.bind_descriptor_set(set_index, set, dynamic_offsets);
    }

    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64) {
        self.recorder.set_vertex_buffer(index, buffer, offset);
    }

    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat) {
        self.recorder.set_index_buffer(buffer, offset, index_format);
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.recorder
            .draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.recorder
            .draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
    }
}

impl RenderBundleEncoder for VulkanBundleEncoder {
    fn as_render_pass(&mut self) -> &mut dyn RenderPass {
        self
    }

    fn finish(mut self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        unsafe {
            self.recorder
                .device
                .end_command_buffer(self.recorder.command_buffer)
                .map_err(|e| format!("end_command_buffer (secondary): {:?}", e))?;
        }
        self.finished = true;
        Ok(Box::new(VulkanCommandBuffer {
            device: Arc::clone(&self.recorder.device),
            command_pool: self.command_pool,
            buffer: self.recorder.command_buffer,
        }))
    }
}

/// A finished primary or secondary command buffer. Freed back to its pool on drop.
pub struct VulkanCommandBuffer {
    device: Arc<ash::Device>,
    command_pool: vk::CommandPool,
    pub(crate) buffer: vk::CommandBuffer,
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[self.buffer]);
        }
    }
}

impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandBuffer").finish()
    }
}

impl CommandBuffer for VulkanCommandBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
