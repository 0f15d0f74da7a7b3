//! Vulkan render pass objects with explicit subpasses, and framebuffers bound to them.

use crate::{
    AttachmentDescription, Framebuffer, LoadOp, RenderPassLayout, RenderPassLayoutDescriptor,
    ResourceId, StoreOp, Texture,
};
use ash::vk;
use std::sync::Arc;

use super::texture::texture_format_to_vk;
use super::{image_handles, image_layout_to_vk};

fn load_op_to_vk(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

fn store_op_to_vk(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

fn attachment_to_vk(att: &AttachmentDescription) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(texture_format_to_vk(att.format))
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(load_op_to_vk(att.load_op))
        .store_op(store_op_to_vk(att.store_op))
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(image_layout_to_vk(att.initial_layout))
        .final_layout(image_layout_to_vk(att.final_layout))
}

/// Stage and access masks for one side of a subpass dependency.
/// External sides cover color output and fragment reads (offscreen targets sampled by a later pass).
fn dependency_side(subpass: Option<u32>, is_src: bool) -> (u32, vk::PipelineStageFlags, vk::AccessFlags) {
    match subpass {
        Some(index) if is_src => (
            index,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        Some(index) => (
            index,
            vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags::INPUT_ATTACHMENT_READ
                | vk::AccessFlags::SHADER_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        None if is_src => (
            vk::SUBPASS_EXTERNAL,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::empty(),
        ),
        None => (
            vk::SUBPASS_EXTERNAL,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::SHADER_READ,
        ),
    }
}

#[derive(Debug, Clone)]
struct SubpassInfo {
    color_count: u32,
    uses_depth: bool,
}

pub struct VulkanRenderPassLayout {
    device: Arc<ash::Device>,
    pub(crate) render_pass: vk::RenderPass,
    id: ResourceId,
    attachment_count: usize,
    subpasses: Vec<SubpassInfo>,
}

impl VulkanRenderPassLayout {
    pub(crate) fn create(
        device: Arc<ash::Device>,
        desc: &RenderPassLayoutDescriptor,
        id: ResourceId,
    ) -> Result<Self, String> {
        if desc.subpasses.is_empty() {
            return Err(format!("render pass {:?} has no subpasses", desc.label));
        }
        let mut attachments: Vec<vk::AttachmentDescription> =
            desc.color_attachments.iter().map(attachment_to_vk).collect();
        let depth_index = desc.depth_stencil_attachment.as_ref().map(|d| {
            attachments.push(attachment_to_vk(d));
            (attachments.len() - 1) as u32
        });
        let attachment_count = attachments.len();

        // Reference arrays must outlive the create call; build them all first.
        let mut color_refs: Vec<Vec<vk::AttachmentReference>> = Vec::with_capacity(desc.subpasses.len());
        let mut input_refs: Vec<Vec<vk::AttachmentReference>> = Vec::with_capacity(desc.subpasses.len());
        let mut depth_refs: Vec<Option<vk::AttachmentReference>> = Vec::with_capacity(desc.subpasses.len());
        let mut infos = Vec::with_capacity(desc.subpasses.len());
        for (i, sp) in desc.subpasses.iter().enumerate() {
            for &a in sp.color_attachments.iter().chain(sp.input_attachments.iter()) {
                if a as usize >= attachment_count {
                    return Err(format!("subpass {} references missing attachment {}", i, a));
                }
            }
            color_refs.push(
                sp.color_attachments
                    .iter()
                    .map(|&a| {
                        vk::AttachmentReference::default()
                            .attachment(a)
                            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    })
                    .collect(),
            );
            input_refs.push(
                sp.input_attachments
                    .iter()
                    .map(|&a| {
                        vk::AttachmentReference::default()
                            .attachment(a)
                            .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    })
                    .collect(),
            );
            let depth = match sp.depth_stencil_attachment {
                Some(a) if Some(a) == depth_index => Some(
                    vk::AttachmentReference::default()
                        .attachment(a)
                        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                ),
                Some(a) => return Err(format!("subpass {} uses {} as depth, which is not the depth attachment", i, a)),
                None => None,
            };
            depth_refs.push(depth);
            infos.push(SubpassInfo {
                color_count: sp.color_attachments.len() as u32,
                uses_depth: depth.is_some(),
            });
        }

        let subpasses: Vec<vk::SubpassDescription> = (0..desc.subpasses.len())
            .map(|i| {
                let sp = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i])
                    .input_attachments(&input_refs[i]);
                match depth_refs[i].as_ref() {
                    Some(d) => sp.depth_stencil_attachment(d),
                    None => sp,
                }
            })
            .collect();

        let dependencies: Vec<vk::SubpassDependency> = desc
            .dependencies
            .iter()
            .map(|d| {
                let (src, src_stage, src_access) = dependency_side(d.src_subpass, true);
                let (dst, dst_stage, dst_access) = dependency_side(d.dst_subpass, false);
                let flags = if d.src_subpass.is_some() && d.dst_subpass.is_some() {
                    vk::DependencyFlags::BY_REGION
                } else {
                    vk::DependencyFlags::empty()
                };
                vk::SubpassDependency::default()
                    .src_subpass(src)
                    .dst_subpass(dst)
                    .src_stage_mask(src_stage)
                    .dst_stage_mask(dst_stage)
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .dependency_flags(flags)
            })
            .collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe {
            device
                .create_render_pass(&create_info, None)
                .map_err(|e| format!("create_render_pass: {:?}", e))?
        };
        Ok(Self {
            device,
            render_pass,
            id,
            attachment_count,
            subpasses: infos,
        })
    }
}

impl Drop for VulkanRenderPassLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

impl std::fmt::Debug for VulkanRenderPassLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanRenderPassLayout")
            .field("id", &self.id)
            .field("subpasses", &self.subpasses)
            .finish()
    }
}

impl RenderPassLayout for VulkanRenderPassLayout {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }

    fn color_attachment_count(&self, subpass: u32) -> u32 {
        self.subpasses
            .get(subpass as usize)
            .map(|s| s.color_count)
            .unwrap_or(0)
    }

    fn subpass_uses_depth(&self, subpass: u32) -> bool {
        self.subpasses
            .get(subpass as usize)
            .map(|s| s.uses_depth)
            .unwrap_or(false)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

pub struct VulkanFramebuffer {
    device: Arc<ash::Device>,
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) extent: vk::Extent2D,
    id: ResourceId,
}

impl VulkanFramebuffer {
    pub(crate) fn create(
        device: Arc<ash::Device>,
        render_pass: &dyn RenderPassLayout,
        attachments: &[&dyn Texture],
        extent: (u32, u32),
        id: ResourceId,
    ) -> Result<Self, String> {
        let vk_pass = render_pass
            .as_any()
            .downcast_ref::<VulkanRenderPassLayout>()
            .ok_or("render pass is not a Vulkan render pass")?;
        if attachments.len() != vk_pass.attachment_count {
            return Err(format!(
                "framebuffer has {} attachments, render pass expects {}",
                attachments.len(),
                vk_pass.attachment_count
            ));
        }
        let views = attachments
            .iter()
            .map(|t| image_handles(*t).map(|(_, view)| view))
            .collect::<Result<Vec<_>, _>>()?;
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(vk_pass.render_pass)
            .attachments(&views)
            .width(extent.0)
            .height(extent.1)
            .layers(1);
        let framebuffer = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(|e| format!("create_framebuffer: {:?}", e))?
        };
        Ok(Self {
            device,
            framebuffer,
            extent: vk::Extent2D {
                width: extent.0,
                height: extent.1,
            },
            id,
        })
    }
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

impl std::fmt::Debug for VulkanFramebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFramebuffer")
            .field("id", &self.id)
            .field("extent", &self.extent)
            .finish()
    }
}

impl Framebuffer for VulkanFramebuffer {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn extent(&self) -> (u32, u32) {
        (self.extent.width, self.extent.height)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
