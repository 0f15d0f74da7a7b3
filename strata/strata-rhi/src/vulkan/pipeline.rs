//! Vulkan graphics pipeline, created against an existing render pass and subpass.

use crate::{
    BlendFactor, BlendOp, CompareOp, CullMode, FrontFace, GraphicsPipeline, GraphicsPipelineDescriptor,
    PolygonMode, PrimitiveTopology, VertexFormat, VertexInputDescriptor, VertexInputRate,
};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

use super::descriptor::create_raw_set_layout;
use super::render_pass::VulkanRenderPassLayout;
use crate::RenderPassLayout;

pub struct VulkanGraphicsPipeline {
    device: Arc<ash::Device>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl VulkanGraphicsPipeline {
    pub(crate) fn create(
        device: &Arc<ash::Device>,
        desc: &GraphicsPipelineDescriptor,
        render_pass: &VulkanRenderPassLayout,
        subpass: u32,
    ) -> Result<Self, String> {
        if subpass >= render_pass.subpass_count() {
            return Err(format!(
                "pipeline {:?}: subpass {} out of range ({} subpasses)",
                desc.label,
                subpass,
                render_pass.subpass_count()
            ));
        }
        let expected_targets = render_pass.color_attachment_count(subpass) as usize;
        if desc.color_targets.len() != expected_targets {
            return Err(format!(
                "pipeline {:?}: {} color targets, subpass {} writes {}",
                desc.label,
                desc.color_targets.len(),
                subpass,
                expected_targets
            ));
        }

        let mut set_layouts = Vec::with_capacity(desc.set_layouts.len());
        for bindings in &desc.set_layouts {
            match create_raw_set_layout(device, bindings) {
                Ok(layout) => set_layouts.push(layout),
                Err(e) => {
                    Self::destroy_set_layouts(device, &set_layouts);
                    return Err(e);
                }
            }
        }
        let layout_create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = match unsafe { device.create_pipeline_layout(&layout_create_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                Self::destroy_set_layouts(device, &set_layouts);
                return Err(format!("create_pipeline_layout: {:?}", e));
            }
        };

        match Self::create_pipeline(device, desc, render_pass, subpass, pipeline_layout) {
            Ok(pipeline) => Ok(Self {
                device: Arc::clone(device),
                pipeline,
                layout: pipeline_layout,
                set_layouts,
            }),
            Err(e) => {
                unsafe { device.destroy_pipeline_layout(pipeline_layout, None) };
                Self::destroy_set_layouts(device, &set_layouts);
                Err(e)
            }
        }
    }

    fn destroy_set_layouts(device: &ash::Device, layouts: &[vk::DescriptorSetLayout]) {
        for layout in layouts {
            unsafe { device.destroy_descriptor_set_layout(*layout, None) };
        }
    }

    fn create_pipeline(
        device: &ash::Device,
        desc: &GraphicsPipelineDescriptor,
        render_pass: &VulkanRenderPassLayout,
        subpass: u32,
        pipeline_layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline, String> {
        let mut modules = Vec::new();
        let mut entry_names: Vec<CString> = Vec::new();
        let result = (|| {
            modules.push(Self::create_shader_module(device, &desc.vertex_shader.source)?);
            entry_names.push(CString::new(desc.vertex_shader.entry_point.as_str()).map_err(|e| e.to_string())?);
            if let Some(ref fs) = desc.fragment_shader {
                modules.push(Self::create_shader_module(device, &fs.source)?);
                entry_names.push(CString::new(fs.entry_point.as_str()).map_err(|e| e.to_string())?);
            }

            let stage_flags = [vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT];
            let stages: Vec<vk::PipelineShaderStageCreateInfo> = modules
                .iter()
                .zip(entry_names.iter())
                .zip(stage_flags.iter())
                .map(|((module, name), stage)| {
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(*stage)
                        .module(*module)
                        .name(name)
                })
                .collect();

            let (binding_descriptions, attribute_descriptions) = vertex_input_descriptions(&desc.vertex_input);
            let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(&binding_descriptions)
                .vertex_attribute_descriptions(&attribute_descriptions);
            let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
                .topology(topology_to_vk(desc.primitive_topology))
                .primitive_restart_enable(false);
            let viewport_state = vk::PipelineViewportStateCreateInfo::default()
                .viewport_count(1)
                .scissor_count(1);
            let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
                .depth_clamp_enable(false)
                .rasterizer_discard_enable(false)
                .polygon_mode(polygon_mode_to_vk(desc.rasterization.polygon_mode))
                .line_width(1.0)
                .cull_mode(cull_mode_to_vk(desc.rasterization.cull_mode))
                .front_face(front_face_to_vk(desc.rasterization.front_face))
                .depth_bias_enable(false);
            let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
                .rasterization_samples(vk::SampleCountFlags::TYPE_1);

            let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
                .color_targets
                .iter()
                .map(|t| match t.blend.as_ref() {
                    None => vk::PipelineColorBlendAttachmentState::default()
                        .blend_enable(false)
                        .color_write_mask(vk::ColorComponentFlags::RGBA),
                    Some(b) => vk::PipelineColorBlendAttachmentState::default()
                        .blend_enable(true)
                        .src_color_blend_factor(blend_factor_to_vk(b.color.src_factor))
                        .dst_color_blend_factor(blend_factor_to_vk(b.color.dst_factor))
                        .color_blend_op(blend_op_to_vk(b.color.operation))
                        .src_alpha_blend_factor(blend_factor_to_vk(b.alpha.src_factor))
                        .dst_alpha_blend_factor(blend_factor_to_vk(b.alpha.dst_factor))
                        .alpha_blend_op(blend_op_to_vk(b.alpha.operation))
                        .color_write_mask(vk::ColorComponentFlags::RGBA),
                })
                .collect();
            let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
                .logic_op_enable(false)
                .attachments(&color_blend_attachments);

            // Depth state only applies when the subpass actually has a depth attachment.
            let depth_stencil = match desc.depth_stencil.as_ref() {
                Some(ds) if render_pass.subpass_uses_depth(subpass) => {
                    vk::PipelineDepthStencilStateCreateInfo::default()
                        .depth_test_enable(true)
                        .depth_write_enable(ds.depth_write_enabled)
                        .depth_compare_op(compare_op_to_vk(ds.depth_compare))
                        .depth_bounds_test_enable(false)
                        .stencil_test_enable(false)
                }
                _ => vk::PipelineDepthStencilStateCreateInfo::default()
                    .depth_test_enable(false)
                    .depth_write_enable(false)
                    .stencil_test_enable(false),
            };

            let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
            let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

            let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
                .stages(&stages)
                .vertex_input_state(&vertex_input_info)
                .input_assembly_state(&input_assembly)
                .viewport_state(&viewport_state)
                .rasterization_state(&rasterization)
                .multisample_state(&multisampling)
                .color_blend_state(&color_blend)
                .depth_stencil_state(&depth_stencil)
                .dynamic_state(&dynamic_state)
                .layout(pipeline_layout)
                .render_pass(render_pass.render_pass)
                .subpass(subpass);
            let pipelines = unsafe {
                device
                    .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                    .map_err(|(_partial, res)| format!("create_graphics_pipelines: {:?}", res))?
            };
            pipelines
                .first()
                .copied()
                .ok_or_else(|| "create_graphics_pipelines returned nothing".to_string())
        })();
        for module in modules {
            unsafe { device.destroy_shader_module(module, None) };
        }
        result
    }

    fn create_shader_module(device: &ash::Device, source: &[u8]) -> Result<vk::ShaderModule, String> {
        if source.is_empty() || source.len() % 4 != 0 {
            return Err(format!("SPIR-V must be a non-empty multiple of 4 bytes (got {})", source.len()));
        }
        let code_u32: Vec<u32> = source
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code_u32);
        unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(|e| format!("create_shader_module: {:?}", e))
        }
    }
}

fn vertex_input_descriptions(
    desc: &VertexInputDescriptor,
) -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let bindings = desc
        .bindings
        .iter()
        .map(|b| {
            vk::VertexInputBindingDescription::default()
                .binding(b.binding)
                .stride(b.stride)
                .input_rate(match b.input_rate {
                    VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
                    VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
                })
        })
        .collect();
    let attributes = desc
        .attributes
        .iter()
        .map(|a| {
            vk::VertexInputAttributeDescription::default()
                .location(a.location)
                .binding(a.binding)
                .format(vertex_format_to_vk(a.format))
                .offset(a.offset)
        })
        .collect();
    (bindings, attributes)
}

fn vertex_format_to_vk(f: VertexFormat) -> vk::Format {
    match f {
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Uint32x4 => vk::Format::R32G32B32A32_UINT,
    }
}

fn topology_to_vk(t: PrimitiveTopology) -> vk::PrimitiveTopology {
    match t {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn polygon_mode_to_vk(p: PolygonMode) -> vk::PolygonMode {
    match p {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

fn cull_mode_to_vk(c: CullMode) -> vk::CullModeFlags {
    match c {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

fn front_face_to_vk(f: FrontFace) -> vk::FrontFace {
    match f {
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
    }
}

fn blend_factor_to_vk(f: BlendFactor) -> vk::BlendFactor {
    match f {
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn blend_op_to_vk(o: BlendOp) -> vk::BlendOp {
    match o {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
    }
}

fn compare_op_to_vk(o: CompareOp) -> vk::CompareOp {
    match o {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

impl Drop for VulkanGraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
        Self::destroy_set_layouts(&self.device, &self.set_layouts);
    }
}

impl std::fmt::Debug for VulkanGraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanGraphicsPipeline").finish()
    }
}

impl GraphicsPipeline for VulkanGraphicsPipeline {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
