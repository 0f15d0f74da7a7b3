//! Strata RHI: Backend-agnostic Rendering Hardware Interface.
//! This crate defines the traits and types the frame orchestrator records against, plus a Vulkan backend.

use std::any::Any;
use std::fmt::Debug;

/// Unique identifier for a GPU resource.
pub type ResourceId = u64;

bitflags::bitflags! {
    /// Buffer usage flags; combine for buffers used in multiple ways (e.g. Vertex | CopyDst).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba8Srgb,
    Bgra8Srgb,
    R32Float,
    Rgba16Float,
    D32Float,
}

impl TextureFormat {
    /// Bytes per texel for tightly packed uploads.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Rgba8Srgb
            | TextureFormat::Bgra8Srgb
            | TextureFormat::R32Float
            | TextureFormat::D32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::D32Float)
    }
}

/// Texture dimension / type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    D2Array,
    Cube,
}

/// Physical-device limits the orchestrator needs to lay out per-instance data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Dynamic uniform offsets must be multiples of this value.
    pub min_uniform_buffer_offset_alignment: u64,
    /// Largest range a single uniform-buffer descriptor may cover.
    pub max_uniform_buffer_range: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_range: 16384,
        }
    }
}

/// The core device trait that all backends must implement.
pub trait Device: Send + Sync + Debug {
    /// Limits reported by the physical device backing this logical device.
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String>;
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String>;
    fn create_sampler(&self, desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String>;

    /// Create a render pass object with explicit attachments and one or more subpasses.
    /// Framebuffers and pipelines are created against it; it outlives both.
    fn create_render_pass_layout(
        &self,
        desc: &RenderPassLayoutDescriptor,
    ) -> Result<Box<dyn RenderPassLayout>, String>;

    /// Create a framebuffer binding concrete attachments to a render pass layout.
    /// Attachment order matches `RenderPassLayoutDescriptor` (colors first, then depth).
    fn create_framebuffer(
        &self,
        render_pass: &dyn RenderPassLayout,
        attachments: &[&dyn Texture],
        extent: (u32, u32),
    ) -> Result<Box<dyn Framebuffer>, String>;

    /// Create a graphics pipeline usable inside `subpass` of `render_pass` (or any compatible pass).
    /// The pipeline layout holds one descriptor-set layout per entry of `desc.set_layouts`, in order.
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
        render_pass: &dyn RenderPassLayout,
        subpass: u32,
    ) -> Result<Box<dyn GraphicsPipeline>, String>;

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Box<dyn DescriptorSetLayout>, String>;
    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String>;

    /// Create a descriptor pool with configurable per-type capacities.
    /// When `desc.pool_sizes` is empty, uses the same default as `create_descriptor_pool` (max_sets * 4 per type).
    fn create_descriptor_pool_with_descriptor(
        &self,
        desc: &DescriptorPoolDescriptor,
    ) -> Result<Box<dyn DescriptorPool>, String>;

    /// Create a primary command encoder for recording GPU commands.
    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>, String>;

    /// Create a secondary command encoder that records draw state for one subpass.
    /// The finished buffer is replayed with [`CommandEncoder::execute_bundles`].
    fn create_bundle_encoder(
        &self,
        render_pass: &dyn RenderPassLayout,
        subpass: u32,
        extent: (u32, u32),
    ) -> Result<Box<dyn RenderBundleEncoder>, String>;

    /// Get the main graphics queue for submissions.
    fn queue(&self) -> Result<Box<dyn Queue>, String>;

    /// Write data into a buffer (CPU to GPU). Buffer must be host-visible (Buffer::host_visible() == true).
    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String>;

    /// Upload data into any buffer (HostVisible or DeviceLocal).
    /// For HostVisible buffers, uses write_buffer. For DeviceLocal, uses staging buffer + copy.
    /// DeviceLocal buffers must have BufferUsage::COPY_DST. Blocks until upload completes.
    fn upload_to_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String>;

    /// Upload tightly packed texel data into mip 0 of a 2D texture through a staging buffer.
    /// Transitions Undefined -> TransferDst -> ShaderReadOnly and blocks until the queue is idle.
    fn upload_to_texture(&self, texture: &dyn Texture, data: &[u8]) -> Result<(), String>;

    /// Wait for the device to become idle (all submitted work finished).
    fn wait_idle(&self) -> Result<(), String>;

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, String>;
    /// Create a semaphore for GPU-GPU synchronization.
    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, String>;

    /// Create a swapchain for presentation (only supported when device was created with a window/surface).
    /// Returns Err for headless devices.
    /// When resizing, pass the current swapchain as `old_swapchain` so the driver can reuse resources (Vulkan oldSwapchain).
    fn create_swapchain(
        &self,
        extent: (u32, u32),
        old_swapchain: Option<&dyn Swapchain>,
    ) -> Result<Box<dyn Swapchain>, String> {
        let _ = (extent, old_swapchain);
        Err("Swapchain not supported (device created without surface)".to_string())
    }
}

/// Fence: CPU can wait for GPU to complete submitted work.
pub trait Fence: Send + Sync + Debug {
    fn wait(&self, timeout_ns: u64) -> Result<(), String>;
    fn reset(&self) -> Result<(), String>;
    fn as_any(&self) -> &dyn Any;
}

/// Semaphore: GPU-GPU synchronization between passes and with presentation.
pub trait Semaphore: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// One submission descriptor inside a batched queue submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitBatch<'a> {
    pub command_buffers: Vec<&'a dyn CommandBuffer>,
    pub wait_semaphores: Vec<&'a dyn Semaphore>,
    pub signal_semaphores: Vec<&'a dyn Semaphore>,
}

/// Queue for submitting work. Supports non-blocking submit with semaphores and fence.
/// The caller must keep command_buffers alive until the signal_fence has been waited on
/// (otherwise the GPU may still be executing and freeing the buffers causes DEVICE_LOST).
pub trait Queue: Send + Sync + Debug {
    /// Submit several descriptors in one call. Descriptors are ordered: a wait may only reference a
    /// semaphore signalled by an earlier descriptor or an earlier call. With no batches, only the fence
    /// is signalled (once all previously submitted work completes).
    fn submit_batch(&self, batches: &[SubmitBatch<'_>], signal_fence: Option<&dyn Fence>) -> Result<(), String>;

    fn submit(
        &self,
        command_buffers: &[&dyn CommandBuffer],
        wait_semaphores: &[&dyn Semaphore],
        signal_semaphores: &[&dyn Semaphore],
        signal_fence: Option<&dyn Fence>,
    ) -> Result<(), String> {
        let batch = SubmitBatch {
            command_buffers: command_buffers.to_vec(),
            wait_semaphores: wait_semaphores.to_vec(),
            signal_semaphores: signal_semaphores.to_vec(),
        };
        self.submit_batch(std::slice::from_ref(&batch), signal_fence)
    }
}

/// When true, buffer is mappable (host-visible) and write_buffer can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMemoryPreference {
    #[default]
    HostVisible,
    DeviceLocal,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<&'static str>,
    pub size: u64,
    pub usage: BufferUsage,
    /// HostVisible: mappable, write_buffer works. DeviceLocal: faster GPU access, write via copy from staging.
    pub memory: BufferMemoryPreference,
}

impl Default for BufferDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: 0,
            usage: BufferUsage::VERTEX,
            memory: BufferMemoryPreference::HostVisible,
        }
    }
}

pub trait Buffer: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn size(&self) -> u64;
    /// If true, Device::write_buffer can be used. If false, buffer is device-local; upload via staging copy.
    fn host_visible(&self) -> bool {
        true
    }
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<&'static str>,
    /// (width, height, layers). For 2D: layers=1.
    pub size: (u32, u32, u32),
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub dimension: TextureDimension,
    pub mip_level_count: u32,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: (1, 1, 1),
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::empty(),
            dimension: TextureDimension::D2,
            mip_level_count: 1,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

pub trait Texture: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn format(&self) -> TextureFormat;
    fn size(&self) -> (u32, u32, u32);
    fn dimension(&self) -> TextureDimension;
    fn mip_level_count(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

/// Filter mode for sampler min/mag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Address mode for sampler U/V/W.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<&'static str>,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub anisotropy_clamp: Option<f32>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            min_filter: FilterMode::Linear,
            mag_filter: FilterMode::Linear,
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            anisotropy_clamp: None,
        }
    }
}

/// Sampler for texture sampling (filter, address mode). Used with CombinedImageSampler in descriptor sets.
pub trait Sampler: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Graphics pipeline for rasterization (vertex + fragment).
pub trait GraphicsPipeline: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor for creating a graphics pipeline.
/// `color_targets` must have one entry per color attachment of the target subpass.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDescriptor {
    pub label: Option<&'static str>,
    pub vertex_shader: ShaderStage,
    pub fragment_shader: Option<ShaderStage>,
    pub vertex_input: VertexInputDescriptor,
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationState,
    pub color_targets: Vec<ColorTargetState>,
    pub depth_stencil: Option<DepthStencilState>,
    /// Descriptor set layouts, indexed by set number. Used to create the pipeline layout.
    pub set_layouts: Vec<Vec<DescriptorSetLayoutBinding>>,
}

#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub source: Vec<u8>, // SPIR-V bytes
    pub entry_point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexInputDescriptor {
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<VertexBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VertexFormat {
    #[default]
    Float32x3,
    Float32x2,
    Float32x4,
    Uint32x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Default)]
pub struct RasterizationState {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// Color blend state for one color attachment of the target subpass.
#[derive(Debug, Clone, Default)]
pub struct ColorTargetState {
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    /// Standard `src * a + dst * (1 - a)` blending.
    pub const ALPHA_BLENDING: BlendState = BlendState {
        color: BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOp::Add,
        },
        alpha: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOp::Add,
        },
    };
}

#[derive(Debug, Clone, Copy)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOp,
}

#[derive(Debug, Clone, Copy)]
pub enum BlendFactor {
    One,
    Zero,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy)]
pub enum BlendOp {
    Add,
    Subtract,
}

/// Depth test state for a graphics pipeline.
#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub depth_write_enabled: bool,
    pub depth_compare: CompareOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

/// Attachment of a render pass layout: format, load/store behavior and layout transitions.
#[derive(Debug, Clone)]
pub struct AttachmentDescription {
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    /// Layout the image is in when the pass begins. Undefined discards previous contents.
    pub initial_layout: ImageLayout,
    /// Layout the pass leaves the image in (e.g. PresentSrc for swapchain images, ShaderReadOnly to sample later).
    pub final_layout: ImageLayout,
}

/// Attachment references of one subpass, as indices into the layout's attachment list
/// (colors first, then depth).
#[derive(Debug, Clone, Default)]
pub struct SubpassDescription {
    pub color_attachments: Vec<u32>,
    /// Attachments written by an earlier subpass and read here as input attachments.
    pub input_attachments: Vec<u32>,
    pub depth_stencil_attachment: Option<u32>,
}

/// Execution/memory dependency between two subpasses. `None` means outside the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    pub src_subpass: Option<u32>,
    pub dst_subpass: Option<u32>,
}

/// Descriptor for a persistent render pass object with explicit subpasses.
#[derive(Debug, Clone)]
pub struct RenderPassLayoutDescriptor {
    pub label: Option<&'static str>,
    pub color_attachments: Vec<AttachmentDescription>,
    pub depth_stencil_attachment: Option<AttachmentDescription>,
    pub subpasses: Vec<SubpassDescription>,
    pub dependencies: Vec<SubpassDependency>,
}

impl RenderPassLayoutDescriptor {
    /// One color attachment rendered by a single subpass, with the usual external dependencies.
    pub fn single_color(label: &'static str, color: AttachmentDescription) -> Self {
        Self {
            label: Some(label),
            color_attachments: vec![color],
            depth_stencil_attachment: None,
            subpasses: vec![SubpassDescription {
                color_attachments: vec![0],
                ..Default::default()
            }],
            dependencies: vec![
                SubpassDependency { src_subpass: None, dst_subpass: Some(0) },
                SubpassDependency { src_subpass: Some(0), dst_subpass: None },
            ],
        }
    }
}

/// Persistent render pass object (attachments + subpasses). Pipelines and framebuffers are created against it.
pub trait RenderPassLayout: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn subpass_count(&self) -> u32;
    /// Number of color attachments written by `subpass`.
    fn color_attachment_count(&self, subpass: u32) -> u32;
    /// Whether `subpass` uses the depth attachment.
    fn subpass_uses_depth(&self, subpass: u32) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// Concrete attachments bound to a render pass layout.
pub trait Framebuffer: Send + Sync + Debug {
    fn id(&self) -> ResourceId;
    fn extent(&self) -> (u32, u32);
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Clear value for one attachment, in attachment order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color(ClearColor),
    DepthStencil { depth: f32, stencil: u32 },
}

/// Arguments for [`CommandEncoder::begin_render_pass`]. The render area is the framebuffer extent.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin<'a> {
    pub render_pass: &'a dyn RenderPassLayout,
    pub framebuffer: &'a dyn Framebuffer,
    pub clear_values: &'a [ClearValue],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// Primary command recording. Render passes begun here take their subpass contents from
/// secondary command buffers recorded with a [`RenderBundleEncoder`].
pub trait CommandEncoder: Debug {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>) -> Result<(), String>;
    /// Replay secondary command buffers inside the current subpass.
    fn execute_bundles(&mut self, bundles: &[&dyn CommandBuffer]);
    fn next_subpass(&mut self);
    fn end_render_pass(&mut self);
    fn copy_buffer_to_buffer(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Buffer,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), String>;
    /// Copy buffer data into a texture region. The caller must ensure the destination texture is in
    /// [`ImageLayout::TransferDst`] before this call (e.g. via [`Self::pipeline_barrier_texture`]);
    /// after the copy, transition to [`ImageLayout::ShaderReadOnly`] if the texture will be sampled.
    fn copy_buffer_to_texture(
        &mut self,
        src: &dyn Buffer,
        src_offset: u64,
        dst: &dyn Texture,
        size: (u32, u32),
    ) -> Result<(), String>;
    /// Insert a pipeline barrier for a layout transition.
    fn pipeline_barrier_texture(
        &mut self,
        texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) -> Result<(), String>;
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    TransferDst,
    TransferSrc,
    ShaderReadOnly,
    ColorAttachment,
    DepthStencilAttachment,
    General,
    /// For swapchain images before present.
    PresentSrc,
}

/// Draw-state recording shared by every recorder that lives inside a subpass.
pub trait RenderPass: Debug {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline);
    /// Bind a descriptor set for the currently bound graphics pipeline (set_index must match layout).
    /// `dynamic_offsets` supplies one offset per dynamic binding of the set, in binding order.
    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet, dynamic_offsets: &[u32]);
    fn set_vertex_buffer(&mut self, index: u32, buffer: &dyn Buffer, offset: u64);
    fn set_index_buffer(&mut self, buffer: &dyn Buffer, offset: u64, index_format: IndexFormat);
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}

/// Secondary command recording for one subpass.
pub trait RenderBundleEncoder: RenderPass {
    fn as_render_pass(&mut self) -> &mut dyn RenderPass;
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Descriptor binding type for layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    UniformBuffer,
    /// Uniform buffer addressed with a per-bind offset (see [`RenderPass::bind_descriptor_set`]).
    UniformBufferDynamic,
    StorageBuffer,
    SampledImage,
    /// Image + sampler in one binding; use write_sampled_image to bind both.
    CombinedImageSampler,
}

/// Descriptor set layout binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    pub count: u32,
    pub stages: ShaderStages,
}

/// Descriptor for creating a descriptor pool with configurable per-type capacities.
/// When `pool_sizes` is empty, backends use a default (e.g. max_sets * 4 per type).
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolDescriptor {
    pub max_sets: u32,
    /// Per-type descriptor counts (e.g. `(DescriptorType::CombinedImageSampler, 2)`).
    /// Types not listed get a backend default (e.g. max_sets * 4).
    pub pool_sizes: Vec<(DescriptorType, u32)>,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
    }
}

/// Descriptor set layout.
pub trait DescriptorSetLayout: Send + Sync + Debug {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding];
    fn as_any(&self) -> &dyn Any;
}

/// Descriptor pool for allocating sets.
pub trait DescriptorPool: Send + Sync + Debug {
    fn allocate_set(&self, layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String>;
}

/// Descriptor set for binding resources.
pub trait DescriptorSet: Send + Sync + Debug {
    /// Write a buffer range. For dynamic bindings `size` is the range seen by one bind; a size of 0
    /// covers the rest of the buffer.
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String>;
    fn write_texture(&mut self, binding: u32, texture: &dyn Texture) -> Result<(), String>;
    /// Bind texture + sampler for a CombinedImageSampler binding.
    fn write_sampled_image(&mut self, binding: u32, texture: &dyn Texture, sampler: &dyn Sampler) -> Result<(), String>;
    fn as_any(&self) -> &dyn Any;
}

pub trait CommandBuffer: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquiredImage {
    /// Image is available once the signal semaphore fires. `suboptimal` means the swapchain still
    /// works but no longer matches the surface exactly.
    Ready { image_index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be recreated before rendering.
    OutOfDate,
}

/// Status reported by presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// Swapchain for presenting to a window. Acquire an image, render to it, then present.
pub trait Swapchain: Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    /// Acquire the next image. `signal_semaphore` is signaled when the image is available.
    fn acquire_next_image(&mut self, signal_semaphore: Option<&dyn Semaphore>) -> Result<AcquiredImage, String>;
    /// Present the image once every semaphore in `wait_semaphores` has been signaled.
    fn present(&self, image_index: u32, wait_semaphores: &[&dyn Semaphore]) -> Result<PresentStatus, String>;
    /// Current extent (width, height). May change on resize.
    fn extent(&self) -> (u32, u32);
    /// Number of swapchain images.
    fn image_count(&self) -> u32;
    /// Color format of swapchain images. Render pass attachments targeting them must use this format.
    fn format(&self) -> TextureFormat;
    /// Swapchain image `index` as a texture usable as a framebuffer attachment.
    fn image(&self, index: u32) -> Option<&dyn Texture>;
}

#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(feature = "vulkan")]
pub use vulkan::VulkanDevice;
