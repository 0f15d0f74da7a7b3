//! Recording backend for unit tests. Every object logs what the core asks of it so tests can
//! assert on bind/draw sequences and queue submissions without a GPU.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use strata_rhi::*;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    SetPipeline(ResourceId),
    BindSet {
        set_index: u32,
        set: ResourceId,
        offsets: Vec<u32>,
    },
    SetVertexBuffer(ResourceId),
    SetIndexBuffer(ResourceId),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    BeginRenderPass {
        render_pass: ResourceId,
        framebuffer: ResourceId,
    },
    ExecuteBundles(Vec<ResourceId>),
    NextSubpass,
    EndRenderPass,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SubmittedBatch {
    pub command_buffers: Vec<ResourceId>,
    pub waits: Vec<ResourceId>,
    pub signals: Vec<ResourceId>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SubmitCall {
    pub batches: Vec<SubmittedBatch>,
    pub fence: Option<ResourceId>,
}

#[derive(Debug, Default)]
pub(crate) struct Log {
    pub pipelines_created: usize,
    pub pipelines_destroyed: Vec<ResourceId>,
    pub pipeline_set_layouts: Vec<usize>,
    pub submissions: Vec<SubmitCall>,
    pub presents: Vec<(u32, Vec<ResourceId>)>,
    pub acquire_script: VecDeque<AcquiredImage>,
    pub present_script: VecDeque<PresentStatus>,
    pub swapchains_created: usize,
    pub wait_idle_calls: usize,
    pub fence_waits: usize,
    pub fence_resets: usize,
    /// Queue submissions that fail before being logged.
    pub submit_failures: usize,
}

pub(crate) type SharedLog = Arc<Mutex<Log>>;

#[derive(Debug)]
pub(crate) struct MockDevice {
    log: SharedLog,
    next_id: Arc<AtomicU64>,
    limits: DeviceLimits,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_alignment(16)
    }

    pub fn with_alignment(alignment: u64) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            limits: DeviceLimits {
                min_uniform_buffer_offset_alignment: alignment,
                max_uniform_buffer_range: 65536,
            },
        }
    }

    pub fn log(&self) -> SharedLog {
        Arc::clone(&self.log)
    }

    fn id(&self) -> ResourceId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn buffer_bytes(&self, buffer: &dyn Buffer) -> Vec<u8> {
        buffer
            .as_any()
            .downcast_ref::<MockBuffer>()
            .map(|b| b.data.lock().clone())
            .unwrap_or_default()
    }
}

pub(crate) fn commands_of(buffer: &dyn CommandBuffer) -> Vec<Command> {
    buffer
        .as_any()
        .downcast_ref::<MockCommandBuffer>()
        .map(|b| b.commands.clone())
        .unwrap_or_default()
}

pub(crate) fn command_buffer_id(buffer: &dyn CommandBuffer) -> ResourceId {
    buffer
        .as_any()
        .downcast_ref::<MockCommandBuffer>()
        .map(|b| b.id)
        .unwrap_or(0)
}

pub(crate) fn semaphore_id(semaphore: &dyn Semaphore) -> ResourceId {
    semaphore
        .as_any()
        .downcast_ref::<MockSemaphore>()
        .map(|s| s.id)
        .unwrap_or(0)
}

/// Every semaphore is signalled at most once and waited exactly as often as it is signalled.
/// `signalled_outside` are signalled by someone else (image acquisition); `waited_outside` are waited
/// by the consumer after the logged submissions (a following node, presentation).
pub(crate) fn assert_semaphores_balanced(log: &Log, signalled_outside: &[ResourceId], waited_outside: &[ResourceId]) {
    let mut counts: rustc_hash::FxHashMap<ResourceId, (usize, usize)> = Default::default();
    for &id in signalled_outside {
        counts.entry(id).or_default().0 += 1;
    }
    for &id in waited_outside {
        counts.entry(id).or_default().1 += 1;
    }
    for batch in log.submissions.iter().flat_map(|call| &call.batches) {
        for &id in &batch.signals {
            counts.entry(id).or_default().0 += 1;
        }
        for &id in &batch.waits {
            counts.entry(id).or_default().1 += 1;
        }
    }
    for (id, (signals, waits)) in counts {
        assert_eq!(signals, 1, "semaphore {id} signalled {signals} times");
        assert_eq!(waits, 1, "semaphore {id} waited {waits} times");
    }
}

pub(crate) fn set_id(set: &dyn DescriptorSet) -> ResourceId {
    set.as_any().downcast_ref::<MockDescriptorSet>().map(|s| s.id).unwrap_or(0)
}

fn pipeline_id(pipeline: &dyn GraphicsPipeline) -> ResourceId {
    pipeline.as_any().downcast_ref::<MockPipeline>().map(|p| p.id).unwrap_or(0)
}

impl Device for MockDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Box<dyn Buffer>, String> {
        Ok(Box::new(MockBuffer {
            id: self.id(),
            data: Mutex::new(vec![0; desc.size as usize]),
            host_visible: desc.memory == BufferMemoryPreference::HostVisible,
        }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Box<dyn Texture>, String> {
        Ok(Box::new(MockTexture {
            id: self.id(),
            format: desc.format,
            size: desc.size,
        }))
    }

    fn create_sampler(&self, _desc: &SamplerDescriptor) -> Result<Box<dyn Sampler>, String> {
        Ok(Box::new(MockSampler))
    }

    fn create_render_pass_layout(&self, desc: &RenderPassLayoutDescriptor) -> Result<Box<dyn RenderPassLayout>, String> {
        Ok(Box::new(MockRenderPassLayout {
            id: self.id(),
            subpasses: desc
                .subpasses
                .iter()
                .map(|s| (s.color_attachments.len() as u32, s.depth_stencil_attachment.is_some()))
                .collect(),
        }))
    }

    fn create_framebuffer(
        &self,
        _render_pass: &dyn RenderPassLayout,
        _attachments: &[&dyn Texture],
        extent: (u32, u32),
    ) -> Result<Box<dyn Framebuffer>, String> {
        Ok(Box::new(MockFramebuffer { id: self.id(), extent }))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
        render_pass: &dyn RenderPassLayout,
        subpass: u32,
    ) -> Result<Box<dyn GraphicsPipeline>, String> {
        if subpass >= render_pass.subpass_count() {
            return Err(format!("subpass {} out of range", subpass));
        }
        let mut log = self.log.lock();
        log.pipelines_created += 1;
        log.pipeline_set_layouts.push(desc.set_layouts.len());
        Ok(Box::new(MockPipeline {
            id: self.id(),
            log: Arc::clone(&self.log),
        }))
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<Box<dyn DescriptorSetLayout>, String> {
        Ok(Box::new(MockDescriptorSetLayout {
            bindings: bindings.to_vec(),
        }))
    }

    fn create_descriptor_pool(&self, max_sets: u32) -> Result<Box<dyn DescriptorPool>, String> {
        self.create_descriptor_pool_with_descriptor(&DescriptorPoolDescriptor {
            max_sets,
            pool_sizes: Vec::new(),
        })
    }

    fn create_descriptor_pool_with_descriptor(&self, desc: &DescriptorPoolDescriptor) -> Result<Box<dyn DescriptorPool>, String> {
        Ok(Box::new(MockDescriptorPool {
            max_sets: desc.max_sets,
            allocated: AtomicU32::new(0),
            next_id: Arc::clone(&self.next_id),
        }))
    }

    fn create_command_encoder(&self) -> Result<Box<dyn CommandEncoder>, String> {
        Ok(Box::new(MockEncoder {
            id: self.id(),
            commands: Vec::new(),
        }))
    }

    fn create_bundle_encoder(
        &self,
        _render_pass: &dyn RenderPassLayout,
        _subpass: u32,
        _extent: (u32, u32),
    ) -> Result<Box<dyn RenderBundleEncoder>, String> {
        Ok(Box::new(MockEncoder {
            id: self.id(),
            commands: Vec::new(),
        }))
    }

    fn queue(&self) -> Result<Box<dyn Queue>, String> {
        Ok(Box::new(MockQueue { log: Arc::clone(&self.log) }))
    }

    fn write_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        let buffer = buffer
            .as_any()
            .downcast_ref::<MockBuffer>()
            .ok_or("write_buffer: not a mock buffer")?;
        if !buffer.host_visible {
            return Err("write_buffer: buffer is not host visible".to_string());
        }
        let mut bytes = buffer.data.lock();
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(format!("write_buffer: {}..{} out of range {}", start, end, bytes.len()));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn upload_to_buffer(&self, buffer: &dyn Buffer, offset: u64, data: &[u8]) -> Result<(), String> {
        let buffer = buffer
            .as_any()
            .downcast_ref::<MockBuffer>()
            .ok_or("upload_to_buffer: not a mock buffer")?;
        let mut bytes = buffer.data.lock();
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn upload_to_texture(&self, _texture: &dyn Texture, _data: &[u8]) -> Result<(), String> {
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), String> {
        self.log.lock().wait_idle_calls += 1;
        Ok(())
    }

    fn create_fence(&self, _signaled: bool) -> Result<Box<dyn Fence>, String> {
        Ok(Box::new(MockFence {
            id: self.id(),
            log: Arc::clone(&self.log),
        }))
    }

    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, String> {
        Ok(Box::new(MockSemaphore { id: self.id() }))
    }

    fn create_swapchain(&self, extent: (u32, u32), _old: Option<&dyn Swapchain>) -> Result<Box<dyn Swapchain>, String> {
        self.log.lock().swapchains_created += 1;
        let images = (0..2)
            .map(|_| MockTexture {
                id: self.id(),
                format: TextureFormat::Bgra8Unorm,
                size: (extent.0, extent.1, 1),
            })
            .collect();
        Ok(Box::new(MockSwapchain {
            log: Arc::clone(&self.log),
            extent,
            images,
        }))
    }
}

#[derive(Debug)]
pub(crate) struct MockBuffer {
    id: ResourceId,
    data: Mutex<Vec<u8>>,
    host_visible: bool,
}

impl Buffer for MockBuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn size(&self) -> u64 {
        self.data.lock().len() as u64
    }
    fn host_visible(&self) -> bool {
        self.host_visible
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockTexture {
    id: ResourceId,
    format: TextureFormat,
    size: (u32, u32, u32),
}

impl Texture for MockTexture {
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
        TextureDimension::D2
    }
    fn mip_level_count(&self) -> u32 {
        1
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockSampler;

impl Sampler for MockSampler {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockPipeline {
    id: ResourceId,
    log: SharedLog,
}

impl Drop for MockPipeline {
    fn drop(&mut self) {
        self.log.lock().pipelines_destroyed.push(self.id);
    }
}

impl GraphicsPipeline for MockPipeline {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockRenderPassLayout {
    id: ResourceId,
    subpasses: Vec<(u32, bool)>,
}

impl RenderPassLayout for MockRenderPassLayout {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn subpass_count(&self) -> u32 {
        self.subpasses.len() as u32
    }
    fn color_attachment_count(&self, subpass: u32) -> u32 {
        self.subpasses.get(subpass as usize).map(|s| s.0).unwrap_or(0)
    }
    fn subpass_uses_depth(&self, subpass: u32) -> bool {
        self.subpasses.get(subpass as usize).map(|s| s.1).unwrap_or(false)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockFramebuffer {
    id: ResourceId,
    extent: (u32, u32),
}

impl Framebuffer for MockFramebuffer {
    fn id(&self) -> ResourceId {
        self.id
    }
    fn extent(&self) -> (u32, u32) {
        self.extent
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockDescriptorSetLayout {
    bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayout for MockDescriptorSetLayout {
    fn bindings(&self) -> &[DescriptorSetLayoutBinding] {
        &self.bindings
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockDescriptorPool {
    max_sets: u32,
    allocated: AtomicU32,
    next_id: Arc<AtomicU64>,
}

impl DescriptorPool for MockDescriptorPool {
    fn allocate_set(&self, _layout: &dyn DescriptorSetLayout) -> Result<Box<dyn DescriptorSet>, String> {
        if self.allocated.fetch_add(1, Ordering::Relaxed) >= self.max_sets {
            return Err("allocate_descriptor_sets: ERROR_OUT_OF_POOL_MEMORY".to_string());
        }
        Ok(Box::new(MockDescriptorSet {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            buffer_writes: Vec::new(),
        }))
    }
}

#[derive(Debug)]
pub(crate) struct MockDescriptorSet {
    id: ResourceId,
    /// (binding, buffer id, offset, size)
    pub buffer_writes: Vec<(u32, ResourceId, u64, u64)>,
}

impl DescriptorSet for MockDescriptorSet {
    fn write_buffer(&mut self, binding: u32, buffer: &dyn Buffer, offset: u64, size: u64) -> Result<(), String> {
        self.buffer_writes.push((binding, buffer.id(), offset, size));
        Ok(())
    }
    fn write_texture(&mut self, _binding: u32, _texture: &dyn Texture) -> Result<(), String> {
        Ok(())
    }
    fn write_sampled_image(&mut self, _binding: u32, _texture: &dyn Texture, _sampler: &dyn Sampler) -> Result<(), String> {
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Primary and secondary recorder in one.
#[derive(Debug)]
pub(crate) struct MockEncoder {
    id: ResourceId,
    commands: Vec<Command>,
}

impl MockEncoder {
    fn into_buffer(self) -> Box<dyn CommandBuffer> {
        Box::new(MockCommandBuffer {
            id: self.id,
            commands: self.commands,
        })
    }
}

impl RenderPass for MockEncoder {
    fn set_pipeline(&mut self, pipeline: &dyn GraphicsPipeline) {
        self.commands.push(Command::SetPipeline(pipeline_id(pipeline)));
    }
    fn bind_descriptor_set(&mut self, set_index: u32, set: &dyn DescriptorSet, dynamic_offsets: &[u32]) {
        self.commands.push(Command::BindSet {
            set_index,
            set: set_id(set),
            offsets: dynamic_offsets.to_vec(),
        });
    }
    fn set_vertex_buffer(&mut self, _index: u32, buffer: &dyn Buffer, _offset: u64) {
        self.commands.push(Command::SetVertexBuffer(buffer.id()));
    }
    fn set_index_buffer(&mut self, buffer: &dyn Buffer, _offset: u64, _index_format: IndexFormat) {
        self.commands.push(Command::SetIndexBuffer(buffer.id()));
    }
    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.commands.push(Command::Draw {
            vertex_count,
            instance_count,
        });
    }
    fn draw_indexed(&mut self, index_count: u32, instance_count: u32, _first_index: u32, _vertex_offset: i32, _first_instance: u32) {
        self.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
        });
    }
}

impl RenderBundleEncoder for MockEncoder {
    fn as_render_pass(&mut self) -> &mut dyn RenderPass {
        self
    }
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        Ok(self.into_buffer())
    }
}

impl CommandEncoder for MockEncoder {
    fn begin_render_pass(&mut self, begin: &RenderPassBegin<'_>) -> Result<(), String> {
        self.commands.push(Command::BeginRenderPass {
            render_pass: begin.render_pass.id(),
            framebuffer: begin.framebuffer.id(),
        });
        Ok(())
    }
    fn execute_bundles(&mut self, bundles: &[&dyn CommandBuffer]) {
        self.commands
            .push(Command::ExecuteBundles(bundles.iter().map(|b| command_buffer_id(*b)).collect()));
    }
    fn next_subpass(&mut self) {
        self.commands.push(Command::NextSubpass);
    }
    fn end_render_pass(&mut self) {
        self.commands.push(Command::EndRenderPass);
    }
    fn copy_buffer_to_buffer(&mut self, _: &dyn Buffer, _: u64, _: &dyn Buffer, _: u64, _: u64) -> Result<(), String> {
        Ok(())
    }
    fn copy_buffer_to_texture(&mut self, _: &dyn Buffer, _: u64, _: &dyn Texture, _: (u32, u32)) -> Result<(), String> {
        Ok(())
    }
    fn pipeline_barrier_texture(&mut self, _: &dyn Texture, _: ImageLayout, _: ImageLayout) -> Result<(), String> {
        Ok(())
    }
    fn finish(self: Box<Self>) -> Result<Box<dyn CommandBuffer>, String> {
        Ok(self.into_buffer())
    }
}

#[derive(Debug)]
pub(crate) struct MockCommandBuffer {
    id: ResourceId,
    commands: Vec<Command>,
}

impl CommandBuffer for MockCommandBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockQueue {
    log: SharedLog,
}

impl Queue for MockQueue {
    fn submit_batch(&self, batches: &[SubmitBatch<'_>], signal_fence: Option<&dyn Fence>) -> Result<(), String> {
        {
            let mut log = self.log.lock();
            if log.submit_failures > 0 {
                log.submit_failures -= 1;
                return Err("queue submit: device lost".to_string());
            }
        }
        let call = SubmitCall {
            batches: batches
                .iter()
                .map(|b| SubmittedBatch {
                    command_buffers: b.command_buffers.iter().map(|c| command_buffer_id(*c)).collect(),
                    waits: b.wait_semaphores.iter().map(|s| semaphore_id(*s)).collect(),
                    signals: b.signal_semaphores.iter().map(|s| semaphore_id(*s)).collect(),
                })
                .collect(),
            fence: signal_fence.and_then(|f| f.as_any().downcast_ref::<MockFence>()).map(|f| f.id),
        };
        self.log.lock().submissions.push(call);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MockFence {
    id: ResourceId,
    log: SharedLog,
}

impl Fence for MockFence {
    fn wait(&self, _timeout_ns: u64) -> Result<(), String> {
        self.log.lock().fence_waits += 1;
        Ok(())
    }
    fn reset(&self) -> Result<(), String> {
        self.log.lock().fence_resets += 1;
        Ok(())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub(crate) struct MockSemaphore {
    id: ResourceId,
}

impl Semaphore for MockSemaphore {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Plays back `Log::acquire_script` / `Log::present_script`, defaulting to success.
#[derive(Debug)]
pub(crate) struct MockSwapchain {
    log: SharedLog,
    extent: (u32, u32),
    images: Vec<MockTexture>,
}

impl Swapchain for MockSwapchain {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn acquire_next_image(&mut self, _signal: Option<&dyn Semaphore>) -> Result<AcquiredImage, String> {
        Ok(self.log.lock().acquire_script.pop_front().unwrap_or(AcquiredImage::Ready {
            image_index: 0,
            suboptimal: false,
        }))
    }
    fn present(&self, image_index: u32, wait_semaphores: &[&dyn Semaphore]) -> Result<PresentStatus, String> {
        let mut log = self.log.lock();
        log.presents
            .push((image_index, wait_semaphores.iter().map(|s| semaphore_id(*s)).collect()));
        Ok(log.present_script.pop_front().unwrap_or(PresentStatus::Optimal))
    }
    fn extent(&self) -> (u32, u32) {
        self.extent
    }
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
    fn format(&self) -> TextureFormat {
        TextureFormat::Bgra8Unorm
    }
    fn image(&self, index: u32) -> Option<&dyn Texture> {
        self.images.get(index as usize).map(|i| i as &dyn Texture)
    }
}

/// Material drawing static meshes, with one global and one local uniform block.
pub(crate) fn test_descriptor() -> crate::material::MaterialDescriptor {
    use crate::drawable::DrawableKind;
    use crate::material::{InputSlot, MaterialDescriptor, ShaderSource};
    MaterialDescriptor::new(
        "test material",
        ShaderSource::SpirV(vec![0; 16]),
        ShaderSource::SpirV(vec![0; 16]),
    )
    .with_global_input(InputSlot::uniform(0, ShaderStages::VERTEX, &[0f32; 16]))
    .with_local_input(InputSlot::uniform(0, ShaderStages::FRAGMENT, &[1f32; 4]))
    .with_kind(DrawableKind::StaticMesh)
}

pub(crate) fn color_attachment() -> AttachmentDescription {
    AttachmentDescription {
        format: TextureFormat::Rgba8Unorm,
        load_op: LoadOp::Clear,
        store_op: StoreOp::Store,
        initial_layout: ImageLayout::Undefined,
        final_layout: ImageLayout::ShaderReadOnly,
    }
}

pub(crate) fn color_pass() -> RenderPassLayoutDescriptor {
    RenderPassLayoutDescriptor::single_color("color", color_attachment())
}
