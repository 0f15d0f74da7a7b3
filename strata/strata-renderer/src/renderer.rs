//! Frame cycle: wait for the previous frame, acquire a swapchain image, record and submit every
//! process, present. One frame is in flight at a time.
//!
//! A frame that fails leaves the fence signalled and no binary semaphore with a pending signal. When
//! recording fails nothing is submitted and the acquired image is kept for the next frame. When a
//! submission fails an empty submission consumes what was signalled and signals the fence.

use log::{debug, error, info, trace};
use std::sync::Arc;
use strata_rhi::{
    AcquiredImage, Device, Fence, PresentStatus, Queue, Sampler, SamplerDescriptor, Semaphore, SubmitBatch,
    Swapchain,
};

use crate::config::RendererConfig;
use crate::error::Result;
use crate::process::RenderProcess;
use crate::resources::RenderResources;

/// Outcome of [`Renderer::render_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32 },
    /// The swapchain was recreated and every cached pipeline dropped. Framebuffers built on the old
    /// swapchain images must be replaced before the next frame.
    SwapchainRecreated,
}

pub struct Renderer {
    device: Arc<dyn Device>,
    queue: Box<dyn Queue>,
    config: RendererConfig,
    swapchain: Box<dyn Swapchain>,
    resources: RenderResources,
    processes: Vec<RenderProcess>,
    image_available: Arc<dyn Semaphore>,
    in_flight: Box<dyn Fence>,
    pending_extent: Option<(u32, u32)>,
    /// Acquired image (and whether it was suboptimal) whose frame failed to record.
    held_image: Option<(u32, bool)>,
}

impl Renderer {
    /// Create the swapchain at `config.window_extent`. The device must have been created with a surface.
    pub fn new(device: Arc<dyn Device>, config: RendererConfig) -> Result<Self> {
        let swapchain = device.create_swapchain(config.window_extent, None)?;
        Self::with_swapchain(device, config, swapchain)
    }

    pub fn with_swapchain(device: Arc<dyn Device>, config: RendererConfig, swapchain: Box<dyn Swapchain>) -> Result<Self> {
        let queue = device.queue()?;
        let image_available: Arc<dyn Semaphore> = Arc::from(device.create_semaphore()?);
        // Signalled so the first begin_frame does not block.
        let in_flight = device.create_fence(true)?;
        debug!(
            "renderer: swapchain {:?} with {} images",
            swapchain.extent(),
            swapchain.image_count()
        );
        Ok(Self {
            device,
            queue,
            config,
            swapchain,
            resources: RenderResources::new(),
            processes: Vec::new(),
            image_available,
            in_flight,
            pending_extent: None,
            held_image: None,
        })
    }

    pub fn add_process(&mut self, process: RenderProcess) -> usize {
        self.processes.push(process);
        self.processes.len() - 1
    }

    /// Set up every process. The first waits on image acquisition; the others start without waits.
    pub fn setup_processes(&mut self) -> Result<()> {
        for (index, process) in self.processes.iter_mut().enumerate() {
            if index == 0 {
                process.setup(&[Arc::clone(&self.image_available)])?;
            } else {
                process.setup(&[])?;
            }
        }
        Ok(())
    }

    /// Block until the previous frame has finished on the GPU. Batches and command buffers are free
    /// to reuse afterwards.
    pub fn begin_frame(&self) -> Result<()> {
        self.in_flight.wait(self.config.fence_timeout_ns)?;
        Ok(())
    }

    pub fn record_commands(&mut self, image_index: u32) -> Result<()> {
        for process in &mut self.processes {
            process.record_commands(&mut self.resources, image_index)?;
        }
        self.resources.retire_unrecorded_secondaries();
        Ok(())
    }

    /// Run one frame: acquire, record, submit, present. An out-of-date swapchain abandons the frame and
    /// is recreated; a suboptimal one is presented first and recreated afterwards.
    pub fn render_frame(&mut self) -> Result<FrameStatus> {
        if let Some(extent) = self.pending_extent.take() {
            self.recreate_swapchain(extent)?;
            return Ok(FrameStatus::SwapchainRecreated);
        }
        self.begin_frame()?;
        if self.config.validation {
            self.device.wait_idle()?;
        }

        let (image_index, acquire_suboptimal) = match self.held_image.take() {
            Some(held) => held,
            None => match self.swapchain.acquire_next_image(Some(self.image_available.as_ref()))? {
                AcquiredImage::Ready { image_index, suboptimal } => (image_index, suboptimal),
                AcquiredImage::OutOfDate => {
                    self.recreate_swapchain(self.swapchain.extent())?;
                    return Ok(FrameStatus::SwapchainRecreated);
                }
            },
        };

        if let Err(err) = self.record_commands(image_index) {
            self.held_image = Some((image_index, acquire_suboptimal));
            return Err(err);
        }
        if let Err(err) = self.in_flight.reset() {
            self.held_image = Some((image_index, acquire_suboptimal));
            return Err(err.into());
        }
        if let Err(err) = self.submit_processes() {
            if let Err(release) = self.release_failed_submission() {
                error!("renderer: releasing the failed frame: {}", release);
            }
            return Err(err);
        }

        let mut waits: Vec<Arc<dyn Semaphore>> = Vec::new();
        for process in &self.processes {
            waits.extend(process.terminal_semaphores().iter().cloned());
        }
        if self.processes.is_empty() {
            waits.push(Arc::clone(&self.image_available));
        }
        let wait_refs: Vec<&dyn Semaphore> = waits.iter().map(|s| s.as_ref()).collect();
        let status = self.swapchain.present(image_index, &wait_refs)?;
        trace!("renderer: presented image {} ({:?})", image_index, status);

        if acquire_suboptimal || status != PresentStatus::Optimal {
            self.recreate_swapchain(self.swapchain.extent())?;
            return Ok(FrameStatus::SwapchainRecreated);
        }
        Ok(FrameStatus::Presented { image_index })
    }

    /// Submit every process, then signal the in-flight fence behind them.
    fn submit_processes(&mut self) -> Result<()> {
        for process in &mut self.processes {
            process.submit_command(self.queue.as_ref())?;
        }
        self.queue.submit_batch(&[], Some(self.in_flight.as_ref()))?;
        Ok(())
    }

    /// Wait on the signals a failed submission left pending and signal the fence with them.
    fn release_failed_submission(&self) -> Result<()> {
        let mut pending = Vec::new();
        for process in &self.processes {
            pending.extend(process.unconsumed_signals()?);
        }
        if self.processes.is_empty() {
            pending.push(Arc::clone(&self.image_available));
        }
        self.submit_waits_with_fence(&pending)
    }

    /// Consume the acquire signal of an image kept back by a failed recording.
    fn release_held_image(&mut self) -> Result<()> {
        if self.held_image.take().is_none() {
            return Ok(());
        }
        self.in_flight.reset()?;
        self.submit_waits_with_fence(&[Arc::clone(&self.image_available)])
    }

    fn submit_waits_with_fence(&self, waits: &[Arc<dyn Semaphore>]) -> Result<()> {
        let batch = SubmitBatch {
            command_buffers: Vec::new(),
            wait_semaphores: waits.iter().map(|s| s.as_ref()).collect(),
            signal_semaphores: Vec::new(),
        };
        self.queue.submit_batch(&[batch], Some(self.in_flight.as_ref()))?;
        Ok(())
    }

    /// Recreate the swapchain at `extent` at the start of the next frame.
    pub fn request_resize(&mut self, extent: (u32, u32)) {
        self.pending_extent = Some(extent);
    }

    /// Replace the swapchain and drop every cached pipeline; batches rebuild them on their next recording.
    pub fn recreate_swapchain(&mut self, extent: (u32, u32)) -> Result<()> {
        self.release_held_image()?;
        self.device.wait_idle()?;
        let swapchain = self.device.create_swapchain(extent, Some(self.swapchain.as_ref()))?;
        self.swapchain = swapchain;
        self.resources.materials.invalidate_all_pipelines();
        info!("renderer: swapchain recreated at {:?}", self.swapchain.extent());
        Ok(())
    }

    /// Wait for the GPU, then release every process and batch.
    pub fn destroy_processes(&mut self) -> Result<()> {
        self.device.wait_idle()?;
        for process in &mut self.processes {
            process.destroy();
        }
        self.processes.clear();
        self.resources.destroy();
        Ok(())
    }

    /// Linear, repeating sampler for material textures, clamped to the configured anisotropy.
    pub fn material_sampler(&self, label: Option<&'static str>) -> Result<Arc<dyn Sampler>> {
        let sampler = self.device.create_sampler(&SamplerDescriptor {
            label,
            anisotropy_clamp: self.config.sampler_anisotropy,
            ..Default::default()
        })?;
        Ok(Arc::from(sampler))
    }

    pub fn resources(&self) -> &RenderResources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut RenderResources {
        &mut self.resources
    }

    pub fn processes_mut(&mut self) -> &mut [RenderProcess] {
        &mut self.processes
    }

    pub fn swapchain(&self) -> &dyn Swapchain {
        self.swapchain.as_ref()
    }

    /// Swapchain images alongside the processes, for rebuilding swapchain framebuffers.
    pub fn swapchain_and_processes(&mut self) -> (&dyn Swapchain, &mut [RenderProcess]) {
        (self.swapchain.as_ref(), &mut self.processes)
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn queue(&self) -> &dyn Queue {
        self.queue.as_ref()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("extent", &self.swapchain.extent())
            .field("processes", &self.processes.len())
            .field("pending_extent", &self.pending_extent)
            .field("held_image", &self.held_image)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchKind, RenderBatch};
    use crate::drawable::{DrawableKind, Mesh, MeshDrawable, StaticMeshInstance, StaticVertex};
    use crate::material::MaterialHandle;
    use crate::node::{RenderNode, RenderPassDesc};
    use crate::error::RenderError;
    use crate::graph::PassId;
    use crate::testing::{assert_semaphores_balanced, color_pass, semaphore_id, test_descriptor, MockDevice, SharedLog};

    /// One process, one node, one pass drawing a single static mesh.
    fn renderer() -> (Renderer, SharedLog, MaterialHandle) {
        let mock = Arc::new(MockDevice::new());
        let log = mock.log();
        let device: Arc<dyn Device> = mock;
        let mut renderer = Renderer::new(Arc::clone(&device), RendererConfig::default()).unwrap();

        let resources = renderer.resources_mut();
        let material = resources
            .materials
            .create_material(device.as_ref(), &test_descriptor(), 2)
            .unwrap();
        let mut batch =
            RenderBatch::new(device.as_ref(), Some("scene"), &[BatchKind::new(DrawableKind::StaticMesh, 4)]).unwrap();
        let vertices = [StaticVertex::default(); 3];
        let mesh = Arc::new(Mesh::new(device.as_ref(), "tri", bytemuck::cast_slice(&vertices), 3, None).unwrap());
        batch
            .add_renderable(
                device.as_ref(),
                &resources.materials,
                material,
                None,
                Arc::new(MeshDrawable::static_mesh(mesh, StaticMeshInstance::default())),
            )
            .unwrap();
        let handle = resources.add_batch(batch);

        let mut node = RenderNode::new(Arc::clone(&device), Some("geometry"));
        let pass = node
            .add_render_pass(
                RenderPassDesc {
                    layout: color_pass(),
                    subpass_states: Vec::new(),
                    clear_values: Vec::new(),
                },
                &[],
            )
            .unwrap();
        node.create_framebuffers(pass, &[Vec::new(), Vec::new()], (800, 600)).unwrap();
        node.set_batch_for_all_subpasses(pass, handle).unwrap();
        let mut process = RenderProcess::new(Some("frame"));
        process.add_render_node(node);
        renderer.add_process(process);
        renderer.setup_processes().unwrap();
        (renderer, log, material)
    }

    fn pipelines(renderer: &Renderer, material: MaterialHandle) -> usize {
        renderer.resources().materials.material(material).unwrap().pipeline_count()
    }

    #[test]
    fn presented_frame_waits_on_terminal_signal() {
        let (mut renderer, log, material) = renderer();
        log.lock().acquire_script.push_back(AcquiredImage::Ready {
            image_index: 1,
            suboptimal: false,
        });
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::Presented { image_index: 1 });
        assert_eq!(pipelines(&renderer, material), 1);

        let terminal: Vec<u64> = renderer.processes_mut()[0]
            .terminal_semaphores()
            .iter()
            .map(|s| semaphore_id(s.as_ref()))
            .collect();
        let acquire = semaphore_id(renderer.image_available.as_ref());
        let log = log.lock();
        assert_eq!(log.presents, vec![(1, terminal)]);
        // Node submission, then the fence-only submission.
        assert_eq!(log.submissions.len(), 2);
        assert_eq!(log.submissions[0].batches[0].waits, vec![acquire]);
        assert!(log.submissions[1].batches.is_empty());
        assert!(log.submissions[1].fence.is_some());
        assert_eq!((log.fence_waits, log.fence_resets), (1, 1));
        assert_semaphores_balanced(&log, &[acquire], &log.presents[0].1);
    }

    fn take_scene_batch(renderer: &mut Renderer) -> RenderBatch {
        let handle = renderer.resources().batches.keys().next().unwrap();
        renderer.resources_mut().batches.remove(handle).unwrap()
    }

    fn restore_scene_batch(renderer: &mut Renderer, batch: RenderBatch) {
        let handle = renderer.resources_mut().add_batch(batch);
        renderer.processes_mut()[0]
            .node_mut(0)
            .unwrap()
            .set_batch_for_all_subpasses(PassId(0), handle)
            .unwrap();
    }

    #[test]
    fn failed_recording_retries_with_the_same_image() {
        let (mut renderer, log, _material) = renderer();
        log.lock().acquire_script.push_back(AcquiredImage::Ready {
            image_index: 1,
            suboptimal: false,
        });
        let batch = take_scene_batch(&mut renderer);
        assert!(matches!(renderer.render_frame(), Err(RenderError::UnknownBatch)));
        {
            let log = log.lock();
            assert_eq!(log.fence_resets, 0);
            assert!(log.submissions.is_empty());
            assert!(log.presents.is_empty());
        }

        restore_scene_batch(&mut renderer, batch);
        // Image 1 again: a fresh acquire would have returned image 0.
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::Presented { image_index: 1 });
        let acquire = semaphore_id(renderer.image_available.as_ref());
        let log = log.lock();
        assert_eq!((log.fence_waits, log.fence_resets), (2, 1));
        assert_eq!(log.submissions[0].batches[0].waits, vec![acquire]);
        assert_semaphores_balanced(&log, &[acquire], &log.presents[0].1);
    }

    #[test]
    fn resize_releases_a_held_image() {
        let (mut renderer, log, _material) = renderer();
        let batch = take_scene_batch(&mut renderer);
        assert!(renderer.render_frame().is_err());
        renderer.request_resize((640, 480));
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::SwapchainRecreated);
        let acquire = semaphore_id(renderer.image_available.as_ref());
        {
            let log = log.lock();
            assert_eq!(log.submissions.len(), 1);
            let release = &log.submissions[0];
            assert!(release.fence.is_some());
            assert!(release.batches[0].command_buffers.is_empty());
            assert_eq!(release.batches[0].waits, vec![acquire]);
            assert_eq!(log.fence_resets, 1);
        }
        restore_scene_batch(&mut renderer, batch);
        assert!(matches!(renderer.render_frame().unwrap(), FrameStatus::Presented { .. }));
    }

    #[test]
    fn failed_submission_releases_the_frame() {
        let (mut renderer, log, _material) = renderer();
        log.lock().submit_failures = 1;
        assert!(renderer.render_frame().is_err());
        let acquire = semaphore_id(renderer.image_available.as_ref());
        {
            let log = log.lock();
            assert_eq!(log.submissions.len(), 1);
            let release = &log.submissions[0];
            assert!(release.fence.is_some());
            assert!(release.batches[0].command_buffers.is_empty());
            assert_eq!(release.batches[0].waits, vec![acquire]);
            assert!(log.presents.is_empty());
        }
        assert!(matches!(renderer.render_frame().unwrap(), FrameStatus::Presented { .. }));
        assert_eq!(log.lock().fence_resets, 2);
    }

    #[test]
    fn out_of_date_acquire_recreates_and_invalidates() {
        let (mut renderer, log, material) = renderer();
        renderer.render_frame().unwrap();
        assert_eq!(pipelines(&renderer, material), 1);

        log.lock().acquire_script.push_back(AcquiredImage::OutOfDate);
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::SwapchainRecreated);
        assert_eq!(pipelines(&renderer, material), 0);
        {
            let log = log.lock();
            assert_eq!(log.swapchains_created, 2);
            assert_eq!(log.presents.len(), 1);
            // The abandoned frame left the fence signalled.
            assert_eq!(log.fence_resets, 1);
        }

        // The next frame rebuilds the pipeline lazily.
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::Presented { image_index: 0 });
        assert_eq!(pipelines(&renderer, material), 1);
    }

    #[test]
    fn suboptimal_present_recreates_after_presenting() {
        let (mut renderer, log, material) = renderer();
        log.lock().present_script.push_back(PresentStatus::Suboptimal);
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::SwapchainRecreated);
        assert_eq!(pipelines(&renderer, material), 0);
        let log = log.lock();
        assert_eq!(log.presents.len(), 1);
        assert_eq!(log.swapchains_created, 2);
    }

    #[test]
    fn suboptimal_acquire_still_presents() {
        let (mut renderer, log, _material) = renderer();
        log.lock().acquire_script.push_back(AcquiredImage::Ready {
            image_index: 0,
            suboptimal: true,
        });
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::SwapchainRecreated);
        let log = log.lock();
        assert_eq!(log.presents.len(), 1);
        assert_eq!(log.swapchains_created, 2);
    }

    #[test]
    fn requested_resize_applies_before_next_frame() {
        let (mut renderer, log, _material) = renderer();
        renderer.request_resize((1024, 768));
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::SwapchainRecreated);
        assert_eq!(renderer.swapchain().extent(), (1024, 768));
        assert!(log.lock().presents.is_empty());
        assert!(matches!(renderer.render_frame().unwrap(), FrameStatus::Presented { .. }));
    }

    #[test]
    fn framebuffers_follow_recreated_swapchain() {
        let (mut renderer, _log, _material) = renderer();
        renderer.recreate_swapchain((640, 480)).unwrap();
        let (swapchain, processes) = renderer.swapchain_and_processes();
        let images: Vec<Vec<&dyn strata_rhi::Texture>> =
            (0..swapchain.image_count()).map(|i| vec![swapchain.image(i).unwrap()]).collect();
        let extent = swapchain.extent();
        let node = processes[0].node_mut(0).unwrap();
        node.create_framebuffers(PassId(0), &images, extent).unwrap();
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::Presented { image_index: 0 });
    }

    #[test]
    fn material_sampler_uses_configured_anisotropy() {
        let (renderer, _log, _material) = renderer();
        assert_eq!(renderer.config().sampler_anisotropy, Some(16.0));
        renderer.material_sampler(Some("test")).unwrap();
    }

    #[test]
    fn validation_waits_idle_every_frame() {
        let (mut renderer, log, _material) = renderer();
        renderer.config.validation = true;
        renderer.render_frame().unwrap();
        renderer.render_frame().unwrap();
        assert_eq!(log.lock().wait_idle_calls, 2);
        renderer.destroy_processes().unwrap();
        assert!(renderer.resources().batches.is_empty());
    }
}
