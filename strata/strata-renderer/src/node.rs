//! Render node: a set of render passes with intra-node dependencies and one primary command buffer
//! per pass.
//!
//! Per frame each pass moves Unrecorded → PrimaryRecorded → Submitted. `setup` levels the passes and
//! builds one submission descriptor per pass. GPU signals are binary semaphores, so every signal has
//! exactly one waiter: a pass signals one semaphore per dependent pass, and terminal passes signal one
//! more for whatever follows the node. When several root passes share the initial waits, a fan-out
//! submission without command buffers consumes them and signals one semaphore per root.

use log::{debug, trace};
use std::fmt;
use std::sync::Arc;
use strata_rhi::{
    ClearValue, CommandBuffer, Device, Framebuffer, Queue, RenderPassBegin, RenderPassLayout,
    RenderPassLayoutDescriptor, Semaphore, SubmitBatch, Texture,
};

use crate::batch::BatchHandle;
use crate::error::{RenderError, Result};
use crate::graph::{PassGraph, PassId};
use crate::material::{SubpassPipelineInfo, SubpassState};
use crate::resources::RenderResources;

/// Everything needed to register a pass with a node.
#[derive(Debug, Clone)]
pub struct RenderPassDesc {
    pub layout: RenderPassLayoutDescriptor,
    /// Fixed-function state per subpass. Missing entries use [`SubpassState::default`].
    pub subpass_states: Vec<SubpassState>,
    /// One per attachment, colors first then depth.
    pub clear_values: Vec<ClearValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Unrecorded,
    PrimaryRecorded,
    Submitted,
}

struct PassEntry {
    render_pass: Box<dyn RenderPassLayout>,
    subpass_states: Vec<SubpassState>,
    clear_values: Vec<ClearValue>,
    framebuffers: Vec<Box<dyn Framebuffer>>,
    batches: Vec<Option<BatchHandle>>,
    dependencies: Vec<PassId>,
    primary: Option<Box<dyn CommandBuffer>>,
    state: PassState,
}

#[derive(Default)]
struct Submission {
    waits: Vec<Arc<dyn Semaphore>>,
    signals: Vec<Arc<dyn Semaphore>>,
}

impl Submission {
    fn batch<'a>(&'a self, command_buffers: Vec<&'a dyn CommandBuffer>) -> SubmitBatch<'a> {
        SubmitBatch {
            command_buffers,
            wait_semaphores: self.waits.iter().map(|s| s.as_ref()).collect(),
            signal_semaphores: self.signals.iter().map(|s| s.as_ref()).collect(),
        }
    }
}

pub struct RenderNode {
    device: Arc<dyn Device>,
    label: Option<&'static str>,
    passes: Vec<PassEntry>,
    graph: PassGraph,
    order: Vec<PassId>,
    levels: Vec<usize>,
    submissions: Vec<Submission>,
    /// Hands the initial waits to several root passes.
    fan_out: Option<Submission>,
    terminal: Vec<Arc<dyn Semaphore>>,
    set_up: bool,
}

impl RenderNode {
    pub fn new(device: Arc<dyn Device>, label: Option<&'static str>) -> Self {
        Self {
            device,
            label,
            passes: Vec::new(),
            graph: PassGraph::new(),
            order: Vec::new(),
            levels: Vec::new(),
            submissions: Vec::new(),
            fan_out: None,
            terminal: Vec::new(),
            set_up: false,
        }
    }

    /// Register a pass. Every dependency must be a pass registered earlier.
    pub fn add_render_pass(&mut self, desc: RenderPassDesc, dependencies: &[PassId]) -> Result<PassId> {
        let index = self.passes.len();
        if let Some(dep) = dependencies.iter().find(|d| d.0 >= index) {
            return Err(RenderError::InvalidDependency {
                pass: index,
                dependency: dep.0,
            });
        }
        let render_pass = self.device.create_render_pass_layout(&desc.layout)?;
        let subpass_count = render_pass.subpass_count() as usize;
        let mut subpass_states = desc.subpass_states;
        subpass_states.resize_with(subpass_count, SubpassState::default);

        let id = self.graph.add_pass();
        for &dep in dependencies {
            self.graph.add_edge(dep, id);
        }
        self.passes.push(PassEntry {
            render_pass,
            subpass_states,
            clear_values: desc.clear_values,
            framebuffers: Vec::new(),
            batches: vec![None; subpass_count],
            dependencies: dependencies.to_vec(),
            primary: None,
            state: PassState::Unrecorded,
        });
        self.set_up = false;
        Ok(id)
    }

    /// Level the passes and build their submission descriptors. Creates a fresh semaphore per
    /// consumer, so it runs while the GPU is idle. Each of `initial_waits` is waited exactly once.
    pub fn setup(&mut self, initial_waits: &[Arc<dyn Semaphore>]) -> Result<()> {
        let levels = self.graph.levels()?;
        let order = self.graph.topological_order()?;
        let max_level = levels.iter().copied().max().unwrap_or(0);
        let mut submissions: Vec<Submission> = self.passes.iter().map(|_| Submission::default()).collect();

        for (index, pass) in self.passes.iter().enumerate() {
            for dep in &pass.dependencies {
                let edge: Arc<dyn Semaphore> = Arc::from(self.device.create_semaphore()?);
                submissions[dep.0].signals.push(Arc::clone(&edge));
                submissions[index].waits.push(edge);
            }
        }

        let roots: Vec<usize> = (0..self.passes.len())
            .filter(|&index| self.passes[index].dependencies.is_empty())
            .collect();
        let fan_out = if roots.len() > 1 && !initial_waits.is_empty() {
            let mut signals = Vec::with_capacity(roots.len());
            for &root in &roots {
                let gate: Arc<dyn Semaphore> = Arc::from(self.device.create_semaphore()?);
                submissions[root].waits.push(Arc::clone(&gate));
                signals.push(gate);
            }
            debug!("node {:?}: initial waits fan out to {} root passes", self.label, roots.len());
            Some(Submission {
                waits: initial_waits.to_vec(),
                signals,
            })
        } else {
            for &root in &roots {
                submissions[root].waits.extend(initial_waits.iter().cloned());
            }
            None
        };

        let mut terminal = Vec::new();
        for (index, level) in levels.iter().enumerate() {
            if *level == max_level {
                let signal: Arc<dyn Semaphore> = Arc::from(self.device.create_semaphore()?);
                submissions[index].signals.push(Arc::clone(&signal));
                terminal.push(signal);
            }
        }

        debug!(
            "node {:?}: {} passes in {} levels",
            self.label,
            self.passes.len(),
            if self.passes.is_empty() { 0 } else { max_level + 1 }
        );
        self.levels = levels;
        self.order = order;
        self.submissions = submissions;
        self.fan_out = fan_out;
        self.terminal = terminal;
        for pass in &mut self.passes {
            pass.state = PassState::Unrecorded;
        }
        self.set_up = true;
        Ok(())
    }

    /// Have each subpass's batch record its secondary command buffer for that (pass, subpass).
    pub fn record_secondary_commands(&mut self, resources: &mut RenderResources) -> Result<()> {
        let RenderResources { materials, batches } = resources;
        for (index, pass) in self.passes.iter().enumerate() {
            for (subpass, batch) in pass.batches.iter().enumerate() {
                let Some(handle) = batch else {
                    continue;
                };
                let extent = pass
                    .framebuffers
                    .first()
                    .map(|f| f.extent())
                    .ok_or(RenderError::MissingFramebuffer { pass: index })?;
                let info = SubpassPipelineInfo {
                    render_pass: pass.render_pass.as_ref(),
                    subpass: subpass as u32,
                    state: &pass.subpass_states[subpass],
                };
                batches
                    .get_mut(*handle)
                    .ok_or(RenderError::UnknownBatch)?
                    .record_render_command(self.device.as_ref(), materials, &info, extent)?;
            }
        }
        Ok(())
    }

    /// Record one primary command buffer per pass: begin, replay each subpass's batch, advance, end.
    /// `image_index` picks the framebuffer for passes with one framebuffer per swapchain image.
    pub fn record_primary_commands(&mut self, resources: &RenderResources, image_index: u32) -> Result<()> {
        for (index, pass) in self.passes.iter_mut().enumerate() {
            pass.state = PassState::Unrecorded;
            if pass.framebuffers.is_empty() {
                return Err(RenderError::MissingFramebuffer { pass: index });
            }
            let framebuffer = &pass.framebuffers[image_index as usize % pass.framebuffers.len()];
            let mut encoder = self.device.create_command_encoder()?;
            encoder.begin_render_pass(&RenderPassBegin {
                render_pass: pass.render_pass.as_ref(),
                framebuffer: framebuffer.as_ref(),
                clear_values: &pass.clear_values,
            })?;
            for (subpass, batch) in pass.batches.iter().enumerate() {
                if subpass > 0 {
                    encoder.next_subpass();
                }
                if let Some(handle) = batch {
                    let secondary = resources.batch(*handle)?.secondary(pass.render_pass.id(), subpass as u32);
                    if let Some(secondary) = secondary {
                        encoder.execute_bundles(&[secondary]);
                    }
                }
            }
            encoder.end_render_pass();
            pass.primary = Some(encoder.finish()?);
            pass.state = PassState::PrimaryRecorded;
        }
        Ok(())
    }

    /// Submit every pass in dependency order with a single queue call.
    pub fn submit_commands(&mut self, queue: &dyn Queue) -> Result<()> {
        if !self.set_up {
            return Err(RenderError::NodeNotSetUp);
        }
        {
            let mut batches = Vec::with_capacity(self.order.len() + 1);
            if let Some(fan_out) = &self.fan_out {
                batches.push(fan_out.batch(Vec::new()));
            }
            for &PassId(index) in &self.order {
                let pass = &self.passes[index];
                let primary = pass
                    .primary
                    .as_deref()
                    .filter(|_| pass.state == PassState::PrimaryRecorded)
                    .ok_or(RenderError::PassNotRecorded { pass: index })?;
                batches.push(self.submissions[index].batch(vec![primary]));
            }
            if !batches.is_empty() {
                queue.submit_batch(&batches, None)?;
                trace!("node {:?}: submitted {} batches", self.label, batches.len());
            }
        }
        for pass in &mut self.passes {
            pass.state = PassState::Submitted;
        }
        Ok(())
    }

    /// Signals of the passes at the deepest dependency level, one per terminal pass. The single
    /// consumer that follows this node waits on all of them.
    pub fn extract_last_semaphores(&self) -> Result<Vec<Arc<dyn Semaphore>>> {
        if !self.set_up {
            return Err(RenderError::NodeNotSetUp);
        }
        Ok(self.terminal.clone())
    }

    /// Whether every pass went through this frame's submission.
    pub fn is_submitted(&self) -> bool {
        !self.passes.is_empty() && self.passes.iter().all(|p| p.state == PassState::Submitted)
    }

    fn pass(&self, pass: PassId) -> Result<&PassEntry> {
        self.passes.get(pass.0).ok_or(RenderError::UnknownPass(pass.0))
    }

    fn pass_mut(&mut self, pass: PassId) -> Result<&mut PassEntry> {
        self.passes.get_mut(pass.0).ok_or(RenderError::UnknownPass(pass.0))
    }

    pub fn set_batch_for_subpass(&mut self, pass: PassId, subpass: u32, batch: BatchHandle) -> Result<()> {
        let entry = self.pass_mut(pass)?;
        let slot = entry
            .batches
            .get_mut(subpass as usize)
            .ok_or(RenderError::InvalidSubpass { pass: pass.0, subpass })?;
        *slot = Some(batch);
        Ok(())
    }

    pub fn set_batch_for_all_subpasses(&mut self, pass: PassId, batch: BatchHandle) -> Result<()> {
        let entry = self.pass_mut(pass)?;
        for slot in &mut entry.batches {
            *slot = Some(batch);
        }
        Ok(())
    }

    /// Subpass-dependent pipeline state, for building pipelines ahead of the first frame.
    pub fn subpass_pipeline_info(&self, pass: PassId, subpass: u32) -> Result<SubpassPipelineInfo<'_>> {
        let entry = self.pass(pass)?;
        let state = entry
            .subpass_states
            .get(subpass as usize)
            .ok_or(RenderError::InvalidSubpass { pass: pass.0, subpass })?;
        Ok(SubpassPipelineInfo {
            render_pass: entry.render_pass.as_ref(),
            subpass,
            state,
        })
    }

    /// Replace the framebuffers of `pass`, e.g. after the swapchain was recreated.
    pub fn set_framebuffers(&mut self, pass: PassId, framebuffers: Vec<Box<dyn Framebuffer>>) -> Result<()> {
        self.pass_mut(pass)?.framebuffers = framebuffers;
        Ok(())
    }

    /// Create one framebuffer per attachment list (typically one per swapchain image).
    pub fn create_framebuffers(
        &mut self,
        pass: PassId,
        attachments: &[Vec<&dyn Texture>],
        extent: (u32, u32),
    ) -> Result<()> {
        let entry = self.pass(pass)?;
        let framebuffers = attachments
            .iter()
            .map(|views| self.device.create_framebuffer(entry.render_pass.as_ref(), views, extent))
            .collect::<std::result::Result<Vec<_>, String>>()?;
        self.set_framebuffers(pass, framebuffers)
    }

    pub fn render_pass(&self, pass: PassId) -> Result<&dyn RenderPassLayout> {
        Ok(self.pass(pass)?.render_pass.as_ref())
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn subpass_count(&self, pass: PassId) -> Result<u32> {
        Ok(self.pass(pass)?.render_pass.subpass_count())
    }

    pub fn pass_state(&self, pass: PassId) -> Option<PassState> {
        self.passes.get(pass.0).map(|p| p.state)
    }

    /// Dependency level of `pass`, available after [`Self::setup`].
    pub fn level(&self, pass: PassId) -> Option<usize> {
        self.levels.get(pass.0).copied()
    }

    /// Semaphores `pass` signals on submission, available after [`Self::setup`].
    pub fn pass_signals(&self, pass: PassId) -> Result<&[Arc<dyn Semaphore>]> {
        self.pass(pass)?;
        Ok(self.submissions.get(pass.0).map(|s| s.signals.as_slice()).unwrap_or(&[]))
    }

    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label
    }

    /// Release every pass. The GPU must be idle.
    pub fn destroy(&mut self) {
        self.submissions.clear();
        self.fan_out = None;
        self.terminal.clear();
        self.passes.clear();
        self.graph = PassGraph::new();
        self.order.clear();
        self.levels.clear();
        self.set_up = false;
    }
}

impl fmt::Debug for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderNode")
            .field("label", &self.label)
            .field("passes", &self.passes.len())
            .field("levels", &self.levels)
            .field("set_up", &self.set_up)
            .finish()
    }
}
