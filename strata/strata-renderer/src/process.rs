//! Render process: an ordered chain of render nodes. Node i waits on the terminal signals of the last
//! node before it that has passes.

use log::{debug, warn};
use std::sync::Arc;
use strata_rhi::{Queue, Semaphore};

use crate::error::Result;
use crate::node::RenderNode;
use crate::resources::RenderResources;

#[derive(Debug, Default)]
pub struct RenderProcess {
    label: Option<&'static str>,
    nodes: Vec<RenderNode>,
    initial_waits: Vec<Arc<dyn Semaphore>>,
    terminal: Vec<Arc<dyn Semaphore>>,
}

impl RenderProcess {
    pub fn new(label: Option<&'static str>) -> Self {
        Self {
            label,
            nodes: Vec::new(),
            initial_waits: Vec::new(),
            terminal: Vec::new(),
        }
    }

    /// Append a node; it runs after every node added before it. Returns its index.
    pub fn add_render_node(&mut self, node: RenderNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Set up the first node with `initial_waits` and every later node with its predecessor's terminal
    /// signals. Nodes without passes consume nothing; the signals flow on to the next node.
    pub fn setup(&mut self, initial_waits: &[Arc<dyn Semaphore>]) -> Result<()> {
        let mut waits = initial_waits.to_vec();
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if node.pass_count() == 0 {
                warn!("process {:?}: node {} has no passes", self.label, index);
                node.setup(&[])?;
                continue;
            }
            node.setup(&waits)?;
            waits = node.extract_last_semaphores()?;
        }
        debug!("process {:?}: chained {} nodes", self.label, self.nodes.len());
        self.initial_waits = initial_waits.to_vec();
        self.terminal = waits;
        Ok(())
    }

    /// Record secondary then primary commands of every node.
    pub fn record_commands(&mut self, resources: &mut RenderResources, image_index: u32) -> Result<()> {
        for node in &mut self.nodes {
            node.record_secondary_commands(resources)?;
        }
        for node in &mut self.nodes {
            node.record_primary_commands(resources, image_index)?;
        }
        Ok(())
    }

    /// Submit every node in order. GPU ordering comes from the signal chain, not from this order.
    pub fn submit_command(&mut self, queue: &dyn Queue) -> Result<()> {
        for node in &mut self.nodes {
            node.submit_commands(queue)?;
        }
        Ok(())
    }

    /// Terminal signals of the last node with passes: what presentation waits on. Available after
    /// [`Self::setup`].
    pub fn terminal_semaphores(&self) -> &[Arc<dyn Semaphore>] {
        &self.terminal
    }

    /// After a submission failed part way: the signals of this frame that nothing submitted will wait on.
    /// These are the terminal signals of the last submitted node, or the initial waits when no node
    /// got submitted. Only meaningful between recording and presentation.
    pub fn unconsumed_signals(&self) -> Result<Vec<Arc<dyn Semaphore>>> {
        let mut pending = self.initial_waits.clone();
        for node in self.nodes.iter().filter(|n| n.pass_count() > 0) {
            if !node.is_submitted() {
                break;
            }
            pending = node.extract_last_semaphores()?;
        }
        Ok(pending)
    }

    pub fn node(&self, index: usize) -> Option<&RenderNode> {
        self.nodes.get(index)
    }

    pub fn node_mut(&mut self, index: usize) -> Option<&mut RenderNode> {
        self.nodes.get_mut(index)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut RenderNode> {
        self.nodes.iter_mut()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn label(&self) -> Option<&'static str> {
        self.label
    }

    /// Release every node. The GPU must be idle.
    pub fn destroy(&mut self) {
        for node in &mut self.nodes {
            node.destroy();
        }
        self.nodes.clear();
        self.initial_waits.clear();
        self.terminal.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PassId;
    use crate::node::RenderPassDesc;
    use crate::testing::{assert_semaphores_balanced, color_pass, semaphore_id, MockDevice};
    use strata_rhi::{Device, ResourceId};

    fn add_pass(node: &mut RenderNode, deps: &[PassId]) -> PassId {
        let pass = node
            .add_render_pass(
                RenderPassDesc {
                    layout: color_pass(),
                    subpass_states: Vec::new(),
                    clear_values: Vec::new(),
                },
                deps,
            )
            .unwrap();
        node.create_framebuffers(pass, &[Vec::new()], (16, 16)).unwrap();
        pass
    }

    fn ids(semaphores: &[Arc<dyn Semaphore>]) -> Vec<ResourceId> {
        semaphores.iter().map(|s| semaphore_id(s.as_ref())).collect()
    }

    fn run_frame(process: &mut RenderProcess, device: &MockDevice) {
        let mut resources = RenderResources::new();
        process.record_commands(&mut resources, 0).unwrap();
        process.submit_command(device.queue().unwrap().as_ref()).unwrap();
    }

    #[test]
    fn second_node_waits_on_first_nodes_terminal_passes() {
        let device = Arc::new(MockDevice::new());
        let log = device.log();

        // N0: two independent roots feeding two terminal passes.
        let mut n0 = RenderNode::new(device.clone(), Some("n0"));
        let a = add_pass(&mut n0, &[]);
        let b = add_pass(&mut n0, &[]);
        let c = add_pass(&mut n0, &[a]);
        let d = add_pass(&mut n0, &[b]);

        let mut n1 = RenderNode::new(device.clone(), Some("n1"));
        let post = add_pass(&mut n1, &[]);

        let mut process = RenderProcess::new(Some("frame"));
        process.add_render_node(n0);
        process.add_render_node(n1);
        let acquire: Arc<dyn Semaphore> = Arc::from(device.create_semaphore().unwrap());
        let acquire_id = semaphore_id(acquire.as_ref());
        process.setup(&[acquire]).unwrap();
        let n0 = process.node(0).unwrap();
        let terminal: Vec<ResourceId> = [c, d].iter().flat_map(|p| ids(n0.pass_signals(*p).unwrap())).collect();
        assert_eq!(ids(&n0.extract_last_semaphores().unwrap()), terminal);

        run_frame(&mut process, &device);

        let last = ids(process.terminal_semaphores());
        let post_signals = ids(process.node(1).unwrap().pass_signals(post).unwrap());
        assert_eq!(last, post_signals);

        let log = log.lock();
        assert_eq!(log.submissions.len(), 2);
        // N0 fans the acquire signal out to its two roots.
        assert_eq!(log.submissions[0].batches.len(), 5);
        let n1_batches = &log.submissions[1].batches;
        assert_eq!(n1_batches.len(), 1);
        assert_eq!(n1_batches[0].waits, terminal);
        assert_semaphores_balanced(&log, &[acquire_id], &last);
    }

    #[test]
    fn single_pass_chain() {
        let device = Arc::new(MockDevice::new());
        let log = device.log();
        let mut n0 = RenderNode::new(device.clone(), None);
        let only = add_pass(&mut n0, &[]);
        let mut n1 = RenderNode::new(device.clone(), None);
        add_pass(&mut n1, &[]);
        let mut process = RenderProcess::new(None);
        process.add_render_node(n0);
        process.add_render_node(n1);
        process.setup(&[]).unwrap();
        let only_signals = ids(process.node(0).unwrap().pass_signals(only).unwrap());
        assert_eq!(only_signals.len(), 1);
        run_frame(&mut process, &device);
        let log = log.lock();
        assert!(log.submissions[0].batches[0].waits.is_empty());
        assert_eq!(log.submissions[0].batches[0].signals, only_signals);
        assert_eq!(log.submissions[1].batches[0].waits, only_signals);
    }

    #[test]
    fn empty_nodes_pass_signals_through() {
        let device = Arc::new(MockDevice::new());
        let log = device.log();
        let mut first = RenderNode::new(device.clone(), Some("first"));
        let only = add_pass(&mut first, &[]);
        let mut last = RenderNode::new(device.clone(), Some("last"));
        add_pass(&mut last, &[]);
        let mut process = RenderProcess::new(None);
        process.add_render_node(first);
        process.add_render_node(RenderNode::new(device.clone(), Some("empty")));
        process.add_render_node(last);
        process.add_render_node(RenderNode::new(device.clone(), Some("trailing")));
        let acquire: Arc<dyn Semaphore> = Arc::from(device.create_semaphore().unwrap());
        let acquire_id = semaphore_id(acquire.as_ref());
        process.setup(&[acquire]).unwrap();
        let first_signals = ids(process.node(0).unwrap().pass_signals(only).unwrap());
        let terminal = ids(&process.node(2).unwrap().extract_last_semaphores().unwrap());
        assert_eq!(ids(process.terminal_semaphores()), terminal);

        run_frame(&mut process, &device);
        let log = log.lock();
        assert_eq!(log.submissions.len(), 2);
        assert_eq!(log.submissions[1].batches[0].waits, first_signals);
        assert_semaphores_balanced(&log, &[acquire_id], &terminal);
    }

    #[test]
    fn unconsumed_signals_follow_submission_progress() {
        let device = Arc::new(MockDevice::new());
        let log = device.log();
        let mut first = RenderNode::new(device.clone(), None);
        add_pass(&mut first, &[]);
        let mut second = RenderNode::new(device.clone(), None);
        add_pass(&mut second, &[]);
        let mut process = RenderProcess::new(None);
        process.add_render_node(first);
        process.add_render_node(second);
        let acquire: Arc<dyn Semaphore> = Arc::from(device.create_semaphore().unwrap());
        let acquire_id = semaphore_id(acquire.as_ref());
        process.setup(&[acquire]).unwrap();

        let mut resources = RenderResources::new();
        process.record_commands(&mut resources, 0).unwrap();
        assert_eq!(ids(&process.unconsumed_signals().unwrap()), vec![acquire_id]);

        // The first node goes through, the second fails.
        let queue = device.queue().unwrap();
        process.node_mut(0).unwrap().submit_commands(queue.as_ref()).unwrap();
        log.lock().submit_failures = 1;
        assert!(process.node_mut(1).unwrap().submit_commands(queue.as_ref()).is_err());
        let first_terminal = ids(&process.node(0).unwrap().extract_last_semaphores().unwrap());
        assert_eq!(ids(&process.unconsumed_signals().unwrap()), first_terminal);
    }

    #[test]
    fn destroy_releases_nodes() {
        let device = Arc::new(MockDevice::new());
        let mut process = RenderProcess::new(None);
        let mut node = RenderNode::new(device.clone(), None);
        add_pass(&mut node, &[]);
        process.add_render_node(node);
        process.setup(&[]).unwrap();
        assert_eq!(process.terminal_semaphores().len(), 1);
        process.destroy();
        assert_eq!(process.node_count(), 0);
        assert!(process.terminal_semaphores().is_empty());
    }
}
