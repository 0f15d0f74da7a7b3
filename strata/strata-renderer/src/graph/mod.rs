//! Pass dependency graph inside one render node.
//!
//! Passes are vertices, `add_edge(before, after)` means `after` waits on `before`. The graph yields a
//! topological order and a dependency level per pass: level 0 for passes without dependencies,
//! otherwise one more than the deepest dependency. Passes sharing a level may run concurrently.

use std::collections::VecDeque;

use crate::error::{RenderError, Result};

/// Index of a pass inside its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub usize);

#[derive(Debug, Clone, Default)]
pub struct PassGraph {
    pass_count: usize,
    /// (before, after)
    edges: Vec<(PassId, PassId)>,
}

impl PassGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(&mut self) -> PassId {
        let id = PassId(self.pass_count);
        self.pass_count += 1;
        id
    }

    /// `after` waits on `before`.
    pub fn add_edge(&mut self, before: PassId, after: PassId) {
        self.edges.push((before, after));
    }

    pub fn pass_count(&self) -> usize {
        self.pass_count
    }

    /// Kahn's algorithm; ties resolve in registration order.
    pub fn topological_order(&self) -> Result<Vec<PassId>> {
        let n = self.pass_count;
        let mut in_degree = vec![0usize; n];
        let mut out_edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(PassId(a), PassId(b)) in &self.edges {
            if a < n && b < n {
                in_degree[b] += 1;
                out_edges[a].push(b);
            }
        }
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(u) = ready.pop_front() {
            order.push(PassId(u));
            for &v in &out_edges[u] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.push_back(v);
                }
            }
        }
        if order.len() != n {
            return Err(RenderError::DependencyCycle);
        }
        Ok(order)
    }

    /// Dependency level of every pass, indexed by pass.
    pub fn levels(&self) -> Result<Vec<usize>> {
        let order = self.topological_order()?;
        let mut levels = vec![0usize; self.pass_count];
        for PassId(pass) in order {
            let level = self
                .dependencies_of(PassId(pass))
                .map(|PassId(dep)| levels[dep] + 1)
                .max()
                .unwrap_or(0);
            levels[pass] = level;
        }
        Ok(levels)
    }

    pub fn dependencies_of(&self, pass: PassId) -> impl Iterator<Item = PassId> + '_ {
        self.edges.iter().filter(move |(_, after)| *after == pass).map(|(before, _)| *before)
    }

    /// Number of passes waiting on `pass`.
    pub fn dependents_count(&self, pass: PassId) -> usize {
        self.edges.iter().filter(|(before, _)| *before == pass).count()
    }

    pub fn has_dependents(&self, pass: PassId) -> bool {
        self.dependents_count(pass) > 0
    }

    /// Passes at the deepest level.
    pub fn terminal_passes(&self) -> Result<Vec<PassId>> {
        let levels = self.levels()?;
        let Some(max) = levels.iter().copied().max() else {
            return Ok(Vec::new());
        };
        Ok(levels
            .iter()
            .enumerate()
            .filter(|(_, level)| **level == max)
            .map(|(i, _)| PassId(i))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_levels() {
        let mut graph = PassGraph::new();
        let p0 = graph.add_pass();
        let p1 = graph.add_pass();
        let p2 = graph.add_pass();
        graph.add_edge(p0, p1);
        graph.add_edge(p1, p2);
        assert_eq!(graph.levels().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.topological_order().unwrap(), vec![p0, p1, p2]);
        assert_eq!(graph.terminal_passes().unwrap(), vec![p2]);
        assert_eq!(graph.dependencies_of(p1).collect::<Vec<_>>(), vec![p0]);
    }

    #[test]
    fn diamond_levels() {
        let mut graph = PassGraph::new();
        let top = graph.add_pass();
        let left = graph.add_pass();
        let right = graph.add_pass();
        let bottom = graph.add_pass();
        let side = graph.add_pass();
        graph.add_edge(top, left);
        graph.add_edge(top, right);
        graph.add_edge(left, bottom);
        graph.add_edge(right, bottom);
        assert_eq!(graph.levels().unwrap(), vec![0, 1, 1, 2, 0]);
        assert_eq!(graph.dependents_count(top), 2);
        assert!(!graph.has_dependents(side));
        assert_eq!(graph.terminal_passes().unwrap(), vec![bottom]);
    }

    #[test]
    fn longest_chain_wins() {
        let mut graph = PassGraph::new();
        let a = graph.add_pass();
        let b = graph.add_pass();
        let c = graph.add_pass();
        graph.add_edge(a, b);
        graph.add_edge(b, c);
        graph.add_edge(a, c);
        assert_eq!(graph.levels().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = PassGraph::new();
        let a = graph.add_pass();
        let b = graph.add_pass();
        graph.add_edge(a, b);
        graph.add_edge(b, a);
        assert!(matches!(graph.levels(), Err(RenderError::DependencyCycle)));
    }

    #[test]
    fn empty_graph() {
        let graph = PassGraph::new();
        assert!(graph.terminal_passes().unwrap().is_empty());
    }
}
