//! The whole-system module graph, as handed down by the control plane.
//!
//! A [`Graph`] names every node in the system and assigns each one to a
//! sub-graph id; every node in a sub-graph must run on the same engine
//! (and therefore the same CPU core). [`Graph::sub_graph`] partitions the
//! whole graph's links into the piece relevant to one sub-graph.

use crate::graph::subgraph::SubGraph;
use std::collections::HashMap;

/// A directed edge from node `0` to node `1`, indices into `node_names`.
pub type Link = (u32, u32);

pub struct Graph {
    pub node_names: Vec<String>,
    pub node_sub_graph_ids: Vec<u32>,
    pub links: Vec<Link>,
    /// Each inner vector is a set of link indices that must not all fire
    /// for the same packet at once (see [`crate::module::FilterGroupType::Mutex`]).
    pub mutex_links: Vec<Vec<usize>>,
    /// Each inner vector is a set of link indices load-balanced across
    /// (see [`crate::module::FilterGroupType::Equal`]).
    pub equal_links: Vec<Vec<usize>>,
}

impl Graph {
    pub fn new(
        node_names: Vec<String>,
        node_sub_graph_ids: Vec<u32>,
        links: Vec<Link>,
        mutex_links: Vec<Vec<usize>>,
        equal_links: Vec<Vec<usize>>,
    ) -> Self {
        Self {
            node_names,
            node_sub_graph_ids,
            links,
            mutex_links,
            equal_links,
        }
    }

    /// All distinct sub-graph ids present in the graph.
    pub fn sub_graph_ids(&self) -> Vec<u32> {
        let mut seen = HashMap::new();
        let mut ids = Vec::new();
        for &id in &self.node_sub_graph_ids {
            if seen.insert(id, ()).is_none() {
                ids.push(id);
            }
        }
        ids
    }

    pub fn sub_graph(&self, sub_graph_id: u32) -> SubGraph {
        SubGraph::from_graph(self, sub_graph_id)
    }
}
