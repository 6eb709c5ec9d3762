//! Partition of a [`super::graph::Graph`] relevant to a single sub-graph.
//!
//! Collects the actual node indices whose sub-graph id matches the target
//! id — not the id value itself repeated — since every later consumer
//! (the engine's module instantiation loop) needs the node's index.

use crate::graph::graph::Graph;
use std::collections::{HashMap, HashSet};

pub struct SubGraph {
    pub sub_graph_id: u32,
    pub node_ids: Vec<u32>,
    /// Edges where both endpoints belong to this sub-graph.
    pub local_links: HashMap<u32, HashSet<u32>>,
    /// Edges where at least one endpoint belongs to another sub-graph.
    pub remote_links: HashMap<u32, HashSet<u32>>,
    pub mutex_links: HashMap<u32, Vec<HashSet<u32>>>,
    pub equal_links: HashMap<u32, Vec<HashSet<u32>>>,
}

impl SubGraph {
    pub fn from_graph(graph: &Graph, sub_graph_id: u32) -> Self {
        let node_ids: Vec<u32> = graph
            .node_sub_graph_ids
            .iter()
            .enumerate()
            .filter(|(_, &id)| id == sub_graph_id)
            .map(|(idx, _)| idx as u32)
            .collect();

        let mut local_links: HashMap<u32, HashSet<u32>> = HashMap::new();
        let mut remote_links: HashMap<u32, HashSet<u32>> = HashMap::new();

        for &(u, v) in &graph.links {
            let u_in = graph.node_sub_graph_ids[u as usize] == sub_graph_id;
            let v_in = graph.node_sub_graph_ids[v as usize] == sub_graph_id;
            if !u_in && !v_in {
                continue;
            }
            if u_in && v_in {
                local_links.entry(u).or_default().insert(v);
            } else {
                remote_links.entry(u).or_default().insert(v);
            }
        }

        let mutex_links = Self::partition_groups(graph, &graph.mutex_links);
        let equal_links = Self::partition_groups(graph, &graph.equal_links);

        Self {
            sub_graph_id,
            node_ids,
            local_links,
            remote_links,
            mutex_links,
            equal_links,
        }
    }

    fn partition_groups(
        graph: &Graph,
        groups: &[Vec<usize>],
    ) -> HashMap<u32, Vec<HashSet<u32>>> {
        let mut result: HashMap<u32, Vec<HashSet<u32>>> = HashMap::new();
        for group in groups {
            let mut marked: HashSet<u32> = HashSet::new();
            for &idx in group {
                let (u, v) = graph.links[idx];
                let entry = result.entry(u).or_default();
                if !marked.contains(&u) {
                    entry.push(HashSet::from([v]));
                    marked.insert(u);
                } else {
                    entry.last_mut().unwrap().insert(v);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::graph::Graph;

    fn sample_graph() -> Graph {
        // 0 -> 1 -> 2, nodes 0,1 on sub-graph 0, node 2 on sub-graph 1
        Graph::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![0, 0, 1],
            vec![(0, 1), (1, 2)],
            vec![],
            vec![],
        )
    }

    #[test]
    fn node_ids_collects_actual_indices_not_sub_graph_ids() {
        let graph = sample_graph();
        let sub = SubGraph::from_graph(&graph, 0);
        assert_eq!(sub.node_ids, vec![0, 1]);
    }

    #[test]
    fn edge_crossing_sub_graphs_is_remote() {
        let graph = sample_graph();
        let sub0 = SubGraph::from_graph(&graph, 0);
        assert!(sub0.local_links.get(&0).unwrap().contains(&1));
        assert!(sub0.remote_links.get(&1).unwrap().contains(&2));
    }
}
