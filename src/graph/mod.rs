//! The whole-system module graph and its per-sub-graph partitions
//!

pub mod graph;
pub mod subgraph;

pub use graph::{Graph, Link};
pub use subgraph::SubGraph;
