//! Black-box test that an [`Engine`] built from one [`Graph::sub_graph`]
//! only ever instantiates modules belonging to that partition, and that
//! an edge crossing into another sub-graph is a harmless no-op locally
//! rather than a lookup failure for a module that was never registered.

use omnistack_core::engine::Engine;
use omnistack_core::graph::Graph;
use omnistack_core::module::{Module, ModuleFactory, ModuleType};
use omnistack_core::packet::{Packet, PacketPool};
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static A_SINK_HITS: Lazy<AtomicUsize> = Lazy::new(|| AtomicUsize::new(0));

struct Source {
    pending: VecDeque<*mut Packet>,
    total: usize,
}
unsafe impl Send for Source {}

impl Module for Source {
    fn name(&self) -> &'static str {
        "partition.a_source"
    }
    fn module_type(&self) -> ModuleType {
        ModuleType::ReadOnly
    }
    fn has_timer(&self) -> bool {
        true
    }
    fn initialize(
        &mut self,
        _name_prefix: &str,
        packet_pool: &PacketPool,
        _events: &omnistack_core::module::EventSink,
    ) {
        for _ in 0..self.total {
            self.pending.push_back(packet_pool.allocate().unwrap());
        }
    }
    fn timer_logic(&mut self, _tick: u64) -> *mut Packet {
        self.pending.pop_front().unwrap_or(std::ptr::null_mut())
    }
}

struct Sink;
impl Module for Sink {
    fn name(&self) -> &'static str {
        "partition.a_sink"
    }
    fn main_logic(&mut self, packet: *mut Packet) -> *mut Packet {
        A_SINK_HITS.fetch_add(1, Ordering::SeqCst);
        // Forward unchanged: the only downstream edge from this node
        // crosses into another sub-graph, so the engine should drop it
        // locally rather than trying to route to an uninstantiated node.
        packet
    }
}

#[test]
fn engine_only_instantiates_its_own_sub_graphs_nodes() {
    ModuleFactory::register("partition.a_source", || {
        Box::new(Source {
            pending: VecDeque::new(),
            total: 5,
        })
    })
    .ok();
    ModuleFactory::register("partition.a_sink", || Box::new(Sink)).ok();
    // Deliberately never registered: "partition.b_sink" belongs to
    // sub-graph 1 and must never be looked up while building sub-graph 0.

    let graph = Graph::new(
        vec![
            "partition.a_source".into(),
            "partition.a_sink".into(),
            "partition.b_sink".into(),
        ],
        vec![0, 0, 1],
        vec![(0, 1), (1, 2)],
        vec![],
        vec![],
    );

    let sub_graph_0 = graph.sub_graph(0);
    assert_eq!(sub_graph_0.node_ids, vec![0, 1]);
    assert!(sub_graph_0.remote_links.get(&1).unwrap().contains(&2));

    // Building sub-graph 0's engine must succeed without ever resolving
    // "partition.b_sink" through the module registry.
    let mut engine = Engine::build(&graph, &sub_graph_0, 0, "partition-test").unwrap();

    let stop = engine.stop_handle();
    let handle = std::thread::spawn(move || engine.run());
    std::thread::sleep(Duration::from_millis(150));
    stop.store(true, Ordering::Relaxed);
    handle.join().unwrap();

    assert_eq!(A_SINK_HITS.load(Ordering::SeqCst), 5);
}
