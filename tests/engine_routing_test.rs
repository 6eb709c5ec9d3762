//! Black-box tests driving a real [`Engine`] built from a [`Graph`]: a
//! module graph is registered, partitioned into a single sub-graph, and
//! run on a background thread while packets a timer-driven source module
//! manufactures flow through it.

use omnistack_core::engine::Engine;
use omnistack_core::graph::Graph;
use omnistack_core::module::{Module, ModuleFactory, ModuleType};
use omnistack_core::packet::{Packet, PacketPool};
use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Per-module-name hit counters, since the registered `Module`s are owned
/// by the `Engine` once built and have no handle back to the test.
static COUNTS: Lazy<Mutex<HashMap<&'static str, AtomicUsize>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn bump(name: &'static str) {
    let counts = COUNTS.lock().unwrap();
    counts
        .get(name)
        .expect("counter registered before engine runs")
        .fetch_add(1, Ordering::SeqCst);
}

fn reset_counter(name: &'static str) {
    COUNTS
        .lock()
        .unwrap()
        .insert(name, AtomicUsize::new(0));
}

fn count_of(name: &'static str) -> usize {
    COUNTS.lock().unwrap()[name].load(Ordering::SeqCst)
}

/// Manufactures `total` packets up front (during `initialize`, while the
/// `&PacketPool` borrow is still valid) and hands one out per timer tick
/// until the queue is drained.
struct Source {
    name: &'static str,
    total: usize,
    pending: VecDeque<*mut Packet>,
}

unsafe impl Send for Source {}

impl Module for Source {
    fn name(&self) -> &'static str {
        self.name
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
        for i in 0..self.total {
            let p = packet_pool.allocate().expect("pool has room for test packets");
            unsafe {
                (*p).custom_value = (i % 2) as u64;
            }
            self.pending.push_back(p);
        }
    }

    fn timer_logic(&mut self, _tick: u64) -> *mut Packet {
        match self.pending.pop_front() {
            Some(p) => {
                bump(self.name);
                p
            }
            None => std::ptr::null_mut(),
        }
    }
}

/// A plain pass-through hop that counts every packet it sees.
struct Counter(&'static str);

impl Module for Counter {
    fn name(&self) -> &'static str {
        self.0
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::ReadOnly
    }

    fn main_logic(&mut self, packet: *mut Packet) -> *mut Packet {
        bump(self.0);
        packet
    }
}

/// Runs `engine` to completion of its timer-sourced work, then requests
/// it stop. `settle` should comfortably exceed the time needed to drain
/// `expected_total` packets through the graph.
fn run_to_completion(mut engine: Engine, settle: Duration) {
    let stop = engine.stop_handle();
    let handle = std::thread::spawn(move || engine.run());
    std::thread::sleep(settle);
    stop.store(true, Ordering::Relaxed);
    handle.join().expect("engine thread must not panic");
}

#[test]
fn fan_out_over_an_equal_group_conserves_total_packet_count() {
    reset_counter("routing.source");
    reset_counter("routing.sink_a");
    reset_counter("routing.sink_b");

    ModuleFactory::register("routing.source", || {
        Box::new(Source {
            name: "routing.source",
            total: 10,
            pending: VecDeque::new(),
        })
    })
    .ok();
    ModuleFactory::register("routing.sink_a", || Box::new(Counter("routing.sink_a"))).ok();
    ModuleFactory::register("routing.sink_b", || Box::new(Counter("routing.sink_b"))).ok();

    // source -> {sink_a, sink_b}, load-balanced round robin (Equal group).
    let graph = Graph::new(
        vec![
            "routing.source".into(),
            "routing.sink_a".into(),
            "routing.sink_b".into(),
        ],
        vec![0, 0, 0],
        vec![(0, 1), (0, 2)],
        vec![],
        vec![vec![0, 1]],
    );
    let sub_graph = graph.sub_graph(0);
    let engine = Engine::build(&graph, &sub_graph, 0, "routing-test").unwrap();

    run_to_completion(engine, Duration::from_millis(200));

    assert_eq!(count_of("routing.source"), 10);
    let a = count_of("routing.sink_a");
    let b = count_of("routing.sink_b");
    // An Equal group never duplicates: every packet lands on exactly one
    // sink, so the two counts must add up to the total manufactured.
    assert_eq!(a + b, 10);
    // Round robin over two sinks should not starve either one entirely.
    assert!(a > 0 && b > 0, "expected both sinks to receive packets, got a={a} b={b}");
}

#[test]
fn mutex_group_routes_each_packet_to_exactly_one_branch() {
    reset_counter("routing.classifier_source");
    reset_counter("routing.tcp_sink");
    reset_counter("routing.udp_sink");

    ModuleFactory::register("routing.classifier_source", || {
        Box::new(Source {
            name: "routing.classifier_source",
            total: 8,
            pending: VecDeque::new(),
        })
    })
    .ok();

    struct TaggedSink {
        name: &'static str,
        want: u64,
    }
    impl Module for TaggedSink {
        fn name(&self) -> &'static str {
            self.name
        }
        fn get_filter(&self, _upstream_module: &str, _global_id: u32) -> omnistack_core::module::filter::Filter {
            let want = self.want;
            std::sync::Arc::new(move |packet: *const Packet| unsafe { (*packet).custom_value == want })
        }
        fn main_logic(&mut self, packet: *mut Packet) -> *mut Packet {
            bump(self.name);
            packet
        }
    }

    ModuleFactory::register("routing.tcp_sink", || {
        Box::new(TaggedSink {
            name: "routing.tcp_sink",
            want: 0,
        })
    })
    .ok();
    ModuleFactory::register("routing.udp_sink", || {
        Box::new(TaggedSink {
            name: "routing.udp_sink",
            want: 1,
        })
    })
    .ok();

    let graph = Graph::new(
        vec![
            "routing.classifier_source".into(),
            "routing.tcp_sink".into(),
            "routing.udp_sink".into(),
        ],
        vec![0, 0, 0],
        vec![(0, 1), (0, 2)],
        vec![vec![0, 1]],
        vec![],
    );
    let sub_graph = graph.sub_graph(0);
    let engine = Engine::build(&graph, &sub_graph, 0, "routing-mutex-test").unwrap();

    run_to_completion(engine, Duration::from_millis(200));

    assert_eq!(count_of("routing.classifier_source"), 8);
    // custom_value alternates 0/1/0/1/..., so exactly half go to each sink.
    assert_eq!(count_of("routing.tcp_sink"), 4);
    assert_eq!(count_of("routing.udp_sink"), 4);
}
