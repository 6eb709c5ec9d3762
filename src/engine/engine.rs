//! The per-core engine.
//!
//! An `Engine` owns one [`SubGraph`]'s worth of module instances, pinned
//! to a single CPU core, and runs a cooperative tick loop: timers fire,
//! then the LIFO packet queue drains, with every packet handed to exactly
//! one module's [`Module::main_logic`] per hop. Edges that cross into
//! another sub-graph are represented locally only as placeholder indices
//! (`>= module_num`); actually shipping packets across engines over a
//! remote transport is reserved for a later iteration.

use crate::graph::{Graph, SubGraph};
use crate::module::{Event, EventSink, EventType, FilterGroup, Module, ModuleFactory, ModuleType};
use crate::packet::{Packet, PacketPool};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::error::{OmniError, OmniResult};

/// Default packet pool size for an engine with no explicit override.
pub const DEFAULT_PACKET_POOL_SIZE: usize = 4096;

struct QueueItem {
    node_idx: u32,
    packet: *mut Packet,
}

pub struct Engine {
    module_num: usize,
    #[allow(dead_code)]
    assigned_module_idx: usize,
    modules: Vec<Box<dyn Module>>,
    upstream_links: Vec<Vec<u32>>,
    downstream_links: Vec<Vec<u32>>,
    #[allow(dead_code)]
    local_to_global: Vec<u32>,
    timer_list: Vec<u32>,
    filter_groups: Vec<Vec<FilterGroup>>,
    next_hop_filter_default: Vec<u32>,
    module_read_only: Vec<bool>,
    event_entries: HashMap<EventType, Vec<u32>>,
    packet_pool: PacketPool,
    packet_queue: Vec<QueueItem>,
    event_tx: crossbeam::channel::Sender<Event>,
    event_rx: crossbeam::channel::Receiver<Event>,
    stop: Arc<AtomicBool>,
}

unsafe impl Send for Engine {}

impl Engine {
    /// Build an engine for `sub_graph` (a partition of `graph`), pinning
    /// this thread to `core`.
    pub fn build(
        graph: &Graph,
        sub_graph: &SubGraph,
        core: usize,
        name_prefix: &str,
    ) -> OmniResult<Self> {
        if let Some(core_id) = core_affinity::get_core_ids()
            .and_then(|ids| ids.into_iter().find(|c| c.id == core))
        {
            if !core_affinity::set_for_current(core_id) {
                log::warn!("failed to pin engine thread to core {core}");
            }
        }

        let packet_pool =
            PacketPool::create(sub_graph.sub_graph_id, name_prefix, DEFAULT_PACKET_POOL_SIZE)?;

        let mut global_to_local: HashMap<u32, u32> = HashMap::new();
        let mut local_to_global: Vec<u32> = Vec::new();
        let mut modules: Vec<Box<dyn Module>> = Vec::new();

        for &idx in &sub_graph.node_ids {
            let module_id = modules.len() as u32;
            let name = graph
                .node_names
                .get(idx as usize)
                .ok_or_else(|| OmniError::Contract("node index out of range".into()))?;
            let module = ModuleFactory::create(name)?;
            modules.push(module);
            global_to_local.insert(idx, module_id);
            local_to_global.push(idx);
        }

        let module_num = modules.len();
        let mut upstream_links: Vec<Vec<u32>> = vec![Vec::new(); module_num];
        let mut downstream_links: Vec<Vec<u32>> = vec![Vec::new(); module_num];

        for (&global_idu, targets) in &sub_graph.local_links {
            let idu = *global_to_local
                .get(&global_idu)
                .ok_or_else(|| OmniError::Contract("local link references unknown node".into()))?;
            for &global_idv in targets {
                let idv = *global_to_local.get(&global_idv).ok_or_else(|| {
                    OmniError::Contract("local link references unknown node".into())
                })?;
                downstream_links[idu as usize].push(idv);
                upstream_links[idv as usize].push(idu);
            }
        }

        let mut assigned_module_idx = module_num as u32;
        for (&global_idu, targets) in &sub_graph.remote_links {
            let idu_is_here = global_to_local.contains_key(&global_idu);
            if idu_is_here {
                let idu = global_to_local[&global_idu];
                for &global_idv in targets {
                    let idv = *global_to_local.entry(global_idv).or_insert_with(|| {
                        let assigned = assigned_module_idx;
                        assigned_module_idx += 1;
                        local_to_global.push(global_idv);
                        assigned
                    });
                    downstream_links.resize((idv as usize + 1).max(downstream_links.len()), Vec::new());
                    downstream_links[idu as usize].push(idv);
                }
            } else {
                let idu = *global_to_local.entry(global_idu).or_insert_with(|| {
                    let assigned = assigned_module_idx;
                    assigned_module_idx += 1;
                    local_to_global.push(global_idu);
                    assigned
                });
                for &global_idv in targets {
                    let idv = global_to_local[&global_idv];
                    upstream_links[idv as usize].push(idu);
                }
            }
        }

        let (event_tx, event_rx) = crossbeam::channel::unbounded();

        let mut engine = Self {
            module_num,
            assigned_module_idx: assigned_module_idx as usize,
            modules,
            upstream_links,
            downstream_links,
            local_to_global,
            timer_list: Vec::new(),
            filter_groups: Vec::new(),
            next_hop_filter_default: Vec::new(),
            module_read_only: Vec::new(),
            event_entries: HashMap::new(),
            packet_pool,
            packet_queue: Vec::new(),
            event_tx,
            event_rx,
            stop: Arc::new(AtomicBool::new(false)),
        };

        let mut downstream = std::mem::take(&mut engine.downstream_links);
        for links in downstream.iter_mut() {
            engine.sort_links(links);
        }
        engine.downstream_links = downstream;

        let mut upstream = std::mem::take(&mut engine.upstream_links);
        for links in upstream.iter_mut() {
            engine.sort_links(links);
        }
        engine.upstream_links = upstream;

        engine.build_filter_groups(sub_graph, &global_to_local);

        let name_prefix_owned = name_prefix.to_string();
        let sink = EventSink::new(engine.event_tx.clone());
        for module in engine.modules.iter_mut() {
            module.initialize(&name_prefix_owned, &engine.packet_pool, &sink);
        }

        for (module_id, module) in engine.modules.iter().enumerate() {
            for event_type in module.register_events() {
                engine
                    .event_entries
                    .entry(event_type)
                    .or_default()
                    .push(module_id as u32);
            }
        }

        Ok(engine)
    }

    fn build_filter_groups(&mut self, sub_graph: &SubGraph, global_to_local: &HashMap<u32, u32>) {
        self.filter_groups = Vec::with_capacity(self.module_num);
        for u in 0..self.module_num {
            let global_idu = self.local_to_global[u];
            let mut local_to_idx: HashMap<u32, usize> = HashMap::new();
            let mut filters = Vec::new();
            let mut filter_masks = Vec::new();

            for (j, &downstream_node) in self.downstream_links[u].iter().enumerate() {
                let filter = if (downstream_node as usize) < self.module_num {
                    self.modules[downstream_node as usize]
                        .get_filter(self.modules[u].name(), global_idu)
                } else {
                    crate::module::filter::default_filter()
                };
                filters.push(filter);
                filter_masks.push(1u32 << j);
                local_to_idx.insert(downstream_node, j);
            }

            let mut groups: Vec<std::collections::HashSet<usize>> = Vec::new();
            let mut group_types = Vec::new();

            if let Some(mutex_groups) = sub_graph.mutex_links.get(&global_idu) {
                for group in mutex_groups {
                    let mut idx_set = std::collections::HashSet::new();
                    for &global_idv in group {
                        if let Some(&v) = global_to_local.get(&global_idv) {
                            if let Some(&idx) = local_to_idx.get(&v) {
                                idx_set.insert(idx);
                            }
                        }
                    }
                    groups.push(idx_set);
                    group_types.push(crate::module::FilterGroupType::Mutex);
                }
            }
            if let Some(equal_groups) = sub_graph.equal_links.get(&global_idu) {
                for group in equal_groups {
                    let mut idx_set = std::collections::HashSet::new();
                    for &global_idv in group {
                        if let Some(&v) = global_to_local.get(&global_idv) {
                            if let Some(&idx) = local_to_idx.get(&v) {
                                idx_set.insert(idx);
                            }
                        }
                    }
                    groups.push(idx_set);
                    group_types.push(crate::module::FilterGroupType::Equal);
                }
            }

            self.filter_groups.push(crate::module::filter::register_downstream_filters(
                &filters,
                &filter_masks,
                &groups,
                &group_types,
            ));
        }
    }

    /// Total order used to arrange each node's links: local nodes before
    /// remote placeholders, and among local nodes, read-only modules
    /// before read-write/occupy ones.
    fn compare_links(&self, x: u32, y: u32) -> Ordering {
        let x_local = (x as usize) < self.module_num;
        let y_local = (y as usize) < self.module_num;
        if x_local != y_local {
            return if x_local { Ordering::Less } else { Ordering::Greater };
        }
        if !x_local {
            return Ordering::Equal;
        }
        let x_ro = self.modules[x as usize].module_type() == ModuleType::ReadOnly;
        let y_ro = self.modules[y as usize].module_type() == ModuleType::ReadOnly;
        match (x_ro, y_ro) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    }

    fn sort_links(&self, links: &mut [u32]) {
        links.sort_by(|&a, &b| self.compare_links(a, b));
    }

    /// Distribute `packet` to every downstream node still set in its
    /// `next_hop_filter` bitmask, duplicating only when more than one
    /// destination needs its own copy. `packet` is advanced to the next
    /// packet in its `next_packet` chain (or cleared) on return.
    fn forward_packet(&mut self, packet: &mut *mut Packet, node_idx: u32) {
        let p = *packet;
        if p.is_null() {
            return;
        }
        let mut forward_mask = unsafe { (*p).next_hop_filter };
        if forward_mask == 0 {
            unsafe { self.packet_pool.release(p) };
            *packet = std::ptr::null_mut();
            return;
        }

        let mut reference_count = unsafe { (*p).reference_count as i32 } - 1;

        loop {
            let idx = forward_mask.trailing_zeros() as usize;
            forward_mask ^= 1 << idx;
            let downstream_node = self.downstream_links[node_idx as usize][idx];

            if (downstream_node as usize) < self.module_read_only.len()
                && self.module_read_only[downstream_node as usize]
            {
                self.packet_queue.push(QueueItem {
                    node_idx: downstream_node,
                    packet: p,
                });
                reference_count += 1;
            } else if (downstream_node as usize) < self.module_num {
                if reference_count > 0 {
                    match self.packet_pool.duplicate(unsafe { &*p }) {
                        Ok(copy) => self.packet_queue.push(QueueItem {
                            node_idx: downstream_node,
                            packet: copy,
                        }),
                        Err(e) => log::warn!("packet pool exhausted while duplicating: {e}"),
                    }
                } else {
                    self.packet_queue.push(QueueItem {
                        node_idx: downstream_node,
                        packet: p,
                    });
                    reference_count += 1;
                }
            }
            // downstream_node >= module_num: remote sub-graph edge, out of
            // scope here (no cross-engine transport).

            if forward_mask == 0 {
                break;
            }
        }

        unsafe {
            (*p).reference_count = reference_count.max(0) as u16;
            let next = (*p).next_packet;
            (*p).next_packet = crate::memory::RelativePtr::null();
            *packet = next.as_ptr();
        }
    }

    fn apply_filters_and_forward(&mut self, node_idx: u32, mut packet: *mut Packet) {
        loop {
            if packet.is_null() {
                break;
            }
            unsafe {
                if (*packet).next_hop_filter == 0 {
                    (*packet).next_hop_filter = self.next_hop_filter_default[node_idx as usize];
                }
            }
            let mask_ptr = unsafe { &mut (*packet).next_hop_filter };
            crate::module::filter::apply_downstream_filters(
                &mut self.filter_groups[node_idx as usize],
                mask_ptr,
                packet,
            );
            self.forward_packet(&mut packet, node_idx);
        }
    }

    pub fn raise_event(&mut self, event: Event) {
        self.handle_event(&event);
    }

    fn handle_event(&mut self, event: &Event) {
        let Some(module_ids) = self.event_entries.get(&event.event_type).cloned() else {
            return;
        };
        for module_id in module_ids {
            let ret = self.modules[module_id as usize].event_callback(event);
            if !ret.is_null() {
                self.apply_filters_and_forward(module_id, ret);
            }
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// This engine's packet pool. An `IoNode`-shaped module (or, in tests,
    /// code driving the engine from outside) needs this to mint packets
    /// that `forward_packet`/`duplicate` can later release correctly: a
    /// packet entering the queue must come from the same pool the engine
    /// was built with.
    pub fn packet_pool(&self) -> &PacketPool {
        &self.packet_pool
    }

    /// Run the cooperative tick loop until `stop()` is requested.
    pub fn run(&mut self) {
        self.next_hop_filter_default = (0..self.module_num)
            .map(|i| (1u32 << self.downstream_links[i].len()) - 1)
            .collect();
        self.module_read_only = self
            .modules
            .iter()
            .map(|m| m.module_type() == ModuleType::ReadOnly)
            .collect();
        self.timer_list = self
            .modules
            .iter()
            .enumerate()
            .filter(|(_, m)| m.has_timer())
            .map(|(idx, _)| idx as u32)
            .collect();

        while !self.stop.load(AtomicOrdering::Relaxed) {
            let tick = now_micros();
            for &node_idx in self.timer_list.clone().iter() {
                let packet = self.modules[node_idx as usize].timer_logic(tick);
                if !packet.is_null() {
                    self.apply_filters_and_forward(node_idx, packet);
                }
            }

            while let Some(item) = self.packet_queue.pop() {
                let packet = unsafe {
                    (*item.packet).next_hop_filter = self.next_hop_filter_default[item.node_idx as usize];
                };
                let _ = packet;
                let return_packet = self.modules[item.node_idx as usize].main_logic(item.packet);
                if !return_packet.is_null() {
                    self.apply_filters_and_forward(item.node_idx, return_packet);
                }
            }

            while let Ok(event) = self.event_rx.try_recv() {
                self.handle_event(&event);
            }
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, AtomicOrdering::Relaxed);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for module in self.modules.iter_mut().rev() {
            module.destroy();
        }
    }
}

fn now_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
