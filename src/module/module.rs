//! The module trait.
//!
//! A module processes packets one at a time through [`Module::main_logic`]
//! and optionally reacts to timers and cross-module events. `ModuleType`
//! governs how the engine's sub-graph compiler may schedule the module
//! relative to others touching the same packet: `ReadOnly` modules may run
//! concurrently with other `ReadOnly` modules on the same packet,
//! `ReadWrite` modules mutate it and must run exclusively, and `Occupy`
//! modules additionally claim exclusive ownership of the packet's flow.

use crate::module::event::{Event, EventSink, EventType};
use crate::module::filter::Filter;
use crate::packet::{Packet, PacketPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    ReadOnly,
    ReadWrite,
    Occupy,
}

/// A node's processing logic, registered with the [`super::registry::ModuleFactory`]
/// under a stable name and instantiated once per sub-graph node.
pub trait Module: Send {
    fn name(&self) -> &'static str;

    fn module_type(&self) -> ModuleType {
        ModuleType::Occupy
    }

    /// Whether the engine should call [`Module::timer_logic`] for this
    /// module on every tick. Modules that never manufacture packets on a
    /// timer should leave this `false` so the engine's timer pass skips
    /// them entirely instead of paying a no-op virtual call per tick.
    fn has_timer(&self) -> bool {
        false
    }

    /// Whether the engine may duplicate a packet to hand a copy to this
    /// module while the original continues down another edge.
    fn allow_duplication(&self) -> bool {
        false
    }

    /// The filter this module exposes to a specific upstream module,
    /// identified by name and the upstream's global node id.
    fn get_filter(&self, _upstream_module: &str, _global_id: u32) -> Filter {
        crate::module::filter::default_filter()
    }

    /// Process one packet. Returning the same pointer forwards it
    /// downstream unchanged; returning a different pointer substitutes a
    /// different packet (e.g. after decapsulation); returning null drops
    /// it.
    fn main_logic(&mut self, packet: *mut Packet) -> *mut Packet {
        packet
    }

    /// Periodic timer callback; `tick` is a monotonically increasing
    /// engine tick counter. May manufacture a packet to inject downstream.
    fn timer_logic(&mut self, _tick: u64) -> *mut Packet {
        std::ptr::null_mut()
    }

    /// `events` lets the module raise events of its own accord later, from
    /// `main_logic`/`timer_logic`; implementations that need this should
    /// clone it into their own state during `initialize`, the way the
    /// original stashes its `raise_event_` callback at init time.
    fn initialize(&mut self, _name_prefix: &str, _packet_pool: &PacketPool, _events: &EventSink) {}

    fn destroy(&mut self) {}

    fn event_callback(&mut self, _event: &Event) -> *mut Packet {
        std::ptr::null_mut()
    }

    fn register_events(&self) -> Vec<EventType> {
        Vec::new()
    }
}
