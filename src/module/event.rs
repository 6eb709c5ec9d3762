//! Module events.

use crate::module::crc32::const_crc32;

pub type EventType = u32;

/// Derive a stable event type id from its name at compile time.
pub const fn generate_event_type(name: &str) -> EventType {
    const_crc32(name.as_bytes())
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub payload: u64,
}

impl Event {
    pub fn new(event_type: EventType, payload: u64) -> Self {
        Self { event_type, payload }
    }
}

/// A cheaply-cloneable handle modules keep after `initialize` so they can
/// raise events later, from inside `main_logic`/`timer_logic`, without
/// holding a borrow back into the owning engine. A module processed via
/// `&mut self` cannot also hold a closure that calls back into the engine
/// that owns it, so events are queued through a channel and drained by
/// the engine at the top of its next tick instead of handled inline.
#[derive(Clone)]
pub struct EventSink(crossbeam::channel::Sender<Event>);

impl EventSink {
    pub fn new(sender: crossbeam::channel::Sender<Event>) -> Self {
        Self(sender)
    }

    pub fn raise(&self, event: Event) {
        let _ = self.0.send(event);
    }
}
