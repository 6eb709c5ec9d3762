//! Module trait, filter groups, events, and the process-wide module
//! registry.

pub mod crc32;
pub mod event;
pub mod filter;
pub mod module;
pub mod registry;

pub use event::{generate_event_type, Event, EventSink, EventType};
pub use filter::{FilterGroup, FilterGroupType};
pub use module::{Module, ModuleType};
pub use registry::ModuleFactory;
