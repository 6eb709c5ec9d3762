//! # OmniStack Core
//!
//! A user-space, modular network dataplane: packets flow through a
//! directed graph of per-core modules (L2/L3/L4 parsers, protocol state
//! machines, classifiers, NIC I/O) compiled into an engine that runs
//! pinned to a CPU core.
//!
//! This crate provides the dataplane engine plus the systems
//! infrastructure it depends on:
//!
//! - **Memory**: a shared-memory subsystem of named regions and a
//!   per-thread-cached chunk pool, addressed through relative pointers
//!   so the same layout works across processes.
//! - **Tokens**: cooperative single-holder ownership for structures that
//!   cannot be made lock-free.
//! - **Channels**: lock-free SPSC rings and a many-writer fan-in
//!   channel, both built on top of tokens.
//! - **Packets**: reference-counted, zero-copy packet buffers allocated
//!   from a named pool.
//! - **Modules and graphs**: the `Module` capability set, filter groups,
//!   and the sub-graph partitioning that turns a declarative graph
//!   configuration into per-core engines.
//! - **Nodes**: per-flow endpoints connecting the dataplane to
//!   applications, and the command-packet protocol engines use to keep
//!   a node's hashtable membership in sync.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omnistack_core::module::{Module, ModuleType};
//! use omnistack_core::packet::Packet;
//!
//! struct Echo;
//!
//! impl Module for Echo {
//!     fn name(&self) -> &'static str { "echo" }
//!     fn module_type(&self) -> ModuleType { ModuleType::ReadOnly }
//!     fn main_logic(&mut self, packet: *mut Packet) -> *mut Packet { packet }
//! }
//! ```

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod hashtable;
pub mod memory;
pub mod module;
pub mod nic;
pub mod node;
pub mod packet;
pub mod token;

// Re-export the commonly used top-level types.
pub use channel::{Channel, MultiWriterChannel, RawChannel, WriteOutcome};
pub use config::{GraphConfig, GraphEntry, NicConfig, StackConfig};
pub use engine::Engine;
pub use error::{OmniError, OmniResult};
pub use graph::Graph;
pub use memory::{AddressingBackend, MemoryPool, RelativePtr, ShmRegion};
pub use module::{Module, ModuleFactory, ModuleType};
pub use nic::{IoAdapter, IoAdapterFactory, NicInfo};
pub use node::{BasicNode, EventNode, NodeInfo};
pub use packet::{Packet, PacketPool};
pub use token::{Token, TokenControlPlane};
