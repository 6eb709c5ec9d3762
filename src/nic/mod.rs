//! NIC I/O adapter trait boundary.
//!
//! This crate implements the *boundary* an `IoNode`-shaped module
//! programs against, not a real driver: no `Dpdk`/`ef_vi` backend ships
//! here, the same way [`crate::module::registry`] defines
//! `Module`/`ModuleFactory` without bundling a firewall or NAT module.
//! The trait shape and registry below follow the idiom already
//! established by [`crate::module::module::Module`] and
//! [`crate::module::registry::ModuleFactory`] in this crate.

use crate::error::{OmniError, OmniResult};
use crate::packet::{Packet, PacketPool};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;

/// How [`NicInfo::port`] identifies which physical/virtual port to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicPortType {
    Index,
    Name,
}

/// Static description of one NIC port an adapter should bind, taken from
/// the graph configuration surface's `{driver_name, port, ipv4, netmask}`
/// record.
#[derive(Debug, Clone)]
pub struct NicInfo {
    pub driver_name: String,
    pub port_id: i32,
    pub port_name: String,
    pub port_type: NicPortType,
    pub ipv4: std::net::Ipv4Addr,
    pub netmask: std::net::Ipv4Addr,
}

/// Per-queue send/receive contract a NIC driver exposes to the `IoNode`
/// module that owns it, mirroring `BaseIoAdapter`'s queue-scoped methods.
///
/// An adapter implementation is constructed once per process, then
/// [`IoAdapter::initialize_adapter`] binds it to a physical port and
/// [`IoAdapter::initialize_queue`] is called once per engine core that
/// will poll it.
pub trait IoAdapter: Send {
    /// Stable name, hashed the same way [`crate::module::module::Module`]
    /// names are, used as this adapter's registry key.
    fn name(&self) -> &'static str;

    /// One-time driver-level setup (e.g. DPDK EAL init). Called once per
    /// process before any port is bound.
    fn initialize_driver(&mut self) -> OmniResult<()> {
        Ok(())
    }

    /// Bind this adapter instance to a physical or virtual port.
    fn initialize_adapter(&mut self, info: &NicInfo) -> OmniResult<()>;

    /// Prepare `queue_id` to send/receive through `pool`-allocated
    /// packets. Called once per engine core that will poll this queue.
    fn initialize_queue(&mut self, queue_id: u32, pool: &PacketPool) -> OmniResult<()>;

    /// Start packet delivery. Called after every queue this adapter will
    /// serve has been initialized.
    fn start(&mut self) -> OmniResult<()> {
        Ok(())
    }

    /// Hand `packet` to the driver for transmission on `queue_id`. The
    /// adapter takes ownership; it is responsible for eventually
    /// releasing the packet's reference once sent.
    fn send_packet(&mut self, queue_id: u32, packet: *mut Packet);

    /// Flush any packets buffered by a prior `send_packet` batch.
    /// Expected to be called once per engine tick, matching
    /// `BaseIoAdapter::FlushSendPacket`'s "periodically called" contract.
    fn flush_send_packet(&mut self, queue_id: u32);

    /// Poll `queue_id` for one received packet, or null if none is
    /// pending this tick.
    fn recv_packets(&mut self, queue_id: u32) -> *mut Packet;

    /// Redirect a packet to a different queue/core than the one it was
    /// received on (e.g. RSS steering correction). Default is a no-op.
    fn redirect_flow(&mut self, _packet: *mut Packet) {}
}

pub type CreateIoAdapterFn = fn() -> Box<dyn IoAdapter>;

static IO_ADAPTER_REGISTRY: Lazy<Mutex<HashMap<&'static str, CreateIoAdapterFn>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Process-wide registry of NIC driver constructors, following the same
/// shape as [`crate::module::registry::ModuleFactory`].
pub struct IoAdapterFactory;

impl IoAdapterFactory {
    pub fn register(name: &'static str, constructor: CreateIoAdapterFn) -> OmniResult<()> {
        let mut registry = IO_ADAPTER_REGISTRY.lock().unwrap();
        if registry.contains_key(name) {
            return Err(OmniError::Contract(format!(
                "NIC driver '{}' already registered",
                name
            )));
        }
        registry.insert(name, constructor);
        Ok(())
    }

    pub fn create(name: &str) -> OmniResult<Box<dyn IoAdapter>> {
        let registry = IO_ADAPTER_REGISTRY.lock().unwrap();
        match registry.get(name) {
            Some(ctor) => Ok(ctor()),
            None => Err(OmniError::Contract(format!(
                "unknown NIC driver '{}'",
                name
            ))),
        }
    }

    pub fn is_registered(name: &str) -> bool {
        IO_ADAPTER_REGISTRY.lock().unwrap().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter;
    impl IoAdapter for NullAdapter {
        fn name(&self) -> &'static str {
            "test.null"
        }
        fn initialize_adapter(&mut self, _info: &NicInfo) -> OmniResult<()> {
            Ok(())
        }
        fn initialize_queue(&mut self, _queue_id: u32, _pool: &PacketPool) -> OmniResult<()> {
            Ok(())
        }
        fn send_packet(&mut self, _queue_id: u32, _packet: *mut Packet) {}
        fn flush_send_packet(&mut self, _queue_id: u32) {}
        fn recv_packets(&mut self, _queue_id: u32) -> *mut Packet {
            std::ptr::null_mut()
        }
    }

    fn make_null() -> Box<dyn IoAdapter> {
        Box::new(NullAdapter)
    }

    #[test]
    fn double_registration_is_rejected() {
        let _ = IoAdapterFactory::register("nic-test.a", make_null);
        let err = IoAdapterFactory::register("nic-test.a", make_null).unwrap_err();
        assert!(matches!(err, OmniError::Contract(_)));
    }

    #[test]
    fn registered_driver_can_be_created_by_name() {
        IoAdapterFactory::register("nic-test.b", make_null).ok();
        let adapter = IoAdapterFactory::create("nic-test.b").unwrap();
        assert_eq!(adapter.name(), "test.null");
    }

    #[test]
    fn unknown_driver_errors() {
        let err = IoAdapterFactory::create("nic-test.does-not-exist").unwrap_err();
        assert!(matches!(err, OmniError::Contract(_)));
    }
}
