//! Per-flow endpoint routing packets between the dataplane and the
//! application.
//!
//! Rather than recycling `BasicNode`s from a thread-local free list backed
//! by a shared-memory arena, this keeps one `BasicNode` per `Arc` and lets
//! Rust's allocator reclaim it on last drop — a `PacketPool`-style
//! allocator (see [`crate::packet::pool`]) already amortizes the
//! shared-memory allocation cost for the packets flowing through a node,
//! so a second recycling layer for the `BasicNode` struct itself would add
//! complexity without a matching benefit.

use crate::channel::{Channel, RawChannel, WriteOutcome};
use crate::error::{OmniError, OmniResult};
use crate::memory::RelativePtr;
use crate::node::command::{write_command_header, NodeCommandHeader, NodeCommandType};
use crate::node::event_node::EventNode;
use crate::node::info::NodeInfo;
use crate::node::protocol_stack::ProtocolStack;
use crate::packet::{Packet, PacketPool};
use crate::token::Token;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Maximum number of graph ids a node may be eligible to run on.
pub const MAX_GRAPH_USABLE: usize = 128;

pub struct BasicNode {
    /// Which engine's protocol-stack channel this node's commands funnel
    /// into (`node.h`'s `com_user_id_`).
    pub com_user_id: u32,
    info: Mutex<NodeInfo>,
    in_hashtable: AtomicBool,
    peer_closed: AtomicBool,
    user_proc_ref: AtomicU32,
    graph_usable: Mutex<Vec<u32>>,
    event_node: Mutex<Option<Arc<EventNode>>>,
    raw_channel: Box<RawChannel>,
    channel: Channel,
}

unsafe impl Send for BasicNode {}
unsafe impl Sync for BasicNode {}

impl BasicNode {
    /// Create a fresh node for `com_user_id`, mirroring `CreateBasicNode`
    /// + `BasicNode::Init` (`user_proc_ref_ = 1`, `peer_closed_ = true`,
    /// not yet in the hashtable).
    pub fn new(com_user_id: u32) -> Arc<Self> {
        let raw_channel = Box::new(RawChannel::new());
        let channel = unsafe {
            Channel::new(
                raw_channel.as_ref() as *const RawChannel,
                Arc::new(Token::new(0)),
                Arc::new(Token::new(0)),
            )
        };
        Arc::new(Self {
            com_user_id,
            info: Mutex::new(NodeInfo::default()),
            in_hashtable: AtomicBool::new(false),
            peer_closed: AtomicBool::new(true),
            user_proc_ref: AtomicU32::new(1),
            graph_usable: Mutex::new(Vec::new()),
            event_node: Mutex::new(None),
            raw_channel,
            channel,
        })
    }

    /// This node's stable address-based handle, used as the payload an
    /// [`EventNode`] wakes the application with and as a packet's
    /// `owning_node` field.
    pub fn handle(&self) -> u64 {
        self as *const Self as u64
    }

    pub fn info(&self) -> NodeInfo {
        *self.info.lock().unwrap()
    }

    pub fn is_in_hashtable(&self) -> bool {
        self.in_hashtable.load(Ordering::Acquire)
    }

    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed.load(Ordering::Acquire)
    }

    pub fn set_peer_closed(&self, closed: bool) {
        self.peer_closed.store(closed, Ordering::Release);
    }

    pub fn add_graph_usable(&self, graph_id: u32) {
        let mut usable = self.graph_usable.lock().unwrap();
        if usable.len() < MAX_GRAPH_USABLE {
            usable.push(graph_id);
        }
    }

    pub fn graph_usable(&self) -> Vec<u32> {
        self.graph_usable.lock().unwrap().clone()
    }

    /// Bind an [`EventNode`] this node wakes when its application channel
    /// flushes a batch (`BasicNode::Connect`).
    pub fn connect(&self, event_node: Arc<EventNode>) {
        *self.event_node.lock().unwrap() = Some(event_node);
    }

    /// Enqueue a packet onto the application-facing channel, waking the
    /// bound event node if this write just flushed a batch.
    pub fn write(&self, packet: *mut Packet) {
        let outcome = self
            .channel
            .write(unsafe { RelativePtr::from_ptr(packet as *mut u8) });
        if outcome == WriteOutcome::Flushed {
            if let Some(en) = self.event_node.lock().unwrap().as_ref() {
                en.write(self.handle());
            }
        }
    }

    pub fn flush(&self) {
        if self.channel.flush() == WriteOutcome::Flushed {
            if let Some(en) = self.event_node.lock().unwrap().as_ref() {
                en.write(self.handle());
            }
        }
    }

    /// Dequeue one packet for the application, or a null pointer if none
    /// is available yet.
    pub fn read(&self) -> *mut Packet {
        match self.channel.read() {
            Some(p) => unsafe { p.as_ptr() as *mut Packet },
            None => std::ptr::null_mut(),
        }
    }

    pub fn is_readable(&self) -> bool {
        unsafe { (*self.raw_channel).is_readable() }
    }

    /// Prepend a [`NodeCommandHeader`] of type `Packet`, stamp this
    /// node's handle onto the packet, and send it up `com_user_id`'s
    /// protocol-stack channel — the application's send path.
    pub fn write_bottom(&self, packet: *mut Packet, stack: &ProtocolStack) {
        unsafe {
            write_command_header(packet, NodeCommandHeader::new(NodeCommandType::Packet));
            (*packet).owning_node = self.handle();
        }
        stack
            .channel(self.com_user_id)
            .write(unsafe { RelativePtr::from_ptr(packet as *mut u8) });
    }

    /// Set the flow 5-tuple. Rejected once the node has joined the global
    /// hashtable.
    pub fn update_info(&self, info: NodeInfo) -> OmniResult<()> {
        if self.is_in_hashtable() {
            return Err(OmniError::Contract(
                "cannot update info of a node already in hashtable".into(),
            ));
        }
        *self.info.lock().unwrap() = info;
        Ok(())
    }

    /// Issue an `UpdateNodeInfo` command over `com_user_id == 0` and block
    /// (briefly spin-polling) until the engine's `NodeUser` module
    /// acknowledges by calling [`Self::acknowledge_in_hashtable`].
    pub fn put_into_hashtable(&self, pool: &PacketPool, stack: &ProtocolStack) -> OmniResult<()> {
        if !self.is_in_hashtable() {
            let packet = pool.allocate()?;
            unsafe {
                write_command_header(packet, NodeCommandHeader::new(NodeCommandType::UpdateNodeInfo));
                (*packet).owning_node = self.handle();
            }
            let control = stack.channel(0);
            control.write(unsafe { RelativePtr::from_ptr(packet as *mut u8) });
            control.flush();
        }
        while !self.is_in_hashtable() {
            std::thread::yield_now();
        }
        Ok(())
    }

    /// Called by the engine-side `NodeUser` module once this node's
    /// `UpdateNodeInfo` command has been applied to the global flow
    /// hashtable.
    pub fn acknowledge_in_hashtable(&self) {
        self.in_hashtable.store(true, Ordering::Release);
    }

    /// Issue a `ClearNodeInfo` command; unlike `put_into_hashtable`, this
    /// does not wait for acknowledgment — only the join side blocks.
    pub fn clear_from_hashtable_and_close(&self, pool: &PacketPool, stack: &ProtocolStack) {
        if let Ok(packet) = pool.allocate() {
            unsafe {
                write_command_header(packet, NodeCommandHeader::new(NodeCommandType::ClearNodeInfo));
                (*packet).owning_node = self.handle();
            }
            stack
                .channel(0)
                .write(unsafe { RelativePtr::from_ptr(packet as *mut u8) });
        }
        self.in_hashtable.store(false, Ordering::Release);
    }

    /// Increment the application reference count; fails if the node has
    /// already been fully closed (`user_proc_ref_` at zero).
    pub fn open_ref(&self) -> bool {
        loop {
            let cur = self.user_proc_ref.load(Ordering::Acquire);
            if cur == 0 {
                return false;
            }
            if self
                .user_proc_ref
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Decrement the application reference count; closes the node via
    /// [`Self::clear_from_hashtable_and_close`] when it reaches zero.
    pub fn close_ref(&self, pool: &PacketPool, stack: &ProtocolStack) {
        loop {
            let cur = self.user_proc_ref.load(Ordering::Acquire);
            let next = cur - 1;
            if self
                .user_proc_ref
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if next == 0 {
                    self.clear_from_hashtable_and_close(pool, stack);
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::info::TransportLayerType;
    use std::net::Ipv4Addr;

    #[test]
    fn write_then_read_round_trips_a_packet_pointer() {
        let name = format!("test-basicnode-{}", std::process::id());
        let pool = PacketPool::create(91, &name, 4).unwrap();
        let node = BasicNode::new(0);
        let p = pool.allocate().unwrap();
        node.write(p);
        node.flush();
        assert_eq!(node.read(), p);
        assert!(node.read().is_null());
        unsafe { pool.release(p) };
    }

    #[test]
    fn update_info_rejected_once_in_hashtable() {
        let node = BasicNode::new(0);
        node.acknowledge_in_hashtable();
        let info = NodeInfo::new_ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TransportLayerType::Tcp,
            1,
            2,
        );
        assert!(node.update_info(info).is_err());
    }

    #[test]
    fn put_into_hashtable_blocks_until_acknowledged() {
        let name = format!("test-basicnode-putht-{}", std::process::id());
        let pool = PacketPool::create(92, &name, 4).unwrap();
        let stack = ProtocolStack::new();
        let node = BasicNode::new(0);

        let control = stack.channel(0);
        let ack_thread = std::thread::spawn({
            let node = node.clone();
            move || {
                loop {
                    if let Some(ptr) = control.read() {
                        let packet = unsafe { ptr.as_ptr() as *mut Packet };
                        unsafe {
                            let header = crate::node::command::read_command_header(packet);
                            assert_eq!(header.command_type, NodeCommandType::UpdateNodeInfo);
                        }
                        node.acknowledge_in_hashtable();
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        });

        node.put_into_hashtable(&pool, &stack).unwrap();
        ack_thread.join().unwrap();
        assert!(node.is_in_hashtable());
    }

    #[test]
    fn ref_count_reaching_zero_closes_the_node() {
        let name = format!("test-basicnode-ref-{}", std::process::id());
        let pool = PacketPool::create(93, &name, 4).unwrap();
        let stack = ProtocolStack::new();
        let node = BasicNode::new(0);
        node.acknowledge_in_hashtable();

        assert!(node.open_ref());
        // refcount now 2 (initial 1 + this open)
        node.close_ref(&pool, &stack);
        assert!(node.is_in_hashtable());
        node.close_ref(&pool, &stack);
        assert!(!node.is_in_hashtable());
        assert!(!node.open_ref());
    }
}
