//! Black-box tests for the node/protocol-stack plumbing: several
//! application threads each own a [`BasicNode`] and funnel command
//! packets into a shared engine-side [`ProtocolStack`] channel, the way
//! many flows on one engine fan in today.

use omnistack_core::node::{BasicNode, NodeCommandType, NodeInfo, ProtocolStack, TransportLayerType};
use omnistack_core::packet::{Packet, PacketPool};
use omnistack_core::token::set_current_thread_id;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[test]
fn many_threads_fan_their_packet_commands_into_one_protocol_stack_channel() {
    let name = format!("test-node-fanin-{}", std::process::id());
    let pool = Arc::new(PacketPool::create(101, &name, 64).unwrap());
    let stack = Arc::new(ProtocolStack::new());

    const WRITERS: u64 = 6;
    const PER_WRITER: usize = 20;

    let handles: Vec<_> = (0..WRITERS)
        .map(|tid| {
            let pool = pool.clone();
            let stack = stack.clone();
            std::thread::spawn(move || {
                set_current_thread_id(tid);
                let node = BasicNode::new(7);
                for _ in 0..PER_WRITER {
                    let p = pool.allocate().unwrap();
                    node.write_bottom(p, &stack);
                }
                stack.channel(7).flush();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    set_current_thread_id(0);
    let com_channel = stack.channel(7);
    let mut received = 0;
    let mut misses = 0;
    while received < WRITERS as usize * PER_WRITER {
        match com_channel.read() {
            Some(ptr) => {
                let packet = unsafe { ptr.as_ptr() as *mut Packet };
                let header = unsafe { omnistack_core::node::command::read_command_header(packet) };
                assert_eq!(header.command_type, NodeCommandType::Packet);
                unsafe { pool.release(packet) };
                received += 1;
            }
            None => {
                misses += 1;
                assert!(misses < 1_000_000, "reader never caught up with writers");
                std::thread::yield_now();
            }
        }
    }
    assert_eq!(received, WRITERS as usize * PER_WRITER);
}

#[test]
fn node_joins_and_leaves_the_hashtable_via_the_control_channel() {
    let name = format!("test-node-hashtable-{}", std::process::id());
    let pool = PacketPool::create(102, &name, 16).unwrap();
    let stack = ProtocolStack::new();
    let node = BasicNode::new(0);

    node.update_info(NodeInfo::new_ipv4(
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(10, 0, 0, 6),
        TransportLayerType::Tcp,
        4000,
        80,
    ))
    .unwrap();

    let control = stack.channel(0);
    let acker = std::thread::spawn({
        let node = node.clone();
        move || loop {
            if let Some(ptr) = control.read() {
                let packet = unsafe { ptr.as_ptr() as *mut Packet };
                let header = unsafe { omnistack_core::node::command::read_command_header(packet) };
                match header.command_type {
                    NodeCommandType::UpdateNodeInfo => {
                        node.acknowledge_in_hashtable();
                        break;
                    }
                    other => panic!("unexpected command in control channel: {other:?}"),
                }
            }
            std::thread::yield_now();
        }
    });

    node.put_into_hashtable(&pool, &stack).unwrap();
    acker.join().unwrap();
    assert!(node.is_in_hashtable());

    // Updating info once in the hashtable must be rejected.
    assert!(node
        .update_info(NodeInfo::new_ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TransportLayerType::Udp,
            1,
            2,
        ))
        .is_err());

    // Dropping the last application reference removes it from the hashtable.
    node.close_ref(&pool, &stack);
    assert!(!node.is_in_hashtable());
}
