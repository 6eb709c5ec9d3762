//! The flow 5-tuple nodes are keyed by.
//!
//! A fixed, `#[repr(C)]`, 48-byte layout (addresses as `[u8; 16]` rather
//! than separate `u32`/`u128` variants, so every field is unambiguously
//! `Pod`) deriving [`bytemuck::Pod`]/[`bytemuck::Zeroable`] so
//! [`NodeInfo::hash`] can hash the struct's raw bytes directly.

use crate::module::crc32::const_crc32;
use bytemuck::{Pod, Zeroable};
use std::net::{Ipv4Addr, Ipv6Addr};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportLayerType {
    Tcp = 0,
    Udp = 1,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkLayerType {
    Ipv4 = 0,
    Ipv6 = 1,
}

/// The 5-tuple identifying a flow: address family, transport kind, local
/// and remote addresses, and ports. `#[repr(C)]` and exactly 48 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeInfo {
    pub sip: [u8; 16],
    pub dip: [u8; 16],
    pub transport_layer_type: u32,
    pub network_layer_type: u32,
    pub sport: u16,
    pub dport: u16,
    _padding: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<NodeInfo>() == 48);

impl Default for NodeInfo {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl NodeInfo {
    pub fn new_ipv4(
        sip: Ipv4Addr,
        dip: Ipv4Addr,
        transport: TransportLayerType,
        sport: u16,
        dport: u16,
    ) -> Self {
        let mut info = Self::default();
        info.sip[..4].copy_from_slice(&sip.octets());
        info.dip[..4].copy_from_slice(&dip.octets());
        info.transport_layer_type = transport as u32;
        info.network_layer_type = NetworkLayerType::Ipv4 as u32;
        info.sport = sport;
        info.dport = dport;
        info
    }

    pub fn new_ipv6(
        sip: Ipv6Addr,
        dip: Ipv6Addr,
        transport: TransportLayerType,
        sport: u16,
        dport: u16,
    ) -> Self {
        Self {
            sip: sip.octets(),
            dip: dip.octets(),
            transport_layer_type: transport as u32,
            network_layer_type: NetworkLayerType::Ipv6 as u32,
            sport,
            dport,
            _padding: [0; 4],
        }
    }

    pub fn network_layer_type(&self) -> NetworkLayerType {
        if self.network_layer_type == NetworkLayerType::Ipv6 as u32 {
            NetworkLayerType::Ipv6
        } else {
            NetworkLayerType::Ipv4
        }
    }

    pub fn transport_layer_type(&self) -> TransportLayerType {
        if self.transport_layer_type == TransportLayerType::Udp as u32 {
            TransportLayerType::Udp
        } else {
            TransportLayerType::Tcp
        }
    }

    /// CRC-32 over the struct's raw bytes.
    pub fn hash(&self) -> u32 {
        const_crc32(bytemuck::bytes_of(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_round_trips_through_the_byte_layout() {
        let info = NodeInfo::new_ipv4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            TransportLayerType::Tcp,
            1234,
            80,
        );
        assert_eq!(&info.sip[..4], &[10, 0, 0, 1]);
        assert_eq!(&info.dip[..4], &[10, 0, 0, 2]);
        assert_eq!(info.network_layer_type(), NetworkLayerType::Ipv4);
        assert_eq!(info.transport_layer_type(), TransportLayerType::Tcp);
    }

    #[test]
    fn identical_tuples_hash_identically() {
        let a = NodeInfo::new_ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TransportLayerType::Udp,
            53,
            5353,
        );
        let b = a;
        assert_eq!(a.hash(), b.hash());

        let c = NodeInfo::new_ipv4(
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::LOCALHOST,
            TransportLayerType::Udp,
            53,
            5354,
        );
        assert_ne!(a.hash(), c.hash());
    }
}
