//! Packet pool: allocation, duplication, and reference-counted release.
//!
//! Rather than recovering a packet's owning pool implicitly from region
//! metadata preceding its chunk, this threads the owning [`PacketPool`]
//! through every call explicitly — one pool per `thread_local` cache,
//! matching how every other hot-path allocator in this crate
//! ([`crate::memory::pool::MemoryPool`]) is used — which avoids relying on
//! a fixed memory layout to recover a type from a raw pointer.

use crate::error::OmniResult;
use crate::memory::pool::MemoryPool;
use crate::packet::packet::{MbufType, Packet, MBUF_HEADROOM};
use std::cell::RefCell;

/// A pool of packet-sized chunks, with a persistent allocation cache.
///
/// Packet pools are per-engine and never shared between engines (only one
/// thread ever touches a given pool), so the cache is a plain `RefCell`
/// rather than a true per-thread cache — it just needs to survive across
/// calls instead of being rebuilt (and its batch discarded) every time.
pub struct PacketPool {
    memory: MemoryPool,
    cache: RefCell<Vec<u32>>,
}

impl PacketPool {
    pub fn create(control_plane_id: u32, name_prefix: &str, packet_count: usize) -> OmniResult<Self> {
        let memory = MemoryPool::create(
            control_plane_id,
            &format!("{name_prefix}.packets"),
            std::mem::size_of::<Packet>(),
            packet_count,
        )?;
        Ok(Self {
            memory,
            cache: RefCell::new(Vec::new()),
        })
    }

    /// Allocate a fresh `Origin` packet.
    pub fn allocate(&self) -> OmniResult<*mut Packet> {
        let index = self.memory.checkout(&mut self.cache.borrow_mut())?;
        let ptr = unsafe { self.memory.chunk_payload_ptr(index) } as *mut Packet;
        Packet::init_in_place(ptr);
        Ok(ptr)
    }

    /// Free a chunk back to the pool, ignoring the packet's reference
    /// count (mirrors `PacketPool::Free`'s documented semantics).
    fn free_chunk(&self, packet: *mut Packet) {
        let stride = std::mem::size_of::<Packet>();
        let base = unsafe { self.memory.chunk_payload_ptr(0) } as usize;
        let offset = packet as usize - base;
        let index = (offset / stride) as u32;
        self.memory.checkin(&mut self.cache.borrow_mut(), index);
    }

    /// Release a reference. When the count reaches zero, the underlying
    /// payload is released (an `Indirect` packet's release recurses into
    /// its parent) and the chunk returns to the pool.
    ///
    /// # Safety
    /// `packet` must be a live pointer previously returned by this pool
    /// (directly, or via `duplicate`/`reference`), not yet released.
    pub unsafe fn release(&self, packet: *mut Packet) {
        let p = &mut *packet;
        if p.reference_count == 1 {
            match p.mbuf_type {
                MbufType::Origin | MbufType::External => {}
                MbufType::Indirect => {
                    if let Some(parent) = p.parent.as_mut() {
                        self.release(parent as *mut Packet);
                    }
                }
            }
            self.free_chunk(packet);
        } else {
            p.reference_count -= 1;
        }
    }

    /// Deep-copy a packet's payload and headers into a brand new `Origin`
    /// packet.
    pub fn duplicate(&self, packet: &Packet) -> OmniResult<*mut Packet> {
        let ptr = self.allocate()?;
        let copy = unsafe { &mut *ptr };
        copy.length = packet.length;
        copy.channel = packet.channel;
        copy.offset = packet.offset;
        copy.nic = packet.nic;
        copy.mbuf_type = MbufType::Origin;
        copy.custom_mask = packet.custom_mask;
        copy.custom_value = packet.custom_value;
        copy.data_offset = MBUF_HEADROOM;
        copy.iova = packet.iova;
        copy.flow_hash = packet.flow_hash;
        copy.owning_node = packet.owning_node;

        let src_start = packet.offset.max(0) as usize;
        let len = (packet.length as usize).saturating_sub(src_start);
        let src = unsafe { packet.mbuf.as_ptr().add(packet.data_offset + src_start) };
        let dst = unsafe { copy.mbuf.as_mut_ptr().add(copy.data_offset + src_start) };
        unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };

        copy.header_tail = 0;
        while copy.header_tail != packet.header_tail {
            let i = copy.header_tail as usize;
            copy.packet_headers[i] = packet.packet_headers[i];
            copy.header_tail += 1;
        }
        Ok(ptr)
    }

    /// Create a new `Indirect` packet sharing `packet`'s payload, bumping
    /// `packet`'s reference count.
    ///
    /// # Safety
    /// `packet` must outlive the returned indirect packet's lifetime (it
    /// holds an implicit reference, released through `release`).
    pub unsafe fn reference(&self, packet: *mut Packet) -> OmniResult<*mut Packet> {
        let ptr = self.allocate()?;
        let copy = &mut *ptr;
        let src = &mut *packet;

        copy.length = src.length;
        copy.channel = src.channel;
        copy.offset = src.offset;
        copy.nic = src.nic;
        copy.mbuf_type = MbufType::Indirect;
        copy.custom_mask = src.custom_mask;
        copy.custom_value = src.custom_value;
        copy.data_offset = src.data_offset;
        copy.iova = src.iova;
        copy.owning_node = src.owning_node;
        copy.parent = RelativePtrExt::from_raw(packet);

        copy.header_tail = 0;
        while copy.header_tail != src.header_tail {
            let i = copy.header_tail as usize;
            copy.packet_headers[i] = src.packet_headers[i];
            copy.header_tail += 1;
        }

        src.reference_count += 1;
        Ok(ptr)
    }
}

/// Small local helper so `reference()` can build a `RelativePtr<Packet>`
/// from a raw pointer without importing the unsafe constructor at every
/// call site.
trait RelativePtrExt {
    unsafe fn from_raw(ptr: *mut Packet) -> Self;
}
impl RelativePtrExt for crate::memory::RelativePtr<Packet> {
    unsafe fn from_raw(ptr: *mut Packet) -> Self {
        crate::memory::RelativePtr::from_ptr(ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_release_returns_chunk_to_pool() {
        let name = format!("test-packetpool-{}", std::process::id());
        let pool = PacketPool::create(71, &name, 16).unwrap();
        let p = pool.allocate().unwrap();
        unsafe {
            (*p).length = 64;
            pool.release(p);
        }
        // pool should still have all 16 chunks available
        let mut count = 0;
        while pool.allocate().is_ok() {
            count += 1;
            if count > 16 {
                break;
            }
        }
        assert_eq!(count, 16);
    }

    #[test]
    fn duplicate_copies_payload_bytes() {
        let name = format!("test-packetpool-dup-{}", std::process::id());
        let pool = PacketPool::create(72, &name, 4).unwrap();
        let original = pool.allocate().unwrap();
        unsafe {
            let orig = &mut *original;
            orig.length = 4;
            orig.offset = 0;
            let dst = orig.data_mut_ptr();
            std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), dst, 4);
        }
        let dup = pool.duplicate(unsafe { &*original }).unwrap();
        unsafe {
            assert_eq!((*dup).as_slice(), &[1, 2, 3, 4]);
            assert_eq!((*dup).mbuf_type, MbufType::Origin);
        }
    }

    #[test]
    fn reference_bumps_original_count_and_shares_payload() {
        let name = format!("test-packetpool-ref-{}", std::process::id());
        let pool = PacketPool::create(73, &name, 4).unwrap();
        let original = pool.allocate().unwrap();
        unsafe {
            (*original).length = 10;
            let indirect = pool.reference(original).unwrap();
            assert_eq!((*original).reference_count, 2);
            assert_eq!((*indirect).mbuf_type, MbufType::Indirect);

            // releasing the indirect copy drops the original's count back down.
            pool.release(indirect);
            assert_eq!((*original).reference_count, 1);
        }
    }
}
