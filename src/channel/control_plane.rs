//! Channel control plane: named-channel registry backed by the memory
//! subsystem's named regions.
//!
//! Unlike the memory and token control planes, this mostly exists to
//! accept handshake connections; the actual channel state lives in the
//! named shared region itself. The registry here maps a channel name to
//! the region that backs it and to the reader/writer tokens bound to it,
//! and hands out live [`Channel`](crate::channel::spsc::Channel) handles
//! rather than reimplementing per-request RPC logic.

use crate::error::OmniResult;
use crate::memory::control_plane::MemoryControlPlane;
use crate::memory::region::ShmRegion;
use crate::channel::spsc::RawChannel;
use crate::token::TokenControlPlane;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct NamedChannel {
    _region: ShmRegion,
    reader_token_id: u64,
    writer_token_id: u64,
}

/// Owns the named-channel registry for one control-plane domain.
pub struct ChannelControlPlane {
    control_plane_id: u32,
    memory: Arc<MemoryControlPlane>,
    tokens: Arc<TokenControlPlane>,
    channels: Mutex<HashMap<String, NamedChannel>>,
}

impl ChannelControlPlane {
    pub fn new(
        control_plane_id: u32,
        memory: Arc<MemoryControlPlane>,
        tokens: Arc<TokenControlPlane>,
    ) -> Self {
        Self {
            control_plane_id,
            memory,
            tokens,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Create (or attach to) a named raw channel, returning a pointer to
    /// its `RawChannel` header and the reader/writer token ids bound to
    /// it. The caller (typically `Channel::new`) resolves the pointer and
    /// wraps it together with the tokens.
    pub fn get_raw_channel(&self, name: &str) -> OmniResult<(*const RawChannel, u64, u64)> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(existing) = channels.get(name) {
            return Ok((
                existing._region.as_ptr() as *const RawChannel,
                existing.reader_token_id,
                existing.writer_token_id,
            ));
        }

        let size = std::mem::size_of::<RawChannel>();
        self.memory.get_named(name, size)?;
        let mut region = ShmRegion::create(self.control_plane_id, name, size)?;
        unsafe {
            std::ptr::write(region.as_mut_ptr() as *mut RawChannel, RawChannel::new());
        }

        let reader_token_id = self.tokens.create_token();
        let writer_token_id = self.tokens.create_token();
        let raw_ptr = region.as_ptr() as *const RawChannel;

        channels.insert(
            name.to_string(),
            NamedChannel {
                _region: region,
                reader_token_id,
                writer_token_id,
            },
        );
        Ok((raw_ptr, reader_token_id, writer_token_id))
    }

    pub fn destroy_channel(&self, name: &str) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.remove(name) {
            self.memory.free_named(name);
            self.tokens.destroy_token(channel.reader_token_id);
            self.tokens.destroy_token(channel.writer_token_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookup_by_name_returns_same_channel() {
        let memory = MemoryControlPlane::start(61).unwrap();
        let tokens = TokenControlPlane::start(61).unwrap();
        let cp = ChannelControlPlane::new(61, memory.clone(), tokens.clone());

        let (a, ..) = cp.get_raw_channel("chan.a").unwrap();
        let (b, ..) = cp.get_raw_channel("chan.a").unwrap();
        assert_eq!(a, b);

        memory.stop();
        tokens.stop();
    }

    #[test]
    fn destroy_then_recreate_yields_a_fresh_channel() {
        let memory = MemoryControlPlane::start(62).unwrap();
        let tokens = TokenControlPlane::start(62).unwrap();
        let cp = ChannelControlPlane::new(62, memory.clone(), tokens.clone());

        let (a, ..) = cp.get_raw_channel("chan.b").unwrap();
        cp.destroy_channel("chan.b");
        let (b, ..) = cp.get_raw_channel("chan.b").unwrap();
        assert_ne!(a, b);

        memory.stop();
        tokens.stop();
    }
}
