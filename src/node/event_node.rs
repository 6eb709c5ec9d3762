//! Application-wakeup channel.
//!
//! A thin wrapper around a [`MultiWriterChannel`] carrying raw node-id
//! values rather than pointers: many [`super::BasicNode`]s may wake the
//! same waiting application thread, so each write goes out over its own
//! writer slot and the application thread polls with
//! [`EventNode::read`].

use crate::channel::MultiWriterChannel;
use crate::memory::RelativePtr;
use crate::token::Token;
use std::sync::Arc;

pub struct EventNode {
    channel: MultiWriterChannel,
}

impl EventNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channel: MultiWriterChannel::new(Arc::new(Token::new(0))),
        })
    }

    /// Wake the reader with `node_id` (typically a [`super::BasicNode`]'s
    /// address, used as an opaque handle). Flushed immediately: event
    /// traffic is low-volume control signaling, not a hot packet path.
    pub fn write(&self, node_id: u64) {
        self.channel.write(RelativePtr::from_raw_u64(node_id));
        self.channel.flush();
    }

    pub fn read(&self) -> Option<u64> {
        self.channel.read().map(|p| p.to_raw_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_the_node_id() {
        crate::token::set_current_thread_id(0);
        let en = EventNode::new();
        en.write(0xdead_beef);
        assert_eq!(en.read(), Some(0xdead_beef));
        assert_eq!(en.read(), None);
    }
}
