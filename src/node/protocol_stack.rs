//! Per-engine inbound command channel registry.
//!
//! Each engine ("com user") that hosts a `NodeUser`-shaped module has one
//! [`MultiWriterChannel`] that every application thread's [`BasicNode`]s
//! funnel command packets into. `com_user_id == 0` is the control channel
//! used for hashtable membership commands.
//!
//! [`BasicNode`]: super::basic_node::BasicNode

use crate::channel::MultiWriterChannel;
use crate::token::Token;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct ProtocolStack {
    channels: Mutex<HashMap<u32, Arc<MultiWriterChannel>>>,
}

impl ProtocolStack {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// The channel feeding `com_user_id`'s engine, created lazily on
    /// first use so no engine needs to be known up front.
    pub fn channel(&self, com_user_id: u32) -> Arc<MultiWriterChannel> {
        self.channels
            .lock()
            .unwrap()
            .entry(com_user_id)
            .or_insert_with(|| Arc::new(MultiWriterChannel::new(Arc::new(Token::new(0)))))
            .clone()
    }
}

impl Default for ProtocolStack {
    fn default() -> Self {
        Self::new()
    }
}
