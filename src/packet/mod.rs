//! Zero-copy reference-counted packet buffers.

pub mod packet;
pub mod pool;

pub use packet::{MbufType, Packet, PacketHeader, MAX_HEADER_NUM, MBUF_HEADROOM, MBUF_SIZE, MTU};
pub use pool::PacketPool;
