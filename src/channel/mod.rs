//! Lock-free SPSC and fan-in channels.

pub mod control_plane;
pub mod multi_writer;
pub mod spsc;

pub use control_plane::ChannelControlPlane;
pub use multi_writer::MultiWriterChannel;
pub use spsc::{Channel, RawChannel, WriteOutcome, BATCH_SIZE, CHANNEL_SIZE};
