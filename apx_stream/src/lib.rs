//! # APX Stream
//!
//! Circular audio buffers, the stream operations the copy pass runs over
//! them, and the DP queue that carries audio across scheduling domains.

pub mod buffer;
pub mod dp_queue;
pub mod stream;

pub use buffer::{AudioBuffer, BufferId};
pub use dp_queue::{DpConsumer, DpProducer, DpQueue, DpQueueMode, DpQueueState};
pub use stream::{
    avail_frames_aligned, copy_all_available, copy_frames, copy_with_wrap, fill_silence, read_into, write_from,
};
