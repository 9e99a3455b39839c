//! # APX Core
//!
//! Foundational types shared by every crate in the apx audio pipeline
//! runtime: error codes, stream formats, cache maintenance hooks, and
//! allocation-free collections for the real-time path.

pub mod error;
pub mod fixed_vec;
pub mod format;
pub mod mem;
pub mod trace;

pub use error::{ApxError, Result};
pub use fixed_vec::FixedVec;
pub use format::{MAX_CHANNELS, MAX_CONTAINER_BYTES, MAX_FRAME_BYTES, SampleFormat, SampleType};
pub use mem::{CacheAttr, CacheHandle, CacheOps, CoherentCache, MemZone, align_up, coherent};
pub use trace::{HostStatusRegister, PanicReason, StatusHandle, StatusSink, panic_code, report_panic};
