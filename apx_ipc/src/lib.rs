//! # APX IPC
//!
//! The typed IPC message set the runtime consumes, the handler that
//! builds and drives graphs from it (with transactional unwind), and the
//! declarative JSON topology loader that lowers documents into message
//! sequences.

pub mod error;
pub mod handler;
pub mod message;
pub mod topology;

pub use error::{IpcError, Result};
pub use handler::IpcHandler;
pub use message::{Fragment, FragmentPos, IpcMessage, IpcResponse};
pub use topology::{DriverMap, TopologyDoc, compile};
