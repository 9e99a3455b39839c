//! The abstract IPC message set.
//!
//! Transport framing is the platform glue's problem; what the runtime
//! consumes is this typed message set, either decoded from a mailbox or
//! synthesized by the topology loader.

use apx_core::SampleFormat;
use apx_pipeline::{NewComponentSpec, TimeDomain, Trigger, Uuid};

/// Position of a configuration fragment within its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPos {
    /// Opens a transfer and declares the total blob size.
    First { total: usize },
    Middle,
    Last,
    /// A complete blob in one message.
    Single,
}

/// One fragment of an opaque configuration blob.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub pos: FragmentPos,
    pub data: Vec<u8>,
}

/// Messages the runtime consumes.
#[derive(Debug, Clone)]
pub enum IpcMessage {
    NewPipeline {
        id: u32,
        core: u32,
        priority: u32,
        period_us: u64,
        deadline_us: u64,
        time_domain: TimeDomain,
    },
    NewComponent {
        driver: Uuid,
        id: u32,
        spec: NewComponentSpec,
    },
    NewBuffer {
        id: u32,
        capacity: usize,
    },
    /// Component produces into buffer.
    ConnectCompToBuffer {
        component: u32,
        buffer: u32,
        pin: u32,
    },
    /// Component consumes from buffer.
    ConnectBufferToComp {
        buffer: u32,
        component: u32,
        pin: u32,
    },
    CompletePipeline {
        id: u32,
    },
    Trigger {
        pipeline: u32,
        trigger: Trigger,
    },
    Params {
        component: u32,
        format: SampleFormat,
    },
    SetData {
        component: u32,
        fragment: Fragment,
    },
    GetData {
        component: u32,
    },
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcResponse {
    /// Plain acknowledgement.
    Done,
    /// The trigger found the state already set; no side effects ran.
    AlreadySet,
    /// PAUSE refused by a `no_pause` module; pipeline stays active.
    NoPause,
    /// Reply to `GetData`.
    Data(Vec<u8>),
}
