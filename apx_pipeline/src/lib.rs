//! # APX Pipeline
//!
//! The audio pipeline runtime: components with a lifecycle state
//! machine, the module adapter hosting plug-in DSP modules, the
//! component/buffer graph, the driver registry, and the LL/DP
//! schedulers with xrun recovery.

pub mod adapter;
pub mod component;
pub mod constants;
pub mod endpoint;
pub mod error;
pub mod graph;
pub mod module;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod state;
pub mod xrun;

pub use adapter::{DpTask, ModuleAdapter, ModuleCell};
pub use component::{Attachment, Component, ComponentCore, ComponentId, ComponentKind, TriggerOutcome};
pub use endpoint::{DaiEndpoint, HostEndpoint, StreamDirection};
pub use error::{PipelineError, Result};
pub use graph::{EdgeRecord, GraphStore};
pub use module::{CopyOutcome, ModuleDescriptor, ModuleDomain, ModuleMode, ProcessingModule, RawStatus};
pub use pipeline::{Pipeline, PipelineConfig, PipelineId, TimeDomain};
pub use registry::{ComponentDriver, ComponentRegistry, NewComponentSpec, Uuid};
pub use schedule::Scheduler;
pub use state::{ComponentState, Trigger, next_state};
pub use xrun::{XrunAction, XrunMonitor};
