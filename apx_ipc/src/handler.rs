//! IPC message handler.
//!
//! Owns the graph and the scheduler, applies messages one at a time, and
//! keeps the reassembly state for fragmented configuration blobs. Batch
//! application (the topology path) unwinds partially created objects in
//! reverse creation order when any step fails, so a rejected topology
//! leaves nothing allocated.

use std::{collections::HashMap, sync::Arc};

use apx_core::{ApxError, CacheAttr, MemZone, StatusHandle, coherent};
use apx_stream::{AudioBuffer, BufferId};
use apx_pipeline::{
    ComponentId, ComponentRegistry, GraphStore, Pipeline, PipelineConfig, PipelineId, Scheduler, TriggerOutcome,
};

use crate::{
    error::{IpcError, Result},
    message::{Fragment, FragmentPos, IpcMessage, IpcResponse},
};

/// In-flight fragmented configuration transfer.
struct BlobTransfer {
    expected: usize,
    data: Vec<u8>,
}

/// Objects created by a batch, for reverse-order unwind.
enum Created {
    Pipeline(PipelineId),
    Component(ComponentId),
    Buffer(BufferId),
}

/// The runtime's IPC front end.
pub struct IpcHandler {
    graph: GraphStore,
    scheduler: Scheduler,
    registry: Arc<ComponentRegistry>,
    status: StatusHandle,
    transfers: HashMap<ComponentId, BlobTransfer>,
}

impl IpcHandler {
    pub fn new(registry: Arc<ComponentRegistry>, status: StatusHandle) -> Self {
        Self {
            graph: GraphStore::new(),
            scheduler: Scheduler::new(Arc::clone(&status)),
            registry,
            status,
            transfers: HashMap::new(),
        }
    }

    #[inline]
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    #[inline]
    pub fn graph_mut(&mut self) -> &mut GraphStore {
        &mut self.graph
    }

    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Runs one LL tick over the owned graph.
    pub fn run_tick(&mut self) {
        self.scheduler.run_tick(&mut self.graph);
    }

    /// Applies one message, returning the reply payload.
    ///
    /// Errors also latch their code into the status register, which is
    /// what the host polls when a reply is lost.
    pub fn apply(&mut self, msg: IpcMessage) -> Result<IpcResponse> {
        let result = self.apply_inner(msg);
        if let Err(e) = &result {
            log::warn!("ipc message rejected: {e}");
            self.status.set_status(e.code().code());
        }
        result
    }

    fn apply_inner(&mut self, msg: IpcMessage) -> Result<IpcResponse> {
        match msg {
            IpcMessage::NewPipeline {
                id,
                core,
                priority,
                period_us,
                deadline_us,
                time_domain,
            } => {
                let config = PipelineConfig {
                    core,
                    priority,
                    period_us,
                    deadline_us: if deadline_us > 0 { deadline_us } else { period_us },
                    time_domain,
                };
                self.graph.add_pipeline(Pipeline::new(PipelineId(id), config))?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::NewComponent { driver, id, spec } => {
                let component = self.registry.new_component(driver, ComponentId(id), &spec)?;
                self.graph.add_component(component)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::NewBuffer { id, capacity } => {
                let buffer = AudioBuffer::alloc(
                    BufferId(id),
                    capacity,
                    MemZone::BufferPool,
                    CacheAttr::Coherent,
                    coherent(),
                );
                self.graph.add_buffer(buffer)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::ConnectCompToBuffer { component, buffer, pin } => {
                self.graph
                    .connect_comp_to_buffer(ComponentId(component), BufferId(buffer), pin)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::ConnectBufferToComp { buffer, component, pin } => {
                self.graph
                    .connect_buffer_to_comp(BufferId(buffer), ComponentId(component), pin)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::CompletePipeline { id } => {
                self.graph.complete_pipeline(PipelineId(id))?;
                self.scheduler.refresh_order(&self.graph);
                Ok(IpcResponse::Done)
            }

            IpcMessage::Trigger { pipeline, trigger } => {
                let outcome = self
                    .scheduler
                    .trigger_now(&mut self.graph, PipelineId(pipeline), trigger)?;
                Ok(match outcome {
                    TriggerOutcome::Moved(_) => IpcResponse::Done,
                    TriggerOutcome::AlreadySet => IpcResponse::AlreadySet,
                    TriggerOutcome::NoPause => IpcResponse::NoPause,
                })
            }

            IpcMessage::Params { component, format } => {
                self.graph.set_params(ComponentId(component), &format)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::SetData { component, fragment } => {
                self.apply_fragment(ComponentId(component), fragment)?;
                Ok(IpcResponse::Done)
            }

            IpcMessage::GetData { component } => {
                let comp = self
                    .graph
                    .component(ComponentId(component))
                    .ok_or(IpcError::Status(ApxError::NotFound))?;
                Ok(IpcResponse::Data(comp.get_config().map_err(IpcError::Status)?))
            }
        }
    }

    /// Applies a message sequence transactionally: any failure unwinds
    /// the objects this batch created, in reverse order.
    pub fn apply_batch(&mut self, msgs: Vec<IpcMessage>) -> Result<()> {
        let mut created: Vec<Created> = Vec::new();

        for msg in msgs {
            let record = match &msg {
                IpcMessage::NewPipeline { id, .. } => Some(Created::Pipeline(PipelineId(*id))),
                IpcMessage::NewComponent { id, .. } => Some(Created::Component(ComponentId(*id))),
                IpcMessage::NewBuffer { id, .. } => Some(Created::Buffer(BufferId(*id))),
                _ => None,
            };
            match self.apply(msg) {
                Ok(_) => {
                    if let Some(record) = record {
                        created.push(record);
                    }
                }
                Err(e) => {
                    self.unwind(created);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn unwind(&mut self, created: Vec<Created>) {
        log::warn!("unwinding {} partially created objects", created.len());
        for obj in created.into_iter().rev() {
            let _ = match obj {
                Created::Pipeline(id) => self.graph.remove_pipeline(id),
                Created::Component(id) => self.graph.remove_component(id),
                Created::Buffer(id) => self.graph.remove_buffer(id),
            };
        }
    }

    fn apply_fragment(&mut self, component: ComponentId, fragment: Fragment) -> Result<()> {
        // Verify the target exists before buffering anything.
        if self.graph.component(component).is_none() {
            return Err(IpcError::Status(ApxError::NotFound));
        }

        match fragment.pos {
            FragmentPos::Single => {
                let comp = self.graph.component_mut(component).expect("checked above");
                comp.set_config(&fragment.data).map_err(IpcError::Status)
            }
            FragmentPos::First { total } => {
                if fragment.data.len() > total {
                    return Err(IpcError::FragmentOverflow);
                }
                let mut data = Vec::with_capacity(total);
                data.extend_from_slice(&fragment.data);
                self.transfers.insert(component, BlobTransfer { expected: total, data });
                Ok(())
            }
            FragmentPos::Middle | FragmentPos::Last => {
                let transfer = self
                    .transfers
                    .get_mut(&component)
                    .ok_or(IpcError::FragmentSequence)?;
                if transfer.data.len() + fragment.data.len() > transfer.expected {
                    self.transfers.remove(&component);
                    return Err(IpcError::FragmentOverflow);
                }
                transfer.data.extend_from_slice(&fragment.data);

                if fragment.pos == FragmentPos::Last {
                    let transfer = self.transfers.remove(&component).expect("present above");
                    if transfer.data.len() != transfer.expected {
                        return Err(IpcError::FragmentOverflow);
                    }
                    let comp = self.graph.component_mut(component).expect("checked above");
                    comp.set_config(&transfer.data).map_err(IpcError::Status)?;
                }
                Ok(())
            }
        }
    }
}
