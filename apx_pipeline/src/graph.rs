//! The component/buffer arena and graph operations.
//!
//! All objects live in per-type tables keyed by their ids; connections
//! are owned attachment records on the component side plus a reverse
//! index per buffer. Nothing holds a reference into anything else, so
//! IPC can unwind partially built graphs by deleting ids in reverse
//! creation order.

use std::collections::{HashMap, HashSet, VecDeque};

use apx_core::{ApxError, FixedVec, SampleFormat};
use apx_stream::{AudioBuffer, BufferId};

use crate::{
    component::{Attachment, Component, ComponentCore, ComponentId, TriggerOutcome},
    constants::MAX_ATTACHMENTS,
    endpoint::{DaiEndpoint, HostEndpoint},
    error::{PipelineError, Result},
    module::CopyOutcome,
    pipeline::{Pipeline, PipelineId},
    state::{ComponentState, Trigger},
};

/// Reverse index entry: who produces into and who consumes from a buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeRecord {
    pub producer: Option<ComponentId>,
    pub consumer: Option<ComponentId>,
}

/// Arena of components, buffers, and pipelines.
#[derive(Default)]
pub struct GraphStore {
    components: HashMap<ComponentId, Component>,
    buffers: HashMap<BufferId, AudioBuffer>,
    edges: HashMap<BufferId, EdgeRecord>,
    pipelines: HashMap<PipelineId, Pipeline>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Object lifetime
    // ------------------------------------------------------------------

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        if self.pipelines.contains_key(&pipeline.id()) {
            return Err(PipelineError::DuplicateId);
        }
        self.pipelines.insert(pipeline.id(), pipeline);
        Ok(())
    }

    pub fn add_component(&mut self, component: Component) -> Result<()> {
        if self.components.contains_key(&component.id()) {
            return Err(PipelineError::DuplicateId);
        }
        let pipeline = self
            .pipelines
            .get_mut(&component.pipeline())
            .ok_or(PipelineError::PipelineNotFound(component.pipeline()))?;
        pipeline.components.push(component.id());
        self.components.insert(component.id(), component);
        Ok(())
    }

    pub fn add_buffer(&mut self, buffer: AudioBuffer) -> Result<()> {
        if self.buffers.contains_key(&buffer.id()) {
            return Err(PipelineError::DuplicateId);
        }
        self.edges.insert(buffer.id(), EdgeRecord::default());
        self.buffers.insert(buffer.id(), buffer);
        Ok(())
    }

    /// Deletes a component, detaching it from every buffer edge. Used by
    /// IPC unwind and dynamic pipeline teardown.
    pub fn remove_component(&mut self, id: ComponentId) -> Result<()> {
        let component = self.components.remove(&id).ok_or(PipelineError::ComponentNotFound(id))?;
        for att in component.source_attachments() {
            if let Some(edge) = self.edges.get_mut(&att.buffer) {
                edge.consumer = None;
            }
        }
        for att in component.sink_attachments() {
            if let Some(edge) = self.edges.get_mut(&att.buffer) {
                edge.producer = None;
            }
        }
        if let Some(pipeline) = self.pipelines.get_mut(&component.pipeline()) {
            pipeline.components.retain(|c| *c != id);
        }
        Ok(())
    }

    /// Deletes a buffer and the attachment records pointing at it.
    pub fn remove_buffer(&mut self, id: BufferId) -> Result<()> {
        self.buffers.remove(&id).ok_or(PipelineError::BufferNotFound(id))?;
        if let Some(edge) = self.edges.remove(&id) {
            if let Some(producer) = edge.producer {
                if let Some(comp) = self.components.get_mut(&producer) {
                    comp.sinks.retain(|a| a.buffer != id);
                }
            }
            if let Some(consumer) = edge.consumer {
                if let Some(comp) = self.components.get_mut(&consumer) {
                    comp.sources.retain(|a| a.buffer != id);
                }
            }
        }
        Ok(())
    }

    pub fn remove_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = self.pipelines.remove(&id).ok_or(PipelineError::PipelineNotFound(id))?;
        for comp in pipeline.components {
            let _ = self.remove_component(comp);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(&id)
    }

    pub fn buffer(&self, id: BufferId) -> Option<&AudioBuffer> {
        self.buffers.get(&id)
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> Option<&mut AudioBuffer> {
        self.buffers.get_mut(&id)
    }

    pub fn edge(&self, id: BufferId) -> Option<&EdgeRecord> {
        self.edges.get(&id)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(&id)
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(&id)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    /// The host endpoint behind a component, for host shims and tests.
    pub fn host_endpoint_mut(&mut self, id: ComponentId) -> Option<&mut HostEndpoint> {
        match self.components.get_mut(&id)?.core_mut() {
            ComponentCore::Host(h) => Some(h),
            _ => None,
        }
    }

    /// The DAI endpoint behind a component.
    pub fn dai_endpoint_mut(&mut self, id: ComponentId) -> Option<&mut DaiEndpoint> {
        match self.components.get_mut(&id)?.core_mut() {
            ComponentCore::Dai(d) => Some(d),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Attaches `buffer` to `component`'s sink side: the component will
    /// produce into it. A buffer accepts exactly one producer.
    pub fn connect_comp_to_buffer(&mut self, component: ComponentId, buffer: BufferId, pin: u32) -> Result<()> {
        self.check_attachable(component, buffer)?;
        let edge = self.edges.get_mut(&buffer).ok_or(PipelineError::BufferNotFound(buffer))?;
        if edge.producer.is_some() {
            return Err(PipelineError::EndpointOccupied(buffer, "source"));
        }
        let comp = self
            .components
            .get_mut(&component)
            .ok_or(PipelineError::ComponentNotFound(component))?;
        if comp.sinks.len() >= comp.max_sinks().min(MAX_ATTACHMENTS) {
            return Err(PipelineError::TooManyAttachments(component));
        }
        comp.sinks.push(Attachment { buffer, pin });
        edge.producer = Some(component);
        Ok(())
    }

    /// Attaches `buffer` to `component`'s source side: the component will
    /// consume from it. A buffer accepts exactly one consumer; fan-out to
    /// several consumers is modelled by cloning the stream upstream.
    pub fn connect_buffer_to_comp(&mut self, buffer: BufferId, component: ComponentId, pin: u32) -> Result<()> {
        self.check_attachable(component, buffer)?;
        let edge = self.edges.get_mut(&buffer).ok_or(PipelineError::BufferNotFound(buffer))?;
        if edge.consumer.is_some() {
            return Err(PipelineError::EndpointOccupied(buffer, "sink"));
        }
        let comp = self
            .components
            .get_mut(&component)
            .ok_or(PipelineError::ComponentNotFound(component))?;
        if comp.sources.len() >= comp.max_sources().min(MAX_ATTACHMENTS) {
            return Err(PipelineError::TooManyAttachments(component));
        }
        comp.sources.push(Attachment { buffer, pin });
        edge.consumer = Some(component);
        Ok(())
    }

    /// Rejects duplicate attachment of one buffer to one component in any
    /// direction; that uniqueness is what makes the copy-time gather
    /// alias-free.
    fn check_attachable(&self, component: ComponentId, buffer: BufferId) -> Result<()> {
        let comp = self
            .components
            .get(&component)
            .ok_or(PipelineError::ComponentNotFound(component))?;
        if !self.buffers.contains_key(&buffer) {
            return Err(PipelineError::BufferNotFound(buffer));
        }
        let attached = comp
            .source_attachments()
            .iter()
            .chain(comp.sink_attachments())
            .any(|a| a.buffer == buffer);
        if attached {
            return Err(PipelineError::DuplicateId);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Applies stream parameters at `component` and propagates them
    /// downstream through sink attachments, verifying acceptance at each
    /// hop. Buffers along the way adopt the format.
    pub fn set_params(&mut self, component: ComponentId, format: &SampleFormat) -> Result<()> {
        let mut queue = VecDeque::from([component]);
        let mut visited = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let comp = self.components.get_mut(&id).ok_or(PipelineError::ComponentNotFound(id))?;
            comp.set_params(format).map_err(PipelineError::Status)?;

            let sink_buffers: Vec<BufferId> = comp.sink_attachments().iter().map(|a| a.buffer).collect();
            for bid in sink_buffers {
                if let Some(buf) = self.buffers.get_mut(&bid) {
                    buf.set_format(*format).map_err(PipelineError::Status)?;
                }
                if let Some(consumer) = self.edges.get(&bid).and_then(|e| e.consumer) {
                    queue.push_back(consumer);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Finalises a pipeline: verifies connectivity, rejects cycles,
    /// resolves the execution order and the endpoint roles.
    pub fn complete_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = self.pipelines.get(&id).ok_or(PipelineError::PipelineNotFound(id))?;
        if pipeline.is_completed() {
            return Ok(());
        }
        let members: Vec<ComponentId> = pipeline.components.clone();
        if members.is_empty() {
            return Err(PipelineError::NoEndpoint(id));
        }
        let member_set: HashSet<ComponentId> = members.iter().copied().collect();

        // Intra-pipeline directed edges through buffers.
        let mut succ: HashMap<ComponentId, Vec<ComponentId>> = HashMap::new();
        let mut in_degree: HashMap<ComponentId, usize> = members.iter().map(|c| (*c, 0)).collect();
        let mut intra_linked: HashSet<ComponentId> = HashSet::new();

        for edge in self.edges.values() {
            if let (Some(p), Some(c)) = (edge.producer, edge.consumer) {
                if member_set.contains(&p) && member_set.contains(&c) {
                    succ.entry(p).or_default().push(c);
                    *in_degree.get_mut(&c).expect("member in-degree") += 1;
                    intra_linked.insert(p);
                    intra_linked.insert(c);
                }
            }
        }

        // Every member must be attached somewhere; isolated nodes mean
        // the topology forgot a route.
        for m in &members {
            let comp = self.components.get(m).ok_or(PipelineError::ComponentNotFound(*m))?;
            if comp.source_attachments().is_empty() && comp.sink_attachments().is_empty() {
                return Err(PipelineError::Disconnected(id));
            }
            if members.len() > 1 && !intra_linked.contains(m) {
                return Err(PipelineError::Disconnected(id));
            }
        }

        // Kahn's algorithm over the member subgraph.
        let mut queue: VecDeque<ComponentId> = members.iter().filter(|m| in_degree[m] == 0).copied().collect();
        let mut order = Vec::with_capacity(members.len());
        let mut degrees = in_degree.clone();
        while let Some(n) = queue.pop_front() {
            order.push(n);
            if let Some(next) = succ.get(&n) {
                for c in next {
                    let d = degrees.get_mut(c).expect("member in-degree");
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*c);
                    }
                }
            }
        }
        if order.len() != members.len() {
            let stuck = members
                .iter()
                .find(|m| !order.contains(m))
                .copied()
                .unwrap_or(members[0]);
            return Err(PipelineError::Cycle(stuck));
        }

        let source = order.first().copied();
        let sink = order.last().copied();

        // Scheduling component: the endpoint that paces the pipeline,
        // host side preferred, otherwise the most-upstream member.
        let mut scheduling = None;
        let mut direction = None;
        for m in &order {
            match self.components.get(m).map(|c| c.core()) {
                Some(ComponentCore::Host(h)) => {
                    scheduling.get_or_insert(*m);
                    direction.get_or_insert(h.direction());
                }
                Some(ComponentCore::Dai(d)) => {
                    direction.get_or_insert(d.direction());
                    if scheduling.is_none() {
                        scheduling = Some(*m);
                    }
                }
                _ => {}
            }
        }

        let pipeline = self.pipelines.get_mut(&id).expect("pipeline checked above");
        pipeline.topo_order = order;
        pipeline.source_component = source;
        pipeline.sink_component = sink;
        pipeline.scheduling_component = scheduling.or(source);
        if let Some(direction) = direction {
            pipeline.direction = direction;
        }
        pipeline.mark_completed();
        pipeline.set_state(ComponentState::Ready);
        log::debug!("pipeline {id:?} completed: {} components", pipeline.topo_order.len());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle over whole pipelines
    // ------------------------------------------------------------------

    /// Moves every component of the pipeline through `trigger`.
    ///
    /// START/RELEASE run sink-first so downstream components are live
    /// before data arrives; STOP/PAUSE run source-first so no new data
    /// enters a stopping graph. A redundant trigger is reported as
    /// `AlreadySet` and touches nothing.
    pub fn trigger_pipeline(&mut self, id: PipelineId, trigger: Trigger) -> Result<TriggerOutcome> {
        match trigger {
            Trigger::Prepare => {
                self.prepare_pipeline(id)?;
                return Ok(TriggerOutcome::Moved(ComponentState::Prepare));
            }
            Trigger::Reset => {
                self.reset_pipeline(id)?;
                return Ok(TriggerOutcome::Moved(ComponentState::Ready));
            }
            _ => {}
        }

        let pipeline = self.pipelines.get(&id).ok_or(PipelineError::PipelineNotFound(id))?;
        if !pipeline.is_completed() {
            return Err(PipelineError::Status(ApxError::BadState));
        }
        let target = crate::state::next_state(pipeline.state(), trigger);
        let target = match target {
            Ok(t) => t,
            Err(ApxError::AlreadySet) => return Ok(TriggerOutcome::AlreadySet),
            Err(e) => return Err(PipelineError::Status(e)),
        };

        // A no_pause module vetoes PAUSE for the whole pipeline.
        if trigger == Trigger::Pause {
            let vetoed = pipeline.topo_order.iter().any(|c| {
                matches!(self.components.get(c).map(|c| c.core()),
                    Some(ComponentCore::Adapter(a)) if a.descriptor().no_pause)
            });
            if vetoed {
                return Ok(TriggerOutcome::NoPause);
            }
        }

        let mut order = pipeline.topo_order.clone();
        if matches!(trigger, Trigger::Start | Trigger::Release) {
            order.reverse();
        }

        for cid in &order {
            let comp = self
                .components
                .get_mut(cid)
                .ok_or(PipelineError::ComponentNotFound(*cid))?;
            match comp.trigger(trigger) {
                Ok(_) => {}
                Err(e) => {
                    log::warn!("trigger {trigger:?} failed at component {cid:?}: {e}");
                    return Err(PipelineError::Status(e));
                }
            }
        }

        self.pipelines
            .get_mut(&id)
            .expect("pipeline checked above")
            .set_state(target);
        Ok(TriggerOutcome::Moved(target))
    }

    /// Prepares every component in topological order. Already-prepared
    /// components are skipped, which keeps the xrun recovery path free of
    /// allocation. A failure rewinds the components prepared so far.
    pub fn prepare_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = self.pipelines.get(&id).ok_or(PipelineError::PipelineNotFound(id))?;
        if !pipeline.is_completed() {
            return Err(PipelineError::Status(ApxError::BadState));
        }
        if pipeline.state() == ComponentState::Prepare {
            return Ok(());
        }
        let period_us = pipeline.config().period_us;
        let order = pipeline.topo_order.clone();

        for (idx, cid) in order.iter().enumerate() {
            if let Err(e) = self.prepare_component(*cid, period_us) {
                // Rewind: release what was prepared before the failure.
                for done in &order[..idx] {
                    if let Some(comp) = self.components.get_mut(done) {
                        let _ = comp.reset();
                    }
                }
                return Err(e);
            }
        }

        self.pipelines
            .get_mut(&id)
            .expect("pipeline checked above")
            .set_state(ComponentState::Prepare);
        Ok(())
    }

    /// Returns every component to READY and silences the pipeline's
    /// internal buffers.
    pub fn reset_pipeline(&mut self, id: PipelineId) -> Result<()> {
        let pipeline = self.pipelines.get(&id).ok_or(PipelineError::PipelineNotFound(id))?;
        let members: HashSet<ComponentId> = pipeline.components.iter().copied().collect();
        let order: Vec<ComponentId> = pipeline.topo_order.iter().rev().copied().collect();

        for cid in order {
            if let Some(comp) = self.components.get_mut(&cid) {
                comp.reset().map_err(PipelineError::Status)?;
            }
        }
        // Internal edges only; a shared buffer belongs to both pipelines
        // and is cleared by whichever resets last.
        for (bid, edge) in &self.edges {
            let internal = edge.producer.is_some_and(|p| members.contains(&p))
                && edge.consumer.is_none_or(|c| members.contains(&c));
            if internal {
                if let Some(buf) = self.buffers.get_mut(bid) {
                    buf.silence();
                }
            }
        }
        self.pipelines
            .get_mut(&id)
            .expect("pipeline checked above")
            .set_state(ComponentState::Ready);
        Ok(())
    }

    fn prepare_component(&mut self, id: ComponentId, period_us: u64) -> Result<()> {
        let (src_ids, sink_ids) = self.attachment_ids(id, false)?;
        let Self { components, buffers, .. } = self;
        let comp = components.get_mut(&id).ok_or(PipelineError::ComponentNotFound(id))?;

        let mut sources: FixedVec<&mut AudioBuffer, MAX_ATTACHMENTS> = FixedVec::new();
        let mut sinks: FixedVec<&mut AudioBuffer, MAX_ATTACHMENTS> = FixedVec::new();
        // SAFETY: attachment ids are unique per component (enforced at
        // connect), so the raw pointers below never alias; the map is not
        // mutated while they live.
        unsafe {
            for bid in src_ids.iter() {
                let ptr = buffers.get_mut(bid).ok_or(PipelineError::BufferNotFound(*bid))? as *mut AudioBuffer;
                let _ = sources.push(&mut *ptr);
            }
            for bid in sink_ids.iter() {
                let ptr = buffers.get_mut(bid).ok_or(PipelineError::BufferNotFound(*bid))? as *mut AudioBuffer;
                let _ = sinks.push(&mut *ptr);
            }
        }

        comp.prepare(sources.as_mut_slice(), sinks.as_mut_slice(), period_us)
            .map_err(PipelineError::Status)
    }

    // ------------------------------------------------------------------
    // Copy dispatch
    // ------------------------------------------------------------------

    /// Runs one copy pass on a component, gathering its endpoints from
    /// the arena. Fan-out sinks whose consumer is not in the pipeline's
    /// lifecycle state are skipped (no zeros injected here).
    pub fn copy_component(&mut self, id: ComponentId) -> Result<CopyOutcome> {
        let (src_ids, sink_ids) = self.attachment_ids(id, true)?;
        let Self { components, buffers, .. } = self;
        let comp = components.get_mut(&id).ok_or(PipelineError::ComponentNotFound(id))?;

        let mut sources: FixedVec<&mut AudioBuffer, MAX_ATTACHMENTS> = FixedVec::new();
        let mut sinks: FixedVec<&mut AudioBuffer, MAX_ATTACHMENTS> = FixedVec::new();
        // SAFETY: as in `prepare_component`; uniqueness of attachment ids
        // guarantees the gathered references are disjoint.
        unsafe {
            for bid in src_ids.iter() {
                let ptr = buffers.get_mut(bid).ok_or(PipelineError::BufferNotFound(*bid))? as *mut AudioBuffer;
                let _ = sources.push(&mut *ptr);
            }
            for bid in sink_ids.iter() {
                let ptr = buffers.get_mut(bid).ok_or(PipelineError::BufferNotFound(*bid))? as *mut AudioBuffer;
                let _ = sinks.push(&mut *ptr);
            }
        }

        comp.copy(sources.as_mut_slice(), sinks.as_mut_slice())
            .map_err(PipelineError::Status)
    }

    /// Snapshot of a component's attachment ids, optionally applying the
    /// fan-out lifecycle filter.
    fn attachment_ids(
        &self,
        id: ComponentId,
        filter_fanout: bool,
    ) -> Result<(FixedVec<BufferId, MAX_ATTACHMENTS>, FixedVec<BufferId, MAX_ATTACHMENTS>)> {
        let comp = self.components.get(&id).ok_or(PipelineError::ComponentNotFound(id))?;
        let pipeline_state = self
            .pipelines
            .get(&comp.pipeline())
            .map(|p| p.state())
            .unwrap_or(ComponentState::Init);

        let mut src_ids: FixedVec<BufferId, MAX_ATTACHMENTS> = FixedVec::new();
        for att in comp.source_attachments() {
            src_ids
                .push(att.buffer)
                .map_err(|_| PipelineError::TooManyAttachments(id))?;
        }

        let multi_sink = comp.sink_attachments().len() > 1;
        let mut sink_ids: FixedVec<BufferId, MAX_ATTACHMENTS> = FixedVec::new();
        for att in comp.sink_attachments() {
            if filter_fanout && multi_sink {
                if let Some(consumer) = self.edges.get(&att.buffer).and_then(|e| e.consumer) {
                    let consumer_state = self.components.get(&consumer).map(|c| c.state());
                    if consumer_state != Some(pipeline_state) {
                        continue;
                    }
                }
            }
            sink_ids
                .push(att.buffer)
                .map_err(|_| PipelineError::TooManyAttachments(id))?;
        }
        Ok((src_ids, sink_ids))
    }
}
