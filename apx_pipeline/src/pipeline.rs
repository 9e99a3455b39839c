//! Pipeline: the scheduling unit of the graph.
//!
//! A pipeline owns a connected subgraph of components and the metadata
//! the scheduler needs: period, deadline, priority, core, and time
//! domain. Completion (`GraphStore::complete_pipeline`) resolves the
//! execution order and the endpoint roles; until then the pipeline is
//! just a container being filled by IPC.

use crate::{component::ComponentId, endpoint::StreamDirection, state::ComponentState};

/// Identifier of a pipeline inside one runtime instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

/// Scheduling clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeDomain {
    /// Periodic platform timer.
    #[default]
    Timer,
    /// DMA completion interrupts pace the pipeline.
    Dma,
}

/// Static scheduling metadata carried by a pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Core the LL task is pinned to.
    pub core: u32,
    /// Relative priority; higher runs earlier within a tick.
    pub priority: u32,
    /// Scheduling period in microseconds.
    pub period_us: u64,
    /// Completion deadline; defaults to the period (next tick).
    pub deadline_us: u64,
    pub time_domain: TimeDomain,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            core: 0,
            priority: 0,
            period_us: crate::constants::DEFAULT_PERIOD_US,
            deadline_us: crate::constants::DEFAULT_PERIOD_US,
            time_domain: TimeDomain::Timer,
        }
    }
}

/// A connected subgraph plus its scheduling metadata.
pub struct Pipeline {
    id: PipelineId,
    config: PipelineConfig,
    state: ComponentState,
    /// Members in creation order.
    pub(crate) components: Vec<ComponentId>,
    /// Execution order, valid once completed.
    pub(crate) topo_order: Vec<ComponentId>,
    pub(crate) scheduling_component: Option<ComponentId>,
    pub(crate) source_component: Option<ComponentId>,
    pub(crate) sink_component: Option<ComponentId>,
    pub(crate) direction: StreamDirection,
    completed: bool,
}

impl Pipeline {
    pub fn new(id: PipelineId, config: PipelineConfig) -> Self {
        Self {
            id,
            config,
            state: ComponentState::Init,
            components: Vec::new(),
            topo_order: Vec::new(),
            scheduling_component: None,
            source_component: None,
            sink_component: None,
            direction: StreamDirection::Playback,
            completed: false,
        }
    }

    #[inline]
    pub fn id(&self) -> PipelineId {
        self.id
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ComponentState) {
        self.state = state;
    }

    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Component whose `copy` the scheduler invokes first each period.
    #[inline]
    pub fn scheduling_component(&self) -> Option<ComponentId> {
        self.scheduling_component
    }

    /// Most-upstream component of the subgraph.
    #[inline]
    pub fn source_component(&self) -> Option<ComponentId> {
        self.source_component
    }

    /// Most-downstream component of the subgraph.
    #[inline]
    pub fn sink_component(&self) -> Option<ComponentId> {
        self.sink_component
    }

    #[inline]
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Execution order resolved at completion.
    pub fn execution_order(&self) -> &[ComponentId] {
        &self.topo_order
    }

    /// Members in creation order.
    pub fn members(&self) -> &[ComponentId] {
        &self.components
    }
}

impl core::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("period_us", &self.config.period_us)
            .field("priority", &self.config.priority)
            .field("components", &self.components.len())
            .field("completed", &self.completed)
            .finish()
    }
}
