//! Graph components.
//!
//! A component is one node of the pipeline graph: a lifecycle state, two
//! attachment lists, and either a module adapter or an endpoint driver
//! behind it. Attachments are plain owned records (buffer id + pin); the
//! graph keeps the reverse index, so no object holds a raw pointer into
//! another.

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::{AudioBuffer, BufferId};

use crate::{
    adapter::{DpTask, ModuleAdapter},
    endpoint::{DaiEndpoint, HostEndpoint},
    module::{CopyOutcome, ModuleDomain, ProcessingModule},
    pipeline::PipelineId,
    state::{ComponentState, Trigger, next_state},
};

/// Identifier of a component inside one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

/// Component classes understood by the topology layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Host,
    Dai,
    Mixer,
    MixIn,
    MixOut,
    Gain,
    Eq,
    Src,
    Tone,
    Module,
}

impl ComponentKind {
    /// Display name for logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Host => "host-copier",
            ComponentKind::Dai => "dai-copier",
            ComponentKind::Mixer => "mixer",
            ComponentKind::MixIn => "mixin",
            ComponentKind::MixOut => "mixout",
            ComponentKind::Gain => "gain",
            ComponentKind::Eq => "eq",
            ComponentKind::Src => "src",
            ComponentKind::Tone => "tone",
            ComponentKind::Module => "module",
        }
    }
}

/// One buffer attachment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub buffer: BufferId,
    pub pin: u32,
}

/// The concrete machinery behind a component.
pub enum ComponentCore {
    /// Adapter-hosted processing module.
    Adapter(ModuleAdapter),
    /// Host DMA endpoint.
    Host(HostEndpoint),
    /// Link DMA endpoint.
    Dai(DaiEndpoint),
}

/// Result of a lifecycle trigger on one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Transitioned into the given state.
    Moved(ComponentState),
    /// Redundant trigger; state unchanged, no side effects.
    AlreadySet,
    /// Module refused PAUSE (`no_pause`); stays ACTIVE, scheduler sees
    /// PATH_STOP for this pass.
    NoPause,
}

/// A stateful processing node of the pipeline graph.
pub struct Component {
    id: ComponentId,
    kind: ComponentKind,
    state: ComponentState,
    pipeline: PipelineId,
    pub(crate) sources: Vec<Attachment>,
    pub(crate) sinks: Vec<Attachment>,
    core: ComponentCore,
}

impl Component {
    /// Creates an adapter-hosted component. Module init happens here, so
    /// the component is born READY.
    pub fn new_module(
        id: ComponentId,
        kind: ComponentKind,
        pipeline: PipelineId,
        module: Box<dyn ProcessingModule>,
    ) -> Self {
        Self {
            id,
            kind,
            state: ComponentState::Ready,
            pipeline,
            sources: Vec::new(),
            sinks: Vec::new(),
            core: ComponentCore::Adapter(ModuleAdapter::new(module)),
        }
    }

    /// Creates a host endpoint component.
    pub fn new_host(id: ComponentId, pipeline: PipelineId, endpoint: HostEndpoint) -> Self {
        Self {
            id,
            kind: ComponentKind::Host,
            state: ComponentState::Ready,
            pipeline,
            sources: Vec::new(),
            sinks: Vec::new(),
            core: ComponentCore::Host(endpoint),
        }
    }

    /// Creates a DAI endpoint component.
    pub fn new_dai(id: ComponentId, pipeline: PipelineId, endpoint: DaiEndpoint) -> Self {
        Self {
            id,
            kind: ComponentKind::Dai,
            state: ComponentState::Ready,
            pipeline,
            sources: Vec::new(),
            sinks: Vec::new(),
            core: ComponentCore::Dai(endpoint),
        }
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    #[inline]
    pub fn state(&self) -> ComponentState {
        self.state
    }

    #[inline]
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    #[inline]
    pub fn is_endpoint(&self) -> bool {
        matches!(self.core, ComponentCore::Host(_) | ComponentCore::Dai(_))
    }

    #[inline]
    pub fn core(&self) -> &ComponentCore {
        &self.core
    }

    #[inline]
    pub fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    /// Source attachments (buffers this component reads).
    pub fn source_attachments(&self) -> &[Attachment] {
        &self.sources
    }

    /// Sink attachments (buffers this component writes).
    pub fn sink_attachments(&self) -> &[Attachment] {
        &self.sinks
    }

    /// Most source attachments this component accepts.
    pub fn max_sources(&self) -> usize {
        match &self.core {
            ComponentCore::Adapter(a) => a.descriptor().max_sources,
            ComponentCore::Host(_) | ComponentCore::Dai(_) => 1,
        }
    }

    /// Most sink attachments this component accepts.
    pub fn max_sinks(&self) -> usize {
        match &self.core {
            ComponentCore::Adapter(a) => a.descriptor().max_sinks,
            ComponentCore::Host(_) | ComponentCore::Dai(_) => 1,
        }
    }

    /// `true` when the hosted module runs in the deferred domain.
    pub fn is_deferred(&self) -> bool {
        match &self.core {
            ComponentCore::Adapter(a) => a.descriptor().domain == ModuleDomain::Dp,
            _ => false,
        }
    }

    /// Applies and verifies stream parameters. Legal in READY only.
    pub fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        if self.state != ComponentState::Ready {
            return Err(ApxError::BadState);
        }
        match &mut self.core {
            ComponentCore::Adapter(a) => a.set_params(format),
            ComponentCore::Host(h) => h.set_params(format),
            ComponentCore::Dai(d) => d.set_params(format),
        }
    }

    /// Allocates per-stream resources and moves READY → PREPARE.
    ///
    /// Idempotent: preparing an already-prepared component is a no-op.
    pub fn prepare(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        pipeline_period_us: u64,
    ) -> Result<()> {
        match self.state {
            ComponentState::Prepare => return Ok(()),
            ComponentState::Ready => {}
            _ => return Err(ApxError::BadState),
        }
        match &mut self.core {
            ComponentCore::Adapter(a) => a.prepare(self.id, sources, sinks, pipeline_period_us)?,
            ComponentCore::Host(h) => h.prepare(pipeline_period_us)?,
            ComponentCore::Dai(d) => d.prepare(pipeline_period_us)?,
        }
        self.state = ComponentState::Prepare;
        log::debug!("{} {:?}: READY -> PREPARE", self.kind.name(), self.id);
        Ok(())
    }

    /// Applies a lifecycle trigger (START/RELEASE/STOP/PAUSE).
    ///
    /// RESET and PREPARE take the dedicated methods because they touch
    /// resources, not just state.
    pub fn trigger(&mut self, cmd: Trigger) -> Result<TriggerOutcome> {
        debug_assert!(!matches!(cmd, Trigger::Prepare | Trigger::Reset));

        let next = match next_state(self.state, cmd) {
            Ok(next) => next,
            Err(ApxError::AlreadySet) => return Ok(TriggerOutcome::AlreadySet),
            Err(e) => return Err(e),
        };

        if let ComponentCore::Adapter(a) = &mut self.core {
            if a.trigger(cmd)? {
                // no_pause: remain ACTIVE.
                return Ok(TriggerOutcome::NoPause);
            }
        }
        if cmd == Trigger::Stop {
            let drained = match &mut self.core {
                ComponentCore::Host(h) => h.drain(),
                ComponentCore::Dai(d) => d.drain(),
                ComponentCore::Adapter(_) => Ok(()),
            };
            if let Err(e) = drained {
                log::warn!("{} {:?}: stop forced after drain timeout", self.kind.name(), self.id);
                debug_assert_eq!(e, ApxError::Timeout);
            }
        }

        log::debug!("{} {:?}: {:?} -> {next:?} on {cmd:?}", self.kind.name(), self.id, self.state);
        self.state = next;
        Ok(TriggerOutcome::Moved(next))
    }

    /// One processing pass. Legal in ACTIVE only.
    pub fn copy(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<CopyOutcome> {
        if self.state != ComponentState::Active {
            return Err(ApxError::BadState);
        }
        match &mut self.core {
            ComponentCore::Adapter(a) => a.copy(sources, sinks),
            ComponentCore::Host(h) => h.copy(sources, sinks),
            ComponentCore::Dai(d) => d.copy(sources, sinks),
        }
    }

    /// Releases per-prepare resources and returns to READY.
    ///
    /// Resetting a READY component is the idempotent no-op the state
    /// machine promises.
    pub fn reset(&mut self) -> Result<()> {
        match next_state(self.state, Trigger::Reset) {
            Ok(_) => {}
            Err(ApxError::AlreadySet) => return Ok(()),
            Err(e) => return Err(e),
        }
        match &mut self.core {
            ComponentCore::Adapter(a) => a.reset(),
            ComponentCore::Host(h) => h.reset(),
            ComponentCore::Dai(d) => d.reset(),
        }
        self.state = ComponentState::Ready;
        Ok(())
    }

    /// Forwards a configuration blob to the hosted module.
    pub fn set_config(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.core {
            ComponentCore::Adapter(a) => a.set_config(data),
            _ => Err(ApxError::InvalidParameter),
        }
    }

    /// Reads the hosted module's configuration blob.
    pub fn get_config(&self) -> Result<Vec<u8>> {
        match &self.core {
            ComponentCore::Adapter(a) => a.get_config(),
            _ => Err(ApxError::InvalidParameter),
        }
    }

    /// Frames moved through this component since prepare.
    pub fn position(&self) -> u64 {
        match &self.core {
            ComponentCore::Adapter(a) => a.position_frames(),
            ComponentCore::Host(h) => h.position(),
            ComponentCore::Dai(d) => d.position(),
        }
    }

    /// The deferred work unit, present after preparing a DP module.
    pub fn take_dp_task(&mut self) -> Option<DpTask> {
        match &mut self.core {
            ComponentCore::Adapter(a) => a.take_dp_task(),
            _ => None,
        }
    }
}

impl core::fmt::Debug for Component {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("state", &self.state)
            .field("pipeline", &self.pipeline)
            .field("sources", &self.sources.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
