//! Module adapter: the bridge between graph buffers and a hosted module.
//!
//! The adapter owns everything a processing module must not care about:
//! endpoint gathering, period derivation, scratch staging for raw-data
//! modules, deep-buffer warm-up, and the DP-queue shuttle for deferred
//! modules. Per-prepare allocation happens here, outside the real-time
//! path; `copy` never allocates.

use std::sync::Arc;

use apx_core::{ApxError, FixedVec, Result, SampleFormat};
use apx_stream::{
    AudioBuffer, BufferId, DpConsumer, DpProducer, DpQueue, DpQueueMode, copy_all_available, copy_with_wrap,
    avail_frames_aligned, fill_silence, read_into,
};
use parking_lot::Mutex;

use crate::{
    component::ComponentId,
    constants::MAX_ATTACHMENTS,
    module::{CopyOutcome, ModuleDescriptor, ModuleDomain, ModuleMode, ProcessingModule},
    state::Trigger,
};

/// Shared ownership of a module between the adapter and its DP task.
pub type ModuleCell = Arc<Mutex<Box<dyn ProcessingModule>>>;

/// Work unit handed to the DP pool for a deferred module.
pub struct DpTask {
    pub component: ComponentId,
    pub module: ModuleCell,
    /// LL → DP queues, one per source attachment.
    pub inputs: Vec<DpConsumer>,
    /// DP → LL queues, one per sink attachment.
    pub outputs: Vec<DpProducer>,
    /// Cadence derived at prepare time.
    pub period_us: u64,
    /// Handoff threshold in bytes.
    pub period_bytes: usize,
}

impl DpTask {
    /// Runs one deferred pass: acquires every input slot, processes, and
    /// commits the outputs. Flow control is reported, not logged.
    pub fn run_once(&mut self) -> Result<usize> {
        // All inputs must have a handed-off slot; otherwise wait.
        if !self.inputs.iter().all(|q| q.has_data()) {
            return Err(ApxError::NoData);
        }

        let mut sources: Vec<&mut AudioBuffer> = Vec::with_capacity(self.inputs.len());
        for q in &mut self.inputs {
            match q.source() {
                Some(slot) => sources.push(slot),
                None => return Err(ApxError::NoData),
            }
        }
        let mut sinks: Vec<&mut AudioBuffer> = self.outputs.iter_mut().map(|q| q.sink()).collect();

        let processed = {
            let mut module = self.module.lock();
            module.process_sink_source(&mut sources, &mut sinks)?
        };

        for q in &mut self.inputs {
            if q.source().is_none_or(|slot| slot.available() == 0) {
                q.release();
            }
        }
        for q in &mut self.outputs {
            q.commit(self.period_bytes);
        }
        Ok(processed)
    }
}

/// Polymorphic host for a plug-in processing module.
pub struct ModuleAdapter {
    module: ModuleCell,
    desc: ModuleDescriptor,
    format: Option<SampleFormat>,

    /// Resolved at prepare: bytes one pass moves.
    period_bytes: usize,
    /// Deferred cadence in microseconds (DP modules).
    dp_period_us: u64,
    /// Warm-up threshold; cleared once inbound data first exceeds it.
    deep_buff_bytes: usize,

    // Raw-data staging.
    input_scratch: Vec<Vec<u8>>,
    input_fill: Vec<usize>,
    output_scratch: Vec<Vec<u8>>,
    sink_staging: Vec<AudioBuffer>,

    // LL halves of the DP shuttle.
    dp_in: Vec<DpProducer>,
    dp_out: Vec<DpConsumer>,
    /// Built at prepare, taken by the scheduler on start.
    pending_dp_task: Option<DpTask>,

    bytes_processed: u64,
}

impl ModuleAdapter {
    pub fn new(module: Box<dyn ProcessingModule>) -> Self {
        let desc = module.descriptor().clone();
        Self {
            module: Arc::new(Mutex::new(module)),
            desc,
            format: None,
            period_bytes: 0,
            dp_period_us: 0,
            deep_buff_bytes: 0,
            input_scratch: Vec::new(),
            input_fill: Vec::new(),
            output_scratch: Vec::new(),
            sink_staging: Vec::new(),
            dp_in: Vec::new(),
            dp_out: Vec::new(),
            pending_dp_task: None,
            bytes_processed: 0,
        }
    }

    #[inline]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> Option<&SampleFormat> {
        self.format.as_ref()
    }

    /// Frames pushed through the module since prepare, for host queries.
    pub fn position_frames(&self) -> u64 {
        match &self.format {
            Some(f) => self.bytes_processed / f.frame_bytes() as u64,
            None => 0,
        }
    }

    /// Propagates stream parameters into the module.
    pub fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        format.validate()?;
        self.module.lock().set_params(format)?;
        self.format = Some(*format);
        Ok(())
    }

    /// Forwards a lifecycle trigger to the module.
    ///
    /// Returns `Ok(true)` when the module refuses PAUSE (`no_pause`): the
    /// component stays ACTIVE and the caller must surface PATH_STOP.
    pub fn trigger(&mut self, cmd: Trigger) -> Result<bool> {
        if cmd == Trigger::Pause && self.desc.no_pause {
            return Ok(true);
        }
        self.module.lock().trigger(cmd)?;
        Ok(false)
    }

    /// Forwards a configuration blob.
    pub fn set_config(&mut self, data: &[u8]) -> Result<()> {
        self.module.lock().set_config(data)
    }

    pub fn get_config(&self) -> Result<Vec<u8>> {
        self.module.lock().get_config()
    }

    /// Allocates per-stream resources and computes periodicity.
    ///
    /// `sources`/`sinks` are the buffers attached to the hosting
    /// component, already gathered by the graph walker.
    pub fn prepare(
        &mut self,
        component: ComponentId,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        pipeline_period_us: u64,
    ) -> Result<()> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let frame_bytes = format.frame_bytes();

        self.period_bytes = if self.desc.period_bytes > 0 {
            self.desc.period_bytes
        } else {
            format.period_bytes(pipeline_period_us)
        };
        if self.period_bytes == 0 {
            return Err(ApxError::InvalidParameter);
        }

        self.module.lock().prepare()?;

        match (self.desc.mode, self.desc.domain) {
            (ModuleMode::AudioStream, _) | (ModuleMode::SinkSource, ModuleDomain::Ll) => {
                // Endpoints are re-gathered each pass from the arena; no
                // per-prepare staging needed.
            }

            (ModuleMode::SinkSource, ModuleDomain::Dp) => {
                // Derive the deferred cadence from the shallowest sink.
                let min_free = sinks.iter().map(|b| b.free()).min().unwrap_or(0);
                let derived = if min_free > 0 {
                    1_000_000u64 * min_free as u64 / (frame_bytes as u64 * format.rate as u64)
                } else {
                    pipeline_period_us
                };
                self.dp_period_us = if self.desc.period_bytes > 0 {
                    1_000_000u64 * self.desc.period_bytes as u64 / (frame_bytes as u64 * format.rate as u64)
                } else {
                    derived.max(pipeline_period_us)
                };

                let mut task_inputs = Vec::with_capacity(sources.len());
                let mut task_outputs = Vec::with_capacity(sinks.len());

                for (i, src) in sources.iter().enumerate() {
                    let slot = src.free().max(src.available()).max(self.period_bytes);
                    let (tx, rx) = DpQueue::new(
                        BufferId(0x4000_0000 + i as u32),
                        slot,
                        DpQueueMode::Shared,
                        Some(format),
                    );
                    self.dp_in.push(tx);
                    task_inputs.push(rx);
                }
                for (i, sink) in sinks.iter().enumerate() {
                    let slot = sink.free().max(sink.available()).max(self.period_bytes);
                    let (tx, rx) = DpQueue::new(
                        BufferId(0x4100_0000 + i as u32),
                        slot,
                        DpQueueMode::Shared,
                        Some(format),
                    );
                    task_outputs.push(tx);
                    self.dp_out.push(rx);
                }

                self.pending_dp_task = Some(DpTask {
                    component,
                    module: Arc::clone(&self.module),
                    inputs: task_inputs,
                    outputs: task_outputs,
                    period_us: self.dp_period_us,
                    period_bytes: self.period_bytes,
                });
            }

            (ModuleMode::RawData, _) => {
                let in_buff = if self.desc.in_buff_bytes > 0 {
                    self.desc.in_buff_bytes
                } else {
                    self.period_bytes
                };
                let out_buff = if self.desc.out_buff_bytes > 0 {
                    self.desc.out_buff_bytes
                } else {
                    self.period_bytes
                };

                let buff_periods = deep_buff_periods(in_buff, self.period_bytes);
                self.deep_buff_bytes = if in_buff > self.period_bytes {
                    in_buff.min(self.period_bytes) * buff_periods
                } else {
                    0
                };

                let in_scratch = in_buff.min(self.period_bytes).max(1) * buff_periods;
                let out_scratch = out_buff.max(self.period_bytes) * buff_periods;

                self.input_scratch = vec![vec![0u8; in_scratch]; sources.len().max(1)];
                self.input_fill = vec![0; sources.len().max(1)];
                self.output_scratch = vec![vec![0u8; out_scratch]; sinks.len().max(1)];

                self.sink_staging = sinks
                    .iter()
                    .enumerate()
                    .map(|(i, sink)| {
                        let mut staging = AudioBuffer::alloc_coherent(BufferId(0x4200_0000 + i as u32), out_scratch);
                        if let Some(fmt) = sink.format().copied().or(Some(format)) {
                            let _ = staging.set_format(fmt);
                        }
                        staging
                    })
                    .collect();
            }
        }
        Ok(())
    }

    /// One processing pass. Dispatch depends on the module mode.
    pub fn copy(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<CopyOutcome> {
        match self.desc.mode {
            ModuleMode::AudioStream => self.copy_audio_stream(sources, sinks),
            ModuleMode::RawData => self.copy_raw_data(sources, sinks),
            ModuleMode::SinkSource => match self.desc.domain {
                ModuleDomain::Ll => self.copy_sink_source_ll(sources, sinks),
                ModuleDomain::Dp => Ok(self.shuttle_dp(sources, sinks)),
            },
        }
    }

    fn copy_audio_stream(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
    ) -> Result<CopyOutcome> {
        let generator = self.desc.max_sources == 0;
        if (sources.is_empty() && !generator) || sinks.is_empty() {
            return Ok(CopyOutcome::PathStop);
        }
        // A missing rate on either side halts the pass.
        if sources.iter().any(|b| b.format().is_none()) || sinks.iter().any(|b| b.format().is_none()) {
            return Ok(CopyOutcome::PathStop);
        }
        // At most one side may fan out.
        if sources.len() > 1 && sinks.len() > 1 {
            return Err(ApxError::InvalidParameter);
        }

        let align = self.desc.frame_align.max(1);
        let mut frames = usize::MAX;
        if generator {
            // No inbound pacing: a generator fills whatever the sinks
            // accept, one period at a time.
            let period_frames = sinks[0]
                .format()
                .map(|f| self.period_bytes / f.frame_bytes())
                .unwrap_or(0);
            for sink in sinks.iter() {
                frames = frames.min(sink.free_frames());
            }
            frames = frames.min(period_frames);
            frames = (frames / align) * align;
        } else {
            for src in sources.iter() {
                for sink in sinks.iter() {
                    frames = frames.min(avail_frames_aligned(src, sink, align));
                }
            }
        }
        if frames == 0 || frames == usize::MAX {
            return Ok(CopyOutcome::PathStop);
        }

        let frame_bytes = sinks[0].format().map(|f| f.frame_bytes()).unwrap_or(0);
        for src in sources.iter() {
            src.invalidate_readable(frames * frame_bytes);
        }

        let processed = {
            let mut module = self.module.lock();
            module.process_audio_stream(sources, sinks, frames)
        };

        match processed {
            Ok(done) => {
                let bytes = done * frame_bytes;
                for src in sources.iter_mut() {
                    src.consume(bytes)?;
                }
                for sink in sinks.iter_mut() {
                    sink.produce(bytes)?;
                }
                self.bytes_processed += bytes as u64;
                Ok(CopyOutcome::Processed { bytes })
            }
            Err(e) if e.is_flow_control() => Ok(CopyOutcome::PathStop),
            Err(e) => Err(e),
        }
    }

    fn copy_raw_data(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<CopyOutcome> {
        // Warm-up: hide the module's window latency by feeding silence
        // downstream without consuming input.
        if self.deep_buff_bytes > 0 {
            let inbound = sources.iter().map(|b| b.available()).min().unwrap_or(0);
            if inbound > self.deep_buff_bytes {
                self.deep_buff_bytes = 0;
            } else {
                let mut emitted = 0;
                for sink in sinks.iter_mut() {
                    emitted += fill_silence(sink, self.period_bytes);
                }
                return Ok(CopyOutcome::Processed { bytes: emitted });
            }
        }

        // Stage ring data into the input scratch, up to the module's
        // window.
        for (i, src) in sources.iter_mut().enumerate() {
            let fill = self.input_fill[i];
            let room = self.input_scratch[i].len() - fill;
            let n = read_into(src, &mut self.input_scratch[i][fill..fill + room]);
            self.input_fill[i] += n;
        }

        let status = {
            let mut inputs: FixedVec<&[u8], MAX_ATTACHMENTS> = FixedVec::new();
            for (i, scratch) in self.input_scratch.iter().enumerate() {
                let _ = inputs.push(&scratch[..self.input_fill[i]]);
            }
            let mut outputs: FixedVec<&mut [u8], MAX_ATTACHMENTS> = FixedVec::new();
            for scratch in self.output_scratch.iter_mut() {
                let _ = outputs.push(scratch.as_mut_slice());
            }

            let mut module = self.module.lock();
            module.process_raw_data(inputs.as_slice(), outputs.as_mut_slice())
        };

        let status = match status {
            Ok(s) => s,
            Err(e) if e.is_flow_control() => return Ok(CopyOutcome::PathStop),
            Err(e) => return Err(e),
        };

        // Retire consumed input bytes.
        for i in 0..self.input_scratch.len() {
            let consumed = status.consumed.min(self.input_fill[i]);
            self.input_scratch[i].copy_within(consumed..self.input_fill[i], 0);
            self.input_fill[i] -= consumed;
        }

        // Produced bytes go through the staging ring to absorb jitter,
        // then downstream at period cadence.
        let mut moved = 0;
        for (i, sink) in sinks.iter_mut().enumerate() {
            if status.produced > 0 {
                let chunk = &self.output_scratch[i][..status.produced.min(self.output_scratch[i].len())];
                apx_stream::write_from(&mut self.sink_staging[i], chunk);
            }
            moved += copy_with_wrap(&mut self.sink_staging[i], sink, self.period_bytes);
        }

        self.bytes_processed += moved as u64;
        if moved == 0 && status.produced == 0 {
            return Ok(CopyOutcome::PathStop);
        }
        Ok(CopyOutcome::Processed { bytes: moved })
    }

    fn copy_sink_source_ll(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
    ) -> Result<CopyOutcome> {
        let processed = {
            let mut module = self.module.lock();
            module.process_sink_source(sources, sinks)
        };
        match processed {
            Ok(bytes) => {
                self.bytes_processed += bytes as u64;
                Ok(CopyOutcome::Processed { bytes })
            }
            Err(e) if e.is_flow_control() => Ok(CopyOutcome::PathStop),
            Err(e) => Err(e),
        }
    }

    /// The LL half of a deferred module: no DSP, only queue shuttling in
    /// both directions.
    fn shuttle_dp(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> CopyOutcome {
        let mut moved = 0;

        for (i, src) in sources.iter_mut().enumerate() {
            if let Some(q) = self.dp_in.get_mut(i) {
                moved += copy_all_available(src, q.sink());
                q.commit(self.period_bytes);
            }
        }
        for (i, sink) in sinks.iter_mut().enumerate() {
            if let Some(q) = self.dp_out.get_mut(i) {
                if let Some(slot) = q.source() {
                    moved += copy_all_available(slot, sink);
                    if slot.available() == 0 {
                        q.release();
                    }
                }
            }
        }

        self.bytes_processed += moved as u64;
        CopyOutcome::Processed { bytes: moved }
    }

    /// The deferred work unit built during prepare; the scheduler takes
    /// it when the pipeline starts.
    pub fn take_dp_task(&mut self) -> Option<DpTask> {
        self.pending_dp_task.take()
    }

    /// Releases per-prepare resources; the component returns to READY.
    pub fn reset(&mut self) {
        self.module.lock().reset();
        self.period_bytes = 0;
        self.dp_period_us = 0;
        self.deep_buff_bytes = 0;
        self.input_scratch.clear();
        self.input_fill.clear();
        self.output_scratch.clear();
        self.sink_staging.clear();
        self.dp_in.clear();
        self.dp_out.clear();
        self.pending_dp_task = None;
        self.bytes_processed = 0;
    }
}

/// Number of periods the deep-buffer staging must cover.
///
/// With `r` the ratio between the module's input window and the pipeline
/// period (whichever direction exceeds one): `ceil(r)`, plus one extra
/// period when the ratio is fractional, so a misaligned window never
/// starves mid-burst.
fn deep_buff_periods(in_buff: usize, period: usize) -> usize {
    let (a, b) = if in_buff >= period { (in_buff, period) } else { (period, in_buff) };
    if b == 0 {
        return 1;
    }
    let q = a / b;
    let rem = a % b;
    if rem != 0 { q + 2 } else { q.max(1) }
}
