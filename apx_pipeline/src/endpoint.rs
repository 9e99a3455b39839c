//! HOST and DAI endpoint components.
//!
//! Endpoints sit at the edges of a pipeline and skip the module adapter
//! entirely: their `copy` is a DMA descriptor refill against a staging
//! ring that models the transfer engine (host page ring or link FIFO).
//! Hardware-facing behaviour (descriptor programming, interrupt
//! acknowledgement) belongs to platform drivers; what lives here is the
//! byte accounting both sides agree on.

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::{AudioBuffer, BufferId, copy_with_wrap, read_into, write_from};

use crate::{
    constants::{DAI_DMA_TIMEOUT_US, DAI_STARVATION_TICKS, HOST_DMA_TIMEOUT_US},
    module::CopyOutcome,
};

/// Direction of the stream through an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Host memory towards the audio interface.
    Playback,
    /// Audio interface towards host memory.
    Capture,
}

/// Host-side DMA endpoint.
///
/// The staging ring stands in for the host page ring the DMA engine
/// walks; tests and the host shim feed it with [`host_write`] /
/// [`host_read`](HostEndpoint::host_read).
pub struct HostEndpoint {
    direction: StreamDirection,
    staging: AudioBuffer,
    supported: Vec<SampleFormat>,
    format: Option<SampleFormat>,
    period_bytes: usize,
    position_frames: u64,
    drain_timeout_us: u64,
}

impl HostEndpoint {
    pub fn new(direction: StreamDirection, staging_capacity: usize, supported: Vec<SampleFormat>) -> Self {
        Self {
            direction,
            staging: AudioBuffer::alloc_coherent(BufferId(0x4800_0000), staging_capacity),
            supported,
            format: None,
            period_bytes: 0,
            position_frames: 0,
            drain_timeout_us: HOST_DMA_TIMEOUT_US,
        }
    }

    #[inline]
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    #[inline]
    pub fn format(&self) -> Option<&SampleFormat> {
        self.format.as_ref()
    }

    /// Frames moved through the endpoint since prepare.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position_frames
    }

    /// Host shim: pushes playback samples into the page ring.
    pub fn host_write(&mut self, data: &[u8]) -> usize {
        write_from(&mut self.staging, data)
    }

    /// Host shim: pulls captured samples out of the page ring.
    pub fn host_read(&mut self, out: &mut [u8]) -> usize {
        read_into(&mut self.staging, out)
    }

    /// Applies stream parameters, verifying them against the format list
    /// the topology declared for this copier.
    pub fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        format.validate()?;
        if !self.supported.is_empty() && !self.supported.iter().any(|f| f.is_compatible(format)) {
            return Err(ApxError::UnsupportedFormat);
        }
        self.staging.set_format(*format)?;
        self.format = Some(*format);
        Ok(())
    }

    pub fn prepare(&mut self, pipeline_period_us: u64) -> Result<()> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        self.period_bytes = format.period_bytes(pipeline_period_us);
        if self.period_bytes == 0 {
            return Err(ApxError::InvalidParameter);
        }
        self.position_frames = 0;
        Ok(())
    }

    /// One descriptor refill: move up to one period between the page ring
    /// and the attached graph buffer.
    pub fn copy(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<CopyOutcome> {
        let moved = match self.direction {
            StreamDirection::Playback => match sinks.first_mut() {
                Some(sink) => copy_with_wrap(&mut self.staging, sink, self.period_bytes),
                None => 0,
            },
            StreamDirection::Capture => match sources.first_mut() {
                Some(src) => copy_with_wrap(src, &mut self.staging, self.period_bytes),
                None => 0,
            },
        };

        if moved == 0 {
            return Ok(CopyOutcome::PathStop);
        }
        if let Some(f) = &self.format {
            self.position_frames += (moved / f.frame_bytes()) as u64;
        }
        Ok(CopyOutcome::Processed { bytes: moved })
    }

    /// Drains in-flight data on stop. Exceeding the timeout budget forces
    /// the stop and reports it rather than hanging.
    pub fn drain(&mut self) -> Result<()> {
        let budget = self
            .format
            .map(|f| f.period_bytes(self.drain_timeout_us))
            .unwrap_or(usize::MAX);
        if self.staging.available() > budget {
            log::warn!(
                "host endpoint drain forced: {} bytes in flight exceeds {budget}-byte budget",
                self.staging.available()
            );
            self.staging.reset();
            return Err(ApxError::Timeout);
        }
        self.staging.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.staging.silence();
        self.period_bytes = 0;
        self.position_frames = 0;
    }
}

/// Audio-interface (link) DMA endpoint.
///
/// The FIFO ring models the link DMA buffer the interface hardware
/// drains at wire rate. Starvation while active is how transient xruns
/// enter the system: after [`DAI_STARVATION_TICKS`] consecutive empty
/// refills the endpoint reports `Xrun` and the scheduler runs recovery.
pub struct DaiEndpoint {
    direction: StreamDirection,
    fifo: AudioBuffer,
    supported: Vec<SampleFormat>,
    format: Option<SampleFormat>,
    period_bytes: usize,
    position_frames: u64,
    starved_ticks: u32,
    underruns: u32,
    drain_timeout_us: u64,
}

impl DaiEndpoint {
    pub fn new(direction: StreamDirection, fifo_capacity: usize, supported: Vec<SampleFormat>) -> Self {
        Self {
            direction,
            fifo: AudioBuffer::alloc_coherent(BufferId(0x4900_0000), fifo_capacity),
            supported,
            format: None,
            period_bytes: 0,
            position_frames: 0,
            starved_ticks: 0,
            underruns: 0,
            drain_timeout_us: DAI_DMA_TIMEOUT_US,
        }
    }

    #[inline]
    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position_frames
    }

    /// Underruns recorded since prepare.
    #[inline]
    pub fn underruns(&self) -> u32 {
        self.underruns
    }

    /// Hardware shim: the wire drains playback samples from the FIFO.
    pub fn wire_read(&mut self, out: &mut [u8]) -> usize {
        read_into(&mut self.fifo, out)
    }

    /// Hardware shim: the wire delivers capture samples into the FIFO.
    pub fn wire_write(&mut self, data: &[u8]) -> usize {
        write_from(&mut self.fifo, data)
    }

    pub fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        format.validate()?;
        if !self.supported.is_empty() && !self.supported.iter().any(|f| f.is_compatible(format)) {
            return Err(ApxError::UnsupportedFormat);
        }
        self.fifo.set_format(*format)?;
        self.format = Some(*format);
        Ok(())
    }

    pub fn prepare(&mut self, pipeline_period_us: u64) -> Result<()> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        self.period_bytes = format.period_bytes(pipeline_period_us);
        if self.period_bytes == 0 {
            return Err(ApxError::InvalidParameter);
        }
        self.position_frames = 0;
        self.starved_ticks = 0;
        self.underruns = 0;
        Ok(())
    }

    /// One link DMA refill.
    ///
    /// A playback refill with an empty upstream buffer is a starved tick;
    /// repeated starvation raises `Xrun` so recovery can run. Pointers
    /// are never advanced on a starved tick.
    pub fn copy(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<CopyOutcome> {
        let moved = match self.direction {
            StreamDirection::Playback => match sources.first_mut() {
                Some(src) => copy_with_wrap(src, &mut self.fifo, self.period_bytes),
                None => 0,
            },
            StreamDirection::Capture => match sinks.first_mut() {
                Some(sink) => copy_with_wrap(&mut self.fifo, sink, self.period_bytes),
                None => 0,
            },
        };

        if moved == 0 {
            self.starved_ticks += 1;
            if self.starved_ticks >= DAI_STARVATION_TICKS {
                self.underruns += 1;
                self.starved_ticks = 0;
                log::warn!("dai endpoint starved for {DAI_STARVATION_TICKS} ticks");
                return Err(ApxError::Xrun);
            }
            return Ok(CopyOutcome::PathStop);
        }

        self.starved_ticks = 0;
        if let Some(f) = &self.format {
            self.position_frames += (moved / f.frame_bytes()) as u64;
        }
        Ok(CopyOutcome::Processed { bytes: moved })
    }

    /// Drains the link FIFO on stop, bounded by the DMA timeout budget.
    pub fn drain(&mut self) -> Result<()> {
        let budget = self
            .format
            .map(|f| f.period_bytes(self.drain_timeout_us))
            .unwrap_or(usize::MAX);
        if self.fifo.available() > budget {
            log::warn!(
                "dai drain forced: {} bytes in flight exceeds {budget}-byte budget",
                self.fifo.available()
            );
            self.fifo.reset();
            return Err(ApxError::Timeout);
        }
        self.fifo.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.fifo.silence();
        self.period_bytes = 0;
        self.position_frames = 0;
        self.starved_ticks = 0;
        self.underruns = 0;
    }
}
