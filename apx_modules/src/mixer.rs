//! Mixing modules.
//!
//! `MixoutModule` is the summing node: a sink-source module that drains
//! up to one period from every attached source, accumulates with
//! per-mixer gain, and produces the sum. Sources that have nothing
//! buffered this tick contribute silence and are not waited for, so one
//! live input keeps playing while another pipeline is still being
//! prepared.
//!
//! `MixinModule` is the feeder half: a plain 1:1 pass-through that
//! bridges a pipeline's processed stream into the shared buffer a mixout
//! in another pipeline consumes.

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::AudioBuffer;
use apx_pipeline::{ModuleDescriptor, ModuleMode, ProcessingModule};

use crate::dsp::{self, Q16_UNITY};

/// Summing mixer (sink-source shape, fan-in).
pub struct MixoutModule {
    desc: ModuleDescriptor,
    gain_q16: i64,
    format: Option<SampleFormat>,
}

impl MixoutModule {
    pub fn new(max_sources: usize) -> Self {
        Self {
            desc: ModuleDescriptor {
                mode: ModuleMode::SinkSource,
                max_sources,
                ..ModuleDescriptor::default()
            },
            gain_q16: Q16_UNITY,
            format: None,
        }
    }

    /// Sets the mixing coefficient applied to every input.
    pub fn with_gain(mut self, gain_q16: i64) -> Self {
        self.gain_q16 = gain_q16;
        self
    }
}

impl ProcessingModule for MixoutModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        if !matches!(format.container_bytes, 2 | 4) {
            return Err(ApxError::UnsupportedFormat);
        }
        self.format = Some(*format);
        Ok(())
    }

    fn reset(&mut self) {}

    fn process_sink_source(&mut self, sources: &mut [&mut AudioBuffer], sinks: &mut [&mut AudioBuffer]) -> Result<usize> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let frame_bytes = format.frame_bytes();
        let container = format.container_bytes as usize;

        let sink = sinks.first_mut().ok_or(ApxError::NoSpace)?;
        if sink.free() == 0 {
            return Err(ApxError::NoSpace);
        }

        // The loudest-buffered input paces the mix; empty inputs are
        // silence, not a reason to stall.
        let in_frames = sources.iter().map(|s| s.available_frames()).max().unwrap_or(0);
        let frames = in_frames.min(sink.free() / frame_bytes);
        if frames == 0 {
            return Err(ApxError::NoData);
        }
        let bytes = frames * frame_bytes;

        dsp::zero_writable(sink, bytes);
        for src in sources.iter_mut() {
            let take = src.available().min(bytes);
            if take == 0 {
                continue;
            }
            src.invalidate_readable(take);
            dsp::mix_into(src, sink, take, container, self.gain_q16);
            src.consume(take)?;
        }
        sink.produce(bytes)?;
        Ok(bytes)
    }
}

/// Pass-through feeder into a shared mix buffer (1:1 audio-stream shape).
pub struct MixinModule {
    desc: ModuleDescriptor,
    format: Option<SampleFormat>,
}

impl MixinModule {
    pub fn new() -> Self {
        Self {
            desc: ModuleDescriptor::default(),
            format: None,
        }
    }
}

impl Default for MixinModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingModule for MixinModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        if !matches!(format.container_bytes, 2 | 4) {
            return Err(ApxError::UnsupportedFormat);
        }
        self.format = Some(*format);
        Ok(())
    }

    fn reset(&mut self) {}

    fn process_audio_stream(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        frames: usize,
    ) -> Result<usize> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let bytes = frames * format.frame_bytes();
        let container = format.container_bytes as usize;

        let src = sources.first().ok_or(ApxError::NoData)?;
        let sink = sinks.first_mut().ok_or(ApxError::NoSpace)?;
        dsp::map_samples(src, sink, bytes, container, |s| s);
        Ok(frames)
    }
}
