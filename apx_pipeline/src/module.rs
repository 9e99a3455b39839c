//! Plug-in processing module interface.
//!
//! A module is the algorithm a component hosts: gain, mixing, sample-rate
//! conversion, tone generation. The adapter owns the graph side (buffers,
//! lifecycle, scheduling); the module owns nothing but its own state and
//! one of three processing shapes selected by [`ModuleMode`]. Exactly one
//! `process_*` method is ever invoked on a given module, the one matching
//! its descriptor; the defaults fail loudly so a wrongly tagged module is
//! caught in the first tick.

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::AudioBuffer;

use crate::state::Trigger;

/// Which processing shape the adapter bridges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleMode {
    /// Module reads and writes the attached ring buffers directly,
    /// frame-at-a-time, under the adapter's accounting.
    AudioStream,
    /// Module works on linear scratch buffers; the adapter stages ring
    /// data in and out and absorbs jitter with intermediate buffers.
    RawData,
    /// Module drives the source/sink endpoint API itself; the adapter
    /// only records byte counts (and shuttles via DP queues when the
    /// module runs deferred).
    SinkSource,
}

/// Scheduling domain of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleDomain {
    /// Runs inside the LL tick, must never block.
    Ll,
    /// Runs on the deferred pool, may wait on its queue endpoints.
    Dp,
}

/// Static capabilities and sizing hints a module declares at creation.
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub mode: ModuleMode,
    pub domain: ModuleDomain,
    /// Most source attachments the hosting component accepts.
    pub max_sources: usize,
    /// Most sink attachments the hosting component accepts.
    pub max_sinks: usize,
    /// Bytes the module wants per processing call; 0 lets the adapter
    /// derive it from the pipeline period.
    pub period_bytes: usize,
    /// Input window (raw-data modules): bytes that must accumulate before
    /// the first real output; drives deep-buffer warm-up.
    pub in_buff_bytes: usize,
    /// Output bytes produced per full window (raw-data modules).
    pub out_buff_bytes: usize,
    /// Module cannot pause; a PAUSE trigger leaves it ACTIVE and the
    /// scheduler sees PATH_STOP for that pass.
    pub no_pause: bool,
    /// Frame alignment mandated on stream transfers (1 for scalar code,
    /// larger for SIMD kernels).
    pub frame_align: usize,
}

impl Default for ModuleDescriptor {
    fn default() -> Self {
        Self {
            mode: ModuleMode::AudioStream,
            domain: ModuleDomain::Ll,
            max_sources: 1,
            max_sinks: 1,
            period_bytes: 0,
            in_buff_bytes: 0,
            out_buff_bytes: 0,
            no_pause: false,
            frame_align: 1,
        }
    }
}

/// Byte movement reported by a raw-data processing call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStatus {
    /// Bytes consumed from each input scratch.
    pub consumed: usize,
    /// Bytes produced into each output scratch.
    pub produced: usize,
}

/// Result of one component copy pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Pass completed; `bytes` moved through the component.
    Processed { bytes: usize },
    /// Flow control (or `no_pause` refusal): stop walking this pipeline
    /// for the current tick, no error.
    PathStop,
}

/// The processing module contract.
///
/// Methods other than the `process_*` family run outside the real-time
/// path and may allocate.
pub trait ProcessingModule: Send {
    /// Static shape and sizing of this module.
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Verifies and adopts stream parameters.
    fn set_params(&mut self, format: &SampleFormat) -> Result<()>;

    /// Allocates per-stream state; called once per prepare.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Lifecycle notification; modules rarely care.
    fn trigger(&mut self, _cmd: Trigger) -> Result<()> {
        Ok(())
    }

    /// Returns the module to its post-`set_params` state.
    fn reset(&mut self);

    /// One pass over directly attached stream buffers
    /// ([`ModuleMode::AudioStream`] only). `frames` is already clamped
    /// and aligned by the adapter; the module must consume and produce
    /// exactly that many frames.
    fn process_audio_stream(
        &mut self,
        _sources: &mut [&mut AudioBuffer],
        _sinks: &mut [&mut AudioBuffer],
        _frames: usize,
    ) -> Result<usize> {
        Err(ApxError::BadState)
    }

    /// One pass over linear scratch data ([`ModuleMode::RawData`] only).
    fn process_raw_data(&mut self, _inputs: &[&[u8]], _outputs: &mut [&mut [u8]]) -> Result<RawStatus> {
        Err(ApxError::BadState)
    }

    /// One pass driving the endpoint API directly
    /// ([`ModuleMode::SinkSource`] only). Returns bytes processed for
    /// diagnostics.
    fn process_sink_source(&mut self, _sources: &mut [&mut AudioBuffer], _sinks: &mut [&mut AudioBuffer]) -> Result<usize> {
        Err(ApxError::BadState)
    }

    /// Applies an opaque configuration blob (reassembled by IPC).
    fn set_config(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Reads the module's configuration blob.
    fn get_config(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(ModuleDescriptor);

    impl ProcessingModule for Tagged {
        fn descriptor(&self) -> &ModuleDescriptor {
            &self.0
        }
        fn set_params(&mut self, _format: &SampleFormat) -> Result<()> {
            Ok(())
        }
        fn reset(&mut self) {}
    }

    #[test]
    fn test_unimplemented_shapes_fail_loudly() {
        let mut m = Tagged(ModuleDescriptor::default());
        assert_eq!(m.process_raw_data(&[], &mut []), Err(ApxError::BadState));
        assert_eq!(m.process_sink_source(&mut [], &mut []), Err(ApxError::BadState));
        assert_eq!(m.process_audio_stream(&mut [], &mut [], 0), Err(ApxError::BadState));
    }
}
