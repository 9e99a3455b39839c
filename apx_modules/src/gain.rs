//! Gain module: fixed-point level scaling.

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::AudioBuffer;
use apx_pipeline::{ModuleDescriptor, ProcessingModule, Trigger};

use crate::dsp::{self, Q16_UNITY};

/// Scales every sample by a Q16.16 gain.
///
/// Supports 16-bit and 32-bit containers; the configuration blob is the
/// little-endian Q16.16 gain word, live-updatable while active.
pub struct GainModule {
    desc: ModuleDescriptor,
    gain_q16: i64,
    format: Option<SampleFormat>,
}

impl GainModule {
    pub fn new(gain_q16: i64) -> Self {
        Self {
            desc: ModuleDescriptor::default(),
            gain_q16,
            format: None,
        }
    }

    /// Unity gain.
    pub fn unity() -> Self {
        Self::new(Q16_UNITY)
    }

    #[inline]
    pub fn gain_q16(&self) -> i64 {
        self.gain_q16
    }
}

impl ProcessingModule for GainModule {
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

    fn trigger(&mut self, _cmd: Trigger) -> Result<()> {
        Ok(())
    }

    fn process_audio_stream(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        frames: usize,
    ) -> Result<usize> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let bytes = frames * format.frame_bytes();
        let container = format.container_bytes as usize;
        let gain = self.gain_q16;

        let src = sources.first().ok_or(ApxError::NoData)?;
        let sink = sinks.first_mut().ok_or(ApxError::NoSpace)?;
        dsp::map_samples(src, sink, bytes, container, |s| (s * gain) >> 16);
        Ok(frames)
    }

    fn set_config(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 4 {
            return Err(ApxError::InvalidParameter);
        }
        self.gain_q16 = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64;
        Ok(())
    }

    fn get_config(&self) -> Result<Vec<u8>> {
        Ok((self.gain_q16 as u32).to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use apx_stream::{BufferId, read_into, write_from};

    use super::*;

    fn fmt() -> SampleFormat {
        SampleFormat::s32_48k_stereo()
    }

    #[test]
    fn test_half_gain() {
        let mut gain = GainModule::new(Q16_UNITY / 2);
        gain.set_params(&fmt()).unwrap();

        let mut src = AudioBuffer::alloc_coherent(BufferId(1), 64);
        let mut dst = AudioBuffer::alloc_coherent(BufferId(2), 64);
        src.set_format(fmt()).unwrap();
        dst.set_format(fmt()).unwrap();

        let samples: Vec<u8> = [1000i32, -1000].iter().flat_map(|v| v.to_le_bytes()).collect();
        write_from(&mut src, &samples);

        let mut sources = [&mut src];
        let mut sinks = [&mut dst];
        assert_eq!(gain.process_audio_stream(&mut sources, &mut sinks, 1).unwrap(), 1);
        dst.produce(8).unwrap();

        let mut out = [0u8; 8];
        read_into(&mut dst, &mut out);
        assert_eq!(i32::from_le_bytes(out[0..4].try_into().unwrap()), 500);
        assert_eq!(i32::from_le_bytes(out[4..8].try_into().unwrap()), -500);
    }

    #[test]
    fn test_config_roundtrip() {
        let mut gain = GainModule::unity();
        gain.set_config(&(Q16_UNITY as u32 * 2).to_le_bytes()).unwrap();
        assert_eq!(gain.gain_q16(), 2 * Q16_UNITY);
        assert_eq!(gain.get_config().unwrap(), (2 * Q16_UNITY as u32).to_le_bytes().to_vec());
    }

    #[test]
    fn test_rejects_24bit_packed_container() {
        let mut gain = GainModule::unity();
        let mut f = fmt();
        f.container_bytes = 3;
        f.valid_bits = 24;
        assert_eq!(gain.set_params(&f), Err(ApxError::UnsupportedFormat));
    }
}
