//! Tone generator module.

use core::f64::consts::TAU;

use apx_core::{ApxError, Result, SampleFormat};
use apx_stream::AudioBuffer;
use apx_pipeline::{ModuleDescriptor, ProcessingModule};

use crate::dsp::store_sample;

/// Sine generator writing identical samples to every channel.
///
/// A source-less audio-stream module: the adapter paces it from the sink
/// side, one period per tick. Frequency and amplitude arrive as an
/// 8-byte configuration blob (`freq_hz: u32, amp_q16: u32`, both LE).
pub struct ToneModule {
    desc: ModuleDescriptor,
    freq_hz: f64,
    /// Amplitude as a fraction of full scale, Q16.16.
    amp_q16: u32,
    phase: f64,
    format: Option<SampleFormat>,
}

impl ToneModule {
    pub fn new(freq_hz: u32, amp_q16: u32) -> Self {
        Self {
            desc: ModuleDescriptor {
                max_sources: 0,
                ..ModuleDescriptor::default()
            },
            freq_hz: freq_hz as f64,
            amp_q16,
            phase: 0.0,
            format: None,
        }
    }
}

impl ProcessingModule for ToneModule {
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

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn process_audio_stream(
        &mut self,
        _sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        frames: usize,
    ) -> Result<usize> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let container = format.container_bytes as usize;
        let channels = format.channels as usize;
        let step = TAU * self.freq_hz / format.rate as f64;
        let full_scale = match container {
            2 => i16::MAX as f64,
            _ => i32::MAX as f64,
        };
        let amp = self.amp_q16 as f64 / 65536.0;

        let sink = sinks.first_mut().ok_or(ApxError::NoSpace)?;
        let mut remaining = frames;
        let (head, tail) = sink.writable();
        for seg in [head, tail] {
            let seg_frames = seg.len() / (container * channels);
            let n = remaining.min(seg_frames);
            for i in 0..n {
                let value = (self.phase.sin() * amp * full_scale) as i64;
                self.phase = (self.phase + step) % TAU;
                for ch in 0..channels {
                    store_sample(seg, (i * channels + ch) * container, container, value);
                }
            }
            remaining -= n;
            if remaining == 0 {
                break;
            }
        }
        Ok(frames - remaining)
    }

    fn set_config(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 {
            return Err(ApxError::InvalidParameter);
        }
        self.freq_hz = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as f64;
        self.amp_q16 = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        Ok(())
    }

    fn get_config(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&(self.freq_hz as u32).to_le_bytes());
        out.extend_from_slice(&self.amp_q16.to_le_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use apx_stream::{BufferId, read_into};

    use super::*;

    #[test]
    fn test_tone_fills_requested_frames() {
        let fmt = SampleFormat::s32_48k_stereo();
        let mut tone = ToneModule::new(1_000, 1 << 16);
        tone.set_params(&fmt).unwrap();

        let mut sink = AudioBuffer::alloc_coherent(BufferId(1), 4096);
        sink.set_format(fmt).unwrap();

        let mut sinks = [&mut sink];
        let produced = tone.process_audio_stream(&mut [], &mut sinks, 48).unwrap();
        assert_eq!(produced, 48);
        sink.produce(48 * 8).unwrap();

        let mut out = vec![0u8; 48 * 8];
        read_into(&mut sink, &mut out);
        let samples: Vec<i32> = out
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        // Both channels carry the same value per frame.
        for frame in samples.chunks_exact(2) {
            assert_eq!(frame[0], frame[1]);
        }
        // A 1 kHz tone at 48 kHz crosses well inside 48 frames.
        assert!(samples.iter().any(|&s| s > 0));
        assert!(samples.iter().any(|&s| s < 0));
    }

    #[test]
    fn test_reset_restarts_phase() {
        let fmt = SampleFormat::s32_48k_stereo();
        let mut tone = ToneModule::new(997, 1 << 15);
        tone.set_params(&fmt).unwrap();

        let render = |tone: &mut ToneModule| {
            let mut sink = AudioBuffer::alloc_coherent(BufferId(1), 1024);
            sink.set_format(fmt).unwrap();
            let mut sinks = [&mut sink];
            tone.process_audio_stream(&mut [], &mut sinks, 16).unwrap();
            sink.produce(16 * 8).unwrap();
            let mut out = vec![0u8; 16 * 8];
            read_into(&mut sink, &mut out);
            out
        };

        let first = render(&mut tone);
        tone.reset();
        let second = render(&mut tone);
        assert_eq!(first, second);
    }
}
