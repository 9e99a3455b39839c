//! Biquad EQ module.

use apx_core::{ApxError, Result, SampleFormat, MAX_CHANNELS};
use apx_stream::AudioBuffer;
use apx_pipeline::{ModuleDescriptor, ProcessingModule};

use crate::dsp::{load_sample, store_sample};

/// Per-channel direct-form-1 biquad state.
#[derive(Debug, Default, Clone, Copy)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

/// Single-band parametric EQ over 32-bit samples.
///
/// Coefficients are normalised (`a0 == 1`) and arrive as five LE `f32`
/// values `[b0, b1, b2, a1, a2]`; the default is pass-through.
pub struct EqModule {
    desc: ModuleDescriptor,
    coeffs: [f64; 5],
    state: [BiquadState; MAX_CHANNELS as usize],
    format: Option<SampleFormat>,
}

impl EqModule {
    pub fn new() -> Self {
        Self {
            desc: ModuleDescriptor::default(),
            coeffs: [1.0, 0.0, 0.0, 0.0, 0.0],
            state: [BiquadState::default(); MAX_CHANNELS as usize],
            format: None,
        }
    }
}

impl Default for EqModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingModule for EqModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        if format.container_bytes != 4 {
            return Err(ApxError::UnsupportedFormat);
        }
        self.format = Some(*format);
        Ok(())
    }

    fn reset(&mut self) {
        self.state = [BiquadState::default(); MAX_CHANNELS as usize];
    }

    fn process_audio_stream(
        &mut self,
        sources: &mut [&mut AudioBuffer],
        sinks: &mut [&mut AudioBuffer],
        frames: usize,
    ) -> Result<usize> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let channels = format.channels as usize;
        let container = format.container_bytes as usize;
        let [b0, b1, b2, a1, a2] = self.coeffs;

        let src = sources.first().ok_or(ApxError::NoData)?;
        let sink = sinks.first_mut().ok_or(ApxError::NoSpace)?;

        // Segment walk: frames never straddle a wrap, so channel phase
        // is tracked by a running sample index.
        let (src_head, src_tail) = src.readable();
        let mut src_segs = [src_head, src_tail];
        let mut si = 0;
        let mut sample_idx = 0usize;
        let total_samples = frames * channels;

        let (dst_head, dst_tail) = sink.writable();
        'outer: for dst_seg in [dst_head, dst_tail] {
            let mut at = 0;
            while at < dst_seg.len() && sample_idx < total_samples {
                if si >= src_segs.len() {
                    break 'outer;
                }
                let seg = src_segs[si];
                if seg.is_empty() {
                    si += 1;
                    continue;
                }
                let ch = sample_idx % channels;
                let st = &mut self.state[ch];
                let x = load_sample(seg, 0, container) as f64;
                let y = b0 * x + b1 * st.x1 + b2 * st.x2 - a1 * st.y1 - a2 * st.y2;
                st.x2 = st.x1;
                st.x1 = x;
                st.y2 = st.y1;
                st.y1 = y;
                store_sample(dst_seg, at, container, y as i64);

                src_segs[si] = &seg[container..];
                at += container;
                sample_idx += 1;
            }
            if sample_idx >= total_samples {
                break;
            }
        }
        Ok(frames)
    }

    fn set_config(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 20 {
            return Err(ApxError::InvalidParameter);
        }
        for (i, chunk) in data[..20].chunks_exact(4).enumerate() {
            self.coeffs[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
        }
        Ok(())
    }

    fn get_config(&self) -> Result<Vec<u8>> {
        Ok(self
            .coeffs
            .iter()
            .flat_map(|c| (*c as f32).to_le_bytes())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use apx_stream::{BufferId, read_into, write_from};

    use super::*;

    fn fmt() -> SampleFormat {
        SampleFormat::s32_48k_stereo()
    }

    fn run_frames(eq: &mut EqModule, values: &[i32]) -> Vec<i32> {
        let mut src = AudioBuffer::alloc_coherent(BufferId(1), 1024);
        let mut dst = AudioBuffer::alloc_coherent(BufferId(2), 1024);
        src.set_format(fmt()).unwrap();
        dst.set_format(fmt()).unwrap();

        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        write_from(&mut src, &bytes);
        let frames = values.len() / 2;

        let mut sources = [&mut src];
        let mut sinks = [&mut dst];
        eq.process_audio_stream(&mut sources, &mut sinks, frames).unwrap();
        dst.produce(frames * 8).unwrap();

        let mut out = vec![0u8; values.len() * 4];
        read_into(&mut dst, &mut out);
        out.chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_default_coefficients_pass_through() {
        let mut eq = EqModule::new();
        eq.set_params(&fmt()).unwrap();
        let input = vec![100, -100, 2000, -2000, 30000, -30000];
        assert_eq!(run_frames(&mut eq, &input), input);
    }

    #[test]
    fn test_gain_only_coefficients_scale() {
        let mut eq = EqModule::new();
        eq.set_params(&fmt()).unwrap();
        let coeffs: Vec<u8> = [0.5f32, 0.0, 0.0, 0.0, 0.0]
            .iter()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        eq.set_config(&coeffs).unwrap();

        assert_eq!(run_frames(&mut eq, &[1000, -1000]), vec![500, -500]);
    }

    #[test]
    fn test_reset_clears_filter_state() {
        let mut eq = EqModule::new();
        eq.set_params(&fmt()).unwrap();
        // One-pole lowpass-ish coefficients with memory.
        let coeffs: Vec<u8> = [0.5f32, 0.0, 0.0, -0.5, 0.0]
            .iter()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        eq.set_config(&coeffs).unwrap();

        let first = run_frames(&mut eq, &[10000, 10000, 10000, 10000]);
        eq.reset();
        let second = run_frames(&mut eq, &[10000, 10000, 10000, 10000]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_16bit() {
        let mut eq = EqModule::new();
        assert_eq!(eq.set_params(&SampleFormat::s16_48k_stereo()), Err(ApxError::UnsupportedFormat));
    }
}
