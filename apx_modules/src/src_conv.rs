//! Sample-rate converter module (raw-data shape).
//!
//! A windowed converter: it waits until a full input window has been
//! staged, then converts whole windows at the configured frame ratio by
//! nearest-neighbour selection. The adapter's deep-buffer warm-up hides
//! the window latency from the link by emitting silence until the first
//! window can be processed.

use apx_core::{ApxError, Result, SampleFormat};
use apx_pipeline::{ModuleDescriptor, ModuleMode, ProcessingModule, RawStatus};

/// Integer-ratio sample-rate converter.
pub struct SrcModule {
    desc: ModuleDescriptor,
    /// Output frames per `ratio_den` input frames.
    ratio_num: u32,
    ratio_den: u32,
    window_bytes: usize,
    format: Option<SampleFormat>,
}

impl SrcModule {
    /// `window_bytes` is the input the converter needs per call;
    /// `ratio_num / ratio_den` the output/input frame ratio.
    pub fn new(window_bytes: usize, ratio_num: u32, ratio_den: u32) -> Self {
        let out_window = window_bytes * ratio_num as usize / ratio_den.max(1) as usize;
        Self {
            desc: ModuleDescriptor {
                mode: ModuleMode::RawData,
                in_buff_bytes: window_bytes,
                out_buff_bytes: out_window,
                ..ModuleDescriptor::default()
            },
            ratio_num: ratio_num.max(1),
            ratio_den: ratio_den.max(1),
            window_bytes,
            format: None,
        }
    }
}

impl ProcessingModule for SrcModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.desc
    }

    fn set_params(&mut self, format: &SampleFormat) -> Result<()> {
        if self.window_bytes % format.frame_bytes() != 0 {
            return Err(ApxError::InvalidParameter);
        }
        self.format = Some(*format);
        Ok(())
    }

    fn reset(&mut self) {}

    fn process_raw_data(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]]) -> Result<RawStatus> {
        let format = self.format.ok_or(ApxError::InvalidParameter)?;
        let frame_bytes = format.frame_bytes();
        let input = inputs.first().ok_or(ApxError::NoData)?;
        let output = outputs.first_mut().ok_or(ApxError::NoSpace)?;

        // Whole windows only; a short stage is not an error, just not
        // ready yet.
        let windows = input.len() / self.window_bytes;
        if windows == 0 {
            return Ok(RawStatus::default());
        }

        let in_frames_per_window = self.window_bytes / frame_bytes;
        let out_frames_per_window = in_frames_per_window * self.ratio_num as usize / self.ratio_den as usize;
        let out_window_bytes = out_frames_per_window * frame_bytes;

        let doable = windows.min(output.len() / out_window_bytes.max(1));
        if doable == 0 {
            return Err(ApxError::NoSpace);
        }

        for w in 0..doable {
            let in_base = w * self.window_bytes;
            let out_base = w * out_window_bytes;
            for j in 0..out_frames_per_window {
                // Nearest input frame for output position j.
                let src_frame = j * self.ratio_den as usize / self.ratio_num as usize;
                let src_at = in_base + src_frame * frame_bytes;
                let dst_at = out_base + j * frame_bytes;
                output[dst_at..dst_at + frame_bytes].copy_from_slice(&input[src_at..src_at + frame_bytes]);
            }
        }

        Ok(RawStatus {
            consumed: doable * self.window_bytes,
            produced: doable * out_window_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> SampleFormat {
        SampleFormat::s32_48k_stereo()
    }

    fn frames(values: &[i32]) -> Vec<u8> {
        // Mono-ish helper: each i32 repeated for both channels.
        values
            .iter()
            .flat_map(|v| {
                let b = v.to_le_bytes();
                [b, b]
            })
            .flatten()
            .collect()
    }

    #[test]
    fn test_short_stage_is_not_ready() {
        let mut src = SrcModule::new(4 * 8, 1, 1);
        src.set_params(&fmt()).unwrap();

        let input = frames(&[1, 2]); // 2 frames < 4-frame window
        let mut out = vec![0u8; 256];
        let mut outputs = [out.as_mut_slice()];
        let status = src.process_raw_data(&[&input], &mut outputs).unwrap();
        assert_eq!(status, RawStatus::default());
    }

    #[test]
    fn test_unity_ratio_passthrough() {
        let mut src = SrcModule::new(4 * 8, 1, 1);
        src.set_params(&fmt()).unwrap();

        let input = frames(&[10, 20, 30, 40]);
        let mut out = vec![0u8; 256];
        let mut outputs = [out.as_mut_slice()];
        let status = src.process_raw_data(&[&input], &mut outputs).unwrap();

        assert_eq!(status.consumed, 32);
        assert_eq!(status.produced, 32);
        assert_eq!(&out[..32], &input[..]);
    }

    #[test]
    fn test_upsample_doubles_frames() {
        let mut src = SrcModule::new(2 * 8, 2, 1);
        src.set_params(&fmt()).unwrap();

        let input = frames(&[7, 9]);
        let mut out = vec![0u8; 256];
        let mut outputs = [out.as_mut_slice()];
        let status = src.process_raw_data(&[&input], &mut outputs).unwrap();

        assert_eq!(status.consumed, 16);
        assert_eq!(status.produced, 32);
        // Nearest-neighbour: 7 7 9 9 per channel pair.
        let expect = frames(&[7, 7, 9, 9]);
        assert_eq!(&out[..32], &expect[..]);
    }

    #[test]
    fn test_downsample_halves_frames() {
        let mut src = SrcModule::new(4 * 8, 1, 2);
        src.set_params(&fmt()).unwrap();

        let input = frames(&[1, 2, 3, 4]);
        let mut out = vec![0u8; 256];
        let mut outputs = [out.as_mut_slice()];
        let status = src.process_raw_data(&[&input], &mut outputs).unwrap();

        assert_eq!(status.consumed, 32);
        assert_eq!(status.produced, 16);
        let expect = frames(&[1, 3]);
        assert_eq!(&out[..16], &expect[..]);
    }

    #[test]
    fn test_window_must_be_frame_aligned() {
        let mut src = SrcModule::new(100, 1, 1); // not a multiple of 8
        assert_eq!(src.set_params(&fmt()), Err(ApxError::InvalidParameter));
    }
}
