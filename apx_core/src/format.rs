//! Stream parameter types and frame arithmetic.
//!
//! A [`SampleFormat`] travels with every audio buffer and describes the
//! wire layout of the samples inside it: rate, channel count, container
//! width, valid bits, and numeric type. All byte/frame conversions in the
//! runtime go through this module so that frame alignment is computed in
//! exactly one place.

use core::fmt;

use crate::error::{ApxError, Result};

/// Maximum number of channels a single stream may carry.
pub const MAX_CHANNELS: u32 = 8;

/// Largest supported sample container, in bytes.
pub const MAX_CONTAINER_BYTES: u32 = 4;

/// Largest possible frame: all channels at the widest container.
///
/// Buffer capacities are rounded up to a multiple of this so any format
/// can be applied to an already-allocated buffer.
pub const MAX_FRAME_BYTES: usize = (MAX_CHANNELS * MAX_CONTAINER_BYTES) as usize;

/// Numeric interpretation of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// Two's-complement signed integer (S16_LE, S24_4LE, S32_LE).
    SignedInt,
    /// Unsigned integer.
    UnsignedInt,
    /// IEEE-754 float.
    Float,
}

/// Stream parameters attached to an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    /// Sample rate in Hz.
    pub rate: u32,
    /// Number of interleaved channels.
    pub channels: u32,
    /// Bytes occupied by one sample container (2, 3 or 4).
    pub container_bytes: u32,
    /// Significant bits within the container (e.g. 24 in a 32-bit word).
    pub valid_bits: u32,
    /// Numeric type of each sample.
    pub sample_type: SampleType,
}

impl SampleFormat {
    /// Canonical 48 kHz stereo 32-bit layout used by most host pipelines.
    pub const fn s32_48k_stereo() -> Self {
        Self {
            rate: 48_000,
            channels: 2,
            container_bytes: 4,
            valid_bits: 32,
            sample_type: SampleType::SignedInt,
        }
    }

    /// 48 kHz stereo 16-bit layout.
    pub const fn s16_48k_stereo() -> Self {
        Self {
            rate: 48_000,
            channels: 2,
            container_bytes: 2,
            valid_bits: 16,
            sample_type: SampleType::SignedInt,
        }
    }

    /// Bytes occupied by one frame (all channels of one sample instant).
    #[inline]
    pub const fn frame_bytes(&self) -> usize {
        (self.channels * self.container_bytes) as usize
    }

    /// Bytes produced or consumed over `period_us` microseconds of audio.
    ///
    /// Rounded down to whole frames; a 1 ms period at 48 kHz stereo/32-bit
    /// yields 48 frames = 384 bytes.
    #[inline]
    pub const fn period_bytes(&self, period_us: u64) -> usize {
        let frames = (self.rate as u64 * period_us) / 1_000_000;
        frames as usize * self.frame_bytes()
    }

    /// Validates the format against the platform limits.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 || self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ApxError::InvalidParameter);
        }
        if !matches!(self.container_bytes, 2 | 3 | 4) {
            return Err(ApxError::InvalidParameter);
        }
        if self.valid_bits == 0 || self.valid_bits > self.container_bytes * 8 {
            return Err(ApxError::InvalidParameter);
        }
        Ok(())
    }

    /// Returns `true` when `other` can be streamed into a buffer carrying
    /// `self` without a converter stage: same rate, channels and container.
    #[inline]
    pub fn is_compatible(&self, other: &SampleFormat) -> bool {
        self.rate == other.rate && self.channels == other.channels && self.container_bytes == other.container_bytes
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}-in-{}bit",
            self.rate,
            self.channels,
            self.valid_bits,
            self.container_bytes * 8
        )
    }
}
