//! Stream operations over circular buffers.
//!
//! Everything here is constant-time in the number of segments (a ring
//! region is at most two linear slices) and allocation-free, so the LL
//! copy pass can call it under deadline.

use apx_core::Result;

use crate::buffer::AudioBuffer;

/// Copies up to `bytes` from `src` to `dst`, honouring both rings' wraps.
///
/// The transfer is limited to `min(bytes, src.available, dst.free)` and
/// split into at most four linear copies. Cache maintenance is applied on
/// both sides (invalidate ahead of the read, writeback inside
/// [`AudioBuffer::produce`]). Returns the number of bytes moved; the
/// pointers advance by exactly that amount.
pub fn copy_with_wrap(src: &mut AudioBuffer, dst: &mut AudioBuffer, bytes: usize) -> usize {
    let n = bytes.min(src.available()).min(dst.free());
    if n == 0 {
        return 0;
    }
    src.invalidate_readable(n);

    {
        let (src_head, src_tail) = src.readable();
        let (dst_head, dst_tail) = dst.writable();

        let mut copied = 0;
        let mut src_segs = [src_head, src_tail];
        let mut dst_segs = [dst_head, dst_tail];
        let (mut si, mut di) = (0, 0);

        while copied < n {
            let src_seg = &mut src_segs[si];
            let dst_seg = &mut dst_segs[di];
            let step = (n - copied).min(src_seg.len()).min(dst_seg.len());

            let (src_now, src_rest) = src_seg.split_at(step);
            let dst_taken = core::mem::take(dst_seg);
            let (dst_now, dst_rest) = dst_taken.split_at_mut(step);
            dst_now.copy_from_slice(src_now);

            *src_seg = src_rest;
            *dst_seg = dst_rest;
            copied += step;

            if src_seg.is_empty() {
                si += 1;
            }
            if dst_seg.is_empty() {
                di += 1;
            }
        }
    }

    // Both bounded by n, so neither can fail.
    let _ = dst.produce(n);
    let _ = src.consume(n);
    n
}

/// Frames movable between `src` and `dst`, rounded down to the alignment
/// the processing module mandates.
///
/// `align_frames` is typically 1; SIMD kernels may require multi-frame
/// batches. Returns 0 when either buffer carries no format or the formats
/// disagree on frame size.
pub fn avail_frames_aligned(src: &AudioBuffer, dst: &AudioBuffer, align_frames: usize) -> usize {
    let (Some(sf), Some(df)) = (src.format(), dst.format()) else {
        return 0;
    };
    if sf.frame_bytes() != df.frame_bytes() || align_frames == 0 {
        return 0;
    }
    let frames = src.available_frames().min(dst.free_frames());
    (frames / align_frames) * align_frames
}

/// Drains up to `out.len()` bytes from `src` into a linear slice.
///
/// Used by raw-data modules filling their input scratch and by endpoint
/// drivers staging DMA descriptors. Returns bytes read.
pub fn read_into(src: &mut AudioBuffer, out: &mut [u8]) -> usize {
    let n = out.len().min(src.available());
    if n == 0 {
        return 0;
    }
    src.invalidate_readable(n);

    let (head, tail) = src.readable();
    let first = n.min(head.len());
    out[..first].copy_from_slice(&head[..first]);
    out[first..n].copy_from_slice(&tail[..n - first]);

    let _ = src.consume(n);
    n
}

/// Appends a linear slice into `dst`, up to its free space.
///
/// Returns bytes written; the mirror of [`read_into`].
pub fn write_from(dst: &mut AudioBuffer, data: &[u8]) -> usize {
    let n = data.len().min(dst.free());
    if n == 0 {
        return 0;
    }
    {
        let (head, tail) = dst.writable();
        let first = n.min(head.len());
        head[..first].copy_from_slice(&data[..first]);
        tail[..n - first].copy_from_slice(&data[first..n]);
    }
    let _ = dst.produce(n);
    n
}

/// Produces `bytes` of silence into `dst`, up to its free space.
///
/// The deep-buffer warm-up path and an underrunning DAI feed both emit
/// zeros this way. Returns bytes written.
pub fn fill_silence(dst: &mut AudioBuffer, bytes: usize) -> usize {
    let n = bytes.min(dst.free());
    if n == 0 {
        return 0;
    }
    {
        let (head, tail) = dst.writable();
        let first = n.min(head.len());
        head[..first].fill(0);
        tail[..n - first].fill(0);
    }
    let _ = dst.produce(n);
    n
}

/// Moves `min(src.available, dst.free)` bytes, the shuttle step the LL
/// pass runs against each DP queue endpoint.
pub fn copy_all_available(src: &mut AudioBuffer, dst: &mut AudioBuffer) -> usize {
    let n = src.available().min(dst.free());
    copy_with_wrap(src, dst, n)
}

/// Checked frame-count variant of [`copy_with_wrap`] for format-carrying
/// buffers; errors if the two sides disagree on frame layout.
pub fn copy_frames(src: &mut AudioBuffer, dst: &mut AudioBuffer, frames: usize) -> Result<usize> {
    let frame_bytes = match (src.format(), dst.format()) {
        (Some(sf), Some(df)) if sf.frame_bytes() == df.frame_bytes() => sf.frame_bytes(),
        _ => return Err(apx_core::ApxError::UnsupportedFormat),
    };
    Ok(copy_with_wrap(src, dst, frames * frame_bytes) / frame_bytes)
}

#[cfg(test)]
mod tests {
    use apx_core::SampleFormat;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::buffer::BufferId;

    fn buf(id: u32, capacity: usize) -> AudioBuffer {
        AudioBuffer::alloc_coherent(BufferId(id), capacity)
    }

    #[test]
    fn test_copy_is_length_exact() {
        let mut src = buf(1, 64);
        let mut dst = buf(2, 64);

        let data: Vec<u8> = (0..40u8).collect();
        assert_eq!(write_from(&mut src, &data), 40);

        // Enough data and space: copies exactly what was requested.
        assert_eq!(copy_with_wrap(&mut src, &mut dst, 40), 40);
        assert_eq!(src.available(), 0);
        assert_eq!(dst.available(), 40);

        let mut out = vec![0u8; 40];
        assert_eq!(read_into(&mut dst, &mut out), 40);
        assert_eq!(out, data);
    }

    #[test]
    fn test_copy_clamps_to_min_limit() {
        let mut src = buf(1, 64);
        let mut dst = buf(2, 64);
        let cap = dst.capacity();

        write_from(&mut src, &vec![7u8; 10]);
        // Request more than available: clamped to 10, pointers advance by 10.
        assert_eq!(copy_with_wrap(&mut src, &mut dst, 100), 10);
        assert_eq!(dst.available(), 10);

        // Fill dst, then confirm the clamp on the free side.
        fill_silence(&mut dst, cap);
        write_from(&mut src, &vec![7u8; 10]);
        assert_eq!(copy_with_wrap(&mut src, &mut dst, 10), 0);
        assert_eq!(src.available(), 10);
    }

    #[test]
    fn test_copy_across_both_wraps() {
        let mut src = buf(1, 32);
        let mut dst = buf(2, 32);
        let src_cap = src.capacity();
        let dst_cap = dst.capacity();

        // Misalign both rings so head/tail splits differ.
        fill_silence(&mut src, src_cap - 5);
        read_into(&mut src, &mut vec![0u8; src_cap - 5]);
        fill_silence(&mut dst, dst_cap - 11);
        read_into(&mut dst, &mut vec![0u8; dst_cap - 11]);

        let data: Vec<u8> = (0..20u8).collect();
        assert_eq!(write_from(&mut src, &data), 20);
        assert_eq!(copy_with_wrap(&mut src, &mut dst, 20), 20);

        let mut out = vec![0u8; 20];
        assert_eq!(read_into(&mut dst, &mut out), 20);
        assert_eq!(out, data);
    }

    #[test]
    fn test_random_offsets_roundtrip() {
        let mut rng = StdRng::seed_from_u64(0x5EED);

        for _ in 0..200 {
            let mut src = buf(1, 64);
            let mut dst = buf(2, 96);

            // Random pointer misalignment on both sides.
            let pre_src = rng.gen_range(0..src.capacity());
            let pre_dst = rng.gen_range(0..dst.capacity());
            fill_silence(&mut src, pre_src);
            read_into(&mut src, &mut vec![0u8; pre_src]);
            fill_silence(&mut dst, pre_dst);
            read_into(&mut dst, &mut vec![0u8; pre_dst]);

            let len = rng.gen_range(1..=src.capacity());
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            write_from(&mut src, &data);

            let moved = copy_with_wrap(&mut src, &mut dst, len);
            assert_eq!(moved, len);

            let mut out = vec![0u8; len];
            read_into(&mut dst, &mut out);
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_avail_frames_aligned() {
        let mut src = buf(1, 256);
        let mut dst = buf(2, 256);

        // No formats yet: nothing movable.
        assert_eq!(avail_frames_aligned(&src, &dst, 1), 0);

        src.set_format(SampleFormat::s32_48k_stereo()).unwrap();
        dst.set_format(SampleFormat::s32_48k_stereo()).unwrap();

        fill_silence(&mut src, 13 * 8); // 13 frames
        assert_eq!(avail_frames_aligned(&src, &dst, 1), 13);
        assert_eq!(avail_frames_aligned(&src, &dst, 4), 12);
        assert_eq!(avail_frames_aligned(&src, &dst, 16), 0);
    }

    #[test]
    fn test_fill_silence_respects_free_space() {
        let mut dst = buf(1, 32);
        let cap = dst.capacity();
        assert_eq!(fill_silence(&mut dst, cap + 50), cap);
        assert_eq!(fill_silence(&mut dst, 1), 0);
    }

    #[test]
    fn test_copy_frames_requires_matching_layout() {
        let mut src = buf(1, 256);
        let mut dst = buf(2, 256);
        src.set_format(SampleFormat::s32_48k_stereo()).unwrap();
        dst.set_format(SampleFormat::s16_48k_stereo()).unwrap();

        assert!(copy_frames(&mut src, &mut dst, 4).is_err());

        dst.set_format(SampleFormat::s32_48k_stereo()).unwrap();
        fill_silence(&mut src, 8 * 8);
        assert_eq!(copy_frames(&mut src, &mut dst, 4).unwrap(), 4);
    }
}
