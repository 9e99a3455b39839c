//! Sample access helpers shared by the modules.
//!
//! Ring capacities are a multiple of the maximum frame size, so segment
//! boundaries always land on frame (and therefore container) boundaries;
//! the helpers below rely on that to walk wrapped regions sample by
//! sample without staging copies.

use apx_stream::AudioBuffer;

/// Q16.16 fixed-point unity.
pub const Q16_UNITY: i64 = 1 << 16;

/// Reads one sample at byte offset `at` of `seg`.
#[inline]
pub fn load_sample(seg: &[u8], at: usize, container: usize) -> i64 {
    match container {
        2 => i16::from_le_bytes([seg[at], seg[at + 1]]) as i64,
        _ => i32::from_le_bytes([seg[at], seg[at + 1], seg[at + 2], seg[at + 3]]) as i64,
    }
}

/// Writes one sample, saturating to the container range.
#[inline]
pub fn store_sample(seg: &mut [u8], at: usize, container: usize, value: i64) {
    match container {
        2 => {
            let v = value.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            seg[at..at + 2].copy_from_slice(&v.to_le_bytes());
        }
        _ => {
            let v = value.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            seg[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
    }
}

/// Applies `f` to `bytes` worth of samples read from the head of `src`'s
/// readable region, writing the results into the head of `dst`'s
/// writable region. Pointers are not advanced; the adapter does that.
pub fn map_samples(
    src: &AudioBuffer,
    dst: &mut AudioBuffer,
    bytes: usize,
    container: usize,
    mut f: impl FnMut(i64) -> i64,
) {
    let (src_head, src_tail) = src.readable();
    let mut src_segs = [src_head, src_tail];
    let mut done = 0;
    let mut si = 0;

    let (dst_head, dst_tail) = dst.writable();
    for dst_seg in [dst_head, dst_tail] {
        let mut at = 0;
        while at < dst_seg.len() && done < bytes {
            if si >= src_segs.len() {
                return;
            }
            let seg = src_segs[si];
            if seg.is_empty() {
                si += 1;
                continue;
            }
            let value = f(load_sample(seg, 0, container));
            store_sample(dst_seg, at, container, value);
            src_segs[si] = &seg[container..];
            at += container;
            done += container;
        }
        if done >= bytes {
            break;
        }
    }
}

/// Adds `bytes` of `src`'s readable samples, scaled by a Q16.16 gain,
/// into the head of `dst`'s writable region (which must be pre-zeroed or
/// hold earlier contributions). Consumes nothing; advances nothing.
pub fn mix_into(src: &AudioBuffer, dst: &mut AudioBuffer, bytes: usize, container: usize, gain_q16: i64) {
    let (src_head, src_tail) = src.readable();
    let mut src_segs = [src_head, src_tail];
    let mut done = 0;
    let mut si = 0;

    let (dst_head, dst_tail) = dst.writable();
    for dst_seg in [dst_head, dst_tail] {
        let mut at = 0;
        while at < dst_seg.len() && done < bytes {
            if si >= src_segs.len() {
                return;
            }
            let seg = src_segs[si];
            if seg.is_empty() {
                si += 1;
                continue;
            }
            let sample = (load_sample(seg, 0, container) * gain_q16) >> 16;
            let acc = load_sample(dst_seg, at, container) + sample;
            store_sample(dst_seg, at, container, acc);
            src_segs[si] = &seg[container..];
            at += container;
            done += container;
        }
        if done >= bytes {
            break;
        }
    }
}

/// Zeroes the first `bytes` of `dst`'s writable region without producing.
pub fn zero_writable(dst: &mut AudioBuffer, bytes: usize) {
    let mut left = bytes;
    let (head, tail) = dst.writable();
    for seg in [head, tail] {
        let n = left.min(seg.len());
        seg[..n].fill(0);
        left -= n;
        if left == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use apx_stream::{BufferId, write_from};

    use super::*;

    fn sample_buf(values: &[i32]) -> AudioBuffer {
        let mut buf = AudioBuffer::alloc_coherent(BufferId(1), values.len() * 4);
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        write_from(&mut buf, &bytes);
        buf
    }

    fn read_samples(buf: &mut AudioBuffer, count: usize) -> Vec<i32> {
        let mut out = vec![0u8; count * 4];
        apx_stream::read_into(buf, &mut out);
        out.chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_map_samples_applies_transform() {
        let src = sample_buf(&[100, -200, 300, -400]);
        let mut dst = AudioBuffer::alloc_coherent(BufferId(2), 64);

        map_samples(&src, &mut dst, 16, 4, |s| s * 2);
        dst.produce(16).unwrap();

        assert_eq!(read_samples(&mut dst, 4), vec![200, -400, 600, -800]);
    }

    #[test]
    fn test_mix_into_accumulates_with_gain() {
        let a = sample_buf(&[1000, 2000]);
        let b = sample_buf(&[100, 200]);
        let mut dst = AudioBuffer::alloc_coherent(BufferId(3), 64);

        zero_writable(&mut dst, 8);
        mix_into(&a, &mut dst, 8, 4, Q16_UNITY);
        mix_into(&b, &mut dst, 8, 4, Q16_UNITY / 2);
        dst.produce(8).unwrap();

        assert_eq!(read_samples(&mut dst, 2), vec![1050, 2100]);
    }

    #[test]
    fn test_store_sample_saturates() {
        let mut seg = [0u8; 4];
        store_sample(&mut seg, 0, 4, i32::MAX as i64 + 1000);
        assert_eq!(i32::from_le_bytes(seg), i32::MAX);

        let mut seg = [0u8; 2];
        store_sample(&mut seg, 0, 2, i16::MIN as i64 - 5);
        assert_eq!(i16::from_le_bytes(seg), i16::MIN);
    }
}
