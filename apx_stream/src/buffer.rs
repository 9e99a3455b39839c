//! Circular audio buffer with stream parameters.
//!
//! An [`AudioBuffer`] is the edge of the component graph: a fixed-capacity
//! byte ring with one producing component on its source side and one
//! consuming component on its sink side. The scheduler's topological
//! ordering guarantees the two sides never run concurrently, so the
//! pointers need no atomics; cross-domain traffic goes through
//! [`DpQueue`](crate::dp_queue::DpQueue) instead.
//!
//! On non-coherent targets, produced bytes become observable only after
//! the writeback that [`produce`](AudioBuffer::produce) performs, and a
//! consumer must call [`invalidate_readable`](AudioBuffer::invalidate_readable)
//! before touching the data.

use apx_core::{ApxError, CacheAttr, CacheHandle, MAX_FRAME_BYTES, MemZone, Result, SampleFormat, align_up, coherent};

/// Identifier of a buffer inside one runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// A fixed-size circular byte buffer carrying audio frames.
pub struct AudioBuffer {
    id: BufferId,
    data: Box<[u8]>,
    read: usize,
    write: usize,
    avail: usize,
    format: Option<SampleFormat>,
    cache: CacheHandle,
    cache_attr: CacheAttr,
    zone: MemZone,
}

impl AudioBuffer {
    /// Allocates a zero-filled buffer.
    ///
    /// `capacity` is rounded up to a multiple of the maximum frame size so
    /// any supported format divides it evenly. Allocation happens outside
    /// the real-time path; copy passes never allocate.
    pub fn alloc(id: BufferId, capacity: usize, zone: MemZone, cache_attr: CacheAttr, cache: CacheHandle) -> Self {
        let capacity = align_up(capacity.max(MAX_FRAME_BYTES), MAX_FRAME_BYTES);
        Self {
            id,
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
            avail: 0,
            format: None,
            cache,
            cache_attr,
            zone,
        }
    }

    /// Host-side convenience: coherent runtime-zone buffer.
    pub fn alloc_coherent(id: BufferId, capacity: usize) -> Self {
        Self::alloc(id, capacity, MemZone::Runtime, CacheAttr::Coherent, coherent())
    }

    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes readable by the sink side.
    #[inline]
    pub fn available(&self) -> usize {
        self.avail
    }

    /// Bytes writable by the source side.
    #[inline]
    pub fn free(&self) -> usize {
        self.data.len() - self.avail
    }

    #[inline]
    pub fn zone(&self) -> MemZone {
        self.zone
    }

    #[inline]
    pub fn format(&self) -> Option<&SampleFormat> {
        self.format.as_ref()
    }

    /// Applies stream parameters after validating them.
    pub fn set_format(&mut self, format: SampleFormat) -> Result<()> {
        format.validate()?;
        self.format = Some(format);
        Ok(())
    }

    /// Available frames, zero when no format is attached yet.
    #[inline]
    pub fn available_frames(&self) -> usize {
        match &self.format {
            Some(f) => self.avail / f.frame_bytes(),
            None => 0,
        }
    }

    /// Free frames, zero when no format is attached yet.
    #[inline]
    pub fn free_frames(&self) -> usize {
        match &self.format {
            Some(f) => self.free() / f.frame_bytes(),
            None => 0,
        }
    }

    /// The readable region as an ordered `(head, tail)` pair of slices.
    ///
    /// `tail` is empty unless the region wraps past the end of the ring.
    pub fn readable(&self) -> (&[u8], &[u8]) {
        let cap = self.data.len();
        let first = self.avail.min(cap - self.read);
        let second = self.avail - first;
        (&self.data[self.read..self.read + first], &self.data[..second])
    }

    /// The writable region as an ordered `(head, tail)` pair of slices.
    pub fn writable(&mut self) -> (&mut [u8], &mut [u8]) {
        let cap = self.data.len();
        let free = cap - self.avail;
        let first = free.min(cap - self.write);
        let second = free - first;
        let (left, right) = self.data.split_at_mut(self.write);
        (&mut right[..first], &mut left[..second])
    }

    /// Commits `n` freshly written bytes to the sink side.
    ///
    /// Performs the writeback on non-coherent buffers, so the bytes are
    /// observable to the consumer as soon as this returns.
    pub fn produce(&mut self, n: usize) -> Result<()> {
        if n > self.free() {
            return Err(ApxError::NoSpace);
        }
        if self.cache_attr == CacheAttr::NonCoherent {
            self.maintain_region(self.write, n, false);
        }
        self.write = (self.write + n) % self.data.len();
        self.avail += n;
        Ok(())
    }

    /// Releases `n` consumed bytes back to the source side.
    pub fn consume(&mut self, n: usize) -> Result<()> {
        if n > self.avail {
            return Err(ApxError::NoData);
        }
        self.read = (self.read + n) % self.data.len();
        self.avail -= n;
        Ok(())
    }

    /// Invalidates the first `n` readable bytes ahead of a read.
    ///
    /// No-op on coherent buffers.
    pub fn invalidate_readable(&self, n: usize) {
        if self.cache_attr == CacheAttr::NonCoherent {
            self.maintain_region(self.read, n.min(self.avail), true);
        }
    }

    /// Forces the full data region through the cache, used by shared DP
    /// queue slots at swap time.
    pub fn invalidate_all(&self) {
        self.cache.invalidate(&self.data);
    }

    /// Writes the full data region back to memory.
    pub fn writeback_all(&self) {
        self.cache.writeback(&self.data);
    }

    /// Resets pointers to empty without touching contents or format.
    pub fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
        self.avail = 0;
    }

    /// Zero-fills the ring, used when re-preparing after an xrun so stale
    /// samples cannot leak into the restarted stream.
    pub fn silence(&mut self) {
        self.data.fill(0);
        self.reset();
    }

    fn maintain_region(&self, start: usize, len: usize, invalidate: bool) {
        let cap = self.data.len();
        let first = len.min(cap - start);
        let second = len - first;
        if invalidate {
            self.cache.invalidate(&self.data[start..start + first]);
            self.cache.invalidate(&self.data[..second]);
        } else {
            self.cache.writeback(&self.data[start..start + first]);
            self.cache.writeback(&self.data[..second]);
        }
    }
}

impl core::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .field("avail", &self.avail)
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use apx_core::MAX_FRAME_BYTES;

    use super::*;

    fn filled(capacity: usize) -> AudioBuffer {
        AudioBuffer::alloc_coherent(BufferId(1), capacity)
    }

    #[test]
    fn test_capacity_rounds_to_max_frame() {
        let buf = filled(100);
        assert_eq!(buf.capacity() % MAX_FRAME_BYTES, 0);
        assert!(buf.capacity() >= 100);
    }

    #[test]
    fn test_avail_plus_free_is_capacity() {
        let mut buf = filled(128);
        assert_eq!(buf.available() + buf.free(), buf.capacity());

        buf.produce(50).unwrap();
        assert_eq!(buf.available() + buf.free(), buf.capacity());

        buf.consume(20).unwrap();
        assert_eq!(buf.available() + buf.free(), buf.capacity());
        assert_eq!(buf.available(), 30);
    }

    #[test]
    fn test_produce_consume_bounds() {
        let mut buf = filled(64);
        let cap = buf.capacity();

        assert_eq!(buf.produce(cap + 1), Err(ApxError::NoSpace));
        buf.produce(cap).unwrap();
        assert_eq!(buf.produce(1), Err(ApxError::NoSpace));

        buf.consume(cap).unwrap();
        assert_eq!(buf.consume(1), Err(ApxError::NoData));
    }

    #[test]
    fn test_wraparound_regions() {
        let mut buf = filled(64);
        let cap = buf.capacity();

        // Push the write pointer near the end, then wrap.
        buf.produce(cap - 8).unwrap();
        buf.consume(cap - 8).unwrap();
        buf.produce(16).unwrap();

        let (head, tail) = buf.readable();
        assert_eq!(head.len(), 8);
        assert_eq!(tail.len(), 8);
        assert_eq!(head.len() + tail.len(), buf.available());

        let (whead, wtail) = buf.writable();
        assert_eq!(whead.len() + wtail.len(), cap - 16);
    }

    #[test]
    fn test_writable_then_produce_roundtrip() {
        let mut buf = filled(64);
        {
            let (head, _) = buf.writable();
            head[..4].copy_from_slice(&[1, 2, 3, 4]);
        }
        buf.produce(4).unwrap();

        let (head, _) = buf.readable();
        assert_eq!(&head[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_frames_require_format() {
        let mut buf = filled(128);
        buf.produce(64).unwrap();
        assert_eq!(buf.available_frames(), 0);

        buf.set_format(SampleFormat::s32_48k_stereo()).unwrap();
        assert_eq!(buf.available_frames(), 8);
        assert_eq!(buf.free_frames(), (buf.capacity() - 64) / 8);
    }

    #[test]
    fn test_silence_clears_data_and_pointers() {
        let mut buf = filled(64);
        {
            let (head, _) = buf.writable();
            head[..2].copy_from_slice(&[0xAA, 0xBB]);
        }
        buf.produce(2).unwrap();
        buf.silence();

        assert_eq!(buf.available(), 0);
        let (head, tail) = buf.readable();
        assert!(head.is_empty() && tail.is_empty());
    }
}
