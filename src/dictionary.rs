//! Sliding dictionary (spec §4.C): a ring buffer over the decoded window,
//! written to directly by literal bytes and by back-reference copies, and
//! drained to the sink as it fills. Copy semantics (overlapping-region RLE
//! expansion, chunked catch-up copies) follow the byte-shuffling idiom of
//! the teacher's pointer/core arithmetic, specialized to a single buffer.

use crate::error::{ErrorContext, Res, StreamErrorKind};

pub struct SlidingDictionary {
    buf: Vec<u8>,
    window: usize,
    /// Next write position, unbounded (not wrapped); `pos % buf.len()` is
    /// the physical index.
    pos: u64,
    /// Physical/logical position through which bytes have been handed to
    /// `read_flush`.
    flushed: u64,
}

impl ErrorContext for SlidingDictionary {
    fn describe(&self) -> Option<String> {
        Some(format!(
            "sliding dictionary: window {}, pos {}",
            self.window, self.pos
        ))
    }
}

impl SlidingDictionary {
    pub fn new(window: usize) -> Self {
        SlidingDictionary {
            buf: vec![0u8; window],
            window,
            pos: 0,
            flushed: 0,
        }
    }

    fn phys(&self, logical: u64) -> usize {
        (logical % self.window as u64) as usize
    }

    /// Bytes available to copy from without wrapping past the start of the
    /// window, i.e. how far `write_copy` can proceed in one physical `memcpy`.
    pub fn avail_size(&self) -> usize {
        self.window - self.phys(self.pos)
    }

    /// How much history is behind the write cursor (bounded by the window).
    pub fn hist_size(&self) -> u64 {
        self.pos.min(self.window as u64)
    }

    pub fn last_bytes(&self) -> (u8, u8) {
        let p1 = if self.pos >= 1 {
            self.buf[self.phys(self.pos - 1)]
        } else {
            0
        };
        let p2 = if self.pos >= 2 {
            self.buf[self.phys(self.pos - 2)]
        } else {
            0
        };
        (p1, p2)
    }

    /// Exposes a mutable span at the write cursor, up to `avail_size()`
    /// bytes (the caller must not request more without first checking).
    pub fn write_slice(&mut self, max: usize) -> &mut [u8] {
        let start = self.phys(self.pos);
        let end = start + max.min(self.window - start);
        &mut self.buf[start..end]
    }

    /// Commits `n` bytes previously written via `write_slice`.
    pub fn write_mark(&mut self, n: usize) {
        self.pos += n as u64;
    }

    pub fn write_byte(&mut self, b: u8) {
        let idx = self.phys(self.pos);
        self.buf[idx] = b;
        self.pos += 1;
    }

    /// Back-reference copy of up to `len` bytes from `dist` behind the
    /// cursor. When `dist < len` the source region overlaps the
    /// destination, which intentionally reproduces the tail of what was
    /// just written (RLE expansion, spec §4.C). Stops early at the ring's
    /// physical tail; returns the number of bytes actually copied.
    pub fn write_copy(&mut self, dist: u64, len: usize) -> Res<usize> {
        self.assert(dist >= 1, "copy distance must be >= 1")?;
        if dist > self.hist_size() {
            return self.raise(
                StreamErrorKind::Corrupted,
                format!("copy distance {} exceeds available history {}", dist, self.hist_size()),
            );
        }
        let room = self.avail_size();
        let n = len.min(room);
        for i in 0..n {
            let src = self.phys(self.pos - dist + i as u64);
            let dst = self.phys(self.pos + i as u64);
            self.buf[dst] = self.buf[src];
        }
        self.pos += n as u64;
        Ok(n)
    }

    /// Non-wrapping fast path: callers that have already confirmed
    /// `len <= avail_size()` and non-overlap can use this to skip the
    /// per-byte loop's bounds recomputation. Falls back to `write_copy`
    /// when those conditions don't hold.
    pub fn try_write_copy(&mut self, dist: u64, len: usize) -> Res<usize> {
        if dist >= len as u64 && len <= self.avail_size() && dist <= self.hist_size() {
            let start = self.phys(self.pos);
            let src_start = self.phys(self.pos - dist);
            if src_start + len <= self.window && start + len <= self.window {
                self.buf.copy_within(src_start..src_start + len, start);
                self.pos += len as u64;
                return Ok(len);
            }
        }
        self.write_copy(dist, len)
    }

    /// Hands up to `max` bytes of the committed-but-unflushed region to the
    /// caller for emission, advancing the flush cursor by exactly what is
    /// returned (never more than `max`, and never spanning the ring's
    /// physical wrap in one call, so the caller should call repeatedly).
    pub fn read_flush(&mut self, max: usize) -> &[u8] {
        if self.flushed >= self.pos {
            return &[];
        }
        let start = self.phys(self.flushed);
        let logical_avail = (self.pos - self.flushed) as usize;
        let end = start + logical_avail.min(self.window - start).min(max);
        self.flushed += (end - start) as u64;
        &self.buf[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_then_flush_round_trips() {
        let mut d = SlidingDictionary::new(16);
        for b in b"hello" {
            d.write_byte(*b);
        }
        assert_eq!(d.read_flush(16), b"hello");
        assert_eq!(d.read_flush(16), b"");
    }

    #[test]
    fn overlapping_copy_expands_rle() {
        let mut d = SlidingDictionary::new(16);
        d.write_byte(b'a');
        let n = d.write_copy(1, 5).unwrap();
        assert_eq!(n, 5);
        assert_eq!(d.read_flush(16), b"aaaaaa");
    }

    #[test]
    fn copy_past_history_errors() {
        let mut d = SlidingDictionary::new(16);
        d.write_byte(b'a');
        assert!(d.write_copy(5, 1).is_err());
    }

    #[test]
    fn last_bytes_tracks_two_most_recent() {
        let mut d = SlidingDictionary::new(16);
        d.write_byte(b'x');
        d.write_byte(b'y');
        assert_eq!(d.last_bytes(), (b'y', b'x'));
    }

    #[test]
    fn write_copy_truncates_at_ring_tail() {
        let mut d = SlidingDictionary::new(8);
        for _ in 0..7 {
            d.write_byte(b'a');
        }
        // cursor sits one byte from the physical tail.
        let n = d.write_copy(1, 5).unwrap();
        assert_eq!(n, 1);
    }
}
