//! Bounded append-only chunk buffer with high-water-mark backpressure.
//!
//! `StreamBuffer` is deliberately decoupled from [`crate::stream::Stream`]:
//! a `Stream`'s own replay buffer is unbounded by design (see
//! `DESIGN.md`/SPEC_FULL §9), while `StreamBuffer` is the bounded building
//! block callers reach for when they need an explicit high-water mark, most
//! commonly behind `ctx.emit` in a streaming Task.

/// Default high-water mark, matching the kernel's documented default.
pub const DEFAULT_HIGH_WATER_MARK: usize = 10_000;

/// A bounded, append-only buffer of `T` chunks.
#[derive(Debug, Clone)]
pub struct StreamBuffer<T> {
    chunks: Vec<T>,
    closed: bool,
    high_water_mark: usize,
}

impl<T> StreamBuffer<T> {
    /// Create a buffer with the default high-water mark (10,000).
    #[must_use]
    pub fn new() -> Self {
        Self::with_high_water_mark(DEFAULT_HIGH_WATER_MARK)
    }

    /// Create a buffer with an explicit high-water mark.
    #[must_use]
    pub fn with_high_water_mark(high_water_mark: usize) -> Self {
        Self {
            chunks: Vec::new(),
            closed: false,
            high_water_mark,
        }
    }

    /// Append a chunk. Returns `false` (rejected, no insertion) when the
    /// buffer is closed or already at its high-water mark; returns `true`
    /// on successful insertion.
    pub fn push(&mut self, chunk: T) -> bool {
        if self.closed || self.chunks.len() >= self.high_water_mark {
            return false;
        }
        self.chunks.push(chunk);
        true
    }

    /// Current chunk count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// `true` when no chunks have been accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// `true` once closed; further `push` calls are rejected.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the buffer closed. Idempotent; does not clear existing chunks.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Return and clear all buffered chunks; does not affect `closed`.
    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.chunks)
    }

    /// Return a copy of the buffered chunks without clearing them.
    #[must_use]
    pub fn chunks(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.chunks.clone()
    }
}

impl<T> Default for StreamBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_accepts_until_high_water_mark() {
        let mut buffer = StreamBuffer::with_high_water_mark(2);
        assert!(buffer.push(1));
        assert!(buffer.push(2));
        assert!(!buffer.push(3));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn push_rejected_preserves_size_at_high_water_mark() {
        let mut buffer = StreamBuffer::with_high_water_mark(1);
        assert!(buffer.push("a"));
        for _ in 0..5 {
            assert!(!buffer.push("b"));
        }
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn push_rejected_once_closed() {
        let mut buffer = StreamBuffer::new();
        buffer.push(1);
        buffer.close();
        assert!(!buffer.push(2));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mut buffer: StreamBuffer<i32> = StreamBuffer::new();
        buffer.close();
        buffer.close();
        assert!(buffer.is_closed());
    }

    #[test]
    fn drain_returns_and_clears() {
        let mut buffer = StreamBuffer::new();
        buffer.push(1);
        buffer.push(2);

        let drained = buffer.drain();
        assert_eq!(drained, vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn chunks_returns_a_copy_without_clearing() {
        let mut buffer = StreamBuffer::new();
        buffer.push(1);
        buffer.push(2);

        let snapshot = buffer.chunks();
        assert_eq!(snapshot, vec![1, 2]);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn default_high_water_mark_matches_spec() {
        let buffer: StreamBuffer<()> = StreamBuffer::new();
        assert_eq!(buffer.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }
}
