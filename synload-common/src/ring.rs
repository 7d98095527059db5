//! Fixed-capacity ring buffers
//!
//! Two flavours share the same head/length bookkeeping:
//!
//! - [`BoundedQueue<T>`]: typed elements, used for pending read operations and
//!   for the latency-measurement window.
//! - [`RingByteBuffer`]: raw bytes, used to stage socket receive and transmit
//!   data. Its free and used space is exposed as at most two contiguous slices
//!   (the second one only exists when the region wraps around the end of the
//!   backing storage), so callers copy straight into or out of the ring.
//!
//! Neither structure ever reallocates after construction. Pushing into a full
//! ring or popping from an empty one is reported as an error and leaves the
//! ring untouched.

use std::fmt;
use std::io::{self, Read, Write};

/// Result type alias for ring operations
pub type Result<T> = std::result::Result<T, RingError>;

/// Ring buffer error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Push or commit on a ring without enough free space
    CapacityExceeded { capacity: usize },

    /// Pop or consume on a ring without enough buffered data
    Empty,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::CapacityExceeded { capacity } => {
                write!(f, "Ring capacity exceeded (capacity {capacity})")
            }
            RingError::Empty => write!(f, "Ring is empty"),
        }
    }
}

impl std::error::Error for RingError {}

// =============================================================================
// Typed ring
// =============================================================================

/// Fixed-capacity FIFO of typed elements
pub struct BoundedQueue<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` elements
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be non-zero");
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>().into_boxed_slice();
        Self { slots, head: 0, tail: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Number of elements that can still be pushed
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append an element at the tail
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            return Err(RingError::CapacityExceeded { capacity: self.capacity() });
        }

        self.slots[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity();
        self.len += 1;
        Ok(())
    }

    /// Remove and return the element at the head
    pub fn pop(&mut self) -> Result<T> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }

        let item = self.slots[self.head].take().ok_or(RingError::Empty)?;
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        Ok(item)
    }

    /// The `index`-th element counting from the head, without removing it
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.slots[(self.head + index) % self.capacity()].as_ref()
    }

    /// The oldest element
    pub fn front(&self) -> Option<&T> {
        self.get(0)
    }

    /// Iterate from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }

    /// Drop every element
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("items", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Byte ring
// =============================================================================

/// Outcome of [`RingByteBuffer::fill_from`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fill {
    /// Bytes appended to the ring
    pub bytes: usize,
    /// The reader reported end of stream
    pub eof: bool,
}

/// Fixed-capacity circular byte buffer
pub struct RingByteBuffer {
    buf: Box<[u8]>,
    /// Index of the first buffered byte
    head: usize,
    /// Number of buffered bytes
    len: usize,
}

impl RingByteBuffer {
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingByteBuffer capacity must be non-zero");
        Self { buf: vec![0u8; capacity].into_boxed_slice(), head: 0, len: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Number of bytes that can still be appended
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    fn tail(&self) -> usize {
        (self.head + self.len) % self.capacity()
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.is_full() {
            return Err(RingError::CapacityExceeded { capacity: self.capacity() });
        }
        let tail = self.tail();
        self.buf[tail] = byte;
        self.len += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u8> {
        if self.is_empty() {
            return Err(RingError::Empty);
        }
        let byte = self.buf[self.head];
        self.consume(1)?;
        Ok(byte)
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len {
            return None;
        }
        Some(self.buf[(self.head + index) % self.capacity()])
    }

    /// Buffered bytes as two slices: up to the end of storage, then the wrapped part
    pub fn readable_regions(&self) -> (&[u8], &[u8]) {
        let first_len = self.len.min(self.capacity() - self.head);
        let second_len = self.len - first_len;
        (&self.buf[self.head..self.head + first_len], &self.buf[..second_len])
    }

    /// Reserve up to `len` free bytes, returned as two writable slices
    ///
    /// The reservation is only made visible to readers by [`commit`](Self::commit).
    pub fn writable_regions(&mut self, len: usize) -> (&mut [u8], &mut [u8]) {
        let want = len.min(self.free());
        let tail = self.tail();
        let first_len = want.min(self.capacity() - tail);
        let second_len = want - first_len;

        // A wrapped free region only exists when buffered data does not wrap,
        // in which case it ends at `head <= tail`.
        let (low, high) = self.buf.split_at_mut(tail);
        (&mut high[..first_len], &mut low[..second_len])
    }

    /// Make `n` previously written bytes visible to readers
    pub fn commit(&mut self, n: usize) -> Result<()> {
        if n > self.free() {
            return Err(RingError::CapacityExceeded { capacity: self.capacity() });
        }
        self.len += n;
        Ok(())
    }

    /// Discard `n` bytes from the head
    pub fn consume(&mut self, n: usize) -> Result<()> {
        if n > self.len {
            return Err(RingError::Empty);
        }
        self.len -= n;
        self.head = if self.len == 0 { 0 } else { (self.head + n) % self.capacity() };
        Ok(())
    }

    /// The first `n` buffered bytes, if they do not straddle the wrap point
    pub fn contiguous(&self, n: usize) -> Option<&[u8]> {
        let (first, _) = self.readable_regions();
        (n <= first.len()).then(|| &first[..n])
    }

    /// Copy buffered bytes into `dst` without consuming them
    ///
    /// Returns the number of bytes copied.
    pub fn copy_out(&self, dst: &mut [u8]) -> usize {
        let (first, second) = self.readable_regions();
        let n1 = first.len().min(dst.len());
        dst[..n1].copy_from_slice(&first[..n1]);
        let n2 = second.len().min(dst.len() - n1);
        dst[n1..n1 + n2].copy_from_slice(&second[..n2]);
        n1 + n2
    }

    /// Copy `src` into the ring in one step
    pub fn write_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.free() {
            return Err(RingError::CapacityExceeded { capacity: self.capacity() });
        }
        let (first, second) = self.writable_regions(src.len());
        let split = first.len();
        first.copy_from_slice(&src[..split]);
        second.copy_from_slice(&src[split..]);
        self.commit(src.len())
    }

    /// Read from `reader` until the ring is full, the reader would block, or
    /// it reports end of stream
    ///
    /// `WouldBlock` is not an error here: whatever was read so far is kept and
    /// reported. Any other error is returned after the bytes read before it
    /// have been committed.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Fill> {
        let mut fill = Fill::default();
        while !self.is_full() {
            let free = self.free();
            let (first, _) = self.writable_regions(free);
            match reader.read(first) {
                Ok(0) => {
                    fill.eof = true;
                    break;
                }
                Ok(n) => {
                    self.len += n;
                    fill.bytes += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(fill)
    }

    /// Write buffered bytes to `writer` until the ring is empty or the writer
    /// would block
    ///
    /// Returns the number of bytes written and consumed.
    pub fn drain_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let mut total = 0;
        while !self.is_empty() {
            let (first, _) = self.readable_regions();
            match writer.write(first) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    self.len -= n;
                    self.head = if self.len == 0 { 0 } else { (self.head + n) % self.capacity() };
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

impl fmt::Debug for RingByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingByteBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("len", &self.len)
            .finish()
    }
}
