//! Fixed-capacity byte segments and the chains that carry response bodies
//! through the processor.
//!
//! Body data is never held in one growable allocation. It travels as a chain
//! of segments, each at most [`SEGMENT_CAPACITY`] bytes, so partially
//! consumed output can be dropped segment by segment and chains can be
//! spliced between owners without copying.

use std::collections::VecDeque;

/// Upper bound on the payload of a single [`Segment`].
pub const SEGMENT_CAPACITY: usize = 4096;

/// One bounded slice of body data.
#[derive(Clone, Default)]
pub struct Segment {
    data: Vec<u8>,
}

impl Segment {
    fn with_room() -> Self {
        Segment { data: Vec::with_capacity(SEGMENT_CAPACITY) }
    }

    /// Bytes currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn room(&self) -> usize {
        SEGMENT_CAPACITY - self.data.len()
    }

    /// Copy as much of `bytes` as fits, returning the number taken.
    fn fill(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.room());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// An ordered chain of segments, consumed from the front and extended at the
/// back.
#[derive(Clone, Default)]
pub struct SegmentList {
    segments: VecDeque<Segment>,
}

impl SegmentList {
    pub fn new() -> Self {
        SegmentList::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut list = SegmentList::new();
        list.append(bytes);
        list
    }

    /// Total bytes across the chain.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(Segment::is_empty)
    }

    /// Append `bytes`, topping up the tail segment before allocating new
    /// ones. Each allocated segment holds at most [`SEGMENT_CAPACITY`].
    pub fn append(&mut self, mut bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(tail) = self.segments.back_mut() {
            let taken = tail.fill(bytes);
            bytes = &bytes[taken..];
        }
        while !bytes.is_empty() {
            let mut seg = Segment::with_room();
            let taken = seg.fill(bytes);
            bytes = &bytes[taken..];
            self.segments.push_back(seg);
        }
    }

    /// Move every segment of `other` onto the back of `self`, leaving
    /// `other` empty. No bytes are copied.
    pub fn transfer(&mut self, other: &mut SegmentList) {
        self.segments.append(&mut other.segments);
    }

    /// Copy up to `buf.len()` bytes from the front of the chain into `buf`,
    /// dropping consumed segments. Returns the number of bytes copied.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.segments.front_mut() else {
                break;
            };
            let take = front.len().min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&front.data[..take]);
            front.data.drain(..take);
            copied += take;
            if front.is_empty() {
                self.segments.pop_front();
            }
        }
        copied
    }

    /// Collapse the chain into one contiguous buffer.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for seg in &self.segments {
            out.extend_from_slice(seg.bytes());
        }
        out
    }

    /// Flatten and decode, replacing invalid UTF-8.
    pub fn flatten_string(&self) -> String {
        String::from_utf8_lossy(&self.flatten()).into_owned()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Borrowing iterator over the raw chunks, front to back.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(Segment::bytes)
    }
}

impl std::fmt::Debug for SegmentList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentList")
            .field("segments", &self.segments.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_spills_into_new_segments() {
        let mut list = SegmentList::new();
        let payload = vec![7u8; SEGMENT_CAPACITY + 100];
        list.append(&payload);
        assert_eq!(list.len(), SEGMENT_CAPACITY + 100);
        assert_eq!(list.segments.len(), 2);
        assert_eq!(list.segments[0].len(), SEGMENT_CAPACITY);
        assert_eq!(list.segments[1].len(), 100);
    }

    #[test]
    fn append_tops_up_tail_first() {
        let mut list = SegmentList::from_bytes(b"ab");
        list.append(b"cd");
        assert_eq!(list.segments.len(), 1);
        assert_eq!(list.flatten(), b"abcd");
    }

    #[test]
    fn transfer_moves_without_copying() {
        let mut a = SegmentList::from_bytes(b"hello ");
        let mut b = SegmentList::from_bytes(b"world");
        a.transfer(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.flatten(), b"hello world");
    }

    #[test]
    fn read_into_consumes_across_segments() {
        let mut list = SegmentList::new();
        list.append(&vec![1u8; SEGMENT_CAPACITY]);
        list.append(&[2, 3, 4]);

        let mut buf = [0u8; 10];
        assert_eq!(list.read_into(&mut buf), 10);
        assert_eq!(list.len(), SEGMENT_CAPACITY - 7);

        let mut rest = vec![0u8; SEGMENT_CAPACITY];
        let n = list.read_into(&mut rest);
        assert_eq!(n, SEGMENT_CAPACITY - 7);
        assert_eq!(&rest[n - 3..n], &[2, 3, 4]);
        assert_eq!(list.read_into(&mut buf), 0);
    }

    #[test]
    fn clone_preserves_the_byte_stream() {
        let mut list = SegmentList::from_bytes(b"abc");
        list.append(&vec![b'x'; SEGMENT_CAPACITY]);
        let copy = list.clone();
        assert_eq!(copy.flatten(), list.flatten());
        list.clear();
        assert_eq!(copy.len(), SEGMENT_CAPACITY + 3);
    }

    #[test]
    fn flatten_string_is_lossy() {
        let list = SegmentList::from_bytes(&[b'o', b'k', 0xff]);
        assert_eq!(list.flatten_string(), "ok\u{fffd}");
    }
}
