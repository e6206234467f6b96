//! Fixed-capacity ring buffer that turns an arbitrary byte stream into
//! frames.
//!
//! One buffer belongs to exactly one endpoint and is only ever touched by
//! the unit that reads that endpoint's channel.

use bytes::Bytes;
use tracing::trace;

use crate::codec::{Frame, MAX_FRAME_LEN, TERMINATOR};
use crate::error::{FrameError, Result};

/// Capacity of every reassembly buffer.
pub const BUFFER_CAPACITY: usize = 4096;

/// Ring buffer of pending bytes for one endpoint.
///
/// `cursor` is the offset of the oldest pending byte; `length` bytes are
/// pending from there, wrapping at [`BUFFER_CAPACITY`].
pub struct ReassemblyBuffer {
    ring: Box<[u8; BUFFER_CAPACITY]>,
    cursor: usize,
    length: usize,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            ring: Box::new([0u8; BUFFER_CAPACITY]),
            cursor: 0,
            length: 0,
        }
    }

    /// Bytes pending extraction.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        BUFFER_CAPACITY
    }

    /// Bytes that can still be appended.
    pub fn available(&self) -> usize {
        BUFFER_CAPACITY - self.length
    }

    /// Append a chunk after the pending bytes.
    ///
    /// All or nothing: if the chunk does not fit, the buffer is left
    /// untouched and [`FrameError::BufferOverflow`] is returned.
    pub fn append(&mut self, chunk: &[u8]) -> Result<()> {
        if chunk.len() > self.available() {
            return Err(FrameError::BufferOverflow {
                incoming: chunk.len(),
                available: self.available(),
            });
        }

        let tail = (self.cursor + self.length) % BUFFER_CAPACITY;
        let first = chunk.len().min(BUFFER_CAPACITY - tail);
        self.ring[tail..tail + first].copy_from_slice(&chunk[..first]);
        self.ring[..chunk.len() - first].copy_from_slice(&chunk[first..]);
        self.length += chunk.len();
        trace!(appended = chunk.len(), pending = self.length, "buffered bytes");
        Ok(())
    }

    fn at(&self, offset: usize) -> u8 {
        self.ring[(self.cursor + offset) % BUFFER_CAPACITY]
    }

    /// Remove and return the oldest complete frame, if any.
    ///
    /// At most 16 bytes from the cursor are scanned for a terminator. If none
    /// is found nothing is consumed.
    pub fn extract_frame(&mut self) -> Option<Frame> {
        let window = self.length.min(MAX_FRAME_LEN);
        let end = (0..window).find(|&i| self.at(i) == TERMINATOR)?;
        let frame_len = end + 1;

        let raw: Vec<u8> = (0..frame_len).map(|i| self.at(i)).collect();
        self.cursor = (self.cursor + frame_len) % BUFFER_CAPACITY;
        self.length -= frame_len;
        Some(Frame::from_wire(Bytes::from(raw)))
    }

    /// Iterator over every frame currently extractable.
    pub fn drain_frames(&mut self) -> DrainFrames<'_> {
        DrainFrames { buffer: self }
    }

    /// True when the pending head holds a full frame's worth of bytes without
    /// a terminator. Such a buffer yields no further frames.
    pub fn is_stalled(&self) -> bool {
        self.length >= MAX_FRAME_LEN && (0..MAX_FRAME_LEN).all(|i| self.at(i) != TERMINATOR)
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReassemblyBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReassemblyBuffer")
            .field("cursor", &self.cursor)
            .field("length", &self.length)
            .finish()
    }
}

/// Iterator returned by [`ReassemblyBuffer::drain_frames`].
pub struct DrainFrames<'a> {
    buffer: &'a mut ReassemblyBuffer,
}

impl Iterator for DrainFrames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.buffer.extract_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: [u8; 9] = [0x81, 0x09, 0x02, 0x00, 0x02, 0xFF, 0x90, 0x41, 0xFF];

    fn collect(buffer: &mut ReassemblyBuffer) -> Vec<Vec<u8>> {
        buffer
            .drain_frames()
            .map(|frame| frame.as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn two_frames_then_none() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.append(&STREAM).unwrap();

        let first = buffer.extract_frame().unwrap();
        assert_eq!(first.as_bytes(), &STREAM[..6]);
        let second = buffer.extract_frame().unwrap();
        assert_eq!(second.as_bytes(), &STREAM[6..]);
        assert!(buffer.extract_frame().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn chunking_does_not_change_output() {
        let mut whole = ReassemblyBuffer::new();
        whole.append(&STREAM).unwrap();
        let expected = collect(&mut whole);

        for split in 1..STREAM.len() {
            let mut buffer = ReassemblyBuffer::new();
            let mut frames = Vec::new();
            for chunk in STREAM.chunks(split) {
                buffer.append(chunk).unwrap();
                frames.extend(collect(&mut buffer));
            }
            assert_eq!(frames, expected, "chunk size {split}");
        }
    }

    #[test]
    fn partial_frame_is_kept() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.append(&[0x81, 0x09, 0x02]).unwrap();
        assert!(buffer.extract_frame().is_none());
        assert_eq!(buffer.len(), 3);

        buffer.append(&[0x00, 0xFF]).unwrap();
        let frame = buffer.extract_frame().unwrap();
        assert_eq!(frame.as_bytes(), &[0x81, 0x09, 0x02, 0x00, 0xFF]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn overflow_leaves_buffer_unchanged() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.append(&[0x00; BUFFER_CAPACITY - 2]).unwrap();

        let err = buffer.append(&[0x81, 0x01, 0xFF]).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferOverflow {
                incoming: 3,
                available: 2
            }
        );
        assert_eq!(buffer.len(), BUFFER_CAPACITY - 2);

        buffer.append(&[0x01, 0xFF]).unwrap();
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn wraps_across_capacity_boundary() {
        let mut buffer = ReassemblyBuffer::new();
        // Walk the cursor close to the end of the ring.
        let filler = [0x81, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF];
        for _ in 0..(BUFFER_CAPACITY / filler.len() - 1) {
            buffer.append(&filler).unwrap();
            assert!(buffer.extract_frame().is_some());
        }
        assert_eq!(buffer.cursor, BUFFER_CAPACITY - filler.len());

        let frame = [0x82, 0x09, 0x02, 0x01, 0x48, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF];
        buffer.append(&frame).unwrap();
        assert_eq!(buffer.extract_frame().unwrap().as_bytes(), &frame);
        assert_eq!(buffer.cursor, frame.len() - filler.len());
        assert!(buffer.is_empty());
    }

    #[test]
    fn unterminated_head_stalls() {
        let mut buffer = ReassemblyBuffer::new();
        buffer.append(&[0x81; 15]).unwrap();
        assert!(!buffer.is_stalled());

        buffer.append(&[0x81, 0x01, 0xFF]).unwrap();
        assert!(buffer.is_stalled());
        assert!(buffer.extract_frame().is_none());
        assert_eq!(buffer.len(), 18);
    }

    #[test]
    fn scan_window_is_sixteen_bytes() {
        let mut buffer = ReassemblyBuffer::new();
        let mut frame = vec![0x81; 15];
        frame.push(0xFF);
        buffer.append(&frame).unwrap();
        assert_eq!(buffer.extract_frame().unwrap().len(), 16);
    }
}
