//! Length-delimited framing of payloads on a byte stream.
//!
//! See the [net module] documentation since this is a private module anyways.
//!
//! [net module]: crate::net

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::net::TransportError;

/// Length in bytes of the length prefix of a frame.
pub const LENGTH_PREFIX: usize = 4;

/// Prefixes a payload with its length.
///
/// # Errors
/// Fails if the payload is larger than `max_length`.
pub fn encode_frame(payload: &[u8], max_length: usize) -> Result<Bytes, TransportError> {
    if payload.len() > max_length || payload.len() > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge {
            length: payload.len(),
            max: max_length,
        });
    }
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Reassembles the frames of a stream from the chunks read so far.
///
/// ```rust
/// # use pddm::net::FrameBuffer;
/// let mut frames = FrameBuffer::new(1024);
/// frames.extend_from_slice(&[0, 0, 0, 3, 0xaa]);
/// assert!(frames.next_frame().unwrap().is_none());
/// frames.extend_from_slice(&[0xbb, 0xcc, 0, 0]);
/// assert_eq!(frames.next_frame().unwrap().unwrap(), &[0xaa, 0xbb, 0xcc][..]);
/// assert!(frames.next_frame().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    max_length: usize,
}

impl FrameBuffer {
    pub fn new(max_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_length,
        }
    }

    /// The buffer to read the stream into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Whether bytes of an incomplete frame are buffered.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Takes the next complete payload out of the buffer, if any.
    ///
    /// # Errors
    /// Fails if the next frame announces more than the maximal length. The stream cannot be
    /// resynchronized after that.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let length = (&self.buffer[..LENGTH_PREFIX]).get_u32() as usize;
        if length > self.max_length {
            return Err(TransportError::FrameTooLarge {
                length,
                max: self.max_length,
            });
        }
        let total = LENGTH_PREFIX + length;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }
        self.buffer.advance(LENGTH_PREFIX);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_by_byte() {
        let frame = encode_frame(b"hello meter", 64).unwrap();
        let mut frames = FrameBuffer::new(64);
        for byte in &frame[..frame.len() - 1] {
            frames.extend_from_slice(&[*byte]);
            assert!(frames.next_frame().unwrap().is_none());
        }
        frames.extend_from_slice(&frame[frame.len() - 1..]);
        assert_eq!(frames.next_frame().unwrap().unwrap(), &b"hello meter"[..]);
        assert!(!frames.has_partial_frame());
    }

    #[test]
    fn several_frames_in_one_chunk() {
        let mut chunk = encode_frame(&[1, 2, 3], 64).unwrap().to_vec();
        chunk.extend(encode_frame(&[], 64).unwrap());
        chunk.extend(encode_frame(&[4], 64).unwrap());
        chunk.extend(&[0, 0]);

        let mut frames = FrameBuffer::new(64);
        frames.extend_from_slice(&chunk);
        assert_eq!(frames.next_frame().unwrap().unwrap(), &[1, 2, 3][..]);
        assert!(frames.next_frame().unwrap().unwrap().is_empty());
        assert_eq!(frames.next_frame().unwrap().unwrap(), &[4][..]);
        assert!(frames.next_frame().unwrap().is_none());
        assert!(frames.has_partial_frame());
    }

    #[test]
    fn frame_too_large() {
        let mut frames = FrameBuffer::new(8);
        frames.extend_from_slice(&9_u32.to_be_bytes());
        assert!(matches!(
            frames.next_frame(),
            Err(TransportError::FrameTooLarge { length: 9, max: 8 })
        ));
        assert!(encode_frame(&[0; 9], 8).is_err());
        assert_eq!(encode_frame(&[0; 8], 8).unwrap().len(), 12);
    }
}
