//! Message traits.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{convert::TryInto, ops::Range};

use anyhow::{anyhow, Context};

use crate::{crypto::ByteObject, message::DecodeError};

/// An interface for serializable message types.
///
/// See also [`FromBytes`] for deserialization.
pub trait ToBytes {
    /// The exact length of the buffer for encoding the type.
    fn buffer_length(&self) -> usize;

    /// Serialize the type in the given buffer and return the number of bytes written, which is
    /// always [`buffer_length()`].
    ///
    /// # Panics
    /// This method may panic if the given buffer is too small. Thus, [`buffer_length()`] must be
    /// called prior to calling this, and a large enough buffer must be provided.
    ///
    /// [`buffer_length()`]: #method.buffer_length
    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize;

    /// Serialize the type into a newly allocated buffer of exactly [`buffer_length()`] bytes.
    ///
    /// [`buffer_length()`]: #method.buffer_length
    fn to_vec(&self) -> Vec<u8> {
        let mut buffer = vec![0; self.buffer_length()];
        let written = self.to_bytes(&mut buffer);
        debug_assert_eq!(written, buffer.len());
        buffer
    }
}

/// An interface for deserializable message types.
///
/// See also [`ToBytes`] for serialization.
pub trait FromBytes: Sized {
    /// Deserialize the type from the start of the given buffer.
    ///
    /// Bytes following the object are ignored at this level: the envelope decoding in
    /// [`Message`] is responsible for rejecting trailing bytes.
    ///
    /// # Errors
    /// Fails if the buffer is shorter than the lengths it declares, or if a field doesn't pass
    /// the validity checks of the type.
    ///
    /// [`Message`]: crate::message::Message
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError>;
}

impl<T> FromBytes for T
where
    T: ByteObject,
{
    fn from_byte_slice<U: AsRef<[u8]>>(buffer: &U) -> Result<Self, DecodeError> {
        let bytes = buffer.as_ref();
        if bytes.len() < Self::LENGTH {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                bytes.len(),
                Self::LENGTH
            ));
        }
        Self::from_slice(&bytes[..Self::LENGTH])
            .ok_or_else(|| anyhow!("failed to deserialize byte object"))
    }
}

impl<T> ToBytes for T
where
    T: ByteObject,
{
    fn buffer_length(&self) -> usize {
        Self::LENGTH
    }

    fn to_bytes<U: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut U) -> usize {
        buffer.as_mut()[..Self::LENGTH].copy_from_slice(self.as_slice());
        Self::LENGTH
    }
}

/// A helper for encoding and decoding Length-Value (LV) fields.
///
/// The 4 bytes [`length()`] field gives the length of the value only, _i.e._ an empty value is
/// encoded as `0x00000000`.
///
/// # Examples
/// ## Decoding a LV field
///
/// ```rust
/// # use pddm::message::LengthValueBuffer;
/// let bytes = vec![
///     0x00, 0x00, 0x00, 0x01, // Length = 1
///     0xff, // Value = 0xff
///     0x11, 0x22, // Extra bytes
/// ];
/// let buffer = LengthValueBuffer::new(&bytes).unwrap();
/// assert_eq!(buffer.length(), 1);
/// assert_eq!(buffer.total_length(), 5);
/// assert_eq!(buffer.value(), &[0xff][..]);
/// ```
///
/// ## Encoding a LV field
///
/// ```rust
/// # use pddm::message::LengthValueBuffer;
/// let mut bytes = vec![0xff; 9];
/// let mut buffer = LengthValueBuffer::new_unchecked(&mut bytes);
/// // It is important to set the length field before setting the value, otherwise, `value_mut()` will panic.
/// buffer.set_length(4);
/// buffer.value_mut().copy_from_slice(&[0, 1, 2, 3][..]);
/// let expected = vec![
///     0x00, 0x00, 0x00, 0x04, // Length = 4
///     0x00, 0x01, 0x02, 0x03, // Value
///     0xff, // unchanged
/// ];
///
/// assert_eq!(bytes, expected);
/// ```
///
/// [`length()`]: #method.length
pub struct LengthValueBuffer<T> {
    inner: T,
}

/// The size of the length field for encoding a Length-Value item.
pub(crate) const LENGTH_FIELD: Range<usize> = 0..4;

impl<T: AsRef<[u8]>> LengthValueBuffer<T> {
    /// Returns a new [`LengthValueBuffer`].
    ///
    /// # Errors
    /// This method performs bound checks and returns an error if the given buffer is not a valid
    /// Length-Value item.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid LengthValueBuffer")?;
        Ok(buffer)
    }

    /// Create a new [`LengthValueBuffer`] without any bound checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Check that the buffer is a valid Length-Value item.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < LENGTH_FIELD.end {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                LENGTH_FIELD.end
            ));
        }

        let total_length = self.total_length();
        if len < total_length {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                total_length,
            ));
        }
        Ok(())
    }

    /// Returns the length field, _i.e._ the length of the value.
    ///
    /// # Panics
    /// This method may panic if buffer is not a valid Length-Value item.
    pub fn length(&self) -> u32 {
        // unwrap safe: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[LENGTH_FIELD].try_into().unwrap())
    }

    /// Returns the length of the whole item, length field included.
    pub fn total_length(&self) -> usize {
        LENGTH_FIELD.end.saturating_add(self.length() as usize)
    }

    /// Returns the range corresponding to the value.
    fn value_range(&self) -> Range<usize> {
        LENGTH_FIELD.end..self.total_length()
    }
}

impl<T: AsMut<[u8]>> LengthValueBuffer<T> {
    /// Sets the length field to the given value.
    ///
    /// # Panics
    /// This method may panic if buffer is not a valid Length-Value item.
    pub fn set_length(&mut self, value: u32) {
        self.inner.as_mut()[LENGTH_FIELD].copy_from_slice(&value.to_be_bytes());
    }
}

impl<'a, T: AsRef<[u8]> + AsMut<[u8]> + ?Sized> LengthValueBuffer<&'a mut T> {
    /// Gets a mutable reference to the value field.
    ///
    /// # Panics
    /// This method may panic if buffer is not a valid Length-Value item.
    pub fn value_mut(&mut self) -> &mut [u8] {
        let range = self.value_range();
        &mut self.inner.as_mut()[range]
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> LengthValueBuffer<&'a T> {
    /// Gets a reference to the value field.
    ///
    /// # Panics
    /// This method may panic if buffer is not a valid Length-Value item.
    pub fn value(&self) -> &'a [u8] {
        &self.inner.as_ref()[self.value_range()]
    }
}
