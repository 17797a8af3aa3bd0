//! Opaque byte bodies.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::fmt;

use anyhow::Context;
use derive_more::From;

use crate::message::{
    traits::{FromBytes, LengthValueBuffer, ToBytes, LENGTH_FIELD},
    DecodeError,
};

/// A wrapper around a buffer that contains a [`ByteBody`].
pub type ByteBodyBuffer<T> = LengthValueBuffer<T>;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, From)]
/// An opaque byte string.
///
/// Once a value has been encrypted or blinded, its structure is erased and it travels as a
/// [`ByteBody`]: ciphertexts, blinded values and blind signatures all use this body.
///
/// # Examples
/// ```rust
/// # use pddm::message::{ByteBody, FromBytes, ToBytes};
/// let body = ByteBody::from(vec![0xaa, 0xbb]);
/// assert_eq!(body.to_vec(), vec![0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb]);
/// assert_eq!(ByteBody::from_byte_slice(&body.to_vec()).unwrap(), body);
/// ```
pub struct ByteBody(Vec<u8>);

impl ByteBody {
    /// The maximal number of bytes a body can hold.
    pub const MAX_LENGTH: usize = u32::MAX as usize;

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for ByteBody {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl ToBytes for ByteBody {
    fn buffer_length(&self) -> usize {
        LENGTH_FIELD.end + self.0.len()
    }

    /// # Panics
    /// Panics if the body holds more than [`ByteBody::MAX_LENGTH`] bytes, or if the buffer is too
    /// small.
    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        assert!(
            self.0.len() <= Self::MAX_LENGTH,
            "byte body of {} bytes exceeds the length field",
            self.0.len()
        );
        let mut writer = LengthValueBuffer::new_unchecked(buffer.as_mut());
        writer.set_length(self.0.len() as u32);
        writer.value_mut().copy_from_slice(self.0.as_slice());
        self.buffer_length()
    }
}

impl FromBytes for ByteBody {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = LengthValueBuffer::new(buffer.as_ref()).context("invalid byte body")?;
        Ok(Self(reader.value().to_vec()))
    }
}

impl fmt::Display for ByteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Bytes: {} bytes}}", self.0.len())
    }
}
