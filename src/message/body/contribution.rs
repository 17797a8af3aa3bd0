//! Value contributions.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{
    convert::TryInto,
    fmt,
    hash::{Hash, Hasher},
    ops::Range,
};

use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};

use crate::{
    crypto::{ByteObject, SignatureArray},
    message::{
        body::value::{ValueTuple, ValueTupleBuffer},
        traits::{FromBytes, ToBytes},
        utils::range,
        DecodeError,
    },
};

/// A wrapper around a buffer that contains a [`ValueContribution`].
///
/// ```no_rust
/// +-----------------------------+----------------------------------+
/// | value tuple (variable size) | signature (256 bytes)            |
/// +-----------------------------+----------------------------------+
/// ```
pub struct ValueContributionBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> ValueContributionBuffer<T> {
    /// Performs bound checks for the various fields on `bytes` and returns a new
    /// [`ValueContributionBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are too short to contain the value tuple and the signature.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid ValueContributionBuffer")?;
        Ok(buffer)
    }

    /// Returns a [`ValueContributionBuffer`] without performing any bound checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        ValueTupleBuffer::new(self.inner.as_ref())?;
        let len = self.inner.as_ref().len();
        let end = self.signature_range().end;
        if len < end {
            return Err(anyhow!("invalid buffer length: {} < {}", len, end));
        }
        Ok(())
    }

    /// The length in bytes of the contribution contained in the buffer.
    ///
    /// # Panics
    /// This may panic if the buffer has not been checked before.
    pub fn length(&self) -> usize {
        self.signature_range().end
    }

    fn value_length(&self) -> usize {
        ValueTupleBuffer::new_unchecked(self.inner.as_ref()).length()
    }

    fn signature_range(&self) -> Range<usize> {
        range(self.value_length(), SignatureArray::LENGTH)
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> ValueContributionBuffer<&'a T> {
    /// Gets the value tuple field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn value(&self) -> &'a [u8] {
        &self.inner.as_ref()[..self.value_length()]
    }

    /// Gets the signature field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn signature(&self) -> &'a [u8] {
        &self.inner.as_ref()[self.signature_range()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A signed `(round, value, proxies)` tuple that can be contributed to an aggregation query.
///
/// The signature covers the serialized [`ValueTuple`]. It is all zeroes until a signature is
/// applied, which never verifies.
pub struct ValueContribution {
    pub value: ValueTuple,
    pub signature: SignatureArray,
}

impl ValueContribution {
    /// Creates an unsigned contribution.
    pub fn new(value: ValueTuple) -> Self {
        Self {
            value,
            signature: SignatureArray::zeroed(),
        }
    }

    pub fn with_signature(value: ValueTuple, signature: SignatureArray) -> Self {
        Self { value, signature }
    }

    /// The bytes covered by the signature.
    pub fn signed_data(&self) -> Vec<u8> {
        self.value.to_vec()
    }

    /// A digest of the contribution that is identical across processes and platforms, used to
    /// deduplicate contributions within a round.
    ///
    /// Like the [`Hash`] implementation, it covers the signature bytes and then the value bytes.
    pub fn stable_hash(&self) -> u64 {
        let digest = Sha256::new()
            .chain_update(self.signature.as_slice())
            .chain_update(self.value.to_vec())
            .finalize();
        // safe unwrap: a SHA-256 digest is 32 bytes long
        u64::from_be_bytes(digest[..8].try_into().unwrap())
    }
}

impl Hash for ValueContribution {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature.hash(state);
        self.value.hash(state);
    }
}

impl ToBytes for ValueContribution {
    fn buffer_length(&self) -> usize {
        self.value.buffer_length() + SignatureArray::LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        let value_length = self.value.to_bytes(buffer);
        let mut signature = &mut buffer.as_mut()[value_length..];
        value_length + self.signature.to_bytes(&mut signature)
    }
}

impl FromBytes for ValueContribution {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = ValueContributionBuffer::new(buffer.as_ref())?;
        let value = ValueTuple::from_byte_slice(&reader.value()).context("invalid value tuple")?;
        let signature =
            SignatureArray::from_byte_slice(&reader.signature()).context("invalid signature")?;
        Ok(Self { value, signature })
    }
}

impl fmt::Display for ValueContribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ValueContribution: {}}}", self.value)
    }
}
