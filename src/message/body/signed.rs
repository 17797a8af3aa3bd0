//! Countersigned values.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{collections::BTreeMap, convert::TryInto, fmt, ops::Range};

use anyhow::{anyhow, Context};

use crate::{
    crypto::{ByteObject, SignatureArray},
    message::{
        body::contribution::{ValueContribution, ValueContributionBuffer},
        traits::{FromBytes, ToBytes},
        utils::range,
        DecodeError,
    },
    PeerId,
};

const COUNT_LENGTH: usize = 4;
const SIGNER_LENGTH: usize = 4;
const ENTRY_LENGTH: usize = SIGNER_LENGTH + SignatureArray::LENGTH;

/// A wrapper around a buffer that contains a [`SignedValue`].
///
/// ```no_rust
/// +----------------------------------+-------------+-------------------------------------------+
/// | contribution (variable size)     | n (u32)     | n * (signer id (i32), signature (256 B))  |
/// +----------------------------------+-------------+-------------------------------------------+
/// ```
pub struct SignedValueBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> SignedValueBuffer<T> {
    /// Performs bound checks for the various fields on `bytes` and returns a new
    /// [`SignedValueBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are shorter than the lengths declared by the buffer.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid SignedValueBuffer")?;
        Ok(buffer)
    }

    /// Returns a [`SignedValueBuffer`] without performing any bound checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        ValueContributionBuffer::new(self.inner.as_ref())?;
        let len = self.inner.as_ref().len();
        let count_end = self.count_range().end;
        if len < count_end {
            return Err(anyhow!("invalid buffer length: {} < {}", len, count_end));
        }
        let end = (self.count() as usize)
            .checked_mul(ENTRY_LENGTH)
            .and_then(|entries| entries.checked_add(count_end))
            .ok_or_else(|| anyhow!("invalid signature count: {}", self.count()))?;
        if len < end {
            return Err(anyhow!("invalid buffer length: {} < {}", len, end));
        }
        Ok(())
    }

    /// Gets the number of countersignatures.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn count(&self) -> u32 {
        // safe unwrap: the slice is exactly 4 bytes long
        u32::from_be_bytes(self.inner.as_ref()[self.count_range()].try_into().unwrap())
    }

    /// The length in bytes of the signed value contained in the buffer.
    ///
    /// # Panics
    /// This may panic if the buffer has not been checked before.
    pub fn length(&self) -> usize {
        self.signatures_range().end
    }

    fn contribution_length(&self) -> usize {
        ValueContributionBuffer::new_unchecked(self.inner.as_ref()).length()
    }

    fn count_range(&self) -> Range<usize> {
        range(self.contribution_length(), COUNT_LENGTH)
    }

    fn signatures_range(&self) -> Range<usize> {
        range(
            self.count_range().end,
            self.count() as usize * ENTRY_LENGTH,
        )
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> SignedValueBuffer<&'a T> {
    /// Gets the contribution field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn contribution(&self) -> &'a [u8] {
        &self.inner.as_ref()[..self.contribution_length()]
    }

    /// Gets the `(signer id, signature)` entries.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn signatures(&self) -> &'a [u8] {
        &self.inner.as_ref()[self.signatures_range()]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A contribution countersigned by the meters that agreed on it.
///
/// The countersignatures cover the serialized contribution, _i.e._ the value tuple and the
/// signature of the utility over it. They are encoded in ascending order of signer id.
pub struct SignedValue {
    pub contribution: ValueContribution,
    pub signatures: BTreeMap<PeerId, SignatureArray>,
}

impl SignedValue {
    /// Creates a signed value without any countersignature.
    pub fn new(contribution: ValueContribution) -> Self {
        Self {
            contribution,
            signatures: BTreeMap::new(),
        }
    }

    /// The bytes covered by the countersignatures.
    pub fn signed_data(&self) -> Vec<u8> {
        self.contribution.to_vec()
    }
}

impl ToBytes for SignedValue {
    fn buffer_length(&self) -> usize {
        self.contribution.buffer_length() + COUNT_LENGTH + self.signatures.len() * ENTRY_LENGTH
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        let mut offset = self.contribution.to_bytes(buffer);
        let bytes = buffer.as_mut();
        bytes[range(offset, COUNT_LENGTH)]
            .copy_from_slice(&(self.signatures.len() as u32).to_be_bytes());
        offset += COUNT_LENGTH;
        for (signer, signature) in &self.signatures {
            bytes[range(offset, SIGNER_LENGTH)].copy_from_slice(&signer.to_be_bytes());
            offset += SIGNER_LENGTH;
            let mut signature_bytes = &mut bytes[offset..];
            offset += signature.to_bytes(&mut signature_bytes);
        }
        offset
    }
}

impl FromBytes for SignedValue {
    fn from_byte_slice<T: AsRef<[u8]>>(buffer: &T) -> Result<Self, DecodeError> {
        let reader = SignedValueBuffer::new(buffer.as_ref())?;
        let contribution = ValueContribution::from_byte_slice(&reader.contribution())
            .context("invalid contribution")?;

        let mut signatures = BTreeMap::new();
        for entry in reader.signatures().chunks_exact(ENTRY_LENGTH) {
            // safe unwrap: the slice is exactly 4 bytes long
            let signer = PeerId::from_be_bytes(entry[..SIGNER_LENGTH].try_into().unwrap());
            let signature = SignatureArray::from_byte_slice(&&entry[SIGNER_LENGTH..])
                .context("invalid countersignature")?;
            if signatures.insert(signer, signature).is_some() {
                return Err(anyhow!("invalid signed value: duplicated signer {}", signer));
            }
        }
        Ok(Self {
            contribution,
            signatures,
        })
    }
}

impl fmt::Display for SignedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let signers: Vec<&PeerId> = self.signatures.keys().collect();
        write!(
            f,
            "{{SignedValue: {}|Signers={:?}}}",
            self.contribution.value, signers
        )
    }
}
