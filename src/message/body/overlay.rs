//! Overlay envelopes.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{convert::TryInto, fmt, ops::Range, sync::Arc};

use anyhow::{anyhow, Context};

use crate::{
    message::{
        body::Body,
        message::Registry,
        traits::ToBytes,
        utils::range,
        DecodeError,
        MessageType,
    },
    Round,
};

const SENDER_ROUND_RANGE: Range<usize> = range(0, 4);
const FLAGS: usize = SENDER_ROUND_RANGE.end;
const BODY_TAG: usize = FLAGS + 1;
const BODY_OFFSET: usize = BODY_TAG + 1;

bitflags::bitflags! {
    /// A bitmask that defines flags for an [`OverlayEnvelope`].
    pub struct OverlayFlags: u8 {
        /// Indicates whether this delivery is the last overlay hop of the round.
        const FINAL = 1 << 0;
    }
}

/// A wrapper around a buffer that contains an [`OverlayEnvelope`].
///
/// ```no_rust
/// +--------------------+-----------+-------------+--------------------------------+
/// | sender_round (i32) | flags (1) | body tag (1)| body (variable length)         |
/// +--------------------+-----------+-------------+--------------------------------+
/// ```
///
/// # Examples
/// ```rust
/// # use std::convert::TryFrom;
/// # use pddm::message::{MessageType, OverlayEnvelopeBuffer, OverlayFlags};
/// let mut bytes = (-3_i32).to_be_bytes().to_vec(); // sender round
/// bytes.push(0x01); // final message
/// bytes.push(0x04); // nested opaque body
/// bytes.extend(vec![0x00, 0x00, 0x00, 0x01, 0xee]);
///
/// let buffer = OverlayEnvelopeBuffer::new(&bytes).unwrap();
/// assert_eq!(buffer.sender_round(), -3);
/// assert_eq!(buffer.flags(), OverlayFlags::FINAL.bits());
/// assert_eq!(MessageType::try_from(buffer.body_tag()).unwrap(), MessageType::Bytes);
/// assert_eq!(buffer.body(), &[0x00, 0x00, 0x00, 0x01, 0xee][..]);
/// ```
pub struct OverlayEnvelopeBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> OverlayEnvelopeBuffer<T> {
    /// Performs bound checks for the various fields on `bytes` and returns a new
    /// [`OverlayEnvelopeBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are smaller than a minimal-sized overlay envelope.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid OverlayEnvelopeBuffer")?;
        Ok(buffer)
    }

    /// Returns an [`OverlayEnvelopeBuffer`] without performing any bound checks.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < BODY_OFFSET {
            return Err(anyhow!("invalid buffer length: {} < {}", len, BODY_OFFSET));
        }
        Ok(())
    }

    /// Gets the sender round field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn sender_round(&self) -> Round {
        // safe unwrap: the slice is exactly 4 bytes long
        Round::from_be_bytes(self.inner.as_ref()[SENDER_ROUND_RANGE].try_into().unwrap())
    }

    /// Gets the raw flags field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn flags(&self) -> u8 {
        self.inner.as_ref()[FLAGS]
    }

    /// Gets the tag of the nested body.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn body_tag(&self) -> u8 {
        self.inner.as_ref()[BODY_TAG]
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> OverlayEnvelopeBuffer<&'a T> {
    /// Gets the nested body.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn body(&self) -> &'a [u8] {
        &self.inner.as_ref()[BODY_OFFSET..]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> OverlayEnvelopeBuffer<T> {
    pub fn set_sender_round(&mut self, round: Round) {
        self.inner.as_mut()[SENDER_ROUND_RANGE].copy_from_slice(&round.to_be_bytes());
    }

    pub fn set_flags(&mut self, flags: OverlayFlags) {
        self.inner.as_mut()[FLAGS] = flags.bits();
    }

    pub fn set_body_tag(&mut self, tag: u8) {
        self.inner.as_mut()[BODY_TAG] = tag;
    }

    /// Gets a mutable reference to the nested body.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[BODY_OFFSET..]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A body relayed through the overlay network.
///
/// The nested body is shared: relaying meters re-wrap the same body in new envelopes without
/// copying it. It is never mutated after construction.
pub struct OverlayEnvelope {
    /// The round of the meter that sent this envelope.
    pub sender_round: Round,
    /// Whether this delivery is the last overlay hop of the round.
    pub is_final_message: bool,
    pub body: Arc<Body>,
}

impl OverlayEnvelope {
    pub fn new(sender_round: Round, is_final_message: bool, body: impl Into<Body>) -> Self {
        Self::with_shared_body(sender_round, is_final_message, Arc::new(body.into()))
    }

    pub fn with_shared_body(sender_round: Round, is_final_message: bool, body: Arc<Body>) -> Self {
        Self {
            sender_round,
            is_final_message,
            body,
        }
    }

    fn flags(&self) -> OverlayFlags {
        if self.is_final_message {
            OverlayFlags::FINAL
        } else {
            OverlayFlags::empty()
        }
    }

    /// Reads an overlay envelope from the start of the given buffer, resolving the nested body
    /// with the factories of the `registry`.
    ///
    /// # Errors
    /// Fails if the buffer is truncated, if unknown flags are set, if the envelope is nested
    /// deeper than the registry allows, or if the nested body cannot be parsed.
    pub fn read<T: AsRef<[u8]>>(registry: &Registry, buffer: &T) -> Result<Self, DecodeError> {
        let registry = registry.nested()?;
        let reader = OverlayEnvelopeBuffer::new(buffer.as_ref())?;
        let flags = OverlayFlags::from_bits(reader.flags())
            .ok_or_else(|| anyhow!("invalid overlay flags {:#04x}", reader.flags()))?;
        let body = registry
            .decode_body(reader.body_tag(), reader.body())
            .context("invalid nested body")?;
        Ok(Self::new(
            reader.sender_round(),
            flags.contains(OverlayFlags::FINAL),
            body,
        ))
    }
}

impl ToBytes for OverlayEnvelope {
    fn buffer_length(&self) -> usize {
        BODY_OFFSET + self.body.buffer_length()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        let mut writer = OverlayEnvelopeBuffer::new_unchecked(buffer.as_mut());
        writer.set_sender_round(self.sender_round);
        writer.set_flags(self.flags());
        writer.set_body_tag(self.body.message_type().into());
        let mut body = writer.body_mut();
        BODY_OFFSET + self.body.to_bytes(&mut body)
    }
}

impl fmt::Display for OverlayEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{SenderRound={}|Final={}|{}}}",
            self.sender_round, self.is_final_message, self.body
        )
    }
}

/// The factory of [`MessageType::Overlay`] bodies.
pub(crate) fn read_body(registry: &Registry, bytes: &[u8]) -> Result<Body, DecodeError> {
    OverlayEnvelope::read(registry, &bytes).map(Into::into)
}
