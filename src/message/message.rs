//! Message envelopes and the dispatch of bodies.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

use std::{
    collections::HashMap,
    convert::{TryFrom, TryInto},
    fmt,
    sync::Arc,
};

use anyhow::{anyhow, Context};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    message::{
        body::{overlay, Body},
        ByteBody,
        DecodeError,
        FromBytes,
        SignedValue,
        ToBytes,
        ValueContribution,
    },
    PeerId,
};

pub(crate) mod ranges {
    use std::ops::Range;

    use crate::message::utils::range;

    /// Byte range corresponding to the tag in a message header
    pub const TAG: usize = 0;
    /// Byte range corresponding to the sender id in a message header
    pub const SENDER_ID: Range<usize> = range(TAG + 1, 4);
}

/// Length in bytes of a message header
pub const HEADER_LENGTH: usize = ranges::SENDER_ID.end;

/// A wrapper around a buffer that contains a [`Message`].
///
/// It provides getters and setters to access the different fields of
/// the message safely. A message is made of a header and a body:
///
/// ```no_rust
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      tag      |                   sender_id                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   sender_id   |                                               |
/// +-+-+-+-+-+-+-+-+                                               +
/// |                      body (variable length)                   |
/// ```
///
/// - `tag` indicates the kind of body (see [`MessageType`])
/// - `sender_id` is the id of the meter or utility that sent the message
///
/// # Examples
/// ## Reading a message
///
/// ```rust
/// use std::convert::TryFrom;
/// use pddm::message::{MessageBuffer, MessageType};
///
/// let mut bytes = vec![0x04]; // tag (opaque bytes)
/// bytes.extend(&3_i32.to_be_bytes()); // sender id
/// bytes.extend(vec![0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb]); // body
///
/// let buffer = MessageBuffer::new(&bytes).unwrap();
/// assert_eq!(MessageType::try_from(buffer.tag()).unwrap(), MessageType::Bytes);
/// assert_eq!(buffer.sender_id(), 3);
/// assert_eq!(buffer.body(), &[0x00, 0x00, 0x00, 0x02, 0xaa, 0xbb][..]);
/// ```
///
/// ## Writing a message
///
/// ```rust
/// use pddm::message::{MessageBuffer, MessageType};
///
/// let mut bytes = vec![0; 7];
/// let mut buffer = MessageBuffer::new_unchecked(&mut bytes);
/// buffer.set_tag(MessageType::Bytes.into());
/// buffer.set_sender_id(-1);
/// buffer.body_mut().copy_from_slice(&[0xaa, 0xbb]);
/// assert_eq!(bytes, vec![0x04, 0xff, 0xff, 0xff, 0xff, 0xaa, 0xbb]);
/// ```
pub struct MessageBuffer<T> {
    inner: T,
}

impl<T: AsRef<[u8]>> MessageBuffer<T> {
    /// Performs bound checks for the header fields on `bytes` and returns a new
    /// [`MessageBuffer`].
    ///
    /// # Errors
    /// Fails if the `bytes` are smaller than a message header.
    pub fn new(bytes: T) -> Result<Self, DecodeError> {
        let buffer = Self { inner: bytes };
        buffer
            .check_buffer_length()
            .context("not a valid MessageBuffer")?;
        Ok(buffer)
    }

    /// Returns a [`MessageBuffer`] without performing any bound checks.
    ///
    /// This means accessing the various fields may panic if the data
    /// is invalid.
    pub fn new_unchecked(bytes: T) -> Self {
        Self { inner: bytes }
    }

    /// Performs bound checks to ensure the fields can be accessed
    /// without panicking.
    pub fn check_buffer_length(&self) -> Result<(), DecodeError> {
        let len = self.inner.as_ref().len();
        if len < HEADER_LENGTH {
            return Err(anyhow!(
                "invalid buffer length: {} < {}",
                len,
                HEADER_LENGTH
            ));
        }
        Ok(())
    }

    /// Gets the tag field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn tag(&self) -> u8 {
        self.inner.as_ref()[ranges::TAG]
    }

    /// Gets the sender id field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn sender_id(&self) -> PeerId {
        // Unwrapping is OK, as the slice is guaranteed to be 4 bytes
        // long
        PeerId::from_be_bytes(self.inner.as_ref()[ranges::SENDER_ID].try_into().unwrap())
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> MessageBuffer<&'a T> {
    /// Gets the rest of the message.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn body(&self) -> &'a [u8] {
        &self.inner.as_ref()[HEADER_LENGTH..]
    }
}

impl<T: AsMut<[u8]> + AsRef<[u8]>> MessageBuffer<T> {
    /// Sets the tag field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn set_tag(&mut self, value: u8) {
        self.inner.as_mut()[ranges::TAG] = value;
    }

    /// Sets the sender id field.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn set_sender_id(&mut self, value: PeerId) {
        self.inner.as_mut()[ranges::SENDER_ID].copy_from_slice(&value.to_be_bytes());
    }

    /// Gets a mutable reference to the rest of the message.
    ///
    /// # Panics
    /// Accessing the field may panic if the buffer has not been checked before.
    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.inner.as_mut()[HEADER_LENGTH..]
    }
}

#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
/// A tag that indicates the kind of [`Body`] of a [`Message`].
pub enum MessageType {
    /// A tag for [`OverlayEnvelope`] bodies
    ///
    /// [`OverlayEnvelope`]: crate::message::OverlayEnvelope
    #[display(fmt = "overlay")]
    Overlay,
    /// A tag for [`ValueContribution`] bodies
    #[display(fmt = "value contribution")]
    Contribution,
    /// A tag for [`SignedValue`] bodies
    #[display(fmt = "signed value")]
    SignedValue,
    /// A tag for [`ByteBody`] bodies
    #[display(fmt = "bytes")]
    Bytes,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageType::Overlay,
            2 => MessageType::Contribution,
            3 => MessageType::SignedValue,
            4 => MessageType::Bytes,
            _ => return Err(anyhow!("invalid tag {}", value)),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Overlay => 1,
            MessageType::Contribution => 2,
            MessageType::SignedValue => 3,
            MessageType::Bytes => 4,
        }
    }
}

/// A function reconstructing a body from the bytes that follow its tag.
///
/// Factories of bodies that nest other bodies resolve them through the given registry.
pub type BodyFactory = fn(&Registry, &[u8]) -> Result<Body, DecodeError>;

/// The table of factories used to reconstruct bodies from their tag.
///
/// [`Registry::default()`] knows every built-in [`MessageType`]. The registry is handed to the
/// decoding functions explicitly, so a node may decode with a restricted set of kinds, or
/// install its own factory for a kind without touching the dispatch code.
///
/// # Examples
/// ```rust
/// # use pddm::message::{ByteBody, Message, MessageType, Registry, ToBytes};
/// let message = Message::new(3, ByteBody::from(vec![0x01]));
/// let bytes = message.to_vec();
///
/// assert_eq!(Message::from_byte_slice(&Registry::default(), &bytes).unwrap(), message);
/// // a registry without a factory for the tag rejects the message
/// assert!(Message::from_byte_slice(&Registry::empty(), &bytes).is_err());
/// ```
///
/// Overlay envelopes nest at most [`max_depth`](Registry::max_depth) levels deep. Deeper buffers
/// are rejected before they are parsed, so a peer cannot exhaust the stack of the decoding
/// thread.
#[derive(Clone)]
pub struct Registry {
    factories: Arc<HashMap<MessageType, BodyFactory>>,
    max_depth: usize,
}

impl Registry {
    /// The default maximal number of nested overlay envelopes.
    pub const DEFAULT_MAX_DEPTH: usize = 32;

    /// Creates a registry without any factory.
    pub fn empty() -> Self {
        Self {
            factories: Arc::new(HashMap::new()),
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    /// Installs the factory for the given kind of body and returns the one it replaces, if any.
    pub fn register(
        &mut self,
        message_type: MessageType,
        factory: BodyFactory,
    ) -> Option<BodyFactory> {
        Arc::make_mut(&mut self.factories).insert(message_type, factory)
    }

    /// Sets the maximal number of nested overlay envelopes.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The number of overlay envelopes that may still be nested.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// The registry resolving the bodies nested one level deeper.
    ///
    /// # Errors
    /// Fails if no more nesting is allowed.
    pub fn nested(&self) -> Result<Self, DecodeError> {
        let max_depth = self
            .max_depth
            .checked_sub(1)
            .ok_or_else(|| anyhow!("bodies are nested too deeply"))?;
        Ok(Self {
            factories: self.factories.clone(),
            max_depth,
        })
    }

    /// Reconstructs the body starting at the beginning of `bytes` from its raw tag.
    ///
    /// # Errors
    /// Fails if the tag is unknown, if no factory is registered for it, or if the factory fails.
    pub fn decode_body(&self, tag: u8, bytes: &[u8]) -> Result<Body, DecodeError> {
        let message_type = MessageType::try_from(tag)?;
        let factory = self
            .factories
            .get(&message_type)
            .ok_or_else(|| anyhow!("no factory registered for {} bodies", message_type))?;
        factory(self, bytes).with_context(|| format!("failed to parse {} body", message_type))
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MessageType::Overlay, overlay::read_body);
        registry.register(MessageType::Contribution, |_, bytes| {
            ValueContribution::from_byte_slice(&bytes).map(Into::into)
        });
        registry.register(MessageType::SignedValue, |_, bytes| {
            SignedValue::from_byte_slice(&bytes).map(Into::into)
        });
        registry.register(MessageType::Bytes, |_, bytes| {
            ByteBody::from_byte_slice(&bytes).map(Into::into)
        });
        registry
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
/// An envelope made of the id of the sender and a body.
///
/// The body is shared between the clones of a message and is never mutated after construction,
/// which lets relays forward a body in a new envelope without copying it.
pub struct Message {
    /// The id of the meter or utility that sent the message.
    pub sender_id: PeerId,
    /// Message body
    pub body: Arc<Body>,
}

impl Message {
    /// Creates a new message from the given sender.
    pub fn new(sender_id: PeerId, body: impl Into<Body>) -> Self {
        Self::with_shared_body(sender_id, Arc::new(body.into()))
    }

    /// Creates a new message around a body that may already be referenced by other messages.
    pub fn with_shared_body(sender_id: PeerId, body: Arc<Body>) -> Self {
        Self { sender_id, body }
    }

    /// The tag of the message, determined by its body.
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Parse the given message, resolving its body with the factories of the `registry`.
    ///
    /// # Errors
    /// Fails if the buffer is truncated, if the tag is unknown, if the body is malformed, or if
    /// the buffer has bytes left after the body.
    pub fn from_byte_slice<T: AsRef<[u8]>>(
        registry: &Registry,
        buffer: &T,
    ) -> Result<Self, DecodeError> {
        let reader = MessageBuffer::new(buffer.as_ref())?;
        let body = registry
            .decode_body(reader.tag(), reader.body())
            .context("failed to parse message body")?;

        let message = Self::new(reader.sender_id(), body);
        let expected = message.buffer_length();
        let actual = buffer.as_ref().len();
        if actual != expected {
            return Err(anyhow!(
                "invalid message length: the message takes {} bytes, but the buffer is {} bytes long",
                expected,
                actual
            ));
        }
        Ok(message)
    }
}

impl ToBytes for Message {
    fn buffer_length(&self) -> usize {
        HEADER_LENGTH + self.body.buffer_length()
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        let mut writer = MessageBuffer::new_unchecked(buffer.as_mut());
        writer.set_tag(self.message_type().into());
        writer.set_sender_id(self.sender_id);
        let mut body = writer.body_mut();
        HEADER_LENGTH + self.body.to_bytes(&mut body)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Sender={}|{}}}", self.sender_id, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{FixedPoint, OverlayEnvelope, ValueTuple},
        testutils::messages as helpers,
    };

    #[test]
    fn buffer_read() {
        let (_, bytes) = helpers::message(helpers::contribution);
        let buffer = MessageBuffer::new(&bytes).unwrap();
        assert_eq!(
            MessageType::try_from(buffer.tag()).unwrap(),
            MessageType::Contribution
        );
        assert_eq!(buffer.sender_id(), helpers::SENDER_ID);
        assert_eq!(buffer.body(), helpers::contribution().1.as_slice());
    }

    #[test]
    fn buffer_write() {
        let (_, expected) = helpers::message(helpers::contribution);
        let mut bytes = vec![0; expected.len()];
        let mut buffer = MessageBuffer::new_unchecked(&mut bytes);
        buffer.set_tag(MessageType::Contribution.into());
        buffer.set_sender_id(helpers::SENDER_ID);
        buffer
            .body_mut()
            .copy_from_slice(helpers::contribution().1.as_slice());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn encode_every_kind() {
        let kinds = vec![
            helpers::message(helpers::overlay),
            helpers::message(helpers::contribution),
            helpers::message(helpers::signed_value),
            helpers::message(helpers::byte_body),
        ];
        for (message, bytes) in kinds {
            assert_eq!(message.buffer_length(), bytes.len());
            let mut buf = vec![0xff; message.buffer_length()];
            assert_eq!(message.to_bytes(&mut buf), bytes.len());
            assert_eq!(buf, bytes);
        }
    }

    #[test]
    fn decode_every_kind() {
        let registry = Registry::default();
        let kinds = vec![
            helpers::message(helpers::overlay),
            helpers::message(helpers::contribution),
            helpers::message(helpers::signed_value),
            helpers::message(helpers::byte_body),
        ];
        for (message, bytes) in kinds {
            assert_eq!(Message::from_byte_slice(&registry, &bytes).unwrap(), message);
        }
    }

    #[test]
    fn boundary_values() {
        let registry = Registry::default();
        let messages = vec![
            Message::new(0, ByteBody::default()),
            Message::new(PeerId::MIN, ByteBody::from(vec![0xff; 1 << 16])),
            Message::new(
                PeerId::MAX,
                OverlayEnvelope::new(
                    i32::MIN,
                    true,
                    ValueContribution::new(ValueTuple::new(
                        -7,
                        vec![FixedPoint::from_bits(i64::MIN), FixedPoint::from_bits(i64::MAX)],
                        vec![],
                    )),
                ),
            ),
        ];
        for message in messages {
            let bytes = message.to_vec();
            assert_eq!(bytes.len(), message.buffer_length());
            assert_eq!(Message::from_byte_slice(&registry, &bytes).unwrap(), message);
        }
    }

    #[test]
    fn decode_unknown_tag() {
        let (_, mut bytes) = helpers::message(helpers::byte_body);
        for tag in [0_u8, 5, 0xff].iter() {
            bytes[ranges::TAG] = *tag;
            assert!(Message::from_byte_slice(&Registry::default(), &bytes).is_err());
        }
    }

    #[test]
    fn decode_truncated() {
        let registry = Registry::default();
        for (_, bytes) in vec![
            helpers::message(helpers::overlay),
            helpers::message(helpers::contribution),
            helpers::message(helpers::signed_value),
            helpers::message(helpers::byte_body),
        ] {
            for end in 0..bytes.len() {
                assert!(Message::from_byte_slice(&registry, &&bytes[..end]).is_err());
            }
        }
    }

    #[test]
    fn decode_trailing_bytes() {
        let (_, mut bytes) = helpers::message(helpers::contribution);
        bytes.push(0x00);
        assert!(Message::from_byte_slice(&Registry::default(), &bytes).is_err());
    }

    #[test]
    fn registry_without_nested_kind() {
        let mut registry = Registry::empty();
        registry.register(MessageType::Overlay, overlay::read_body);
        let (_, bytes) = helpers::message(helpers::overlay);
        // the nested contribution has no factory
        assert!(Message::from_byte_slice(&registry, &bytes).is_err());

        registry.register(MessageType::Contribution, |_, bytes| {
            ValueContribution::from_byte_slice(&bytes).map(Into::into)
        });
        assert!(Message::from_byte_slice(&registry, &bytes).is_ok());
    }

    /// A message made of `depth` overlay envelopes around an empty byte body.
    fn nested_overlays(depth: usize) -> Vec<u8> {
        let mut bytes = vec![u8::from(MessageType::Overlay)];
        bytes.extend(&helpers::SENDER_ID.to_be_bytes());
        for level in 0..depth {
            bytes.extend(&7_i32.to_be_bytes());
            bytes.push(0);
            bytes.push(if level + 1 == depth {
                MessageType::Bytes.into()
            } else {
                MessageType::Overlay.into()
            });
        }
        bytes.extend(&0_u32.to_be_bytes());
        bytes
    }

    #[test]
    fn decode_nested_overlays() {
        let registry = Registry::default();
        let max = Registry::DEFAULT_MAX_DEPTH;
        let message = Message::from_byte_slice(&registry, &nested_overlays(max)).unwrap();
        assert_eq!(message.to_vec(), nested_overlays(max));
        assert!(Message::from_byte_slice(&registry, &nested_overlays(max + 1)).is_err());

        let registry = Registry::default().with_max_depth(1);
        assert!(Message::from_byte_slice(&registry, &nested_overlays(1)).is_ok());
        assert!(Message::from_byte_slice(&registry, &nested_overlays(2)).is_err());
        let registry = registry.with_max_depth(0);
        assert!(Message::from_byte_slice(&registry, &nested_overlays(1)).is_err());
    }

    #[test]
    fn decode_overlays_filling_a_frame() {
        // a megabyte of six-byte envelopes is rejected without being walked
        let bytes = nested_overlays((1 << 20) / 6);
        assert!(Message::from_byte_slice(&Registry::default(), &bytes).is_err());
    }

    #[test]
    fn nested_registry_shares_factories() {
        let registry = Registry::default().with_max_depth(2);
        let nested = registry.nested().unwrap();
        assert_eq!(nested.max_depth(), 1);
        assert!(nested.decode_body(MessageType::Bytes.into(), &[0, 0, 0, 0]).is_ok());
        assert!(nested.nested().unwrap().nested().is_err());
    }

    #[test]
    fn tag_roundtrip() {
        for tag in 1..=4_u8 {
            assert_eq!(u8::from(MessageType::try_from(tag).unwrap()), tag);
        }
    }
}
