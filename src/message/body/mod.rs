//! Message bodies.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

pub(crate) mod bytes;
pub(crate) mod contribution;
pub(crate) mod overlay;
pub(crate) mod signed;
pub(crate) mod value;

use std::fmt;

use derive_more::From;

use crate::message::{
    body::{
        bytes::ByteBody,
        contribution::ValueContribution,
        overlay::OverlayEnvelope,
        signed::SignedValue,
    },
    traits::ToBytes,
    MessageType,
};

/// The body of a [`Message`].
///
/// The set of bodies is closed: equality first compares the variants, then the fields.
///
/// [`Message`]: crate::message::Message
#[derive(From, Eq, PartialEq, Debug, Clone)]
pub enum Body {
    /// A body relayed through the overlay network.
    Overlay(OverlayEnvelope),
    /// A signed value tuple.
    Contribution(ValueContribution),
    /// A contribution with countersignatures.
    SignedValue(SignedValue),
    /// An opaque byte string.
    Bytes(ByteBody),
}

impl Body {
    /// The tag identifying this kind of body on the wire.
    pub fn message_type(&self) -> MessageType {
        match self {
            Body::Overlay(_) => MessageType::Overlay,
            Body::Contribution(_) => MessageType::Contribution,
            Body::SignedValue(_) => MessageType::SignedValue,
            Body::Bytes(_) => MessageType::Bytes,
        }
    }

    /// Whether this body is an opaque byte string, such as an encrypted body.
    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }
}

impl ToBytes for Body {
    fn buffer_length(&self) -> usize {
        match self {
            Body::Overlay(b) => b.buffer_length(),
            Body::Contribution(b) => b.buffer_length(),
            Body::SignedValue(b) => b.buffer_length(),
            Body::Bytes(b) => b.buffer_length(),
        }
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) -> usize {
        match self {
            Body::Overlay(b) => b.to_bytes(buffer),
            Body::Contribution(b) => b.to_bytes(buffer),
            Body::SignedValue(b) => b.to_bytes(buffer),
            Body::Bytes(b) => b.to_bytes(buffer),
        }
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Overlay(b) => fmt::Display::fmt(b, f),
            Body::Contribution(b) => fmt::Display::fmt(b, f),
            Body::SignedValue(b) => fmt::Display::fmt(b, f),
            Body::Bytes(b) => fmt::Display::fmt(b, f),
        }
    }
}
