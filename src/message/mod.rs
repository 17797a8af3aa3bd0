//! The messages exchanged between meters and the utility.
//!
//! # The envelope
//! Every [`Message`] is an envelope made of a [`MessageType`] tag, the id of the sender and a
//! [`Body`]. The tag tells the receiver which factory of the [`Registry`] reconstructs the body.
//!
//! ```no_rust
//! +--------+----------------+------------------------------+
//! |  tag   |   sender id    |     body (variable length)   |
//! | 1 byte | 4 bytes (i32)  |                              |
//! +--------+----------------+------------------------------+
//! ```
//!
//! # The bodies
//! - An [`OverlayEnvelope`] carries another body through the overlay network, together with the
//!   round of its sender and whether this is the last hop of the round.
//! - A [`ValueContribution`] is a [`ValueTuple`] and the signature that certifies it.
//! - A [`SignedValue`] is a contribution countersigned by the meters that agreed on it.
//! - A [`ByteBody`] is an opaque byte string: a ciphertext, a blinded value or a blind signature.
//!
//! Bodies are immutable once constructed and are shared between envelopes through an [`Arc`]
//! while relaying.
//!
//! [`Arc`]: std::sync::Arc

pub(crate) mod body;
#[allow(clippy::module_inception)]
pub(crate) mod message;
pub(crate) mod traits;
pub(crate) mod utils;

pub use self::{
    body::{
        bytes::{ByteBody, ByteBodyBuffer},
        contribution::{ValueContribution, ValueContributionBuffer},
        overlay::{OverlayEnvelope, OverlayEnvelopeBuffer, OverlayFlags},
        signed::{SignedValue, SignedValueBuffer},
        value::{FixedPoint, ValueTuple, ValueTupleBuffer},
        Body,
    },
    message::{BodyFactory, Message, MessageBuffer, MessageType, Registry, HEADER_LENGTH},
    traits::{FromBytes, LengthValueBuffer, ToBytes},
};

/// An error that signals a failure when trying to parse a message.
///
/// Truncated buffers, unknown tags and malformed fields all end up here with a context chain
/// describing what failed; the message is then dropped by the caller.
pub type DecodeError = anyhow::Error;
