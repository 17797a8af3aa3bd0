//! Message fixtures and their expected encodings.

use std::collections::BTreeMap;

use crate::{
    crypto::{ByteObject, SignatureArray},
    message::{
        Body,
        ByteBody,
        FixedPoint,
        Message,
        OverlayEnvelope,
        SignedValue,
        ValueContribution,
        ValueTuple,
    },
    PeerId,
};

/// The sender of the fixture messages.
pub const SENDER_ID: PeerId = 3;

pub fn value_tuple() -> (ValueTuple, Vec<u8>) {
    let value = ValueTuple::new(7, vec![FixedPoint::from_f64(42.5)], vec![1, 2]);

    let mut bytes = 7_i32.to_be_bytes().to_vec(); // round
    bytes.extend(&1_u32.to_be_bytes()); // value count
    bytes.extend(&(42_i64 * 65536 + 32768).to_be_bytes()); // 42.5
    bytes.extend(&2_u32.to_be_bytes()); // proxy count
    bytes.extend(&1_i32.to_be_bytes());
    bytes.extend(&2_i32.to_be_bytes());
    (value, bytes)
}

pub fn contribution() -> (ValueContribution, Vec<u8>) {
    let (value, mut bytes) = value_tuple();
    let contribution = ValueContribution::with_signature(value, SignatureArray::fill_with(0x5a));
    bytes.extend(vec![0x5a; SignatureArray::LENGTH]);
    (contribution, bytes)
}

pub fn signed_value() -> (SignedValue, Vec<u8>) {
    let (contribution, mut bytes) = contribution();
    let mut signatures = BTreeMap::new();
    signatures.insert(5, SignatureArray::fill_with(0x05));
    signatures.insert(4, SignatureArray::fill_with(0x04));
    let signed = SignedValue {
        contribution,
        signatures,
    };

    bytes.extend(&2_u32.to_be_bytes()); // signature count
    // ascending signer ids
    bytes.extend(&4_i32.to_be_bytes());
    bytes.extend(vec![0x04; SignatureArray::LENGTH]);
    bytes.extend(&5_i32.to_be_bytes());
    bytes.extend(vec![0x05; SignatureArray::LENGTH]);
    (signed, bytes)
}

pub fn overlay() -> (OverlayEnvelope, Vec<u8>) {
    let (contribution, contribution_bytes) = contribution();
    let overlay = OverlayEnvelope::new(7, false, contribution);

    let mut bytes = 7_i32.to_be_bytes().to_vec(); // sender round
    bytes.push(0x00); // flags
    bytes.push(0x02); // nested contribution
    bytes.extend(contribution_bytes);
    (overlay, bytes)
}

pub fn byte_body() -> (ByteBody, Vec<u8>) {
    let body = ByteBody::from(vec![0xde, 0xad, 0xbe, 0xef]);
    let bytes = vec![0x00, 0x00, 0x00, 0x04, 0xde, 0xad, 0xbe, 0xef];
    (body, bytes)
}

/// Wraps a body fixture in a message sent by [`SENDER_ID`].
pub fn message<B: Into<Body>>(body: fn() -> (B, Vec<u8>)) -> (Message, Vec<u8>) {
    let (body, body_bytes) = body();
    let message = Message::new(SENDER_ID, body);
    let tag: u8 = message.message_type().into();

    let mut bytes = vec![tag];
    bytes.extend(&SENDER_ID.to_be_bytes());
    bytes.extend(body_bytes);
    (message, bytes)
}
