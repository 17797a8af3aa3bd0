#![cfg_attr(docsrs, feature(doc_cfg))]
//! # PDDM: privacy-preserving data aggregation for distributed meters
//!
//! Many meters contribute numeric readings per round, and a single utility learns an aggregate of
//! them without learning which meter produced which reading. Contributions travel through an
//! anonymizing overlay of relaying meters, and are certified by the utility with RSA blind
//! signatures so that forged or duplicated contributions can still be rejected. A round proceeds
//! through the shuffle, echo, agreement and aggregate phases.
//!
//! This crate is the substrate the meter and utility roles are built on:
//!
//! - [`message`]: the binary wire format. Every message is an envelope made of a type tag, the
//!   sender id and a body, and is reconstructed from bytes by looking its tag up in a
//!   [`Registry`](message::Registry) of factories.
//! - [`net`]: a TCP transport that multiplexes a listener and all accepted peer connections on a
//!   single thread, and hands every complete payload to a statically dispatched
//!   [`MessageHandler`](net::MessageHandler).
//! - [`timer`]: one-shot millisecond timers used for round timeouts and retries.
//! - [`crypto`]: the pluggable [`CryptoProvider`](crypto::CryptoProvider) interface for
//!   encryption, blind signatures and direct signatures, and an RSA implementation of it.
//! - [`settings`]: configuration loading for the `pddm-node` binary.
//!
//! ## Wire conventions
//!
//! All integers are encoded in network byte order (big endian). Identifiers and rounds are
//! 32 bits wide and signed, counts and lengths are 32 bits wide and unsigned.

pub mod crypto;
pub mod message;
pub mod net;
pub mod settings;
pub mod timer;

#[cfg(test)]
pub(crate) mod testutils;

/// The identifier of a meter or of the utility.
pub type PeerId = i32;

/// A round of the aggregation protocol.
pub type Round = i32;
