//! The transport that moves opaque payloads between the peers.
//!
//! Every node runs a [`TcpClient`]: one listening endpoint plus the connections accepted from the
//! peers, multiplexed on a single dedicated thread. Payloads are delimited on the streams by a
//! 4 bytes big endian length prefix, and each complete payload is handed over to the
//! [`MessageHandler`] the client is parameterized with. The transport never looks into payloads:
//! decoding them is the job of the [`message`](crate::message) layer.
//!
//! Outgoing payloads go through a [`PeerSender`], which connects to the peers of the static
//! [`AddressTable`].
//!
//! # Failures
//! A peer that closes its connection, resets it, or sends a frame above the configured maximum
//! only loses its own connection. Failing to bind the listener is fatal.

pub(crate) mod address;
pub(crate) mod frame;
pub(crate) mod transport;

use std::io;

use thiserror::Error;

pub use self::{
    address::{AddressTable, PeerAddress},
    frame::{encode_frame, FrameBuffer, LENGTH_PREFIX},
    transport::{ClientHandle, MessageHandler, PeerSender, TcpClient},
};
use crate::PeerId;

#[derive(Debug, Error)]
/// Errors of the transport.
pub enum TransportError {
    #[error("failed to bind the listener: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to start the transport thread: {0}")]
    Runtime(#[source] io::Error),
    #[error("no address known for peer {0}")]
    UnknownPeer(PeerId),
    #[error("frame of {length} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },
    #[error("the transport thread panicked")]
    Panicked,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
