//! The static table of peer addresses.
//!
//! See the [net module] documentation since this is a private module anyways.
//!
//! [net module]: crate::net

use std::{collections::HashMap, fmt, iter::FromIterator, sync::Arc};

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
/// The address a peer listens on.
pub struct PeerAddress {
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An immutable map from peer ids to addresses.
///
/// The table is fixed for the lifetime of a process: there is no membership protocol. Clones are
/// cheap and share the same map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressTable(Arc<HashMap<PeerId, PeerAddress>>);

impl AddressTable {
    pub fn new(addresses: HashMap<PeerId, PeerAddress>) -> Self {
        Self(Arc::new(addresses))
    }

    pub fn get(&self, peer: PeerId) -> Option<&PeerAddress> {
        self.0.get(&peer)
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.0.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The ids of all the peers, in ascending order.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.0.keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}

impl FromIterator<(PeerId, PeerAddress)> for AddressTable {
    fn from_iter<I: IntoIterator<Item = (PeerId, PeerAddress)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
