use std::collections::HashMap;

use once_cell::sync::Lazy;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::{crypto::RsaCrypto, PeerId};

/// The id of the utility in the crypto fixtures. Meters have the ids 1 to 3.
pub const UTILITY_ID: PeerId = 0;

/// One 2048 bits key per node, generated once per test binary.
static KEYS: Lazy<Vec<RsaPrivateKey>> = Lazy::new(|| {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| RsaPrivateKey::new(&mut rng, 2048).unwrap())
        .collect()
});

pub fn keyring() -> HashMap<PeerId, RsaPublicKey> {
    KEYS.iter()
        .enumerate()
        .map(|(id, key)| (id as PeerId, key.to_public_key()))
        .collect()
}

/// The provider of the node `id`, which knows the public keys of all the nodes.
pub fn provider(id: PeerId) -> RsaCrypto {
    RsaCrypto::new(id, KEYS[id as usize].clone(), keyring(), UTILITY_ID).unwrap()
}
