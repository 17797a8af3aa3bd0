//! The cryptographic interface that gives the protocol its anonymity and authenticity guarantees.
//!
//! A [`CryptoProvider`] encrypts bodies for a relay hop, blind signs value tuples and directly
//! signs contributions. The RSA mathematics are delegated to the implementation; [`RsaCrypto`]
//! is the one shipped with this crate.
//!
//! # Blind signatures
//! A meter hides its reading from the utility while still having it certified:
//!
//! 1. the meter [`blind`]s its value tuple and keeps the returned [`BlindingFactor`],
//! 2. the utility applies [`sign_blinded`] to the blinded bytes without learning the value,
//! 3. the meter [`unblind`]s the blind signature with the factor it kept.
//!
//! The result is a signature of the utility over the value tuple that is bit for bit the one
//! [`sign_contribution`] would have produced, so it verifies like any other signature.
//!
//! The blinding factor is a plain value owned by the caller. Several rounds may therefore be in
//! flight at once on the same provider.
//!
//! ```rust,no_run
//! # use std::collections::HashMap;
//! # use pddm::{crypto::{CryptoProvider, RsaCrypto}, message::{FixedPoint, ValueContribution, ValueTuple}};
//! # use rsa::RsaPrivateKey;
//! # let mut rng = rand::thread_rng();
//! # let (meter_key, utility_key) = (RsaPrivateKey::new(&mut rng, 2048).unwrap(), RsaPrivateKey::new(&mut rng, 2048).unwrap());
//! # let keyring: HashMap<_, _> = vec![(0, utility_key.to_public_key()), (3, meter_key.to_public_key())].into_iter().collect();
//! let meter = RsaCrypto::new(3, meter_key, keyring.clone(), 0).unwrap();
//! let utility = RsaCrypto::new(0, utility_key, keyring, 0).unwrap();
//!
//! let value = ValueTuple::new(7, vec![FixedPoint::from_f64(42.5)], vec![1, 2]);
//! let (blinded, factor) = meter.blind(&value).unwrap();
//! let blind_signature = utility.sign_blinded(&blinded).unwrap();
//! let signature = meter.unblind(&blind_signature, &factor).unwrap();
//!
//! let contribution = ValueContribution::with_signature(value, signature);
//! assert!(utility.verify_contribution(&contribution, &contribution.signature, 0));
//! ```
//!
//! [`blind`]: CryptoProvider::blind
//! [`sign_blinded`]: CryptoProvider::sign_blinded
//! [`unblind`]: CryptoProvider::unblind
//! [`sign_contribution`]: CryptoProvider::sign_contribution

pub(crate) mod prng;
pub(crate) mod rsa;

use std::fmt;

use num::BigUint;
use rand::RngCore;
use thiserror::Error;

pub use self::{prng::generate_integer, rsa::RsaCrypto};
use crate::{
    message::{ByteBody, DecodeError, OverlayEnvelope, SignedValue, ValueContribution, ValueTuple},
    PeerId,
};

/// An interface for slicing into cryptographic byte objects.
pub trait ByteObject: Sized {
    /// Length in bytes of this object
    const LENGTH: usize;

    /// Creates a new object with all the bytes initialized to `0`.
    fn zeroed() -> Self;

    /// Gets the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Creates an object from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Creates an object from the given buffer.
    ///
    /// # Panics
    /// Panics if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice_unchecked(bytes: &[u8]) -> Self {
        Self::from_slice(bytes).unwrap()
    }

    /// Generates an object with random bytes
    fn generate() -> Self {
        let mut bytes = vec![0; Self::LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_slice_unchecked(&bytes)
    }

    /// A helper for instantiating an object filled with the given value
    fn fill_with(value: u8) -> Self {
        Self::from_slice_unchecked(&vec![value; Self::LENGTH])
    }
}

/// A signature sized to a 2048 bits RSA modulus.
///
/// A zeroed signature is the placeholder of unsigned contributions. Zero is never a valid
/// signature, so it never verifies.
#[derive(Hash, Eq, PartialEq, Copy, Clone)]
pub struct SignatureArray([u8; 256]);

impl ByteObject for SignatureArray {
    const LENGTH: usize = 256;

    fn zeroed() -> Self {
        Self([0; Self::LENGTH])
    }

    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let mut array = [0; Self::LENGTH];
        if bytes.len() != Self::LENGTH {
            return None;
        }
        array.copy_from_slice(bytes);
        Some(Self(array))
    }
}

impl AsRef<[u8]> for SignatureArray {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl AsMut<[u8]> for SignatureArray {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl fmt::Debug for SignatureArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureArray(")?;
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..)")
    }
}

/// The secret a meter keeps between [`CryptoProvider::blind`] and [`CryptoProvider::unblind`].
///
/// It must be used for exactly one unblinding and never be disclosed: whoever knows it can link
/// the blinded value to the unblinded signature.
#[derive(Clone, PartialEq, Eq)]
pub struct BlindingFactor {
    /// The signer whose modulus the value was blinded for.
    pub signer: PeerId,
    pub(crate) factor: BigUint,
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlindingFactor")
            .field("signer", &self.signer)
            .finish()
    }
}

#[derive(Debug, Error)]
/// Errors of the crypto providers.
pub enum CryptoError {
    #[error("no public key known for peer {0}")]
    UnknownPeer(PeerId),
    #[error("unsupported key size: {0} bytes, expected {}", SignatureArray::LENGTH)]
    KeySize(usize),
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] ::rsa::Error),
    #[error("blinded input is not an integer below the signer modulus")]
    InvalidBlindedInput,
    #[error("malformed ciphertext of {0} bytes")]
    MalformedCiphertext(usize),
    #[error("only opaque byte bodies can be decrypted")]
    NotEncrypted,
    #[error("failed to decode decrypted plaintext: {0:#}")]
    Decode(DecodeError),
}

/// A pluggable provider of the cryptographic operations of the protocol.
///
/// All operations are synchronous. Verification is boolean only: a bad signature is a protocol
/// level rejection, not an error, and callers must check the outcome before trusting a
/// contribution.
pub trait CryptoProvider {
    /// Encrypts the body of an overlay envelope for the `target` relay.
    ///
    /// The returned envelope keeps the round and the final flag, and carries the ciphertext of
    /// the nested body (tag included) as an opaque [`ByteBody`].
    fn encrypt_overlay(
        &self,
        envelope: &OverlayEnvelope,
        target: PeerId,
    ) -> Result<OverlayEnvelope, CryptoError>;

    /// Decrypts an envelope produced by [`encrypt_overlay`] for this node.
    ///
    /// [`encrypt_overlay`]: CryptoProvider::encrypt_overlay
    fn decrypt_overlay(&self, envelope: &OverlayEnvelope) -> Result<OverlayEnvelope, CryptoError>;

    /// Encrypts a value tuple for the `target` peer.
    fn encrypt_value(&self, value: &ValueTuple, target: PeerId) -> Result<ByteBody, CryptoError>;

    /// Decrypts a value tuple encrypted for this node.
    fn decrypt_value(&self, ciphertext: &ByteBody) -> Result<ValueTuple, CryptoError>;

    /// Blinds a value tuple for the utility and returns the factor needed to unblind its
    /// signature.
    fn blind(&self, value: &ValueTuple) -> Result<(ByteBody, BlindingFactor), CryptoError>;

    /// Applies a raw signature to a blinded value.
    ///
    /// There is no padding involved: this must never be used on anything but the output of
    /// [`blind`].
    ///
    /// [`blind`]: CryptoProvider::blind
    fn sign_blinded(&self, blinded: &ByteBody) -> Result<ByteBody, CryptoError>;

    /// Removes the blinding factor from a blind signature.
    fn unblind(
        &self,
        blind_signature: &ByteBody,
        factor: &BlindingFactor,
    ) -> Result<SignatureArray, CryptoError>;

    /// Signs the value tuple of a contribution with the key of this node.
    fn sign_contribution(
        &self,
        contribution: &ValueContribution,
    ) -> Result<SignatureArray, CryptoError>;

    /// Checks that `signature` was produced over the value tuple of `contribution` by `signer`.
    fn verify_contribution(
        &self,
        contribution: &ValueContribution,
        signature: &SignatureArray,
        signer: PeerId,
    ) -> bool;

    /// Countersigns the contribution of a signed value with the key of this node.
    fn sign_signed_value(&self, value: &SignedValue) -> Result<SignatureArray, CryptoError>;

    /// Checks that `signature` is a countersignature of `signer` over the contribution of
    /// `value`.
    fn verify_signed_value(
        &self,
        value: &SignedValue,
        signature: &SignatureArray,
        signer: PeerId,
    ) -> bool;
}
