//! An RSA implementation of the [`CryptoProvider`].
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use std::{collections::HashMap, fmt};

use ::rsa::{
    hazmat::rsa_decrypt_and_check,
    traits::PublicKeyParts,
    Oaep,
    Pkcs1v15Sign,
    RsaPrivateKey,
    RsaPublicKey,
};
use anyhow::anyhow;
use num::{traits::identities::Zero, BigUint};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    crypto::{
        prng::generate_integer,
        BlindingFactor,
        ByteObject,
        CryptoError,
        CryptoProvider,
        SignatureArray,
    },
    message::{
        Body,
        ByteBody,
        FromBytes,
        OverlayEnvelope,
        Registry,
        SignedValue,
        ToBytes,
        ValueContribution,
        ValueTuple,
    },
    PeerId,
};

/// The `DigestInfo` DER prefix of a SHA-256 digest in a PKCS #1 v1.5 signature.
const SHA256_DIGEST_INFO: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];

/// Maximal plaintext length of an OAEP-SHA256 block under a 2048 bits key.
const OAEP_CHUNK_LENGTH: usize = SignatureArray::LENGTH - 2 * 32 - 2;

/// A [`CryptoProvider`] based on 2048 bits RSA keys.
///
/// - bodies and values are encrypted with OAEP over SHA-256, block by block,
/// - contributions and signed values are signed with PKCS #1 v1.5 over SHA-256,
/// - blind signatures are raw RSA signatures over the PKCS #1 v1.5 encoding of the value, so an
///   unblinded signature is a regular PKCS #1 v1.5 signature.
///
/// The keyring maps every peer, the utility included, to its public key. Keys are provisioned
/// before the provider is created.
pub struct RsaCrypto {
    id: PeerId,
    private_key: RsaPrivateKey,
    keyring: HashMap<PeerId, RsaPublicKey>,
    utility: PeerId,
    registry: Registry,
}

impl RsaCrypto {
    /// Creates the provider of the node `id`, which gets blind signatures from the `utility`.
    ///
    /// # Errors
    /// Fails if any of the keys is not a 2048 bits key.
    pub fn new(
        id: PeerId,
        private_key: RsaPrivateKey,
        mut keyring: HashMap<PeerId, RsaPublicKey>,
        utility: PeerId,
    ) -> Result<Self, CryptoError> {
        check_key_size(&private_key)?;
        for key in keyring.values() {
            check_key_size(key)?;
        }
        keyring
            .entry(id)
            .or_insert_with(|| private_key.to_public_key());
        Ok(Self {
            id,
            private_key,
            keyring,
            utility,
            registry: Registry::default(),
        })
    }

    /// Replaces the registry used to reconstruct decrypted bodies.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    fn public_key_of(&self, peer: PeerId) -> Result<&RsaPublicKey, CryptoError> {
        self.keyring
            .get(&peer)
            .ok_or(CryptoError::UnknownPeer(peer))
    }

    fn encrypt(&self, plaintext: &[u8], target: PeerId) -> Result<Vec<u8>, CryptoError> {
        let key = self.public_key_of(target)?;
        let mut rng = rand::thread_rng();
        let blocks = (plaintext.len() + OAEP_CHUNK_LENGTH - 1) / OAEP_CHUNK_LENGTH;
        let mut ciphertext = Vec::with_capacity(blocks * SignatureArray::LENGTH);
        for chunk in plaintext.chunks(OAEP_CHUNK_LENGTH) {
            ciphertext.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.is_empty() || ciphertext.len() % SignatureArray::LENGTH != 0 {
            return Err(CryptoError::MalformedCiphertext(ciphertext.len()));
        }
        let mut plaintext = Vec::with_capacity(ciphertext.len());
        for block in ciphertext.chunks(SignatureArray::LENGTH) {
            plaintext.extend(self.private_key.decrypt(Oaep::new::<Sha256>(), block)?);
        }
        Ok(plaintext)
    }

    fn sign(&self, data: &[u8]) -> Result<SignatureArray, CryptoError> {
        let digest = Sha256::digest(data);
        let signature = self
            .private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest.as_slice())?;
        SignatureArray::from_slice(&signature).ok_or(CryptoError::KeySize(signature.len()))
    }

    fn verify(&self, data: &[u8], signature: &SignatureArray, signer: PeerId) -> bool {
        let key = match self.keyring.get(&signer) {
            Some(key) => key,
            None => {
                debug!("rejecting signature of unknown peer {}", signer);
                return false;
            }
        };
        let digest = Sha256::digest(data);
        match key.verify(
            Pkcs1v15Sign::new::<Sha256>(),
            digest.as_slice(),
            signature.as_slice(),
        ) {
            Ok(()) => true,
            Err(err) => {
                debug!("invalid signature of peer {}: {}", signer, err);
                false
            }
        }
    }
}

impl fmt::Debug for RsaCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut peers: Vec<&PeerId> = self.keyring.keys().collect();
        peers.sort();
        f.debug_struct("RsaCrypto")
            .field("id", &self.id)
            .field("utility", &self.utility)
            .field("peers", &peers)
            .finish()
    }
}

impl CryptoProvider for RsaCrypto {
    fn encrypt_overlay(
        &self,
        envelope: &OverlayEnvelope,
        target: PeerId,
    ) -> Result<OverlayEnvelope, CryptoError> {
        let mut plaintext = vec![u8::from(envelope.body.message_type())];
        plaintext.extend(envelope.body.to_vec());
        let ciphertext = self.encrypt(&plaintext, target)?;
        Ok(OverlayEnvelope::new(
            envelope.sender_round,
            envelope.is_final_message,
            ByteBody::from(ciphertext),
        ))
    }

    fn decrypt_overlay(&self, envelope: &OverlayEnvelope) -> Result<OverlayEnvelope, CryptoError> {
        let ciphertext = match envelope.body.as_ref() {
            Body::Bytes(bytes) => bytes,
            _ => return Err(CryptoError::NotEncrypted),
        };
        let plaintext = self.decrypt(ciphertext.as_ref())?;
        let (tag, bytes) = plaintext
            .split_first()
            .ok_or_else(|| CryptoError::Decode(anyhow!("empty plaintext")))?;
        let body = self
            .registry
            .decode_body(*tag, bytes)
            .map_err(CryptoError::Decode)?;
        if body.buffer_length() != bytes.len() {
            return Err(CryptoError::Decode(anyhow!(
                "trailing bytes after the decrypted body"
            )));
        }
        Ok(OverlayEnvelope::new(
            envelope.sender_round,
            envelope.is_final_message,
            body,
        ))
    }

    fn encrypt_value(&self, value: &ValueTuple, target: PeerId) -> Result<ByteBody, CryptoError> {
        self.encrypt(&value.to_vec(), target).map(ByteBody::from)
    }

    fn decrypt_value(&self, ciphertext: &ByteBody) -> Result<ValueTuple, CryptoError> {
        let plaintext = self.decrypt(ciphertext.as_ref())?;
        let value = ValueTuple::from_byte_slice(&plaintext).map_err(CryptoError::Decode)?;
        if value.buffer_length() != plaintext.len() {
            return Err(CryptoError::Decode(anyhow!(
                "trailing bytes after the decrypted value"
            )));
        }
        Ok(value)
    }

    fn blind(&self, value: &ValueTuple) -> Result<(ByteBody, BlindingFactor), CryptoError> {
        let key = self.public_key_of(self.utility)?;
        let modulus = to_biguint(key.n());
        let exponent = to_biguint(key.e());
        let message = BigUint::from_bytes_be(&encode_digest(&value.to_vec()));

        let mut prng = ChaCha20Rng::from_entropy();
        let factor = loop {
            let candidate = generate_integer(&mut prng, &modulus);
            if !candidate.is_zero() && candidate.modinv(&modulus).is_some() {
                break candidate;
            }
        };
        let blinded = (message * factor.modpow(&exponent, &modulus)) % &modulus;
        Ok((
            ByteBody::from(to_fixed_bytes(&blinded)),
            BlindingFactor {
                signer: self.utility,
                factor,
            },
        ))
    }

    fn sign_blinded(&self, blinded: &ByteBody) -> Result<ByteBody, CryptoError> {
        let modulus = to_biguint(self.private_key.n());
        parse_below(blinded.as_ref(), &modulus)?;
        // the private operation runs with base blinding and checks its result
        let blinded = ::rsa::BigUint::from_bytes_be(blinded.as_ref());
        let mut rng = rand::thread_rng();
        let signature = rsa_decrypt_and_check(&self.private_key, Some(&mut rng), &blinded)?;
        Ok(ByteBody::from(to_fixed_bytes(&to_biguint(&signature))))
    }

    fn unblind(
        &self,
        blind_signature: &ByteBody,
        factor: &BlindingFactor,
    ) -> Result<SignatureArray, CryptoError> {
        let modulus = to_biguint(self.public_key_of(factor.signer)?.n());
        let blind_signature = parse_below(blind_signature.as_ref(), &modulus)?;
        let inverse = factor
            .factor
            .modinv(&modulus)
            .ok_or(CryptoError::InvalidBlindedInput)?;
        let signature = to_fixed_bytes(&((blind_signature * inverse) % &modulus));
        SignatureArray::from_slice(&signature).ok_or(CryptoError::KeySize(signature.len()))
    }

    fn sign_contribution(
        &self,
        contribution: &ValueContribution,
    ) -> Result<SignatureArray, CryptoError> {
        self.sign(&contribution.signed_data())
    }

    fn verify_contribution(
        &self,
        contribution: &ValueContribution,
        signature: &SignatureArray,
        signer: PeerId,
    ) -> bool {
        self.verify(&contribution.signed_data(), signature, signer)
    }

    fn sign_signed_value(&self, value: &SignedValue) -> Result<SignatureArray, CryptoError> {
        self.sign(&value.signed_data())
    }

    fn verify_signed_value(
        &self,
        value: &SignedValue,
        signature: &SignatureArray,
        signer: PeerId,
    ) -> bool {
        self.verify(&value.signed_data(), signature, signer)
    }
}

fn check_key_size(key: &impl PublicKeyParts) -> Result<(), CryptoError> {
    if key.size() != SignatureArray::LENGTH {
        return Err(CryptoError::KeySize(key.size()));
    }
    Ok(())
}

fn to_biguint(int: &::rsa::BigUint) -> BigUint {
    BigUint::from_bytes_be(&int.to_bytes_be())
}

/// Encodes the SHA-256 digest of `data` as in a PKCS #1 v1.5 signature:
///
/// ```no_rust
/// 0x00 || 0x01 || 0xff ... 0xff || 0x00 || DigestInfo || SHA-256(data)
/// ```
fn encode_digest(data: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(data);
    let digest_start = SignatureArray::LENGTH - digest.len();
    let info_start = digest_start - SHA256_DIGEST_INFO.len();

    let mut encoded = vec![0xff; SignatureArray::LENGTH];
    encoded[0] = 0x00;
    encoded[1] = 0x01;
    encoded[info_start - 1] = 0x00;
    encoded[info_start..digest_start].copy_from_slice(&SHA256_DIGEST_INFO);
    encoded[digest_start..].copy_from_slice(digest.as_slice());
    encoded
}

/// Parses a big endian integer of exactly the modulus length that is smaller than the modulus.
fn parse_below(bytes: &[u8], modulus: &BigUint) -> Result<BigUint, CryptoError> {
    if bytes.len() != SignatureArray::LENGTH {
        return Err(CryptoError::InvalidBlindedInput);
    }
    let int = BigUint::from_bytes_be(bytes);
    if &int >= modulus {
        return Err(CryptoError::InvalidBlindedInput);
    }
    Ok(int)
}

/// Left pads the big endian representation of an integer smaller than the modulus.
fn to_fixed_bytes(int: &BigUint) -> Vec<u8> {
    let bytes = int.to_bytes_be();
    let mut fixed = vec![0; SignatureArray::LENGTH.saturating_sub(bytes.len())];
    fixed.extend(bytes);
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::FixedPoint,
        testutils::{crypto::provider, messages as helpers},
    };

    const UTILITY: PeerId = 0;

    #[test]
    fn blind_signature_equals_direct_signature() {
        let (meter, utility) = (provider(3), provider(UTILITY));
        let (value, _) = helpers::value_tuple();

        let (blinded, factor) = meter.blind(&value).unwrap();
        assert_eq!(factor.signer, UTILITY);
        assert_eq!(blinded.len(), SignatureArray::LENGTH);
        let blind_signature = utility.sign_blinded(&blinded).unwrap();
        let signature = meter.unblind(&blind_signature, &factor).unwrap();

        let contribution = ValueContribution::new(value);
        assert_eq!(signature, utility.sign_contribution(&contribution).unwrap());
        assert!(meter.verify_contribution(&contribution, &signature, UTILITY));
    }

    #[test]
    fn blinding_hides_the_value() {
        let meter = provider(3);
        let (value, _) = helpers::value_tuple();
        let (first, _) = meter.blind(&value).unwrap();
        let (second, _) = meter.blind(&value).unwrap();
        assert_ne!(first, second);
        assert_ne!(first.as_ref(), encode_digest(&value.to_vec()).as_slice());
    }

    #[test]
    fn interleaved_blindings() {
        let (meter, utility) = (provider(1), provider(UTILITY));
        let first = ValueTuple::new(1, vec![FixedPoint::from_f64(1.5)], vec![2]);
        let second = ValueTuple::new(2, vec![FixedPoint::from_f64(-3.0)], vec![3]);

        let (first_blinded, first_factor) = meter.blind(&first).unwrap();
        let (second_blinded, second_factor) = meter.blind(&second).unwrap();
        let second_signature = meter
            .unblind(
                &utility.sign_blinded(&second_blinded).unwrap(),
                &second_factor,
            )
            .unwrap();
        let first_signature = meter
            .unblind(&utility.sign_blinded(&first_blinded).unwrap(), &first_factor)
            .unwrap();

        let first = ValueContribution::with_signature(first, first_signature);
        let second = ValueContribution::with_signature(second, second_signature);
        assert!(utility.verify_contribution(&first, &first.signature, UTILITY));
        assert!(utility.verify_contribution(&second, &second.signature, UTILITY));
    }

    #[test]
    fn sign_blinded_rejects_invalid_input() {
        let utility = provider(UTILITY);
        assert!(matches!(
            utility.sign_blinded(&ByteBody::from(vec![0xff; SignatureArray::LENGTH])),
            Err(CryptoError::InvalidBlindedInput)
        ));
        assert!(matches!(
            utility.sign_blinded(&ByteBody::from(vec![0x01; 12])),
            Err(CryptoError::InvalidBlindedInput)
        ));
    }

    #[test]
    fn sign_blinded_inverts_the_public_operation() {
        let utility = provider(UTILITY);
        let key = utility.public_key();
        let (modulus, exponent) = (to_biguint(key.n()), to_biguint(key.e()));

        let mut prng = ChaCha20Rng::from_seed([7; 32]);
        for _ in 0..4 {
            let input = generate_integer(&mut prng, &modulus);
            let blinded = ByteBody::from(to_fixed_bytes(&input));
            let signature = utility.sign_blinded(&blinded).unwrap();
            assert_eq!(signature.len(), SignatureArray::LENGTH);
            assert_eq!(signature, utility.sign_blinded(&blinded).unwrap());
            let signature = BigUint::from_bytes_be(signature.as_ref());
            assert_eq!(signature.modpow(&exponent, &modulus), input);
        }
    }

    #[test]
    fn meter_contribution_verifies_at_utility() {
        let (meter, utility) = (provider(3), provider(UTILITY));
        let value = ValueTuple::new(7, vec![FixedPoint::from_f64(42.5)], vec![1, 2]);
        let mut contribution = ValueContribution::new(value);
        contribution.signature = meter.sign_contribution(&contribution).unwrap();
        assert!(utility.verify_contribution(&contribution, &contribution.signature, 3));

        let mut forged = contribution.signature;
        forged.as_mut()[0] ^= 0x01;
        assert!(!utility.verify_contribution(&contribution, &forged, 3));
    }

    #[test]
    fn verification_soundness() {
        let (meter, utility) = (provider(2), provider(UTILITY));
        let (contribution, _) = helpers::contribution();
        let signature = meter.sign_contribution(&contribution).unwrap();
        assert!(utility.verify_contribution(&contribution, &signature, 2));

        // every byte of the signed data matters
        let mut tampered = contribution.clone();
        tampered.value.round += 1;
        assert!(!utility.verify_contribution(&tampered, &signature, 2));
        let mut tampered = contribution.clone();
        tampered.value.proxies.push(3);
        assert!(!utility.verify_contribution(&tampered, &signature, 2));

        for position in &[0, 127, 255] {
            let mut forged = signature;
            forged.as_mut()[*position] ^= 0x80;
            assert!(!utility.verify_contribution(&contribution, &forged, 2));
        }

        assert!(!utility.verify_contribution(&contribution, &signature, 1));
        assert!(!utility.verify_contribution(&contribution, &signature, 42));
        assert!(!utility.verify_contribution(&contribution, &SignatureArray::zeroed(), 2));
    }

    #[test]
    fn countersignatures() {
        let (signed, _) = helpers::signed_value();
        let mut signed = SignedValue::new(signed.contribution);
        for signer in 1..=2 {
            let signature = provider(signer).sign_signed_value(&signed).unwrap();
            signed.signatures.insert(signer, signature);
        }

        let utility = provider(UTILITY);
        for (signer, signature) in &signed.signatures {
            assert!(utility.verify_signed_value(&signed, signature, *signer));
        }
        assert!(!utility.verify_signed_value(&signed, &signed.signatures[&1], 2));

        // countersignatures cover the signature of the contribution
        let mut tampered = signed.clone();
        tampered.contribution.signature.as_mut()[10] ^= 0x01;
        assert!(!utility.verify_signed_value(&tampered, &signed.signatures[&1], 1));
    }

    #[test]
    fn overlay_encryption() {
        let (overlay, _) = helpers::overlay();
        let encrypted = provider(1).encrypt_overlay(&overlay, 2).unwrap();
        assert_eq!(encrypted.sender_round, overlay.sender_round);
        assert_eq!(encrypted.is_final_message, overlay.is_final_message);
        assert!(encrypted.body.is_bytes());

        assert_eq!(provider(2).decrypt_overlay(&encrypted).unwrap(), overlay);
        assert!(provider(3).decrypt_overlay(&encrypted).is_err());
        assert!(matches!(
            provider(2).decrypt_overlay(&overlay),
            Err(CryptoError::NotEncrypted)
        ));
    }

    #[test]
    fn nested_overlay_encryption() {
        // one layer per relay hop
        let (overlay, _) = helpers::overlay();
        let inner = provider(1).encrypt_overlay(&overlay, 3).unwrap();
        let outer = provider(1)
            .encrypt_overlay(&OverlayEnvelope::new(7, false, inner.clone()), 2)
            .unwrap();

        let peeled = provider(2).decrypt_overlay(&outer).unwrap();
        let relayed = match peeled.body.as_ref() {
            Body::Overlay(envelope) => envelope.clone(),
            body => panic!("unexpected body {}", body),
        };
        assert_eq!(relayed, inner);
        assert_eq!(provider(3).decrypt_overlay(&relayed).unwrap(), overlay);
    }

    #[test]
    fn value_encryption() {
        let value = ValueTuple::new(
            9,
            (0..100).map(|i| FixedPoint::from_f64(i as f64 / 4.0)).collect(),
            vec![1, 2, 3],
        );
        let ciphertext = provider(3).encrypt_value(&value, UTILITY).unwrap();
        assert!(ciphertext.len() > SignatureArray::LENGTH);
        assert_eq!(ciphertext.len() % SignatureArray::LENGTH, 0);
        assert_eq!(provider(UTILITY).decrypt_value(&ciphertext).unwrap(), value);

        let truncated = ByteBody::from(ciphertext.as_ref()[1..].to_vec());
        assert!(matches!(
            provider(UTILITY).decrypt_value(&truncated),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn unknown_target() {
        let (value, _) = helpers::value_tuple();
        assert!(matches!(
            provider(1).encrypt_value(&value, 42),
            Err(CryptoError::UnknownPeer(42))
        ));
    }

    #[test]
    fn rejects_small_keys() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        assert!(matches!(
            RsaCrypto::new(5, key, HashMap::new(), UTILITY),
            Err(CryptoError::KeySize(128))
        ));
    }
}
