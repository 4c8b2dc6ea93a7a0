//! PIN/UV auth protocols one and two.
//!
//! Both versions share a shape: ECDH over P-256 with the authenticator's ephemeral key,
//! a version specific KDF, AES-256-CBC without padding and HMAC-SHA-256. All operations
//! are pure over the key material handed in, nothing is cached between calls.

pub mod cose;

use aes::Aes256;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ciborium::value::Value;
use ring::{agreement, digest, hkdf, hmac, rand::SecureRandom, rand::SystemRandom};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{ctap::info::InfoData, error::Error};

/// Owned secret bytes, overwritten with zeroes when dropped.
pub type SecretBytes = Zeroizing<Vec<u8>>;

const BLOCK_SIZE: usize = 16;
const IV_LEN: usize = 16;
const V1_KEY_LEN: usize = 32;
const V2_KEY_LEN: usize = 64;
const V1_TAG_LEN: usize = 16;

const HKDF_SALT: [u8; 32] = [0u8; 32];
const HKDF_INFO_HMAC: &[u8] = b"CTAP2 HMAC key";
const HKDF_INFO_AES: &[u8] = b"CTAP2 AES key";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Unspecified ring error")]
    RingUnspecified(ring::error::Unspecified),

    #[error("Key of {0} bytes is invalid for this protocol")]
    InvalidKeyLength(usize),

    #[error("Data of {0} bytes is not a whole number of AES blocks")]
    InvalidDataLength(usize),

    #[error("Invalid authenticator key: {0}")]
    InvalidPeerKey(String),

    #[error("Signature verification failed")]
    InvalidSignature,
}

impl From<ring::error::Unspecified> for CryptoError {
    fn from(e: ring::error::Unspecified) -> Self {
        CryptoError::RingUnspecified(e)
    }
}

/// Output of a key agreement: the platform key to send back, and the derived key
/// material that only lives as long as one handshake.
pub struct SharedSecretPair {
    pub key_agreement: Value,
    pub shared_secret: SecretBytes,
}

impl std::fmt::Debug for SharedSecretPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretPair")
            .field("key_agreement", &self.key_agreement)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinUvAuthProtocol {
    V1,
    V2,
}

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-SHA-256 as in RFC 5869.
pub fn hkdf_sha256(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    len: usize,
) -> Result<SecretBytes, CryptoError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);
    let info = [info];
    let okm = prk.expand(&info, OkmLen(len))?;
    let mut out = Zeroizing::new(vec![0u8; len]);
    okm.fill(&mut out)?;
    Ok(out)
}

fn check_blocks(data: &[u8]) -> Result<(), CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidDataLength(data.len()));
    }
    Ok(())
}

fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    check_blocks(plaintext)?;
    let cipher = cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(plaintext))
}

fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<SecretBytes, CryptoError> {
    check_blocks(ciphertext)?;
    let cipher = cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::InvalidDataLength(ciphertext.len()))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, message).as_ref().to_vec()
}

impl PinUvAuthProtocol {
    pub fn version(self) -> u8 {
        match self {
            PinUvAuthProtocol::V1 => 1,
            PinUvAuthProtocol::V2 => 2,
        }
    }

    pub fn from_version(version: u8) -> Option<Self> {
        match version {
            1 => Some(PinUvAuthProtocol::V1),
            2 => Some(PinUvAuthProtocol::V2),
            _ => None,
        }
    }

    /// Picks the first version in `preference` the authenticator advertises. Devices
    /// that predate the protocol list only speak version one.
    pub fn select(info: &InfoData, preference: &[u8]) -> crate::error::Result<Self> {
        if info.pin_uv_auth_protocols.is_empty() {
            debug!("Authenticator lists no PIN/UV auth protocols, assuming version 1");
            return Ok(PinUvAuthProtocol::V1);
        }
        preference
            .iter()
            .copied()
            .filter(|v| info.pin_uv_auth_protocols.contains(&u64::from(*v)))
            .find_map(Self::from_version)
            .ok_or(Error::NotSupported("A common PIN/UV auth protocol"))
    }

    /// Length of the key material produced by [Self::kdf].
    pub fn key_len(self) -> usize {
        match self {
            PinUvAuthProtocol::V1 => V1_KEY_LEN,
            PinUvAuthProtocol::V2 => V2_KEY_LEN,
        }
    }

    /// Derives the shared secret from the ECDH output `z`. Version two yields the HMAC
    /// key followed by the AES key.
    pub fn kdf(self, z: &[u8]) -> Result<SecretBytes, CryptoError> {
        match self {
            PinUvAuthProtocol::V1 => Ok(Zeroizing::new(
                digest::digest(&digest::SHA256, z).as_ref().to_vec(),
            )),
            PinUvAuthProtocol::V2 => {
                let hmac_key = hkdf_sha256(&HKDF_SALT, z, HKDF_INFO_HMAC, 32)?;
                let aes_key = hkdf_sha256(&HKDF_SALT, z, HKDF_INFO_AES, 32)?;
                let mut key = Zeroizing::new(Vec::with_capacity(V2_KEY_LEN));
                key.extend_from_slice(&hmac_key);
                key.extend_from_slice(&aes_key);
                Ok(key)
            }
        }
    }

    /// Agrees on a shared secret with the authenticator's `keyAgreement` COSE key, using
    /// a fresh ephemeral key pair.
    pub fn encapsulate(self, peer_key: &Value) -> Result<SharedSecretPair, CryptoError> {
        let peer_point = cose::point_from_key_agreement(peer_key)?;
        let rng = SystemRandom::new();
        let private = agreement::EphemeralPrivateKey::generate(&agreement::ECDH_P256, &rng)?;
        let public = private.compute_public_key()?;
        let key_agreement = cose::key_agreement_from_point(public.as_ref())?;

        let peer = agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, peer_point);
        let shared_secret = agreement::agree_ephemeral(
            private,
            &peer,
            CryptoError::InvalidPeerKey("Key agreement failed".into()),
            |z| self.kdf(z),
        )?;
        Ok(SharedSecretPair {
            key_agreement,
            shared_secret,
        })
    }

    fn check_key(self, key: &[u8]) -> Result<(), CryptoError> {
        if key.len() != self.key_len() {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        Ok(())
    }

    pub fn encrypt(self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.check_key(key)?;
        match self {
            PinUvAuthProtocol::V1 => aes_cbc_encrypt(key, &[0u8; IV_LEN], plaintext),
            PinUvAuthProtocol::V2 => {
                let mut iv = [0u8; IV_LEN];
                SystemRandom::new().fill(&mut iv)?;
                let mut out = iv.to_vec();
                out.extend(aes_cbc_encrypt(&key[32..], &iv, plaintext)?);
                Ok(out)
            }
        }
    }

    pub fn decrypt(self, key: &[u8], ciphertext: &[u8]) -> Result<SecretBytes, CryptoError> {
        self.check_key(key)?;
        match self {
            PinUvAuthProtocol::V1 => aes_cbc_decrypt(key, &[0u8; IV_LEN], ciphertext),
            PinUvAuthProtocol::V2 => {
                if ciphertext.len() < IV_LEN {
                    return Err(CryptoError::InvalidDataLength(ciphertext.len()));
                }
                let (iv, ciphertext) = ciphertext.split_at(IV_LEN);
                aes_cbc_decrypt(&key[32..], iv, ciphertext)
            }
        }
    }

    /// Computes a `pinUvAuthParam` over `message`. `key` is either a shared secret or
    /// a PIN/UV token; version two only ever uses the first 32 bytes.
    pub fn authenticate(self, key: &[u8], message: &[u8]) -> Vec<u8> {
        match self {
            PinUvAuthProtocol::V1 => {
                let mut tag = hmac_sha256(key, message);
                tag.truncate(V1_TAG_LEN);
                tag
            }
            PinUvAuthProtocol::V2 => hmac_sha256(&key[..key.len().min(32)], message),
        }
    }
}
