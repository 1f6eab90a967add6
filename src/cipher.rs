//! Authenticated encryption of account blobs under a tenant key
//!
//! The tenant key is never stored. Every call derives a fresh AES-256
//! key from it with Argon2id and a random salt, then seals the payload
//! with AES-GCM. The blob carries everything needed to open it again
//! except the key itself:
//!
//! ```text
//! salt (16) | nonce (12) | ciphertext + tag
//! ```

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Symmetric encrypt/decrypt keyed by a caller-supplied secret.
#[derive(Clone)]
pub struct CredentialCipher {
    kdf: Argon2<'static>,
}

impl CredentialCipher {
    /// Build a cipher with the given key-derivation cost.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if Argon2 rejects the parameters.
    pub fn new(params: KdfParams) -> Result<Self> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| Error::Config(format!("Invalid KDF parameters: {e}")))?;

        Ok(Self {
            kdf: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Seal `plaintext` under `key`. `aad` is authenticated but not
    /// encrypted; the same bytes must be presented to [`Self::decrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the key cannot be fed to
    /// the KDF (e.g. it exceeds Argon2's length limit).
    pub fn encrypt(&self, plaintext: &[u8], key: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let cipher = self
            .derive(key, &salt)
            .map_err(|e| Error::InvalidArgument(format!("Unusable tenant key: {e}")))?;

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| Error::InvalidArgument("Plaintext too large".into()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Open a blob produced by [`Self::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decryption`] for a wrong key, mismatched
    /// `aad`, or a truncated/corrupted blob. These cases are not
    /// distinguished.
    pub fn decrypt(&self, blob: &[u8], key: &str, aad: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
            return Err(Error::Decryption);
        }
        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let cipher = self.derive(key, salt).map_err(|_| Error::Decryption)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| Error::Decryption)
    }

    fn derive(&self, key: &str, salt: &[u8]) -> std::result::Result<Aes256Gcm, argon2::Error> {
        let mut derived = [0u8; KEY_LEN];
        self.kdf
            .hash_password_into(key.as_bytes(), salt, &mut derived)?;
        let cipher = Aes256Gcm::new(&derived.into());
        derived.fill(0);
        Ok(cipher)
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}
