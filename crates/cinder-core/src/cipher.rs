//! Password-bound authenticated encryption for note text.
//!
//! ChaCha20-Poly1305 keyed with SHA3-256 of the note password. The
//! deployment secret is mixed in as associated data, so ciphertext from one
//! deployment does not open under another even with the right password.
//! Every context is built for a single operation and owns its nonce.

use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::{EncryptMetadata, Error};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Decryption failed. Deliberately carries no detail.
#[derive(Debug, Error)]
#[error("authentication failed")]
pub struct AuthenticationError;

/// Factory for cipher contexts, holding the server-wide secret.
#[derive(Clone)]
pub struct AeadCipher {
    secret: Arc<[u8]>,
}

impl AeadCipher {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, Error> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(Error::Configuration("server secret must not be empty".into()));
        }
        Ok(Self {
            secret: Arc::from(secret),
        })
    }

    /// Context with a freshly drawn nonce.
    pub fn for_encrypt(&self, password: &str) -> CipherContext {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        CipherContext::new(password, nonce, self.secret.clone())
    }

    /// Context that reopens data sealed with `metadata`.
    pub fn for_decrypt(&self, password: &str, metadata: &EncryptMetadata) -> CipherContext {
        CipherContext::new(password, metadata.nonce, self.secret.clone())
    }
}

pub struct CipherContext {
    cipher: ChaCha20Poly1305,
    nonce: [u8; NONCE_LEN],
    aad: Arc<[u8]>,
}

impl CipherContext {
    fn new(password: &str, nonce: [u8; NONCE_LEN], aad: Arc<[u8]>) -> Self {
        let key = Sha3_256::digest(password.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
            nonce,
            aad,
        }
    }

    /// What must be stored to decrypt later.
    pub fn metadata(&self) -> EncryptMetadata {
        EncryptMetadata { nonce: self.nonce }
    }

    /// Ciphertext with the 16-byte tag appended.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.cipher
            .encrypt(
                Nonce::from_slice(&self.nonce),
                Payload {
                    msg: plaintext,
                    aad: self.aad.as_ref(),
                },
            )
            .map_err(|_| Error::Internal("encryption failed".into()))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        self.cipher
            .decrypt(
                Nonce::from_slice(&self.nonce),
                Payload {
                    msg: ciphertext,
                    aad: self.aad.as_ref(),
                },
            )
            .map_err(|_| AuthenticationError)
    }
}
