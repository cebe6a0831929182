// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Secret hashing and the encrypted-column envelope.
//!
//! Two independent concerns live here:
//!
//! - API-key secrets are hashed with argon2id before storage; the raw
//!   secret is never persisted.
//! - Deployment `env_vars` are sealed into a versioned envelope with
//!   ChaCha20-Poly1305 when a column key is configured, and stored as a
//!   tagged plaintext envelope otherwise. The envelope is self-describing
//!   so mixed rows decode correctly after a key is introduced.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use crate::error::{CoreError, Result};

/// Hash an API-key secret with argon2id and a random salt.
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CoreError::Crypto(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify an API-key secret against a stored argon2id hash.
///
/// The underlying verifier compares digests in constant time; a malformed
/// stored hash is an error, not a mismatch.
pub fn verify_secret(secret: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| CoreError::Crypto(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

/// Envelope version byte: plaintext, no key configured.
const ENVELOPE_PLAIN: u8 = 0x00;
/// Envelope version byte: ChaCha20-Poly1305, 12-byte nonce prefix.
const ENVELOPE_SEALED: u8 = 0x01;

/// Nonce length for the sealed envelope.
const NONCE_LEN: usize = 12;

/// Column encryptor owned by configuration and injected into stores.
#[derive(Clone)]
pub struct Encryptor {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encryptor").finish_non_exhaustive()
    }
}

impl Encryptor {
    /// Build an encryptor from a 64-hex-character (32-byte) key.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = decode_hex(hex)?;
        if bytes.len() != 32 {
            return Err(CoreError::Crypto(format!(
                "encryption key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&bytes)),
        })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        out.push(ENVELOPE_SEALED);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&self, body: &[u8]) -> Result<Vec<u8>> {
        if body.len() < NONCE_LEN {
            return Err(CoreError::Crypto("sealed envelope too short".into()));
        }
        let (nonce_bytes, ciphertext) = body.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| CoreError::Crypto(e.to_string()))
    }
}

/// Seal bytes into the column envelope.
///
/// With an encryptor the payload is encrypted; without one it is stored
/// as a tagged plaintext envelope.
pub fn seal_envelope(encryptor: Option<&Encryptor>, plaintext: &[u8]) -> Result<Vec<u8>> {
    match encryptor {
        Some(enc) => enc.seal(plaintext),
        None => {
            let mut out = Vec::with_capacity(1 + plaintext.len());
            out.push(ENVELOPE_PLAIN);
            out.extend_from_slice(plaintext);
            Ok(out)
        }
    }
}

/// Open a column envelope back into its plaintext bytes.
///
/// Plaintext envelopes open without a key. Sealed envelopes require the
/// encryptor that produced them.
pub fn open_envelope(encryptor: Option<&Encryptor>, envelope: &[u8]) -> Result<Vec<u8>> {
    match envelope.split_first() {
        Some((&ENVELOPE_PLAIN, rest)) => Ok(rest.to_vec()),
        Some((&ENVELOPE_SEALED, rest)) => match encryptor {
            Some(enc) => enc.open(rest),
            None => Err(CoreError::Crypto(
                "sealed envelope but no encryption key configured".into(),
            )),
        },
        Some((version, _)) => Err(CoreError::Crypto(format!(
            "unknown envelope version {version}"
        ))),
        None => Err(CoreError::Crypto("empty envelope".into())),
    }
}

fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(CoreError::Crypto("hex key has odd length".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| CoreError::Crypto("invalid hex in encryption key".into()))
        })
        .collect()
}
