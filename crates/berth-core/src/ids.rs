// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Opaque identifier and token generation.
//!
//! Every public handle the control plane hands out (key ids, key secrets,
//! magic-link tokens, job ids) is drawn from the unreserved URL-safe
//! alphabet so the values survive query strings and HTTP headers without
//! escaping.

use rand::Rng;
use rand::rngs::OsRng;

/// The unreserved URL-safe alphabet: `A-Z a-z 0-9 _ -`.
const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of a public API key id.
pub const KEY_ID_LEN: usize = 16;

/// Length of an API key secret.
pub const KEY_SECRET_LEN: usize = 32;

/// Length of a magic-link token.
pub const MAGIC_TOKEN_LEN: usize = 32;

/// Length of a deployment job id.
pub const JOB_ID_LEN: usize = 16;

/// On-wire prefix of a formatted API key.
pub const KEY_PREFIX: &str = "rw_prod_";

/// Generate a random string of `len` characters from the URL-safe alphabet.
///
/// Uses the OS CSPRNG; 64 symbols per character yields 6 bits of entropy
/// each, so a 32-char token carries 192 bits.
pub fn random_token(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generate a new public key id.
pub fn new_key_id() -> String {
    random_token(KEY_ID_LEN)
}

/// Generate a new key secret.
pub fn new_key_secret() -> String {
    random_token(KEY_SECRET_LEN)
}

/// Generate a new magic-link token.
pub fn new_magic_token() -> String {
    random_token(MAGIC_TOKEN_LEN)
}

/// Generate a new deployment job id.
pub fn new_job_id() -> String {
    random_token(JOB_ID_LEN)
}

/// Format a key id and secret into the on-wire credential.
pub fn format_api_key(key_id: &str, secret: &str) -> String {
    format!("{KEY_PREFIX}{key_id}.{secret}")
}

/// Parse an on-wire credential into `(key_id, secret)`.
///
/// Returns `None` on any structural mismatch: wrong prefix, wrong part
/// lengths, or characters outside the alphabet. Parsing is shape-only;
/// it never consults the store.
pub fn parse_api_key(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix(KEY_PREFIX)?;
    let (key_id, secret) = rest.split_once('.')?;
    if key_id.len() != KEY_ID_LEN || secret.len() != KEY_SECRET_LEN {
        return None;
    }
    if !is_token(key_id) || !is_token(secret) {
        return None;
    }
    Some((key_id, secret))
}

fn is_token(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
