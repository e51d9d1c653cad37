//! PKCE (Proof Key for Code Exchange) and CSRF state generation.
//!
//! PKCE binds an authorization code to a secret held by this process, so an
//! intercepted code is useless on its own. The same random source mints the
//! `state` value echoed back by the authorization server.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Challenge method sent as `code_challenge_method`. Only S256 is supported.
pub const CHALLENGE_METHOD: &str = "S256";

/// Bytes of entropy in a generated verifier (86 base64url characters).
const VERIFIER_BYTES: usize = 64;

/// Bytes of entropy in a CSRF state value (43 base64url characters).
const STATE_BYTES: usize = 32;

/// PKCE verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Code verifier - a cryptographically random string (43-128 characters).
    pub verifier: String,
    /// Code challenge - base64url(sha256(verifier)).
    pub challenge: String,
}

impl Pkce {
    /// Generate a new PKCE verifier and challenge pair.
    ///
    /// The verifier is 64 random bytes from the OS, base64url encoded
    /// without padding.
    pub fn new() -> Self {
        let verifier = random_urlsafe(VERIFIER_BYTES);
        Self::from_verifier(verifier)
    }

    /// Build a pair from an existing verifier.
    pub fn from_verifier(verifier: String) -> Self {
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an unguessable `state` value for CSRF protection.
pub fn generate_state() -> String {
    random_urlsafe(STATE_BYTES)
}

/// Compute S256 challenge from verifier: base64url(sha256(verifier))
pub fn compute_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let hash = hasher.finalize();

    URL_SAFE_NO_PAD.encode(hash)
}

/// Constant-time string comparison, used for the callback `state` check.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn random_urlsafe(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}
