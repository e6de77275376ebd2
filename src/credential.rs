//! Emergency override secret handling.
//!
//! Secrets are stretched with PBKDF2-HMAC-SHA256 under a per-will random salt.
//! Only the salt, iteration count and derived hash are persisted.

use std::fmt;
use std::num::NonZeroU32;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::SHA256_OUTPUT_LEN;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

const SALT_LEN: usize = 16;

pub const DEFAULT_ITERATIONS: u32 = 210_000;

/// Salt used when no will matches, so a miss costs the same as a mismatch.
const DECOY_SALT: [u8; SALT_LEN] = [0x5a; SALT_LEN];

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("system random source unavailable")]
    RandomUnavailable,

    #[error("credential worker failed: {0}")]
    Worker(String),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideCredential {
    iterations: u32,
    salt: String,
    hash: String,
}

impl fmt::Debug for OverrideCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideCredential")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

fn iteration_count(iterations: u32) -> NonZeroU32 {
    NonZeroU32::new(iterations)
        .unwrap_or_else(|| NonZeroU32::new(DEFAULT_ITERATIONS).unwrap_or(NonZeroU32::MIN))
}

impl OverrideCredential {
    /// Hash `secret` under a fresh random salt.
    pub fn derive(secret: &str, iterations: u32) -> Result<Self, CredentialError> {
        let rounds = iteration_count(iterations);

        let mut salt = [0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| CredentialError::RandomUnavailable)?;

        let mut hash = [0u8; SHA256_OUTPUT_LEN];
        pbkdf2::derive(ALGORITHM, rounds, &salt, secret.as_bytes(), &mut hash);

        Ok(Self {
            iterations: rounds.get(),
            salt: STANDARD.encode(salt),
            hash: STANDARD.encode(hash),
        })
    }

    /// Constant-time comparison of `secret` against the stored hash.
    pub fn verify(&self, secret: &str) -> bool {
        let (Ok(salt), Ok(hash)) = (STANDARD.decode(&self.salt), STANDARD.decode(&self.hash))
        else {
            return false;
        };

        pbkdf2::verify(
            ALGORITHM,
            iteration_count(self.iterations),
            &salt,
            secret.as_bytes(),
            &hash,
        )
        .is_ok()
    }

    /// Burn one derivation without a stored credential. Always `false`.
    pub fn verify_decoy(secret: &str, iterations: u32) -> bool {
        let mut scratch = [0u8; SHA256_OUTPUT_LEN];
        pbkdf2::derive(
            ALGORITHM,
            iteration_count(iterations),
            &DECOY_SALT,
            secret.as_bytes(),
            &mut scratch,
        );
        false
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}
