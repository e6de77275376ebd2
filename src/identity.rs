//! Caller identity verification. The engine never inspects proofs itself; it asks
//! an [`IdentityProvider`] whether a proof vouches for a wallet address.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::debug;

use crate::auth::WalletClaims;
use crate::will::WalletAddress;

/// A claimed identity plus the proof presented for it, carried per request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity: WalletAddress,
    pub proof: String,
}

impl Caller {
    pub fn new(identity: WalletAddress, proof: impl Into<String>) -> Self {
        Self {
            identity,
            proof: proof.into(),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, identity: &WalletAddress, proof: &str) -> bool;
}

/// Accepts HS256 bearer tokens whose `wallet_address` claim names the caller.
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn verify(&self, identity: &WalletAddress, proof: &str) -> bool {
        match decode::<WalletClaims>(proof, &self.key, &self.validation) {
            Ok(data) => data
                .claims
                .wallet_address
                .eq_ignore_ascii_case(identity.as_str()),
            Err(e) => {
                debug!(error = %e, "Rejected identity proof");
                false
            }
        }
    }
}
