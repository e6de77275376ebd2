use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::identity::Caller;
use crate::will::WalletAddress;

pub const WALLET_HEADER: &str = "x-wallet-address";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletClaims {
    pub wallet_address: String,
    pub exp: u64,
}

/// Sign a session token for `wallet`, valid for `ttl`.
pub fn issue_token(
    wallet: &WalletAddress,
    secret: &str,
    ttl: Duration,
) -> jsonwebtoken::errors::Result<String> {
    let exp = (Utc::now() + ttl).timestamp().max(0) as u64;
    let claims = WalletClaims {
        wallet_address: wallet.to_string(),
        exp,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let proof = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let identity = parts
            .headers
            .get(WALLET_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing wallet address".to_string()))
            .and_then(|raw| {
                WalletAddress::parse(raw)
                    .map_err(|_| ApiError::Unauthorized("malformed wallet address".to_string()))
            })?;

        Ok(Caller::new(identity, proof))
    }
}
