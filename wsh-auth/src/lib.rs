//! Mint and validate the bearer tokens the router's `$control` endpoint
//! accepts from `authenticate` (§4.4, §6): a signed payload carrying
//! `iss="waveterm"`, an expiry, and the caller's [`RpcContext`].

use jsonwebtoken::Algorithm;
use jsonwebtoken::Header;
use jsonwebtoken::Validation;
pub use jsonwebtoken::DecodingKey;
pub use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;
use wsh_protocol::RpcContext;

pub const ISSUER: &str = "waveterm";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token signature or claims invalid: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("system clock is before the Unix epoch")]
    ClockError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    iss: String,
    exp: u64,
    #[serde(flatten)]
    ctx: RpcContext,
}

fn now_secs() -> Result<u64, AuthError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| AuthError::ClockError)
}

/// Mint a bearer token carrying `ctx`, valid for `ttl` from now.
pub fn mint(ctx: &RpcContext, ttl: Duration, key: &EncodingKey) -> Result<String, AuthError> {
    let claims = Claims {
        iss: ISSUER.to_string(),
        exp: now_secs()?.saturating_add(ttl.as_secs()),
        ctx: ctx.clone(),
    };
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, key).map_err(AuthError::from)
}

/// Validate a bearer token's signature, issuer, and expiry, returning the
/// [`RpcContext`] it carries.
pub fn validate(token: &str, key: &DecodingKey) -> Result<RpcContext, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_required_spec_claims(&["iss", "exp"]);
    let data = jsonwebtoken::decode::<Claims>(token, key, &validation)?;
    Ok(data.claims.ctx)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn keypair() -> (EncodingKey, DecodingKey) {
        let secret = b"test-only-shared-secret";
        (EncodingKey::from_secret(secret), DecodingKey::from_secret(secret))
    }

    #[test]
    fn mints_and_validates_a_round_trip() {
        let (enc, dec) = keypair();
        let ctx = RpcContext::for_leaf("conn:abc");
        let token = mint(&ctx, Duration::from_secs(60), &enc).unwrap();
        let back = validate(&token, &dec).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn rejects_an_expired_token() {
        let (enc, dec) = keypair();
        let ctx = RpcContext::for_leaf("conn:abc");
        let token = mint(&ctx, Duration::from_secs(0), &enc).unwrap();
        std::thread::sleep(Duration::from_secs(1));
        assert!(validate(&token, &dec).is_err());
    }
}
