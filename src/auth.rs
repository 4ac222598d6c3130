use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::models::AuthPayload;

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Issues an HS256 token for `user_id` valid for `ttl_secs` seconds.
pub fn create_jwt(
    user_id: &str,
    secret: &[u8],
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = AuthPayload {
        sub: user_id.to_owned(),
        exp: (now + ttl_secs).max(0) as usize,
        iat: now as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Checks signature and expiry (no leeway) and returns the claims.
pub fn validate_jwt(token: &str, secret: &[u8]) -> Result<AuthPayload, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    let token_data = decode::<AuthPayload>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
