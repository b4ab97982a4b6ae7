//! Request authorization: the shared agent key and signed operator tokens.
//!
//! Operator tokens are HS256 JWTs, the compact three-segment form
//! `base64url(header).base64url(claims).base64url(signature)`. The signing
//! secret is derived from the service key and a random salt at startup, so a
//! restart invalidates every issued token.

use super::{ApiError, AppState};
use crate::protocol::API_KEY_HEADER;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of an operator token.
pub const TOKEN_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Token error types. Each one rejects the request with 401.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: String,
    /// Expiry, unix seconds
    pub exp: i64,
}

/// Issues and verifies operator tokens.
pub struct TokenIssuer {
    secret: Vec<u8>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    /// Derive a fresh secret from the service key and a random salt.
    pub fn new(service_key: &str) -> Result<Self, TokenError> {
        let salt: [u8; 16] = rand::random();
        Self::with_salt(service_key, &salt)
    }

    pub fn with_salt(service_key: &str, salt: &[u8]) -> Result<Self, TokenError> {
        let mut mac = HmacSha256::new_from_slice(service_key.as_bytes())
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        mac.update(salt);
        let secret = mac.finalize().into_bytes().to_vec();

        // Expiry is checked against the caller's clock in `verify`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(&secret),
            decoding: DecodingKey::from_secret(&secret),
            secret,
            validation,
        })
    }

    /// Issue a token for `subject`, valid for [`TOKEN_LIFETIME_SECS`] from `now`.
    pub fn issue(&self, subject: &str, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: subject.to_string(),
            exp: now + TOKEN_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verify structure, signature and expiry, in that order.
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            })?;

        if now > data.claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

/// Static credentials: the agent key and the operator login.
pub struct Credentials {
    pub service_key: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn check_service_key(&self, provided: &str) -> bool {
        constant_time_eq(provided, &self.service_key)
    }

    pub fn check_login(&self, username: &str, password: &str) -> bool {
        // Evaluate both so timing does not reveal which one failed.
        let user_ok = constant_time_eq(username, &self.username);
        let pass_ok = constant_time_eq(password, &self.password);
        user_ok & pass_ok
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Admit only requests carrying the shared service key.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !state.credentials.check_service_key(provided) {
        return Err(ApiError::Unauthorized("unauthorized".to_string()));
    }

    Ok(next.run(req).await)
}

/// Admit only requests carrying a valid, unexpired bearer token.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;

    state
        .tokens
        .verify(token, Utc::now().timestamp())
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    Ok(next.run(req).await)
}
