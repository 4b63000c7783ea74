//! Bearer token verification
//!
//! Tokens are signed claim blobs issued by the account service:
//!
//! 1. Encode claims: `Base64(JSON(claims))`
//! 2. Calculate HMAC-SHA256 digest over the encoded part
//! 3. Format: `${encoded}--${digest_hex}`
//!
//! The signature check uses constant-time comparison; expiry is part of the
//! claims and checked after the signature.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Identity claims carried inside a signed token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub username: String,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
}

/// Validates a bearer credential into identity claims
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HMAC-SHA256 token verifier
pub struct HmacTokenVerifier {
    key: Vec<u8>,
}

impl HmacTokenVerifier {
    /// Create a new verifier with the given secret key
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    /// Verify a signed token and return the decoded claims
    pub fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let parts: Vec<&str> = token.split("--").collect();
        if parts.len() != 2 {
            return Err(AuthError::InvalidFormat);
        }

        let encoded = parts[0];
        let signature = parts[1];

        if !self.verify_signature(encoded.as_bytes(), signature)? {
            return Err(AuthError::InvalidSignature);
        }

        let json_bytes = base64_decode(encoded)?;
        let json_str = String::from_utf8(json_bytes)?;
        let claims: Claims = serde_json::from_str(&json_str)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(claims)
    }

    /// Verify the HMAC signature
    fn verify_signature(&self, data: &[u8], signature: &str) -> Result<bool, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::InvalidKey)?;
        mac.update(data);
        let expected = mac.finalize().into_bytes();
        let expected_hex = hex::encode(expected);

        // Constant-time comparison
        Ok(expected_hex.as_bytes().ct_eq(signature.as_bytes()).into())
    }

    /// Generate a signed token (for tooling and tests)
    #[allow(dead_code)]
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let json = serde_json::to_string(claims)?;
        let encoded = base64_encode(json.as_bytes());

        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::InvalidKey)?;
        mac.update(encoded.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}--{}", encoded, signature))
    }
}

#[async_trait]
impl TokenVerifier for HmacTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode(token)
    }
}

/// Errors during token verification
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid key")]
    InvalidKey,
    #[error("token expired")]
    Expired,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("utf8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Standard base64 encode
fn base64_encode(data: &[u8]) -> String {
    use base64::{Engine, engine::general_purpose::STANDARD};
    STANDARD.encode(data)
}

/// Standard base64 decode
fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{Engine, engine::general_purpose::STANDARD};
    STANDARD.decode(data)
}
