//! JWT mint and validation
//!
//! Wire format: `base64url(header) . base64url(claims) .
//! base64url(HMAC-SHA256(header + "." + claims, secret))` with unpadded
//! URL-safe base64. The signature comparison is constant-time (the HMAC
//! verify primitive, not a byte-by-byte equality).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use nornic_core::{now_millis, NornicError, Result};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length when security is enabled.
pub const MIN_SECRET_LEN: usize = 32;

/// Token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: user id, or node id for cluster-peer tokens.
    pub sub: String,
    /// Display username (node name for peers).
    pub username: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Issued-at, seconds since epoch.
    pub iat: i64,
    /// Expiry, seconds since epoch; 0 = never expires.
    #[serde(default)]
    pub exp: i64,
}

/// Password-grant token response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The signed JWT.
    pub access_token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Seconds until expiry; absent for never-expiring tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Deserialize)]
struct HeaderView {
    alg: String,
}

/// Stateless signer/validator bound to one HMAC secret.
#[derive(Clone)]
pub struct JwtSigner {
    secret: Vec<u8>,
}

impl JwtSigner {
    /// Bind a secret. Fails when shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(NornicError::invalid_input(format!(
                "jwt secret must be at least {} bytes",
                MIN_SECRET_LEN
            )));
        }
        Ok(JwtSigner { secret })
    }

    /// Sign claims into a compact JWT.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        let header = serde_json::to_vec(&Header {
            alg: "HS256",
            typ: "JWT",
        })?;
        let claims_json = serde_json::to_vec(claims)?;

        let mut token = String::new();
        token.push_str(&URL_SAFE_NO_PAD.encode(header));
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(claims_json));

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| NornicError::invalid_input("invalid hmac key"))?;
        mac.update(token.as_bytes());
        let signature = mac.finalize().into_bytes();

        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(signature));
        Ok(token)
    }

    /// Validate a token: structure, signature (constant-time), expiry.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(c), Some(s), None) => (h, c, s),
                _ => return Err(NornicError::InvalidToken),
            };

        let signing_input_len = header_b64.len() + 1 + claims_b64.len();
        let signing_input = &token[..signing_input_len];

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| NornicError::InvalidToken)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| NornicError::InvalidToken)?;
        mac.update(signing_input.as_bytes());
        // Constant-time comparison lives inside verify_slice.
        mac.verify_slice(&signature)
            .map_err(|_| NornicError::InvalidToken)?;

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|_| NornicError::InvalidToken)?;
        let header: HeaderView =
            serde_json::from_slice(&header_bytes).map_err(|_| NornicError::InvalidToken)?;
        if header.alg != "HS256" {
            return Err(NornicError::InvalidToken);
        }

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| NornicError::InvalidToken)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| NornicError::InvalidToken)?;

        if claims.exp != 0 && claims.exp <= now_millis() / 1000 {
            return Err(NornicError::SessionExpired);
        }
        Ok(claims)
    }
}
