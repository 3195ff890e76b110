use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::verdict::Rejection;

type HmacSha256 = Hmac<Sha256>;

/// Separates the fields of the presented token string.
pub const SEPARATOR: char = '|';

/// A token string as submitted by a scanning client, split but not yet trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedToken<'a> {
    /// The session id exactly as embedded.
    pub session_id: &'a str,
    /// The claimed issuance time, unix seconds.
    pub issued_at: i64,
    /// The claimed signature, lowercase hex.
    pub signature: &'a str,
}

impl<'a> PresentedToken<'a> {
    /// Splits `sessionId|issuedAt|signature`.
    ///
    /// Anything that does not have that shape is treated as a forgery.
    pub fn parse(raw: &'a str) -> std::result::Result<Self, Rejection> {
        let mut parts = raw.trim().split(SEPARATOR);
        let (Some(session_id), Some(issued_at), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Rejection::TokenForgery);
        };

        // Plain decimal digits only, exactly as `encode` writes them.
        let issued_at = issued_at
            .parse::<i64>()
            .ok()
            .filter(|seconds| *seconds >= 0 && seconds.to_string() == issued_at)
            .ok_or(Rejection::TokenForgery)?;

        Ok(Self {
            session_id,
            issued_at,
            signature,
        })
    }

    /// The embedded session id, if it is a well-formed UUID.
    pub fn session_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(self.session_id).ok()
    }
}

/// Computes the hex HMAC-SHA256 over `sessionId:issuedAt`.
pub fn sign(secret: &[u8], session_id: &str, issued_at: i64) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(session_id.as_bytes());
    mac.update(b":");
    mac.update(issued_at.to_string().as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the wire form of a token.
pub fn encode(session_id: Uuid, issued_at: i64, signature: &str) -> String {
    format!("{}{SEPARATOR}{}{SEPARATOR}{}", session_id, issued_at, signature)
}

/// Checks the embedded signature against a fresh one, in constant time.
///
/// Compares the hex text rather than decoded bytes so that a case change in
/// the signature is also a mismatch.
pub fn verify(secret: &[u8], token: &PresentedToken<'_>) -> Result<bool> {
    let expected = sign(secret, token.session_id, token.issued_at)?;
    Ok(bool::from(expected.as_bytes().ct_eq(token.signature.as_bytes())))
}

/// Constant-time equality for two signatures.
pub fn same_signature(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
