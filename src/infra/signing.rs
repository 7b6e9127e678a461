//! HMAC-SHA256 signatures for webhook bodies and outbound callbacks.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::domain::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Optional prefix some providers put before the hex digest
const SIGNATURE_PREFIX: &str = "sha256=";

fn mac_for(secret: &SecretString) -> Result<HmacSha256, AppError> {
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid HMAC key: {}", e)))
}

/// Hex-encoded HMAC-SHA256 of `body`
pub fn sign_payload(secret: &SecretString, body: &[u8]) -> Result<String, AppError> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex signature over the raw body in constant time.
///
/// Accepts an optional `sha256=` prefix. Malformed hex is a mismatch, not an error.
pub fn verify_signature(secret: &SecretString, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("whsec_test_secret")
    }

    #[test]
    fn test_sign_then_verify() {
        let body = br#"{"status":"SUCCESSFUL"}"#;
        let signature = sign_payload(&secret(), body).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_signature(&secret(), body, &signature));
        assert!(verify_signature(
            &secret(),
            body,
            &format!("sha256={}", signature)
        ));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signature = sign_payload(&secret(), b"amount=1000").unwrap();
        assert!(!verify_signature(&secret(), b"amount=9000", &signature));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let body = b"payload";
        let signature = sign_payload(&SecretString::from("other"), body).unwrap();
        assert!(!verify_signature(&secret(), body, &signature));
    }

    #[test]
    fn test_garbage_signature_is_rejected() {
        assert!(!verify_signature(&secret(), b"payload", "not-hex"));
        assert!(!verify_signature(&secret(), b"payload", ""));
        assert!(!verify_signature(&secret(), b"payload", "abcd"));
    }
}
