//! Webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a GitHub webhook signature using HMAC-SHA256.
///
/// # Arguments
/// * `body` - Raw webhook body bytes
/// * `signature` - Value of the `X-Hub-Signature-256` header
///   (`sha256=<hex digest>`)
/// * `secret` - Webhook signing secret
///
/// # Returns
/// `true` if signature is valid, `false` otherwise
#[must_use]
pub fn verify_webhook_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(signature_bytes) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    // Constant-time comparison to prevent timing attacks
    computed.as_slice().ct_eq(&signature_bytes).into()
}

/// Compute the `X-Hub-Signature-256` header value for a body.
///
/// Used by outbound tooling and tests; verification goes through
/// [`verify_webhook_signature`].
#[must_use]
pub fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_webhook_signature_valid() {
        let body = b"{\"action\":\"labeled\"}";
        let secret = "test-secret";

        let signature = sign_payload(body, secret);
        assert!(verify_webhook_signature(body, &signature, secret));
    }

    #[test]
    fn test_verify_webhook_signature_invalid() {
        let body = b"{\"action\":\"labeled\"}";
        let secret = "test-secret";
        let wrong =
            "sha256=0000000000000000000000000000000000000000000000000000000000000000";

        assert!(!verify_webhook_signature(body, wrong, secret));
    }

    #[test]
    fn test_verify_webhook_signature_wrong_secret() {
        let body = b"payload";
        let signature = sign_payload(body, "secret-a");
        assert!(!verify_webhook_signature(body, &signature, "secret-b"));
    }

    #[test]
    fn test_verify_webhook_signature_missing_prefix() {
        let body = b"payload";
        let secret = "test-secret";

        // Bare hex digest without the sha256= prefix is rejected
        let signature = sign_payload(body, secret);
        let bare = signature.trim_start_matches("sha256=");
        assert!(!verify_webhook_signature(body, bare, secret));
    }

    #[test]
    fn test_verify_webhook_signature_malformed() {
        assert!(!verify_webhook_signature(b"payload", "sha256=not-hex", "s"));
        assert!(!verify_webhook_signature(b"payload", "", "s"));
    }
}
