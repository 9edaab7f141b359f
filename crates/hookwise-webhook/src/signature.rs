//! Webhook signature handling
//!
//! HMAC-SHA256 over the exact wire bytes, carried as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the signature header value
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies that a payload was signed with the shared secret.
///
/// Every failure collapses to `false`: a wrong secret, an altered payload,
/// a malformed header and an altered digest are indistinguishable to the
/// caller. An empty secret never validates anything.
#[derive(Clone)]
pub struct SignatureValidator {
    secret: Vec<u8>,
}

impl SignatureValidator {
    /// Create a new validator with a secret
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Check a `sha256=<hex>` signature against the raw payload
    pub fn is_valid(&self, payload: &[u8], signature: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }

        let Some(supplied) = signature.strip_prefix(SIGNATURE_PREFIX) else {
            return false;
        };

        let expected = compute_signature(&self.secret, payload);
        constant_time_compare(supplied, &expected)
    }
}

impl std::fmt::Debug for SignatureValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureValidator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Produce the `sha256=<hex>` header value for a payload
pub fn sign_payload(secret: impl AsRef<[u8]>, payload: &[u8]) -> String {
    format!("{}{}", SIGNATURE_PREFIX, compute_signature(secret.as_ref(), payload))
}

/// Hex SHA-256 of a payload, stored alongside deliveries
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Compute raw HMAC signature as lowercase hex
fn compute_signature(secret: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can accept any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const PAYLOAD: &[u8] = b"Hello, World!";

    #[test]
    fn test_sign_and_verify() {
        let validator = SignatureValidator::new(SECRET);
        let signature = sign_payload(SECRET, PAYLOAD);

        assert!(validator.is_valid(PAYLOAD, &signature));
    }

    #[test]
    fn test_known_vector() {
        // Published example for X-Hub-Signature-256.
        let signature = sign_payload(SECRET, PAYLOAD);
        assert_eq!(
            signature,
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_wrong_secret() {
        let validator = SignatureValidator::new("secret-2");
        let signature = sign_payload("secret-1", PAYLOAD);

        assert!(!validator.is_valid(PAYLOAD, &signature));
    }

    #[test]
    fn test_any_payload_byte_altered() {
        let validator = SignatureValidator::new(SECRET);
        let signature = sign_payload(SECRET, PAYLOAD);

        for i in 0..PAYLOAD.len() {
            let mut altered = PAYLOAD.to_vec();
            altered[i] ^= 0x01;
            assert!(!validator.is_valid(&altered, &signature), "byte {} altered", i);
        }
    }

    #[test]
    fn test_any_secret_byte_altered() {
        let signature = sign_payload(SECRET, PAYLOAD);

        for i in 0..SECRET.len() {
            let mut altered = SECRET.as_bytes().to_vec();
            altered[i] ^= 0x01;
            let validator = SignatureValidator::new(&altered);
            assert!(!validator.is_valid(PAYLOAD, &signature), "secret byte {} altered", i);
        }
    }

    #[test]
    fn test_any_signature_byte_altered() {
        let validator = SignatureValidator::new(SECRET);
        let signature = sign_payload(SECRET, PAYLOAD);

        for i in 0..signature.len() {
            let mut altered = signature.clone().into_bytes();
            altered[i] = if altered[i] == b'0' { b'1' } else { b'0' };
            let altered = String::from_utf8(altered).unwrap();
            assert!(!validator.is_valid(PAYLOAD, &altered), "signature byte {} altered", i);
        }
    }

    #[test]
    fn test_malformed_signatures_are_invalid() {
        let validator = SignatureValidator::new(SECRET);
        let digest = sign_payload(SECRET, PAYLOAD);
        let bare = digest.trim_start_matches(SIGNATURE_PREFIX);

        assert!(!validator.is_valid(PAYLOAD, ""));
        assert!(!validator.is_valid(PAYLOAD, "sha256="));
        assert!(!validator.is_valid(PAYLOAD, bare));
        assert!(!validator.is_valid(PAYLOAD, &format!("sha1={}", bare)));
        assert!(!validator.is_valid(PAYLOAD, &digest.to_uppercase()));
        assert!(!validator.is_valid(PAYLOAD, "sha256=not-hex-at-all"));
    }

    #[test]
    fn test_empty_secret_never_validates() {
        let validator = SignatureValidator::new("");
        let signature = sign_payload("", PAYLOAD);

        assert!(!validator.is_valid(PAYLOAD, &signature));
    }

    #[test]
    fn test_payload_hash() {
        assert_eq!(
            payload_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let validator = SignatureValidator::new(SECRET);
        assert!(!format!("{:?}", validator).contains(SECRET));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
