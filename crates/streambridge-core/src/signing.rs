//! HMAC signing and verification.
//!
//! Two signature schemes live here:
//!
//! - **Inbound** (EventSub transport): `HMAC-SHA256` over
//!   `message_id || timestamp || body`, presented by Twitch as
//!   `sha256=<hex>` in the message signature header. Verification is
//!   constant-time and accepts only the declared algorithm.
//! - **Outbound** (webhook targets): `HMAC-<algo>` over the payload body,
//!   sent as `<algo>=<hex>` in a per-target header, GitHub-webhook style.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

/// Hash algorithm for outbound webhook signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-1", alias = "sha1")]
    Sha1,
    #[default]
    #[serde(rename = "SHA-256", alias = "sha256")]
    Sha256,
    #[serde(rename = "SHA-512", alias = "sha512")]
    Sha512,
}

impl HashAlgorithm {
    /// Lowercase token used as the signature value prefix.
    pub fn token(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

// HMAC accepts keys of any length, so the empty-key fallback is unreachable.
fn hmac_sha1_hex(secret: &[u8], data: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret).unwrap_or_else(|_| Hmac::<Sha1>::new(&Default::default()));
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha256_hex(secret: &[u8], data: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .unwrap_or_else(|_| Hmac::<Sha256>::new(&Default::default()));
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha512_hex(secret: &[u8], data: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret)
        .unwrap_or_else(|_| Hmac::<Sha512>::new(&Default::default()));
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the outbound signature header value: `<algo>=<hex>`.
pub fn signature_header_value(algorithm: HashAlgorithm, secret: &str, payload: &[u8]) -> String {
    let digest = match algorithm {
        HashAlgorithm::Sha1 => hmac_sha1_hex(secret.as_bytes(), payload),
        HashAlgorithm::Sha256 => hmac_sha256_hex(secret.as_bytes(), payload),
        HashAlgorithm::Sha512 => hmac_sha512_hex(secret.as_bytes(), payload),
    };
    format!("{}={}", algorithm.token(), digest)
}

/// Verify an EventSub transport signature.
///
/// The signed message is `message_id || timestamp || body` and the header
/// value must carry the `sha256=` prefix; any other algorithm is rejected.
/// Comparison is constant-time via [`Mac::verify_slice`].
pub fn verify_eventsub_signature(
    secret: &str,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(signature_hex) = provided.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Compute the EventSub transport signature for a message, in header form.
/// Used by tests and by operators replaying captured notifications.
pub fn eventsub_signature(secret: &str, message_id: &str, timestamp: &str, body: &[u8]) -> String {
    let mut message = Vec::with_capacity(message_id.len() + timestamp.len() + body.len());
    message.extend_from_slice(message_id.as_bytes());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    format!("sha256={}", hmac_sha256_hex(secret.as_bytes(), &message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eventsub_roundtrip() {
        let signature = eventsub_signature("secret", "msg-1", "2024-01-01T00:00:00Z", b"{}");
        assert!(verify_eventsub_signature(
            "secret",
            "msg-1",
            "2024-01-01T00:00:00Z",
            b"{}",
            &signature
        ));
    }

    #[test]
    fn flipped_body_bit_fails() {
        let signature = eventsub_signature("secret", "msg-1", "ts", b"payload");
        let mut tampered = b"payload".to_vec();
        tampered[0] ^= 0x01;
        assert!(!verify_eventsub_signature(
            "secret", "msg-1", "ts", &tampered, &signature
        ));
    }

    #[test]
    fn flipped_signature_bit_fails() {
        let signature = eventsub_signature("secret", "msg-1", "ts", b"payload");
        // Flip one nibble of the hex digest.
        let mut chars: Vec<char> = signature.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();
        assert!(!verify_eventsub_signature(
            "secret", "msg-1", "ts", b"payload", &tampered
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let signature = eventsub_signature("secret", "msg-1", "ts", b"payload");
        assert!(!verify_eventsub_signature(
            "other", "msg-1", "ts", b"payload", &signature
        ));
    }

    #[test]
    fn missing_prefix_rejected() {
        assert!(!verify_eventsub_signature(
            "secret", "m", "t", b"x", "deadbeef"
        ));
        assert!(!verify_eventsub_signature(
            "secret",
            "m",
            "t",
            b"x",
            "sha512=deadbeef"
        ));
    }

    #[test]
    fn outbound_header_value_per_algorithm() {
        let sha1 = signature_header_value(HashAlgorithm::Sha1, "s", b"body");
        let sha256 = signature_header_value(HashAlgorithm::Sha256, "s", b"body");
        let sha512 = signature_header_value(HashAlgorithm::Sha512, "s", b"body");

        assert!(sha1.starts_with("sha1="));
        assert!(sha256.starts_with("sha256="));
        assert!(sha512.starts_with("sha512="));
        // Digest lengths: 20, 32 and 64 bytes hex-encoded.
        assert_eq!(sha1.len(), "sha1=".len() + 40);
        assert_eq!(sha256.len(), "sha256=".len() + 64);
        assert_eq!(sha512.len(), "sha512=".len() + 128);
    }

    #[test]
    fn algorithm_names_parse_from_config_form() {
        let parsed: HashAlgorithm = serde_json::from_str("\"SHA-512\"").unwrap();
        assert_eq!(parsed, HashAlgorithm::Sha512);
        let parsed: HashAlgorithm = serde_json::from_str("\"sha1\"").unwrap();
        assert_eq!(parsed, HashAlgorithm::Sha1);
    }
}
