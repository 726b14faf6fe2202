use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Length of the public tokens handed to vote counters and paper authorities.
pub const ACCESS_TOKEN_LENGTH: usize = 17;

/// Deterministic short token derived from a secret and a description of
/// what it grants access to. Same inputs always give the same token.
pub fn access_token(secret: &str, key: &str, info: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(key.as_bytes());
    hasher.update(b":");
    hasher.update(info.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(hasher.finalize());
    encoded[..ACCESS_TOKEN_LENGTH].to_string()
}

/// Lowercase hex SHA-256.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Lowercase hex HMAC-SHA256 of `message` keyed by `key`.
pub fn hmac_sha256_hex(key: &str, message: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Random url-safe key for counters and similar secrets.
pub fn random_key() -> String {
    let bytes: Vec<u8> = uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .chain(uuid::Uuid::new_v4().as_bytes())
        .copied()
        .collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_tokens_are_stable_and_short() {
        let first = access_token("secret", "counter-key", "location-01");
        let second = access_token("secret", "counter-key", "location-01");
        assert_eq!(first, second);
        assert_eq!(first.len(), ACCESS_TOKEN_LENGTH);
    }

    #[test]
    fn access_tokens_depend_on_info() {
        assert_ne!(
            access_token("secret", "key", "a"),
            access_token("secret", "key", "b")
        );
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_matches_rfc_4231_case_2() {
        assert_eq!(
            hmac_sha256_hex("Jefe", "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn random_keys_differ() {
        let key = random_key();
        assert!(key.len() > 10);
        assert_ne!(key, random_key());
    }
}
