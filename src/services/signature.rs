use ring::{digest, hmac};

/// Signs `payload` with HMAC-SHA256 and returns the tag as lowercase hex
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hex::encode(hmac::sign(&key, payload.as_bytes()).as_ref())
}

/// Constant-time check of a hex HMAC-SHA256 tag
pub fn verify(payload: &str, signature: &str, key: &[u8]) -> bool {
    let Ok(tag) = hex::decode(signature) else {
        return false;
    };

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &tag).is_ok()
}

/// Derives a 32-byte key from a configured secret string.
/// Uses SHA-256 so any secret length yields exactly 32 bytes.
pub fn derive_key(key_string: &str) -> [u8; 32] {
    let hash = digest::digest(&digest::SHA256, key_string.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}
