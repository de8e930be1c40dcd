//! Instance API key generation.
//!
//! Keys are generated once at instance creation and never rotated by this
//! subsystem. 32 random bytes rendered as lowercase hex (64 characters).

use rand::RngCore;

/// Number of random bytes in a key.
const KEY_BYTES: usize = 32;

/// Generate a fresh opaque API key.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::rng().fill_bytes(&mut bytes);

    let mut out = String::with_capacity(KEY_BYTES * 2);
    for byte in bytes {
        use std::fmt::Write;
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_64_hex_chars() {
        let key = generate_api_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(generate_api_key(), generate_api_key());
    }
}
