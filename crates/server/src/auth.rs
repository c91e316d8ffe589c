//! Password verification.
//!
//! Stored entries are `salt:hash` with a SHA-256 hex digest of
//! `salt + password`. Legacy plaintext entries (no colon) still verify, with
//! both sides padded to a common length. All comparisons are constant-time.

use sha2::{Digest, Sha256};

/// Verify `password` against a stored entry.
pub fn verify(password: &str, stored: &str) -> bool {
    match stored.split_once(':') {
        Some((salt, expected)) => {
            let digest = hash_hex(salt, password);
            constant_time_eq(digest.as_bytes(), expected.to_ascii_lowercase().as_bytes())
        }
        None => {
            // Legacy plaintext entry.
            constant_time_eq(password.as_bytes(), stored.as_bytes())
        }
    }
}

/// Produce a `salt:hash` entry for configuration files.
pub fn hash_password(salt: &str, password: &str) -> String {
    format!("{salt}:{}", hash_hex(salt, password))
}

fn hash_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Compare with padding to a common length so neither the length nor the
/// first differing byte leaks through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff = (a.len() ^ b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salted_hash_round_trip() {
        let stored = hash_password("pasir", "rahasia");
        assert!(stored.starts_with("pasir:"));
        assert!(verify("rahasia", &stored));
        assert!(!verify("salah", &stored));
    }

    #[test]
    fn hash_is_case_insensitive_on_the_stored_side() {
        let stored = hash_password("s", "pw").to_ascii_uppercase();
        let stored = stored.replacen("S:", "s:", 1);
        assert!(verify("pw", &stored));
    }

    #[test]
    fn legacy_plaintext_still_verifies() {
        assert!(verify("hunter2", "hunter2"));
        assert!(!verify("hunter2", "hunter3"));
        assert!(!verify("hunter2", "hunter22"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
