//! Password hashing
//!
//! Argon2id with per-hash salts. The default parameters land the hash
//! above the 100 ms work-factor floor on current server hardware.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use tunnel_common::{CoreError, CoreResult};

/// Minimum accepted password length
pub const MIN_PASSWORD_LEN: usize = 8;

/// Validate a candidate password against the policy
pub fn validate(password: &str) -> CoreResult<()> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(CoreError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Hash a password into a PHC string
pub fn hash(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CoreError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored PHC string
pub fn verify(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hashed = hash("pw12345678").unwrap();
        assert!(verify("pw12345678", &hashed));
        assert!(!verify("pw12345679", &hashed));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash("pw12345678").unwrap();
        let b = hash("pw12345678").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_policy_rejects_short_passwords() {
        assert!(validate("short").is_err());
        assert!(validate("longenough").is_ok());
    }

    #[test]
    fn test_garbage_stored_hash_never_verifies() {
        assert!(!verify("anything", "not-a-phc-string"));
    }
}
