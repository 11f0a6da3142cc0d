//! Password hashing via PBKDF2-HMAC-SHA3-512.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

pub const DEFAULT_SALT_LENGTH: usize = 16;
pub const DEFAULT_ITERATIONS: u32 = 10_000;
pub const DEFAULT_KEY_LENGTH: usize = 64;

/// Minimum accepted password length, in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Key derivation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub salt_length: usize,
    pub iterations: u32,
    pub key_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            salt_length: DEFAULT_SALT_LENGTH,
            iterations: DEFAULT_ITERATIONS,
            key_length: DEFAULT_KEY_LENGTH,
        }
    }
}

impl PasswordPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.salt_length == 0 || self.iterations == 0 || self.key_length == 0 {
            return Err(Error::config(
                "password policy",
                "salt length, iterations and key length must be positive",
            ));
        }
        Ok(())
    }
}

/// Salted hash ready to persist.
#[derive(Debug, Clone)]
pub struct HashedPassword {
    pub hash: String,
    pub salt: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct PasswordCodec {
    policy: PasswordPolicy,
}

impl PasswordCodec {
    pub fn new(policy: PasswordPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Cryptographically random salt of the configured length.
    pub fn generate_salt(&self) -> Vec<u8> {
        let mut salt = vec![0u8; self.policy.salt_length];
        rand::rng().fill_bytes(&mut salt);
        salt
    }

    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Vec<u8> {
        let mut key = vec![0u8; self.policy.key_length];
        pbkdf2::pbkdf2_hmac::<sha3::Sha3_512>(
            password.as_bytes(),
            salt,
            self.policy.iterations,
            &mut key,
        );
        key
    }

    pub fn encode_key(&self, key: &[u8]) -> String {
        STANDARD.encode(key)
    }

    /// Fresh salt plus encoded derived key for `password`.
    pub fn hash(&self, password: &str) -> HashedPassword {
        let salt = self.generate_salt();
        let hash = self.encode_key(&self.derive_key(password, &salt));
        HashedPassword { hash, salt }
    }

    /// `hash` on the blocking pool, keeping key derivation off the async workers.
    pub async fn spawn_hash(&self, password: &str) -> Result<HashedPassword> {
        let codec = self.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || codec.hash(&password))
            .await
            .map_err(|e| Error::wrap("hash password", e))
    }

    /// `verify` on the blocking pool.
    pub async fn spawn_verify(&self, password: &str, stored_hash: &str, salt: &[u8]) -> Result<()> {
        let codec = self.clone();
        let (password, stored_hash, salt) = (password.to_owned(), stored_hash.to_owned(), salt.to_vec());
        tokio::task::spawn_blocking(move || codec.verify(&password, &stored_hash, &salt))
            .await
            .map_err(|e| Error::wrap("verify password", e))?
    }

    /// Recompute and compare in constant time.
    pub fn verify(&self, password: &str, stored_hash: &str, salt: &[u8]) -> Result<()> {
        let candidate = self.encode_key(&self.derive_key(password, salt));
        if bool::from(candidate.as_bytes().ct_eq(stored_hash.as_bytes())) {
            Ok(())
        } else {
            Err(Error::invalid_credentials("verify password"))
        }
    }

    pub fn validate_strength(&self, password: &str) -> Result<()> {
        validate_strength(password)
    }
}

/// Accepts only passwords of at least eight characters drawn from the
/// lower, upper, digit and punctuation classes, with one of each.
pub fn validate_strength(password: &str) -> Result<()> {
    const OP: &str = "validate password";

    let (mut lower, mut upper, mut digit, mut symbol) = (false, false, false, false);
    let mut length = 0usize;
    for c in password.chars() {
        length += 1;
        match c {
            'a'..='z' => lower = true,
            'A'..='Z' => upper = true,
            '0'..='9' => digit = true,
            c if c.is_ascii_punctuation() => symbol = true,
            _ => {
                return Err(Error::validation(
                    OP,
                    "password contains an unsupported character",
                ));
            }
        }
    }

    if length < MIN_PASSWORD_LENGTH {
        return Err(Error::validation(
            OP,
            format!("password must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    if !(lower && upper && digit && symbol) {
        return Err(Error::validation(
            OP,
            "password must contain a lowercase letter, an uppercase letter, a digit and a symbol",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fast_codec() -> PasswordCodec {
        PasswordCodec::new(PasswordPolicy {
            salt_length: 16,
            iterations: 10,
            key_length: 64,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn blocking_pool_hash_verifies() {
        let codec = fast_codec();
        let hashed = codec.spawn_hash("Passw0rd!").await.unwrap();
        codec
            .spawn_verify("Passw0rd!", &hashed.hash, &hashed.salt)
            .await
            .unwrap();
        let err = codec
            .spawn_verify("Passw0rd?", &hashed.hash, &hashed.salt)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    }

    #[test]
    fn exactly_eight_characters_with_every_class_is_accepted() {
        assert!(validate_strength("Passw0r!").is_ok());
    }

    #[test]
    fn seven_characters_is_rejected() {
        let err = validate_strength("Pass0r!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn missing_class_is_rejected() {
        for pw in ["password1!", "PASSWORD1!", "Password!!", "Password11"] {
            assert_eq!(
                validate_strength(pw).unwrap_err().kind(),
                ErrorKind::Validation,
                "{pw}"
            );
        }
    }

    #[test]
    fn whitespace_and_non_ascii_are_rejected() {
        assert!(validate_strength("Passw0rd! ").is_err());
        assert!(validate_strength("Passw0rdé!").is_err());
    }

    #[test]
    fn verify_accepts_the_hashed_password() {
        let codec = fast_codec();
        let hashed = codec.hash("Passw0rd!");
        assert_eq!(hashed.salt.len(), 16);
        assert!(codec.verify("Passw0rd!", &hashed.hash, &hashed.salt).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let codec = fast_codec();
        let hashed = codec.hash("Passw0rd!");
        let err = codec
            .verify("Passw0rd?", &hashed.hash, &hashed.salt)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    }

    #[test]
    fn derived_key_has_configured_length() {
        let codec = fast_codec();
        assert_eq!(codec.derive_key("x", b"salt").len(), 64);
    }

    #[test]
    fn zero_iterations_is_a_config_error() {
        let err = PasswordCodec::new(PasswordPolicy {
            iterations: 0,
            ..PasswordPolicy::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
