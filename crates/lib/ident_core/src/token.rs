//! Access and refresh token minting.
//!
//! Access tokens are PASETO `v2.public` tokens with a JSON payload and a
//! `{"kid": ...}` footer naming the signing key. Tokens are signed with the
//! requesting client's private key, so each client can verify its own tokens
//! offline with the public key it received at registration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use ed25519_dalek::SigningKey;
use pasetors::Public;
use pasetors::errors::Error as PasetorsError;
use pasetors::keys::{AsymmetricPublicKey, AsymmetricSecretKey};
use pasetors::token::UntrustedToken;
use pasetors::version2::{PublicToken, V2};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Claim names set by the issuer; custom claims may not override them.
pub const RESERVED_CLAIMS: [&str; 7] = ["aud", "iss", "jti", "sub", "iat", "nbf", "exp"];

/// Claim carrying the id of the session an access token belongs to.
pub const SESSION_ID_CLAIM: &str = "session_id";

/// An ed25519 key pair in the byte layout stored with each client.
///
/// `private` is the 64-byte keypair encoding (seed followed by public key).
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &STANDARD.encode(&self.public))
            .field("private", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    fn from_signing_key(key: &SigningKey) -> Self {
        Self {
            public: key.verifying_key().to_bytes().to_vec(),
            private: key.to_keypair_bytes().to_vec(),
        }
    }

    /// Short identifier of the public key, used as the token footer `kid`.
    pub fn kid(&self) -> String {
        key_id(&self.public)
    }
}

/// Generate a fresh ed25519 key pair.
pub fn generate_keypair() -> KeyPair {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    KeyPair::from_signing_key(&SigningKey::from_bytes(&seed))
}

/// Decode a base64-wrapped OpenSSH ed25519 private key.
pub fn load_signing_key(encoded_pem: &str) -> Result<KeyPair> {
    const OP: &str = "load signing key";

    let pem = STANDARD
        .decode(encoded_pem.trim())
        .map_err(|e| Error::config(OP, format!("signing key is not valid base64: {e}")))?;
    let key = ssh_key::PrivateKey::from_openssh(&pem)
        .map_err(|e| Error::config(OP, format!("signing key is not an OpenSSH key: {e}")))?;
    if key.is_encrypted() {
        return Err(Error::config(OP, "signing key must not be passphrase protected"));
    }
    let keypair = key
        .key_data()
        .ed25519()
        .ok_or_else(|| Error::config(OP, "signing key is not ed25519"))?;

    let signing = SigningKey::from_bytes(&keypair.private.to_bytes());
    if signing.verifying_key().to_bytes() != keypair.public.0 {
        return Err(Error::config(OP, "signing key public half does not match"));
    }
    Ok(KeyPair::from_signing_key(&signing))
}

/// Generate a new ed25519 key and return it as base64 of its OpenSSH PEM.
pub fn generate_encoded_signing_key(comment: &str) -> Result<String> {
    const OP: &str = "generate signing key";

    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let keypair = ssh_key::private::Ed25519Keypair::from_seed(&seed);
    let key = ssh_key::PrivateKey::new(ssh_key::private::KeypairData::Ed25519(keypair), comment)
        .map_err(|e| Error::internal(OP, e.to_string()))?;
    let pem = key
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| Error::internal(OP, e.to_string()))?;
    Ok(STANDARD.encode(pem.as_bytes()))
}

/// Audience and issuer stamped into every access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub audience: String,
    pub issuer: String,
}

/// Decoded access-token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub aud: String,
    pub iss: String,
    pub jti: String,
    pub sub: String,
    pub iat: DateTime<Utc>,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    #[serde(flatten)]
    pub claims: BTreeMap<String, String>,
}

impl AccessClaims {
    pub fn session_id(&self) -> Option<&str> {
        self.claims.get(SESSION_ID_CLAIM).map(String::as_str)
    }
}

#[derive(Serialize, Deserialize)]
struct Footer {
    kid: String,
}

/// Mints access and refresh tokens.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    settings: TokenSettings,
    signing: Arc<KeyPair>,
}

impl TokenIssuer {
    pub fn new(settings: TokenSettings, signing: KeyPair) -> Self {
        Self {
            settings,
            signing: Arc::new(signing),
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// The process-wide signing key loaded at startup.
    pub fn signing_key(&self) -> &KeyPair {
        &self.signing
    }

    pub fn issue_access(
        &self,
        private_key: &[u8],
        ttl_minutes: i64,
        subject: &str,
        claims: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.issue_access_at(Utc::now(), private_key, ttl_minutes, subject, claims)
    }

    /// Mint an access token as of `now`. Timestamps are truncated to seconds.
    pub fn issue_access_at(
        &self,
        now: DateTime<Utc>,
        private_key: &[u8],
        ttl_minutes: i64,
        subject: &str,
        claims: &BTreeMap<String, String>,
    ) -> Result<String> {
        const OP: &str = "issue access token";

        if let Some(name) = claims.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str())) {
            return Err(Error::validation(OP, format!("claim {name} is reserved")));
        }
        if ttl_minutes < 1 {
            return Err(Error::validation(OP, "access token ttl must be at least 1 minute"));
        }

        let secret = secret_key_from(private_key).map_err(|e| Error::wrap(OP, e))?;
        let now = now.trunc_subsecs(0);
        let payload = AccessClaims {
            aud: self.settings.audience.clone(),
            iss: self.settings.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
            sub: subject.to_string(),
            iat: now,
            nbf: now,
            exp: now + Duration::minutes(ttl_minutes),
            claims: claims.clone(),
        };
        let message = serde_json::to_vec(&payload)?;
        let footer = serde_json::to_vec(&Footer {
            kid: key_id(&private_key[32..]),
        })?;

        PublicToken::sign(&secret, &message, Some(footer.as_slice()))
            .map_err(|e| Error::internal(OP, format!("failed to sign token: {e:?}")))
    }

    /// Random UUIDv4 refresh token.
    pub fn issue_refresh(&self) -> Uuid {
        issue_refresh()
    }
}

pub fn issue_refresh() -> Uuid {
    crate::uuid::uuidv4()
}

/// Verify a `v2.public` access token against `public_key` at the current time.
pub fn verify_access(public_key: &[u8], token: &str) -> Result<AccessClaims> {
    verify_access_at(public_key, token, Utc::now())
}

pub fn verify_access_at(public_key: &[u8], token: &str, now: DateTime<Utc>) -> Result<AccessClaims> {
    const OP: &str = "verify access token";

    let key = AsymmetricPublicKey::<V2>::from(public_key)
        .map_err(|_| Error::validation(OP, "public key must be 32 bytes"))?;
    let untrusted = UntrustedToken::<Public, V2>::try_from(token)
        .map_err(|e| Error::authentication(OP, paseto_error(&e)))?;

    let footer: Footer = serde_json::from_slice(untrusted.untrusted_footer())
        .map_err(|_| Error::authentication(OP, "malformed token footer"))?;
    if footer.kid != key_id(public_key) {
        return Err(Error::authentication(OP, "token was signed with another key"));
    }

    let trusted = PublicToken::verify(&key, &untrusted, None)
        .map_err(|e| Error::authentication(OP, paseto_error(&e)))?;
    let claims: AccessClaims = serde_json::from_str(trusted.payload())
        .map_err(|_| Error::authentication(OP, "malformed token payload"))?;
    if now < claims.nbf {
        return Err(Error::authentication(OP, "token not yet valid"));
    }
    if now >= claims.exp {
        return Err(Error::authentication(OP, "token expired"));
    }
    Ok(claims)
}

fn secret_key_from(private_key: &[u8]) -> Result<AsymmetricSecretKey<V2>> {
    const OP: &str = "load client key";
    if private_key.len() != 64 {
        return Err(Error::internal(OP, "private key must be 64 bytes"));
    }
    AsymmetricSecretKey::<V2>::from(private_key)
        .map_err(|e| Error::internal(OP, format!("invalid private key: {e:?}")))
}

fn paseto_error(err: &PasetorsError) -> &'static str {
    match err {
        PasetorsError::TokenValidation => "invalid token signature",
        PasetorsError::Base64 => "malformed token encoding",
        PasetorsError::TokenFormat => "unsupported token format",
        _ => "malformed token",
    }
}

fn key_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
