//! Salted PBKDF2 secret hashing.
//!
//! Used to verify node proofs and available to embedders as a general-purpose
//! hasher. The salt string's UTF-8 bytes feed the KDF as-is, so a node and the
//! router only need to agree on the printable salt.

use base64::{Engine, engine::general_purpose::STANDARD};
use pbkdf2::pbkdf2_hmac;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use statefull_common::constants::{SALT_BYTES, hash as defaults};
use statefull_common::{Result, SecretHash, StatefullError};

/// Inputs to one hash computation
#[derive(Debug, Clone)]
pub struct HashOptions<'a> {
    pub value: &'a str,
    /// Generated when absent
    pub salt: Option<&'a str>,
    pub iterations: u32,
    pub key_length: usize,
    pub algorithm: &'a str,
}

impl<'a> HashOptions<'a> {
    /// Options with the general-purpose defaults (512 rounds, 32 bytes, sha512)
    pub fn new(value: &'a str) -> Self {
        Self {
            value,
            salt: None,
            iterations: defaults::DEFAULT_ITERATIONS,
            key_length: defaults::DEFAULT_KEY_LENGTH,
            algorithm: defaults::DEFAULT_ALGORITHM,
        }
    }

    pub fn salt(mut self, salt: &'a str) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn key_length(mut self, key_length: usize) -> Self {
        self.key_length = key_length;
        self
    }

    pub fn algorithm(mut self, algorithm: &'a str) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// Pluggable salted hash function
pub trait SecretHasher: Send + Sync {
    fn hash(&self, options: &HashOptions<'_>) -> Result<SecretHash>;

    /// Recompute with the given salt and compare against `expected` in constant time
    fn verify(&self, options: &HashOptions<'_>, expected: &str) -> Result<bool> {
        let computed = self.hash(options)?;
        Ok(hashes_match(&computed.hash, expected))
    }
}

/// PBKDF2-HMAC over the SHA-2 family
#[derive(Debug, Clone, Copy, Default)]
pub struct Pbkdf2Hasher;

impl SecretHasher for Pbkdf2Hasher {
    fn hash(&self, options: &HashOptions<'_>) -> Result<SecretHash> {
        let digest = Digest::parse(options.algorithm)?;
        check_parameters(options.iterations, options.key_length)?;

        let salt = match options.salt {
            Some(salt) => salt.to_string(),
            None => generate_salt(),
        };

        let mut derived = vec![0u8; options.key_length];
        let (password, salt_bytes, rounds) =
            (options.value.as_bytes(), salt.as_bytes(), options.iterations);
        match digest {
            Digest::Sha224 => pbkdf2_hmac::<Sha224>(password, salt_bytes, rounds, &mut derived),
            Digest::Sha256 => pbkdf2_hmac::<Sha256>(password, salt_bytes, rounds, &mut derived),
            Digest::Sha384 => pbkdf2_hmac::<Sha384>(password, salt_bytes, rounds, &mut derived),
            Digest::Sha512 => pbkdf2_hmac::<Sha512>(password, salt_bytes, rounds, &mut derived),
        }

        Ok(SecretHash {
            salt,
            hash: STANDARD.encode(derived),
        })
    }
}

/// Supported digest names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Digest {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Digest {
    /// Parse a digest name ("sha512", "SHA-256", ...)
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().replace('-', "").as_str() {
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(StatefullError::Config(format!(
                "unsupported digest algorithm '{name}'"
            ))),
        }
    }
}

/// Reject parameters the KDF cannot use
pub fn check_parameters(iterations: u32, key_length: usize) -> Result<()> {
    if iterations == 0 {
        return Err(StatefullError::Config("hash iterations must be at least 1".into()));
    }
    if key_length == 0 {
        return Err(StatefullError::Config("hash key length must be at least 1".into()));
    }
    Ok(())
}

/// Compare two base64 digests on their decoded bytes without early exit.
/// Undecodable input never matches.
pub fn hashes_match(computed: &str, expected: &str) -> bool {
    let (Ok(computed), Ok(expected)) = (STANDARD.decode(computed), STANDARD.decode(expected)) else {
        return false;
    };
    computed.as_slice().ct_eq(expected.as_slice()).into()
}

/// Fresh random salt: 32 random bytes, base64 encoded
pub fn generate_salt() -> String {
    let bytes: [u8; SALT_BYTES] = rand::random();
    STANDARD.encode(bytes)
}
