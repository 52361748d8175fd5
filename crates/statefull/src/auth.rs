//! Node authentication.
//!
//! A node proves it knows the shared secret by sending three headers: a
//! millisecond timestamp `t`, a salt `s`, and `h = hash(t + secret + t, s)`.
//! The router recomputes `h` with its own copy of the secret and compares.
//!
//! Without `time_window_ms` any old proof replays; nodes are expected to use a
//! fresh timestamp and salt per request.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

use statefull_common::{Result, StatefullError};

use crate::config::{NodeConfig, NodeHeaderNames};
use crate::hash::{Digest, HashOptions, SecretHasher, check_parameters, generate_salt};
use crate::registry::{Clock, SystemClock};

fn proof_value(millis: i64, secret: &str) -> String {
    format!("{millis}{secret}{millis}")
}

/// Header value as text. `Ok(None)` when absent; a value that is not
/// visible ASCII is malformed input rather than a missing header.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some).map_err(|_| {
            StatefullError::InvalidInput(format!("'{name}' header value is not valid text"))
        }),
    }
}

fn non_empty<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>> {
    Ok(header_str(headers, name)?.filter(|v| !v.is_empty()))
}

/// The three values a node presents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProof {
    pub time: i64,
    pub salt: String,
    pub hash: String,
}

impl NodeProof {
    /// Produce a proof for `millis` with a fresh salt (node side)
    pub fn generate(hasher: &dyn SecretHasher, config: &NodeConfig, millis: i64) -> Result<Self> {
        let value = proof_value(millis, &config.secret);
        let salt = generate_salt();
        let hashed = hasher.hash(
            &HashOptions::new(&value)
                .salt(&salt)
                .iterations(config.hash_iterations)
                .key_length(config.hash_key_length)
                .algorithm(&config.hash_algorithm),
        )?;

        Ok(Self {
            time: millis,
            salt: hashed.salt,
            hash: hashed.hash,
        })
    }

    /// Read a proof from request headers
    pub fn from_headers(headers: &HeaderMap, names: &NodeHeaderNames) -> Result<Self> {
        let time = non_empty(headers, &names.time)?
            .and_then(|t| t.trim().parse::<i64>().ok())
            .ok_or_else(|| {
                StatefullError::InvalidInput(format!(
                    "'{}' header value is not a valid number",
                    names.time
                ))
            })?;

        let hash = non_empty(headers, &names.hash)?.ok_or_else(|| {
            StatefullError::InvalidInput(format!("'{}' header value is not set or empty", names.hash))
        })?;

        let salt = non_empty(headers, &names.salt)?.ok_or_else(|| {
            StatefullError::InvalidInput(format!("'{}' header value is not set or empty", names.salt))
        })?;

        Ok(Self {
            time,
            salt: salt.to_string(),
            hash: hash.to_string(),
        })
    }

    /// Write the proof into outgoing request headers (node side)
    pub fn apply(&self, headers: &mut HeaderMap, names: &NodeHeaderNames) -> Result<()> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| StatefullError::Internal(format!("unencodable proof header: {e}")))
        };
        headers.insert(names.time.clone(), value(&self.time.to_string())?);
        headers.insert(names.salt.clone(), value(&self.salt)?);
        headers.insert(names.hash.clone(), value(&self.hash)?);
        Ok(())
    }
}

/// Verifies node proofs against the configured secret
pub struct NodeAuthGuard {
    hasher: Arc<dyn SecretHasher>,
    clock: Arc<dyn Clock>,
    secret: String,
    iterations: u32,
    key_length: usize,
    algorithm: String,
    time_window_ms: Option<u64>,
    names: NodeHeaderNames,
}

impl NodeAuthGuard {
    pub fn new(config: &NodeConfig, hasher: Arc<dyn SecretHasher>) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(StatefullError::Config("node secret must not be empty".into()));
        }
        Digest::parse(&config.hash_algorithm)?;
        check_parameters(config.hash_iterations, config.hash_key_length)?;

        Ok(Self {
            hasher,
            clock: Arc::new(SystemClock),
            secret: config.secret.clone(),
            iterations: config.hash_iterations,
            key_length: config.hash_key_length,
            algorithm: config.hash_algorithm.clone(),
            time_window_ms: config.time_window_ms,
            names: config.headers.names()?,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn header_names(&self) -> &NodeHeaderNames {
        &self.names
    }

    /// Parse and verify the proof carried by a request
    pub fn verify_headers(&self, headers: &HeaderMap) -> Result<()> {
        let proof = NodeProof::from_headers(headers, &self.names)?;
        self.verify(&proof)
    }

    pub fn verify(&self, proof: &NodeProof) -> Result<()> {
        if let Some(window) = self.time_window_ms {
            let skew = self.clock.now_millis().abs_diff(proof.time);
            if skew > window {
                return Err(StatefullError::Auth(format!(
                    "proof timestamp is {skew}ms away from now"
                )));
            }
        }

        let value = proof_value(proof.time, &self.secret);
        let options = HashOptions::new(&value)
            .salt(&proof.salt)
            .iterations(self.iterations)
            .key_length(self.key_length)
            .algorithm(&self.algorithm);

        if self.hasher.verify(&options, &proof.hash)? {
            Ok(())
        } else {
            Err(StatefullError::Auth("node secret hash mismatch".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Pbkdf2Hasher;
    use crate::registry::ManualClock;

    const SECRET: &str = "Some1Random2Node3Secret4_5.6";

    fn config() -> NodeConfig {
        let mut config = NodeConfig::new(SECRET);
        // Keep unit tests fast
        config.hash_iterations = 10;
        config
    }

    fn guard(config: &NodeConfig) -> NodeAuthGuard {
        NodeAuthGuard::new(config, Arc::new(Pbkdf2Hasher)).unwrap()
    }

    fn headers_for(proof: &NodeProof, config: &NodeConfig) -> HeaderMap {
        let mut headers = HeaderMap::new();
        proof.apply(&mut headers, &config.headers.names().unwrap()).unwrap();
        headers
    }

    #[test]
    fn test_valid_proof_passes() {
        let config = config();
        let proof = NodeProof::generate(&Pbkdf2Hasher, &config, 1_700_000_000_000).unwrap();
        assert!(guard(&config).verify_headers(&headers_for(&proof, &config)).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_auth_error() {
        let config = config();
        let mut other = config.clone();
        other.secret = "not-the-secret".into();

        let proof = NodeProof::generate(&Pbkdf2Hasher, &other, 1_700_000_000_000).unwrap();
        let err = guard(&config).verify(&proof).unwrap_err();
        assert!(matches!(err, StatefullError::Auth(_)));
    }

    #[test]
    fn test_tampered_time_is_auth_error() {
        let config = config();
        let mut proof = NodeProof::generate(&Pbkdf2Hasher, &config, 1_000).unwrap();
        proof.time = 1_001;
        assert!(matches!(guard(&config).verify(&proof), Err(StatefullError::Auth(_))));
    }

    #[test]
    fn test_non_numeric_time_is_malformed() {
        let config = config();
        let proof = NodeProof::generate(&Pbkdf2Hasher, &config, 1_000).unwrap();
        let mut headers = headers_for(&proof, &config);
        headers.insert("statefull_node_time", HeaderValue::from_static("soon"));

        let err = guard(&config).verify_headers(&headers).unwrap_err();
        assert!(matches!(err, StatefullError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_salt_is_malformed() {
        let config = config();
        let proof = NodeProof::generate(&Pbkdf2Hasher, &config, 1_000).unwrap();
        let mut headers = headers_for(&proof, &config);
        headers.insert("statefull_node_salt", HeaderValue::from_static(""));

        let err = guard(&config).verify_headers(&headers).unwrap_err();
        assert!(matches!(err, StatefullError::InvalidInput(_)));
    }

    #[test]
    fn test_header_str_distinguishes_absent_and_malformed() {
        let name = HeaderName::from_static("statefull_node_id");
        let mut headers = HeaderMap::new();
        assert_eq!(header_str(&headers, &name).unwrap(), None);

        headers.insert(name.clone(), HeaderValue::from_static("12"));
        assert_eq!(header_str(&headers, &name).unwrap(), Some("12"));

        headers.insert(name.clone(), HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap());
        assert!(matches!(header_str(&headers, &name), Err(StatefullError::InvalidInput(_))));
    }

    #[test]
    fn test_time_window() {
        let mut config = config();
        config.time_window_ms = Some(5_000);
        let clock = Arc::new(ManualClock::new(100_000));
        let guard = guard(&config).with_clock(clock.clone());

        let fresh = NodeProof::generate(&Pbkdf2Hasher, &config, 97_000).unwrap();
        assert!(guard.verify(&fresh).is_ok());

        clock.advance(10_000);
        assert!(matches!(guard.verify(&fresh), Err(StatefullError::Auth(_))));
    }

    #[test]
    fn test_bad_algorithm_rejected_at_construction() {
        let mut config = config();
        config.hash_algorithm = "md5".into();
        assert!(NodeAuthGuard::new(&config, Arc::new(Pbkdf2Hasher)).is_err());
    }
}
