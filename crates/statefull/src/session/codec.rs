//! Signed session tokens carried in request/response headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::str::FromStr;
use std::sync::Arc;

use statefull_common::{Result, Session, StatefullError};

use crate::config::{SessionConfig, parse_header_name};

/// Produces opaque ids for fresh sessions
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Random UUID v4 ids
pub fn uuid_generator() -> IdGenerator {
    Arc::new(|| uuid::Uuid::new_v4().to_string())
}

/// Signs, verifies and transports session tokens
pub struct SessionCodec {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    request_header: HeaderName,
    request_prefix: String,
    response_header: HeaderName,
    response_prefix: String,
}

impl SessionCodec {
    pub fn new(config: &SessionConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(StatefullError::Config("session secret must not be empty".into()));
        }

        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            StatefullError::Config(format!("unknown signature algorithm '{}'", config.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(StatefullError::Config(format!(
                "session signing needs a symmetric algorithm, got '{}'",
                config.algorithm
            )));
        }

        // Session tokens carry no registered claims
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            request_header: parse_header_name(&config.request_header)?,
            request_prefix: config.request_prefix.clone(),
            response_header: parse_header_name(&config.response_header)?,
            response_prefix: config.response_prefix.clone(),
        })
    }

    pub fn sign(&self, session: &Session) -> Result<String> {
        jsonwebtoken::encode(&Header::new(self.algorithm), session, &self.encoding_key)
            .map_err(|e| StatefullError::Internal(format!("failed to sign session: {e}")))
    }

    /// Verify a bare token. The result is never `new`.
    pub fn verify(&self, token: &str) -> Option<Session> {
        match jsonwebtoken::decode::<Session>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                let mut session = data.claims;
                session.is_new = false;
                Some(session)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                None
            }
        }
    }

    /// Extract and verify the token from request headers
    pub fn read(&self, headers: &HeaderMap) -> Option<Session> {
        let raw = headers.get(&self.request_header)?.to_str().ok()?;
        let token = raw.strip_prefix(self.request_prefix.as_str())?;
        if token.is_empty() {
            return None;
        }
        self.verify(token)
    }

    /// Verified session from the request, or a fresh one
    pub fn resolve(&self, headers: &HeaderMap, ids: &IdGenerator) -> Session {
        self.read(headers).unwrap_or_else(|| Session::fresh(ids()))
    }

    /// Sign `session` into the response header
    pub fn write(&self, session: &Session, headers: &mut HeaderMap) -> Result<()> {
        let token = self.sign(session)?;
        let value = HeaderValue::from_str(&format!("{}{}", self.response_prefix, token))
            .map_err(|e| StatefullError::Internal(format!("unencodable session header: {e}")))?;
        headers.insert(self.response_header.clone(), value);
        Ok(())
    }
}
