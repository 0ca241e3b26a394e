//! Short-lived JWT credentials used as the MQTT password.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Default lifetime of an issued token.
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read private key {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

/// Signing algorithms accepted for device keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum SigningAlgorithm {
    #[serde(rename = "RS256")]
    #[value(name = "RS256")]
    Rs256,
    #[serde(rename = "ES256")]
    #[value(name = "ES256")]
    Es256,
}

impl SigningAlgorithm {
    fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Rs256 => Algorithm::RS256,
            Self::Es256 => Algorithm::ES256,
        }
    }
}

/// JWT claims presented to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
    /// Audience, the cloud project id.
    pub aud: String,
}

/// Holds the device key and mints credentials.
pub struct TokenSigner {
    algorithm: Algorithm,
    key: EncodingKey,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn from_pem(pem: &[u8], algorithm: SigningAlgorithm) -> Result<Self, CredentialError> {
        let key = match algorithm {
            SigningAlgorithm::Rs256 => EncodingKey::from_rsa_pem(pem),
            SigningAlgorithm::Es256 => EncodingKey::from_ec_pem(pem),
        }
        .map_err(CredentialError::InvalidKey)?;

        Ok(Self {
            algorithm: algorithm.jwt_algorithm(),
            key,
        })
    }

    pub fn from_pem_file(
        path: impl AsRef<Path>,
        algorithm: SigningAlgorithm,
    ) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| CredentialError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem, algorithm)
    }

    /// HMAC signer, only useful against brokers configured with a shared secret.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            key: EncodingKey::from_secret(secret),
        }
    }

    /// Mint a token for `audience` valid for `ttl`.
    pub fn issue(&self, audience: &str, ttl: Duration) -> Result<Credential, CredentialError> {
        let issued_at = Utc::now();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            iat: issued_at.timestamp(),
            exp: issued_at.timestamp().saturating_add(ttl_secs),
            aud: audience.to_string(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(CredentialError::Signing)?;

        Ok(Credential {
            token,
            issued_at,
            issued: Instant::now(),
            ttl,
        })
    }
}

/// A signed token together with its issue time.
#[derive(Clone)]
pub struct Credential {
    token: String,
    issued_at: DateTime<Utc>,
    issued: Instant,
    ttl: Duration,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("issued_at", &self.issued_at)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Time elapsed since the token was minted.
    pub fn age(&self) -> Duration {
        self.issued.elapsed()
    }

    /// A stale credential must be replaced before the next publish.
    pub fn is_stale(&self) -> bool {
        self.age() > self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    const SECRET: &[u8] = b"greenhouse-secret";

    #[test]
    fn test_issued_token_carries_claims() {
        let signer = TokenSigner::from_secret(SECRET);
        let credential = signer.issue("my-project", DEFAULT_CREDENTIAL_TTL).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["my-project"]);
        let decoded = decode::<Claims>(
            credential.token(),
            &DecodingKey::from_secret(SECRET),
            &validation,
        )
        .unwrap();

        assert_eq!(decoded.claims.aud, "my-project");
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 3600);
        assert_eq!(decoded.claims.iat, credential.issued_at().timestamp());
    }

    #[test]
    fn test_invalid_pem_is_rejected() {
        let result = TokenSigner::from_pem(b"not a key", SigningAlgorithm::Rs256);
        assert!(matches!(result, Err(CredentialError::InvalidKey(_))));
    }

    #[test]
    fn test_missing_key_file() {
        let result = TokenSigner::from_pem_file("/nonexistent/rsa_private.pem", SigningAlgorithm::Es256);
        assert!(matches!(result, Err(CredentialError::KeyFile { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_follows_ttl() {
        let signer = TokenSigner::from_secret(SECRET);
        let credential = signer.issue("p", Duration::from_secs(60)).unwrap();
        assert!(!credential.is_stale());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!credential.is_stale());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(credential.is_stale());
    }
}
